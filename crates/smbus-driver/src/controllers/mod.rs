//! Controller backends

pub mod i801;
pub mod piix4;
