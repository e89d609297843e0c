//! Bus-access port implementations
//!
//! - [`DevPort`]: Linux `/dev/port`, sysfs config space, `/dev/mem`
//! - [`SimulatedPort`]: software platform model for CI and `--simulate`

pub mod linux;
pub mod mmap;
pub mod sim;

pub use linux::{BusLock, DevPort};
pub use sim::SimulatedPort;
