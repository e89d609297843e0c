//! Session configuration
//!
//! All timing values here are tuning parameters, not hardware guarantees.
//! Defaults are wider than what most chipsets need.

use smbus_chip::{i801, piix4, PollBudget};
use std::time::Duration;

/// How much of a module's address space a dump covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpMode {
    /// Identity, timing and manufacturing ranges only
    #[default]
    Compact,
    /// Every address the generation defines
    Full,
}

/// Bus session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Hint passed to the port when taking the global bus lock
    pub lock_timeout: Duration,

    /// Completion wait on Intel controllers
    pub i801_poll: PollBudget,

    /// Completion wait on PIIX4-family controllers
    pub piix4_poll: PollBudget,

    /// Extra attempts the SPD layer makes after a retryable failure
    pub retries: u8,

    /// SB800-class multiplexed port carrying the memory modules
    pub piix4_port: u8,

    /// Coverage of [`crate::BusSession::spd_dump`] when no mode is given
    pub dump_mode: DumpMode,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(500),
            i801_poll: i801::DEFAULT_POLL,
            piix4_poll: piix4::DEFAULT_POLL,
            retries: 2,
            piix4_port: 0,
            dump_mode: DumpMode::Compact,
        }
    }
}

impl BusConfig {
    /// Set the bus lock timeout hint
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the Intel completion budget
    #[must_use]
    pub const fn with_i801_poll(mut self, poll: PollBudget) -> Self {
        self.i801_poll = poll;
        self
    }

    /// Set the PIIX4-family completion budget
    #[must_use]
    pub const fn with_piix4_poll(mut self, poll: PollBudget) -> Self {
        self.piix4_poll = poll;
        self
    }

    /// Set SPD retry count
    #[must_use]
    pub const fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    /// Set the SB800-class port
    #[must_use]
    pub const fn with_piix4_port(mut self, port: u8) -> Self {
        self.piix4_port = port;
        self
    }

    /// Set the default dump coverage
    #[must_use]
    pub const fn with_dump_mode(mut self, mode: DumpMode) -> Self {
        self.dump_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = BusConfig::default();
        assert!(config.i801_poll.worst_case_us() <= 1_000_000);
        assert!(config.piix4_poll.worst_case_us() <= 1_000_000);
        assert_eq!(config.piix4_port, 0);
    }

    #[test]
    fn builder_overrides() {
        let config = BusConfig::default()
            .with_retries(0)
            .with_piix4_port(2)
            .with_dump_mode(DumpMode::Full);
        assert_eq!(config.retries, 0);
        assert_eq!(config.piix4_port, 2);
        assert_eq!(config.dump_mode, DumpMode::Full);
    }
}
