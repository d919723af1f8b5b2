// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Runtime configuration
//!
//! Everything that changes how the transport, packet engine and programmer
//! behave lives in [`SwdConfig`], so the same build can be run with
//! verification or error halting turned on or off.

use serde::{Deserialize, Serialize};

/// Default number of retries after a WAIT ACK
pub const DEFAULT_WAIT_RETRIES: u32 = 2;

/// Default SWCLK half period in microseconds
pub const DEFAULT_HALF_CLOCK_US: u32 = 1;

/// cooper-swd configuration
///
/// ```rust
/// use cooper_swd::SwdConfig;
///
/// let config = SwdConfig::default()
///     .with_verify_download_buffer(true)
///     .with_halt_poll_limit(Some(1000));
/// assert!(config.verify_downloads);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwdConfig {
    /// SWCLK idles low rather than high
    pub idle_low: bool,

    /// SWCLK half period, in microseconds
    pub half_clock_us: u32,

    /// Treat every error as fatal, rather than only out of memory and
    /// flash algorithm timeouts
    pub halt_on_errors: bool,

    /// Log failing operations and their status codes
    pub print_swd_errors: bool,

    /// Emit the programmer's diagnostic output (register dumps, memory
    /// dumps, allocator statistics)
    pub enable_printing: bool,

    /// Read back flash after a mailbox flash write
    pub verify_downloads: bool,

    /// Read back the flash algorithm after loading it
    pub verify_algorithm: bool,

    /// Read back the SRAM scratch buffer before running the algorithm on it
    pub verify_download_buffer: bool,

    /// Maximum number of halt checks before giving up.  `None` polls
    /// forever.
    pub halt_poll_limit: Option<u32>,

    /// Retries after a WAIT ACK before failing the transfer
    pub wait_retries: u32,
}

impl Default for SwdConfig {
    fn default() -> Self {
        Self {
            idle_low: false,
            half_clock_us: DEFAULT_HALF_CLOCK_US,
            halt_on_errors: true,
            print_swd_errors: true,
            enable_printing: true,
            verify_downloads: true,
            verify_algorithm: true,
            verify_download_buffer: false,
            halt_poll_limit: None,
            wait_retries: DEFAULT_WAIT_RETRIES,
        }
    }
}

impl SwdConfig {
    pub const fn with_idle_low(mut self, idle_low: bool) -> Self {
        self.idle_low = idle_low;
        self
    }

    pub const fn with_half_clock_us(mut self, half_clock_us: u32) -> Self {
        self.half_clock_us = half_clock_us;
        self
    }

    pub const fn with_halt_on_errors(mut self, halt_on_errors: bool) -> Self {
        self.halt_on_errors = halt_on_errors;
        self
    }

    pub const fn with_print_swd_errors(mut self, print_swd_errors: bool) -> Self {
        self.print_swd_errors = print_swd_errors;
        self
    }

    pub const fn with_enable_printing(mut self, enable_printing: bool) -> Self {
        self.enable_printing = enable_printing;
        self
    }

    pub const fn with_verify_downloads(mut self, verify_downloads: bool) -> Self {
        self.verify_downloads = verify_downloads;
        self
    }

    pub const fn with_verify_algorithm(mut self, verify_algorithm: bool) -> Self {
        self.verify_algorithm = verify_algorithm;
        self
    }

    pub const fn with_verify_download_buffer(mut self, verify_download_buffer: bool) -> Self {
        self.verify_download_buffer = verify_download_buffer;
        self
    }

    pub const fn with_halt_poll_limit(mut self, halt_poll_limit: Option<u32>) -> Self {
        self.halt_poll_limit = halt_poll_limit;
        self
    }

    pub const fn with_wait_retries(mut self, wait_retries: u32) -> Self {
        self.wait_retries = wait_retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_loader_build() {
        let config = SwdConfig::default();
        assert!(!config.idle_low);
        assert_eq!(config.half_clock_us, 1);
        assert!(config.halt_on_errors);
        assert!(config.print_swd_errors);
        assert!(config.enable_printing);
        assert!(config.verify_downloads);
        assert!(config.verify_algorithm);
        assert!(!config.verify_download_buffer);
        assert_eq!(config.halt_poll_limit, None);
        assert_eq!(config.wait_retries, 2);
    }

    #[test]
    fn builders() {
        let config = SwdConfig::default()
            .with_idle_low(true)
            .with_halt_on_errors(false)
            .with_halt_poll_limit(Some(10))
            .with_wait_retries(0);
        assert!(config.idle_low);
        assert!(!config.halt_on_errors);
        assert_eq!(config.halt_poll_limit, Some(10));
        assert_eq!(config.wait_retries, 0);
        assert!(config.verify_downloads);
    }
}
