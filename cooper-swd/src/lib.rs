// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! cooper-swd library
//!
//! Bit-banged ARM Serial Wire Debug (SWD) and the Cooper flash programming
//! protocol built on top of it.
//!
//! This is used by the Cooper loader, which runs on a host MCU wired to the
//! Cooper co-processor's SWD pins, to load a RAM-resident flash algorithm
//! onto Cooper and stream firmware images through it a page at a time.
//!
//! The following diagram shows the key `cooper-swd` concepts.
//!
//! ```text
//!   Host tool  ==  debugger  ==>  Mailbox (MAILBOX_LOC in loader RAM)
//! ----------------------------
//!          Mailbox             \
//! ----------------------------  \
//!           Cooper               |
//! ----------------------------   |
//!       DebugInterface           |--  SwdError
//! ----------------------------   |
//!        SwdInterface            |    SwdMemory
//! ----------------------------  /
//!    SwdDriver (BitBang)       /                      ----------------
//! ----------------------------                           Cooper target
//!     embedded-hal pins     >======================<     (Cortex-M)
//!                             SWDIO/SWCLK/GND
//! ```
//!
//! * [`Mailbox`] serves commands a host tool leaves in the loader's RAM.
//! * [`Cooper`] loads the flash algorithm and programs, verifies and
//!   inspects the target.
//! * [`DebugInterface`] exposes a small set of target control primitives:
//!   connect, halt, run, memory and core register access.
//! * [`SwdInterface`] is the SWD packet engine.  It frames individual DP and
//!   AP transfers, keeping a command queue in memory from [`SwdMemory`].
//! * [`SwdDriver`] clocks raw bits.  [`BitBang`] implements it over
//!   `embedded-hal` GPIOs and a delay.
//!
//! Errors never spin.  Every operation returns a [`SwdError`], and
//! [`SwdError::is_fatal()`] tells the top-level caller whether the
//! configured policy says to stop.
//!
//! `cooper-swd` uses and is designed to be used alongside the
//! [`cooper_core`] library, which provides the register definitions and
//! target constants, and [`cooper_mbox`], which defines the mailbox wire
//! format.
//!
//! This library is `no_std` and requires an `alloc` implementation.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod cooper;
pub mod debug;
pub mod driver;
pub mod interface;
pub mod mailbox;
pub mod memory;
pub mod protocol;

#[cfg(test)]
pub(crate) mod sim;

#[doc(inline)]
pub use crate::config::SwdConfig;
#[doc(inline)]
pub use crate::cooper::Cooper;
#[doc(inline)]
pub use crate::debug::DebugInterface;
#[doc(inline)]
pub use crate::driver::SwdDriver;
#[doc(inline)]
pub use crate::interface::SwdInterface;
#[doc(inline)]
pub use crate::mailbox::Mailbox;
#[doc(inline)]
pub use crate::memory::SwdMemory;
#[doc(inline)]
pub use crate::protocol::BitBang;

extern crate alloc;
use alloc::format;
use alloc::string::String;
use core::fmt;
use serde::Serialize;

use cooper_mbox::STATUS_FAILED;

/// Core error type used by all cooper-swd objects
///
/// Methods are provided to make it easier to handle errors:
///
/// - [`SwdError::requires_retry()`]
/// - [`SwdError::requires_reset()`]
/// - [`SwdError::is_fatal()`]
/// - [`SwdError::status()`], the code reported back through the mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwdError {
    /// The target answered WAIT more times than the configured number of
    /// retries.
    WaitAck,

    /// The target answered FAULT.  A sticky error is set in the DP and must
    /// be cleared, normally by reconnecting.
    FaultAck,

    /// The ACK phase held neither OK, WAIT nor FAULT.  The value received
    /// is included.  7 means SWDIO was high for the whole ACK, which is
    /// what an unpowered or unconnected target looks like.
    NoAck(u8),

    /// The parity bit of a read did not match the data.
    ReadParity,

    /// DP CTRL/STAT reported a sticky error.
    DpError,

    /// No protocol error, but the operation did not take effect.
    OperationFailed(String),

    /// The interface has not been initialized, or the debug domain is not
    /// powered up.  Call [`DebugInterface::connect()`] first.
    NotReady,

    /// The API was called incorrectly.
    Api,

    /// A poll ran out of attempts.
    Timeout,

    /// The requested operation is not supported with this configuration.
    Unsupported,

    /// A bit count or bit order passed to the driver was out of range.
    Param,

    /// A turnaround count passed to the driver was out of range.
    Turnaround,

    /// A GPIO operation failed.
    Gpio,

    /// The packet engine's fixed pool or arena is exhausted.
    OutOfMemory,

    /// A flash address or length was not word aligned.
    Alignment,

    /// Flash read back differs from the image.  The first mismatching
    /// address is included.
    VerifyFailed(u32),
}

impl SwdError {
    pub(crate) fn from_ack(ack: u8) -> Result<(), SwdError> {
        match ack {
            1 => Ok(()),
            2 => Err(SwdError::WaitAck),
            4 => Err(SwdError::FaultAck),
            _ => Err(SwdError::NoAck(ack)),
        }
    }

    /// Returns true if the error requires reconnecting to the target, using
    /// [`DebugInterface::connect()`], to recover.  If the error persists the
    /// target may need a hard reset.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            SwdError::NoAck(_) | SwdError::FaultAck | SwdError::ReadParity | SwdError::DpError
        )
    }

    /// Returns true if the error is transient and can be retried.
    pub fn requires_retry(&self) -> bool {
        matches!(self, SwdError::WaitAck)
    }

    /// Returns true if the tool should stop on this error.
    ///
    /// Running out of packet engine memory and a flash algorithm that never
    /// completes are always fatal.  Everything else is fatal only when
    /// `halt_on_errors` is set.
    pub fn is_fatal(&self, halt_on_errors: bool) -> bool {
        match self {
            SwdError::OutOfMemory | SwdError::Timeout => true,
            _ => halt_on_errors,
        }
    }

    /// Status code written back to the mailbox.
    ///
    /// Transport errors use negative codes and a verify failure is 1.  A
    /// misaligned flash request reports [`STATUS_FAILED`], as a plain -1
    /// would match the pending pattern.
    pub fn status(&self) -> u32 {
        let code: i32 = match self {
            SwdError::Alignment => return STATUS_FAILED,
            SwdError::VerifyFailed(_) => 1,
            SwdError::Api => -2,
            SwdError::Timeout => -3,
            SwdError::Unsupported => -4,
            SwdError::Param => -5,
            SwdError::OutOfMemory => -6,
            SwdError::OperationFailed(_) => -7,
            SwdError::DpError => -11,
            SwdError::ReadParity => -15,
            SwdError::NoAck(_) => -16,
            SwdError::NotReady => -29,
            SwdError::Turnaround => -34,
            SwdError::Gpio => -35,
            SwdError::WaitAck => -36,
            SwdError::FaultAck => -37,
        };
        code as u32
    }
}

impl SwdError {
    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwdError::WaitAck => "Wait ACK",
            SwdError::FaultAck => "Fault ACK",
            SwdError::NoAck(_) => "No ACK",
            SwdError::ReadParity => "Read Parity Error",
            SwdError::DpError => "Debug Port Error",
            SwdError::OperationFailed(_) => "Operation Failed",
            SwdError::NotReady => "Not Ready",
            SwdError::Api => "API Error",
            SwdError::Timeout => "Timeout",
            SwdError::Unsupported => "Unsupported Operation",
            SwdError::Param => "Invalid Parameter",
            SwdError::Turnaround => "Invalid Turnaround",
            SwdError::Gpio => "GPIO Error",
            SwdError::OutOfMemory => "Out Of Memory",
            SwdError::Alignment => "Alignment Error",
            SwdError::VerifyFailed(_) => "Verify Failed",
        }
    }
}

impl Serialize for SwdError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SwdError", 2)?;

        let kind = match self {
            SwdError::WaitAck => "wait ack",
            SwdError::FaultAck => "fault ack",
            SwdError::NoAck(_) => "no ack",
            SwdError::ReadParity => "read parity",
            SwdError::DpError => "debug port",
            SwdError::OperationFailed(_) => "operation failed",
            SwdError::NotReady => "not ready",
            SwdError::Api => "api error",
            SwdError::Timeout => "timeout",
            SwdError::Unsupported => "unsupported",
            SwdError::Param => "param",
            SwdError::Turnaround => "turnaround",
            SwdError::Gpio => "gpio",
            SwdError::OutOfMemory => "out of memory",
            SwdError::Alignment => "alignment",
            SwdError::VerifyFailed(_) => "verify failed",
        };

        state.serialize_field("kind", kind)?;

        let detail = match self {
            SwdError::OperationFailed(msg) => msg.clone(),
            SwdError::NoAck(code) => format!("{code}"),
            SwdError::VerifyFailed(addr) => format!("0x{addr:08X}"),
            _ => String::new(),
        };
        state.serialize_field("detail", &detail)?;
        state.end()
    }
}

impl fmt::Display for SwdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdError::NoAck(ack) => write!(f, "{}: {ack}", self.as_str()),
            SwdError::OperationFailed(str) => write!(f, "{}: {str}", self.as_str()),
            SwdError::VerifyFailed(addr) => write!(f, "{}: 0x{addr:08X}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_decoding() {
        assert_eq!(SwdError::from_ack(1), Ok(()));
        assert_eq!(SwdError::from_ack(2), Err(SwdError::WaitAck));
        assert_eq!(SwdError::from_ack(4), Err(SwdError::FaultAck));
        assert_eq!(SwdError::from_ack(7), Err(SwdError::NoAck(7)));
        assert!(SwdError::WaitAck.requires_retry());
        assert!(SwdError::NoAck(7).requires_reset());
        assert!(!SwdError::Timeout.requires_reset());
    }

    #[test]
    fn fatal_policy() {
        assert!(SwdError::OutOfMemory.is_fatal(false));
        assert!(SwdError::Timeout.is_fatal(false));
        assert!(!SwdError::VerifyFailed(0).is_fatal(false));
        assert!(SwdError::VerifyFailed(0).is_fatal(true));
        assert!(!SwdError::FaultAck.is_fatal(false));
    }

    #[test]
    fn status_codes() {
        assert_eq!(SwdError::Alignment.status(), STATUS_FAILED);
        assert_eq!(SwdError::VerifyFailed(0x4000).status(), 1);
        assert_eq!(SwdError::FaultAck.status(), (-37i32) as u32);
        assert_ne!(SwdError::Timeout.status(), 0);
    }

    #[test]
    fn status_never_pending() {
        for err in [
            SwdError::Alignment,
            SwdError::VerifyFailed(0xFFFF_FFFF),
            SwdError::Api,
            SwdError::Timeout,
            SwdError::Unsupported,
            SwdError::Param,
            SwdError::OutOfMemory,
            SwdError::OperationFailed(String::from("erase")),
            SwdError::DpError,
            SwdError::ReadParity,
            SwdError::NoAck(7),
            SwdError::NotReady,
            SwdError::Turnaround,
            SwdError::Gpio,
            SwdError::WaitAck,
            SwdError::FaultAck,
        ] {
            let status = err.status();
            assert!(!cooper_mbox::is_pending(status), "{err}: 0x{status:08X}");
            assert_ne!(status, cooper_mbox::STATUS_OK, "{err}");
        }
    }

    #[test]
    fn display() {
        assert_eq!(SwdError::NoAck(7).to_string(), "No ACK: 7");
        assert_eq!(
            SwdError::VerifyFailed(0x1FF8).to_string(),
            "Verify Failed: 0x00001FF8"
        );
    }
}
