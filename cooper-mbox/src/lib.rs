// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! cooper-mbox - Cooper loader mailbox wire format
//!
//! The Cooper loader runs on a host MCU and waits for instructions in a
//! small record at [`MAILBOX_LOC`] in its own RAM.  A host tool (typically a
//! debugger attached to the host MCU) fills in the parameters and then
//! writes a command word.  The loader carries out the command against the
//! Cooper target over SWD and overwrites the command word with a status.
//!
//! Record layout, all little-endian 32-bit words:
//!
//! | Offset | Field |
//! |---|---|
//! | 0 | command on entry, status on exit |
//! | 4 | param0 |
//! | 8 | param1 |
//! | 12 | param2 |
//!
//! This crate is `no_std` and platform agnostic.  It is shared by the
//! loader ([`cooper-swd`](../cooper_swd/index.html)) and host tooling.

#![cfg_attr(not(test), no_std)]

use core::fmt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

/// Address of the mailbox record in the loader's address space
pub const MAILBOX_LOC: u32 = 0x1004_0000;

/// Byte offsets of the record fields
pub const OFFSET_CMD_STATUS: u32 = 0;
pub const OFFSET_PARAM0: u32 = 4;
pub const OFFSET_PARAM1: u32 = 8;
pub const OFFSET_PARAM2: u32 = 12;

/// Number of words in the record
pub const RECORD_WORDS: usize = 4;

/// Interval between mailbox polls, in microseconds
pub const POLL_INTERVAL_US: u32 = 100;

/// A word is a pending command when these bits match [`PENDING_PATTERN`]
pub const PENDING_MASK: u32 = 0xFF00_FFFF;
pub const PENDING_PATTERN: u32 = 0xFF00_FFFF;

/// Command codes
pub const CMD_FLASH_WRITE: u32 = 0xFF00_FFFF;
pub const CMD_READ: u32 = 0xFF01_FFFF;
pub const CMD_MEM_WRITE: u32 = 0xFF02_FFFF;
pub const CMD_READ_STATE: u32 = 0xFF03_FFFF;
pub const CMD_MEM_DUMP: u32 = 0xFF04_FFFF;
pub const CMD_RESET: u32 = 0xFF05_FFFF;
pub const CMD_SOFT_RESET: u32 = 0xFF06_FFFF;
pub const CMD_RESET_HALT: u32 = 0xFF07_FFFF;

/// Status codes written back over the command word.  Other values are
/// error specific, see `SwdError::status` in `cooper-swd`.  No status may
/// match the pending pattern, or the host would never see completion.
pub const STATUS_OK: u32 = 0;

/// -1 with bit 16 cleared, so it reads as a negative error but is not
/// pending.
pub const STATUS_FAILED: u32 = 0xFFFE_FFFF;
pub const STATUS_UNKNOWN: u32 = STATUS_FAILED;

/// Returns whether `word` holds a command awaiting service
pub const fn is_pending(word: u32) -> bool {
    (word & PENDING_MASK) == PENDING_PATTERN
}

/// Mailbox commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Load the flash algorithm and program param2 bytes from host address
    /// param1 to target flash at param0
    FlashWrite = CMD_FLASH_WRITE,
    /// Read param2 bytes from target address param0 into host address
    /// param1
    Read = CMD_READ,
    /// Write param2 bytes from host address param1 to target address param0
    MemWrite = CMD_MEM_WRITE,
    /// Halt the target and log its core state
    ReadState = CMD_READ_STATE,
    /// Log param1 bytes of target memory starting at param0
    MemDump = CMD_MEM_DUMP,
    /// Pulse the target's reset line and reconnect
    Reset = CMD_RESET,
    /// System reset via AIRCR, leaving the target running
    SoftReset = CMD_SOFT_RESET,
    /// System reset via AIRCR, catching the target at its reset vector
    ResetHalt = CMD_RESET_HALT,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::FlashWrite => write!(f, "Flash Write"),
            Command::Read => write!(f, "Read"),
            Command::MemWrite => write!(f, "Memory Write"),
            Command::ReadState => write!(f, "Read State"),
            Command::MemDump => write!(f, "Memory Dump"),
            Command::Reset => write!(f, "Reset"),
            Command::SoftReset => write!(f, "Soft Reset"),
            Command::ResetHalt => write!(f, "Reset Halt"),
        }
    }
}

impl Command {
    /// Converts a Command to its word representation
    ///
    /// Returns:
    /// - `u32`: The command word.
    pub fn to_word(self) -> u32 {
        self as u32
    }

    /// Convert a command word to a `Command` enum variant
    ///
    /// Arguments:
    /// - `cmd`: The command word to convert.
    ///
    /// Returns:
    /// - `Ok(Command)`: If the command word is recognized.
    /// - `Err(ProtocolError::Command)`: If the command word is not
    ///   recognized.  This includes words that match the pending pattern
    ///   but carry an unassigned command byte.
    pub fn from_word(cmd: u32) -> Result<Self, ProtocolError> {
        match cmd {
            CMD_FLASH_WRITE => Ok(Self::FlashWrite),
            CMD_READ => Ok(Self::Read),
            CMD_MEM_WRITE => Ok(Self::MemWrite),
            CMD_READ_STATE => Ok(Self::ReadState),
            CMD_MEM_DUMP => Ok(Self::MemDump),
            CMD_RESET => Ok(Self::Reset),
            CMD_SOFT_RESET => Ok(Self::SoftReset),
            CMD_RESET_HALT => Ok(Self::ResetHalt),
            _ => Err(ProtocolError::Command(cmd)),
        }
    }
}

/// Mailbox protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unrecognised command word
    Command(u32),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Command(cmd) => write!(f, "Unknown command: 0x{cmd:08X}"),
        }
    }
}

impl ProtocolError {
    /// Status word to report to the host
    pub fn status(&self) -> u32 {
        STATUS_UNKNOWN
    }
}

/// A decoded mailbox record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    pub cmd_status: u32,
    pub param0: u32,
    pub param1: u32,
    pub param2: u32,
}

impl Record {
    /// Builds a record carrying `cmd` and its parameters, ready to be
    /// written by a host tool
    pub fn new(cmd: Command, param0: u32, param1: u32, param2: u32) -> Self {
        Self {
            cmd_status: cmd.to_word(),
            param0,
            param1,
            param2,
        }
    }

    pub fn from_words(words: [u32; RECORD_WORDS]) -> Self {
        Self {
            cmd_status: words[0],
            param0: words[1],
            param1: words[2],
            param2: words[3],
        }
    }

    pub fn to_words(&self) -> [u32; RECORD_WORDS] {
        [self.cmd_status, self.param0, self.param1, self.param2]
    }

    pub fn is_pending(&self) -> bool {
        is_pending(self.cmd_status)
    }

    /// Decodes the command, if one is pending
    ///
    /// Returns:
    /// - `None`: If no command is pending.
    /// - `Some(Ok(Command))`: A recognised pending command.
    /// - `Some(Err(ProtocolError))`: A pending but unrecognised command.
    pub fn command(&self) -> Option<Result<Command, ProtocolError>> {
        if self.is_pending() {
            let cmd = Command::from_word(self.cmd_status);
            if let Err(e) = &cmd {
                debug!("Mailbox: {e}");
            }
            Some(cmd)
        } else {
            None
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:08X} 0x{:08X} 0x{:08X} 0x{:08X}",
            self.cmd_status, self.param0, self.param1, self.param2
        )
    }
}
