// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Mailbox server
//!
//! A host tool, attached to the loader MCU with its own debugger, drives the
//! loader by writing a [`Record`] at [`MAILBOX_LOC`] in the loader's RAM.
//! [`Mailbox`] polls that record, runs the command against a
//! [`MailboxHandler`] (normally [`Cooper`]), and writes the status back over
//! the command word.  The host polls until the command word stops matching
//! the pending pattern.
//!
//! There is one record and no sequence number.  The host must not post a
//! new command until it has seen the status of the previous one.

use alloc::vec::Vec;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use cooper_core::cooper::PAGE_SIZE_BYTES;
use cooper_mbox::{
    Command, MAILBOX_LOC, OFFSET_CMD_STATUS, OFFSET_PARAM0, OFFSET_PARAM1, OFFSET_PARAM2,
    POLL_INTERVAL_US, RECORD_WORDS, Record, STATUS_OK,
};

use crate::SwdError;
use crate::cooper::Cooper;
use crate::driver::SwdDriver;

/// Access to the loader's own address space, where the mailbox record and
/// the host tool's buffers live.
pub trait HostMemory {
    /// Single word read
    fn read_u32(&mut self, addr: u32) -> Result<u32, SwdError>;

    /// Single word write
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), SwdError>;

    /// Bulk read
    fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<(), SwdError> {
        for (ii, word) in buf.iter_mut().enumerate() {
            *word = self.read_u32(addr.wrapping_add(ii as u32 * 4))?;
        }
        Ok(())
    }

    /// Bulk write
    fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<(), SwdError> {
        for (ii, word) in data.iter().enumerate() {
            self.write_u32(addr.wrapping_add(ii as u32 * 4), *word)?;
        }
        Ok(())
    }
}

/// [`HostMemory`] using direct, volatile, RAM access
#[derive(Debug, Clone, Copy)]
pub struct RawHostMemory;

impl RawHostMemory {
    /// # Safety
    ///
    /// Every address accessed through the returned object, which includes
    /// the mailbox record and any buffer address a host tool puts in a
    /// command, must be valid, aligned, RAM in this address space, and
    /// not otherwise in use by Rust code.
    pub const unsafe fn new() -> Self {
        Self
    }
}

impl HostMemory for RawHostMemory {
    fn read_u32(&mut self, addr: u32) -> Result<u32, SwdError> {
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u32) })
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), SwdError> {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) };
        Ok(())
    }
}

/// Implemented by objects which can act on mailbox commands.
///
/// Each method receives the record's three parameters, in order, and the
/// host memory any buffer parameters point into.  See [`Command`] for what
/// the parameters mean.
pub trait MailboxHandler {
    /// Whether errors other than those which are always fatal should stop
    /// the mailbox server.
    fn halt_on_errors(&self) -> bool;

    fn flash_write(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;

    fn read(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;

    fn mem_write(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;

    fn read_state(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;

    fn mem_dump(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;

    fn reset(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;

    fn soft_reset(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;

    fn reset_halt(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError>;
}

fn alloc_words(count: usize) -> Result<Vec<u32>, SwdError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(count)
        .map_err(|_| SwdError::OutOfMemory)?;
    buf.resize(count, 0);
    Ok(buf)
}

impl<D, DL, R> MailboxHandler for Cooper<'_, D, DL, R>
where
    D: SwdDriver,
    DL: DelayNs,
    R: OutputPin,
{
    fn halt_on_errors(&self) -> bool {
        self.debug().config().halt_on_errors
    }

    /// Loads the flash algorithm, then programs `param2` bytes from host
    /// address `param1` to flash address `param0`, verifying them if
    /// `verify_downloads` is set.
    ///
    /// The source is read from the host through the end of the last page
    /// written, and any bytes past `param2` are programmed too.
    fn flash_write(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        if param0 & 0x3 != 0 || param1 & 0x3 != 0 || param2 & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }

        let offset = param0 & (PAGE_SIZE_BYTES - 1);
        let span = offset
            .checked_add(param2)
            .and_then(|end| end.checked_next_multiple_of(PAGE_SIZE_BYTES))
            .ok_or(SwdError::Param)?;
        let mut words = alloc_words(((span - offset) / 4) as usize)?;
        host.read_bulk(param1, &mut words)?;
        let src: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        drop(words);

        self.load_algorithm()?;

        let result = self.program(param0, &src, param2);
        if let Err(e) = &result {
            if e.is_fatal(self.halt_on_errors()) {
                return result;
            }
        }

        if self.debug().config().verify_downloads {
            self.verify(param0, &src, param2)
        } else {
            result
        }
    }

    /// Reads `param2 / 4` words of target memory at `param0` into host
    /// memory at `param1`.
    fn read(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        let mut words = alloc_words((param2 / 4) as usize)?;
        self.debug_mut().mem_read_words(param0, &mut words)?;
        host.write_bulk(param1, &words)
    }

    /// Writes `param2 / 4` words from host memory at `param1` to target
    /// memory at `param0`.
    fn mem_write(
        &mut self,
        param0: u32,
        param1: u32,
        param2: u32,
        host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        let mut words = alloc_words((param2 / 4) as usize)?;
        host.read_bulk(param1, &mut words)?;
        self.debug_mut().mem_write_words(param0, &words)
    }

    fn read_state(
        &mut self,
        _param0: u32,
        _param1: u32,
        _param2: u32,
        _host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        Cooper::read_state(self).map(|_| ())
    }

    fn mem_dump(
        &mut self,
        param0: u32,
        param1: u32,
        _param2: u32,
        _host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        self.print_memory(param0, param1)
    }

    fn reset(
        &mut self,
        _param0: u32,
        _param1: u32,
        _param2: u32,
        _host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        Cooper::reset(self)
    }

    fn soft_reset(
        &mut self,
        _param0: u32,
        _param1: u32,
        _param2: u32,
        _host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        Cooper::soft_reset(self, false)
    }

    fn reset_halt(
        &mut self,
        _param0: u32,
        _param1: u32,
        _param2: u32,
        _host: &mut dyn HostMemory,
    ) -> Result<(), SwdError> {
        Cooper::soft_reset(self, true)
    }
}

/// Mailbox server
///
/// ```rust,ignore
/// use cooper_swd::mailbox::{Mailbox, RawHostMemory};
///
/// // Safety: MAILBOX_LOC is reserved for the mailbox, and the host tool
/// // only passes buffers in RAM it owns.
/// let mut mailbox = Mailbox::new(unsafe { RawHostMemory::new() });
/// let e = mailbox.serve(&mut cooper, &mut delay);
/// error!("Mailbox stopped: {e}");
/// loop {}
/// ```
#[derive(Debug)]
pub struct Mailbox<H> {
    host: H,
    base: u32,
}

impl<H: HostMemory> Mailbox<H> {
    /// Creates a mailbox at [`MAILBOX_LOC`]
    pub fn new(host: H) -> Self {
        Self::with_base(host, MAILBOX_LOC)
    }

    pub fn with_base(host: H, base: u32) -> Self {
        Self { host, base }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Zeroes the record
    pub fn clear(&mut self) -> Result<(), SwdError> {
        self.host.write_bulk(self.base, &[0; RECORD_WORDS])
    }

    /// Reads the record
    pub fn record(&mut self) -> Result<Record, SwdError> {
        let mut words = [0; RECORD_WORDS];
        self.host.read_bulk(self.base, &mut words)?;
        Ok(Record::from_words(words))
    }

    fn write_status(&mut self, status: u32) -> Result<(), SwdError> {
        self.host.write_u32(self.base + OFFSET_CMD_STATUS, status)
    }

    /// Handles the pending command, if there is one.
    ///
    /// The command's status is written over the command word.  Unknown
    /// commands are not passed to the handler, and get
    /// [`cooper_mbox::STATUS_UNKNOWN`].
    ///
    /// Returns:
    /// - `Ok(false)`: if no command was pending.
    /// - `Ok(true)`: if a command was handled, whatever its status.
    /// - `Err(SwdError)`: if the command failed fatally.  Its status has
    ///   been written.
    pub fn service<M: MailboxHandler>(&mut self, handler: &mut M) -> Result<bool, SwdError> {
        let cmd_status = self.host.read_u32(self.base + OFFSET_CMD_STATUS)?;
        if !cooper_mbox::is_pending(cmd_status) {
            return Ok(false);
        }

        let param0 = self.host.read_u32(self.base + OFFSET_PARAM0)?;
        let param1 = self.host.read_u32(self.base + OFFSET_PARAM1)?;
        let param2 = self.host.read_u32(self.base + OFFSET_PARAM2)?;
        info!("Received Mailbox Command 0x{cmd_status:x}");
        trace!("Value: 0x{param0:08X} 0x{param1:08X} 0x{param2:08X}");

        let command = match Command::from_word(cmd_status) {
            Ok(command) => command,
            Err(e) => {
                warn!("Error: {e}");
                self.write_status(e.status())?;
                return Ok(true);
            }
        };

        debug!("Exec:  {command}");
        let host: &mut dyn HostMemory = &mut self.host;
        let result = match command {
            Command::FlashWrite => handler.flash_write(param0, param1, param2, host),
            Command::Read => handler.read(param0, param1, param2, host),
            Command::MemWrite => handler.mem_write(param0, param1, param2, host),
            Command::ReadState => handler.read_state(param0, param1, param2, host),
            Command::MemDump => handler.mem_dump(param0, param1, param2, host),
            Command::Reset => handler.reset(param0, param1, param2, host),
            Command::SoftReset => handler.soft_reset(param0, param1, param2, host),
            Command::ResetHalt => handler.reset_halt(param0, param1, param2, host),
        };

        let status = match &result {
            Ok(()) => STATUS_OK,
            Err(e) => e.status(),
        };
        info!("Complete.");
        info!("Return Status 0x{status:x}");
        self.write_status(status)?;

        match result {
            Err(e) if e.is_fatal(handler.halt_on_errors()) => {
                error!("Error: {command} failed: {e}");
                Err(e)
            }
            _ => Ok(true),
        }
    }

    /// Clears the record, then services commands until one fails fatally,
    /// polling every [`POLL_INTERVAL_US`].
    ///
    /// Returns the fatal error.  It is up to the caller to stop.
    pub fn serve<M: MailboxHandler, DL: DelayNs>(
        &mut self,
        handler: &mut M,
        delay: &mut DL,
    ) -> SwdError {
        info!("Polling for Mailbox messages.");
        if let Err(e) = self.clear() {
            return e;
        }

        loop {
            if let Err(e) = self.service(handler) {
                return e;
            }
            delay.delay_us(POLL_INTERVAL_US);
        }
    }
}
