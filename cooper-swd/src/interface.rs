// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD Packet Engine
//!
//! [`SwdInterface`] frames individual SWD transfers over a [`SwdDriver`] and
//! builds the DP/AP and memory access sequences on top of them.
//!
//! Every transfer is recorded as a node in a command queue.  The nodes live
//! in [`SwdMemory`] fixed pool slots and are linked through the slots
//! themselves, so the queue grows until [`SwdInterface::free_queue()`] is
//! called.  [`crate::DebugInterface`] does this after every operation.  If
//! you drive [`SwdInterface`] directly, you must do the same, or the pool
//! will run out.
//!
//! The engine's register cache (IDCODE, DP SELECT and MEM-AP CSW) is
//! allocated from the [`SwdMemory`] arena by [`SwdInterface::initialize()`].

use alloc::format;
use alloc::string::ToString;
use core::fmt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use cooper_core::arm::Cortex;
use cooper_core::arm::dp::{
    Abort, AbortRegister, CtrlStat, CtrlStatRegister, IdCode, IdCodeRegister, RdBuffRegister,
    Select, SelectRegister,
};
use cooper_core::arm::map::{Csw, CswRegister, Drw, DrwRegister, Tar, TarRegister};
use cooper_core::arm::register::{
    ApRegister, DpRegister, ReadableRegister, RegisterDescriptor, WritableRegister,
};

use crate::SwdError;
use crate::driver::{BitOrder, SwdDriver};
use crate::memory::{Allocation, FIXED_BUFFER_SIZE, SlotHandle, SwdMemory};

// TAR auto-increment is only guaranteed within a 1KB block
const SWD_MEMORY_BOUNDARY: u32 = 0x400;

const LINE_RESET_WORDS: usize = 2;
const JTAG_TO_SWD: u32 = 0xE79E;
const IDLE_CYCLES: u8 = 8;
const POWER_UP_POLLS: u32 = 10;

// Engine context layout, in the arena
const CTX_IDCODE: usize = 0;
const CTX_SELECT: usize = 4;
const CTX_CSW: usize = 8;
const CTX_FLAGS: usize = 12;
const CTX_TRANSFERS: usize = 16;
const CONTEXT_SIZE: usize = 20;

const FLAG_POWERED_UP: u32 = 1 << 0;
const FLAG_CONNECTED: u32 = 1 << 1;
const FLAG_CSW_VALID: u32 = 1 << 2;

// Queue node layout, in a fixed slot
const NODE_REQUEST: usize = 0;
const NODE_ACK: usize = 1;
const NODE_NEXT: usize = 2;
const NODE_STATE: usize = 3;
const NODE_DATA: usize = 4;
const NODE_NONE: u8 = 0xFF;
const NODE_PENDING: u8 = 0;
const NODE_DONE: u8 = 1;

static_assertions::const_assert!(NODE_DATA + 4 <= FIXED_BUFFER_SIZE);
static_assertions::const_assert!(CONTEXT_SIZE != FIXED_BUFFER_SIZE);

const LSB: BitOrder = BitOrder::LsbFirst;

/// SWD packet engine
///
/// This is used by [`crate::DebugInterface`] to perform individual SWD
/// operations on the target.  Most applications will prefer
/// [`crate::DebugInterface`].
///
/// ```rust,ignore
/// use cooper_swd::SwdInterface;
///
/// let mut swd_if = SwdInterface::new(driver);
/// swd_if.initialize()?;
/// let idcode = swd_if.reset_target()?;
/// swd_if.free_queue();
/// ```
#[derive(Debug)]
pub struct SwdInterface<D> {
    driver: D,
    memory: SwdMemory,
    context: Option<Allocation>,
    queue_head: Option<SlotHandle>,
    queue_tail: Option<SlotHandle>,
    queue_len: usize,
    wait_retries: u32,
}

impl<D: SwdDriver> SwdInterface<D> {
    /// Creates a new packet engine using the given driver.  Call
    /// [`Self::initialize()`] before any transfers.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            memory: SwdMemory::new(),
            context: None,
            queue_head: None,
            queue_tail: None,
            queue_len: 0,
            wait_retries: crate::config::DEFAULT_WAIT_RETRIES,
        }
    }

    /// Sets the number of times a transfer is retried after a WAIT ACK.
    pub fn set_wait_retries(&mut self, retries: u32) {
        trace!("Exec:  Set wait retries {retries}");
        self.wait_retries = retries;
    }

    /// Allocates the engine context.  Calling it again while initialized
    /// does nothing.
    ///
    /// Returns:
    /// - `Ok(())`: if the context was allocated.
    /// - `Err(SwdError::OutOfMemory)`: if the arena is exhausted.
    pub fn initialize(&mut self) -> Result<(), SwdError> {
        if self.context.is_some() {
            return Ok(());
        }

        let context = self.memory.calloc(1, CONTEXT_SIZE)?;
        self.context = Some(context);
        debug!("OK:    SWD interface initialized");

        Ok(())
    }

    /// Drops the context and queue, and releases everything allocated from
    /// [`SwdMemory`].
    pub fn deinitialize(&mut self) {
        self.free_queue();
        self.context = None;
        self.memory.reset();
        debug!("OK:    SWD interface deinitialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Returns whether [`Self::reset_target()`] has completed since the last
    /// initialization.
    pub fn is_connected(&self) -> bool {
        self.flag(FLAG_CONNECTED)
    }

    /// Retrieves the IDCODE of the target, if connected.
    pub fn idcode(&self) -> Option<IdCode> {
        if self.is_connected() {
            self.ctx_read(CTX_IDCODE).ok().map(IdCode::from)
        } else {
            None
        }
    }

    /// Total transfers since initialization, including retries.
    pub fn transfer_count(&self) -> u32 {
        self.ctx_read(CTX_TRANSFERS).unwrap_or(0)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn memory(&self) -> &SwdMemory {
        &self.memory
    }

    /// Number of transfers in the command queue
    pub fn queue_len(&self) -> usize {
        self.queue_len
    }

    /// Returns every queued transfer node to the fixed pool.
    ///
    /// Returns:
    /// - The number of nodes freed.
    pub fn free_queue(&mut self) -> usize {
        let mut freed = 0;
        let mut next = self.queue_head.take();
        while let Some(handle) = next {
            let node = Allocation::Fixed(handle);
            let link = self.memory.bytes(&node)[NODE_NEXT];
            next = if link == NODE_NONE {
                None
            } else {
                SlotHandle::from_index(link as usize)
            };
            self.memory.free(node);
            freed += 1;
        }

        self.queue_tail = None;
        self.queue_len = 0;
        freed
    }

    /// Resets and connects to the target's SWD interface.
    ///
    /// This
    /// - performs a line reset, the JTAG-to-SWD sequence and a second line
    ///   reset
    /// - reads and checks the IDCODE
    /// - clears any errors on the ABORT register
    /// - powers up the debug domain
    /// - configures the MEM-AP for 32-bit auto-incrementing access.
    ///
    /// Returns:
    /// - `Ok(IdCode)`: if successful, the target's IDCODE.
    /// - `Err(SwdError)`: if any step failed.
    pub fn reset_target(&mut self) -> Result<IdCode, SwdError> {
        trace!("Exec:  Reset and connect");
        self.ctx_write(CTX_FLAGS, 0)?;
        self.ctx_write(CTX_SELECT, 0)?;

        self.line_reset()?;
        self.driver.mosi(JTAG_TO_SWD, 16, LSB)?;
        self.line_reset()?;
        self.idle()?;

        let idcode = self.read_idcode()?;
        if !idcode.is_valid() {
            warn!("Invalid IDCODE {idcode}");
            return Err(SwdError::OperationFailed(format!("invalid idcode {idcode}")));
        }
        self.ctx_write(CTX_IDCODE, idcode.data())?;
        debug!("Value: IDCODE {idcode}");

        self.clear_errors()?;
        self.power_up_debug_domain()?;
        self.configure_mem_ap()?;

        self.set_flag(FLAG_CONNECTED, true)?;
        match Cortex::from_idcode(idcode) {
            Some(core) => debug!("OK:    Connected to {core}"),
            None => debug!("OK:    Connected to {}", idcode.designer_name()),
        }

        Ok(idcode)
    }

    /// Reads the IDCODE register.
    pub fn read_idcode(&mut self) -> Result<IdCode, SwdError> {
        let op = SwdOp::DpRead(IdCodeRegister::ADDRESS);
        let idcode = self.transfer(op, 0)?;
        Ok(idcode.into())
    }

    /// Clears any sticky errors on the Debug Port using ABORT, and checks
    /// they are clear.
    pub fn clear_errors(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Clear errors");
        self.write_dp_register(AbortRegister, Abort::clear_all())?;
        self.check_dp_errors(false)?;
        trace!("OK:    Clear errors");
        Ok(())
    }

    /// Requests debug and system power up, and polls CTRL/STAT until both
    /// are acknowledged.
    ///
    /// Returns:
    /// - `Ok(())`: if both domains acknowledged.
    /// - `Err(SwdError::OperationFailed)`: if they did not within the poll
    ///   limit.
    pub fn power_up_debug_domain(&mut self) -> Result<(), SwdError> {
        self.update_dp_select(Select::default())?;

        let mut ctrl_stat = CtrlStat::default();
        ctrl_stat.set_cdbgpwrupreq(true);
        ctrl_stat.set_csyspwrupreq(true);
        self.write_dp_register(CtrlStatRegister, ctrl_stat)?;

        for _ in 0..POWER_UP_POLLS {
            let status = self.read_dp_register(CtrlStatRegister)?;
            if status.cdbgpwrupack() && status.csyspwrupack() {
                debug!("OK:    Debug domain powered up {}", status.power_states());
                self.set_flag(FLAG_POWERED_UP, true)?;
                return Ok(());
            }
        }

        Err(SwdError::OperationFailed(
            "debug domain power up failed".to_string(),
        ))
    }

    /// Configures the MEM-AP for 32-bit auto-incrementing access.
    pub fn configure_mem_ap(&mut self) -> Result<(), SwdError> {
        let csw = Csw::default();
        self.write_ap_register(CswRegister, csw)?;

        // Bits 24-31 are implementation defined, so only compare the rest
        let readback: Csw = self.read_ap_register(CswRegister)?;
        trace!("Value: CSW readback {readback}");
        if readback.value() & 0xFFFFFF != csw.value() & 0xFFFFFF {
            warn!("CSW configuration mismatch after write: expected {csw}, got {readback}");
        }

        self.ctx_write(CTX_CSW, csw.value())?;
        self.set_flag(FLAG_CSW_VALID, true)?;
        trace!("OK:    MEM-AP {}", csw.transfer_config());

        Ok(())
    }

    /// Writes a Debug Port register.
    ///
    /// ```rust,ignore
    /// use cooper_core::arm::dp::{Abort, AbortRegister};
    /// swd_if.write_dp_register(AbortRegister, Abort::clear_all())?;
    /// ```
    pub fn write_dp_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: WritableRegister + DpRegister,
        u32: From<R::Value>,
    {
        let op = SwdOp::DpWrite(R::ADDRESS);
        self.transfer(op, R::to_raw(value)).map(|_| ())
    }

    /// Reads a Debug Port register.
    pub fn read_dp_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + DpRegister,
        R::Value: From<u32>,
    {
        let op = SwdOp::DpRead(R::ADDRESS);
        let raw = self.transfer(op, 0)?;
        Ok(R::from_raw(raw))
    }

    /// Writes an Access Port register, updating the DP SELECT AP bank first
    /// if required.
    ///
    /// Returns:
    /// - `Err(SwdError::NotReady)`: if the debug domain is not powered up.
    pub fn write_ap_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: WritableRegister + ApRegister,
        u32: From<R::Value>,
    {
        let op = SwdOp::ApWrite(R::ADDRESS);
        self.check_power(op)?;
        self.select_ap_bank(R::ADDRESS)?;
        self.transfer(op, R::to_raw(value)).map(|_| ())
    }

    /// Reads an Access Port register.  AP reads are posted, so this reads
    /// DP RDBUFF to retrieve the value.
    ///
    /// Returns:
    /// - `Err(SwdError::NotReady)`: if the debug domain is not powered up.
    pub fn read_ap_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + ApRegister,
        R::Value: From<u32>,
    {
        let op = SwdOp::ApRead(R::ADDRESS);
        self.check_power(op)?;
        self.select_ap_bank(R::ADDRESS)?;

        // The data returned by the AP read is stale
        let _ = self.transfer(op, 0)?;
        let raw = self.transfer(SwdOp::DpRead(RdBuffRegister::ADDRESS), 0)?;
        Ok(R::from_raw(raw))
    }

    /// Writes DP SELECT and caches the new value.
    pub fn update_dp_select(&mut self, select: Select) -> Result<(), SwdError> {
        self.transfer(SwdOp::DpWrite(SelectRegister::ADDRESS), select.into())?;
        self.ctx_write(CTX_SELECT, select.into())
    }

    /// Reads DP CTRL/STAT.
    pub fn read_ctrl_stat(&mut self) -> Result<CtrlStat, SwdError> {
        self.read_dp_register(CtrlStatRegister)
    }

    /// Reads DP CTRL/STAT and checks for sticky errors.
    ///
    /// Arguments:
    /// - `check_read_ok`: Also require the READOK bit.
    ///
    /// Returns:
    /// - `Ok(())` if no errors are detected.
    /// - `Err(SwdError::DpError)` otherwise.
    pub fn check_dp_errors(&mut self, check_read_ok: bool) -> Result<(), SwdError> {
        let status = self.read_ctrl_stat()?;
        if status.has_errors() {
            warn!("DP status errors detected: {}", status.error_states());
            return Err(SwdError::DpError);
        }
        if check_read_ok && !status.readok() {
            warn!("DP read OK bit not set");
            return Err(SwdError::DpError);
        }
        Ok(())
    }

    /// Reads a 32-bit word from the target's memory.
    pub fn read_mem(&mut self, addr: u32) -> Result<u32, SwdError> {
        let mut word = [0u32; 1];
        self.read_mem_words(addr, &mut word)?;
        Ok(word[0])
    }

    /// Writes a 32-bit word to the target's memory.
    pub fn write_mem(&mut self, addr: u32, data: u32) -> Result<(), SwdError> {
        self.write_mem_words(addr, &[data])
    }

    /// Reads a block of words from the target's memory.
    ///
    /// Is aware of TAR wrapping and handles it (at the 1KB boundary).
    ///
    /// Arguments:
    /// - `addr`: Word aligned start address.
    /// - `buf`: Filled with the words read.  Its length is the word count.
    ///
    /// Returns:
    /// - `Err(SwdError::Api)`: if `addr` is not word aligned.
    pub fn read_mem_words(&mut self, addr: u32, buf: &mut [u32]) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to read on non-4 byte boundary");
            return Err(SwdError::Api);
        }
        self.set_csw_size(Csw::SIZE_32BIT)?;

        let mut remaining = buf;
        let mut current_addr = addr;
        while !remaining.is_empty() {
            let chunk_size = Self::chunk_len(current_addr, 4, remaining.len());
            let (chunk, rest) = core::mem::take(&mut remaining).split_at_mut(chunk_size);

            self.write_ap_register(TarRegister, Tar::from(current_addr))?;
            self.read_drw_posted(chunk.len(), |index, value| chunk[index] = value)?;

            remaining = rest;
            current_addr = current_addr.wrapping_add((chunk_size * 4) as u32);
        }

        Ok(())
    }

    /// Writes a block of words to the target's memory, checking CTRL/STAT
    /// after each 1KB chunk.
    ///
    /// Returns:
    /// - `Err(SwdError::Api)`: if `addr` is not word aligned.
    /// - `Err(SwdError::DpError)`: if the target flagged a sticky error.
    pub fn write_mem_words(&mut self, addr: u32, buf: &[u32]) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to write on non-4 byte boundary");
            return Err(SwdError::Api);
        }
        self.set_csw_size(Csw::SIZE_32BIT)?;

        let mut remaining = buf;
        let mut current_addr = addr;
        while !remaining.is_empty() {
            let chunk_size = Self::chunk_len(current_addr, 4, remaining.len());
            let (chunk, rest) = remaining.split_at(chunk_size);

            self.write_ap_register(TarRegister, Tar::from(current_addr))?;
            for word in chunk {
                self.transfer(SwdOp::ApWrite(DrwRegister::ADDRESS), *word)?;
            }
            self.check_dp_errors(false)?;

            remaining = rest;
            current_addr = current_addr.wrapping_add((chunk_size * 4) as u32);
        }

        Ok(())
    }

    /// Reads bytes from the target's memory using 8-bit MEM-AP accesses.
    /// The MEM-AP is returned to 32-bit accesses afterwards, whether or not
    /// the read succeeded.
    pub fn read_mem_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SwdError> {
        self.set_csw_size(Csw::SIZE_8BIT)?;
        let result = self.read_bytes(addr, buf);
        let restore = self.set_csw_size(Csw::SIZE_32BIT);
        result.and(restore)
    }

    /// Writes bytes to the target's memory using 8-bit MEM-AP accesses.
    pub fn write_mem_bytes(&mut self, addr: u32, buf: &[u8]) -> Result<(), SwdError> {
        self.set_csw_size(Csw::SIZE_8BIT)?;
        let result = self.write_bytes(addr, buf);
        let restore = self.set_csw_size(Csw::SIZE_32BIT);
        result.and(restore)
    }
}

// Internal functions
impl<D: SwdDriver> SwdInterface<D> {
    fn ctx_read(&self, offset: usize) -> Result<u32, SwdError> {
        let context = self.context.as_ref().ok_or(SwdError::NotReady)?;
        let bytes = &self.memory.bytes(context)[offset..offset + 4];
        let mut word = [0u8; 4];
        word.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(word))
    }

    fn ctx_write(&mut self, offset: usize, value: u32) -> Result<(), SwdError> {
        let context = self.context.ok_or(SwdError::NotReady)?;
        self.memory.bytes_mut(&context)[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn flag(&self, flag: u32) -> bool {
        self.ctx_read(CTX_FLAGS).map(|f| f & flag != 0).unwrap_or(false)
    }

    fn set_flag(&mut self, flag: u32, enable: bool) -> Result<(), SwdError> {
        let flags = self.ctx_read(CTX_FLAGS)?;
        let flags = if enable { flags | flag } else { flags & !flag };
        self.ctx_write(CTX_FLAGS, flags)
    }

    fn check_power(&self, op: SwdOp) -> Result<(), SwdError> {
        if op.requires_power_up() && !self.flag(FLAG_POWERED_UP) {
            debug!("Attempt to perform {op} before debug domain power up");
            return Err(SwdError::NotReady);
        }
        Ok(())
    }

    fn select_ap_bank(&mut self, addr: u8) -> Result<(), SwdError> {
        let current = Select::from(self.ctx_read(CTX_SELECT)?);
        let mut select = current;
        select.set_apbanksel_from_addr(addr);
        if select != current {
            self.update_dp_select(select)?;
        }
        Ok(())
    }

    fn set_csw_size(&mut self, size: u32) -> Result<(), SwdError> {
        if self.flag(FLAG_CSW_VALID) && Csw::from(self.ctx_read(CTX_CSW)?).size() == size {
            return Ok(());
        }

        let csw = Csw::default().with_size(size);
        self.write_ap_register(CswRegister, csw)?;
        self.ctx_write(CTX_CSW, csw.value())?;
        self.set_flag(FLAG_CSW_VALID, true)
    }

    // Number of `unit` sized elements that can be transferred from `addr`
    // before TAR wraps.
    fn chunk_len(addr: u32, unit: u32, remaining: usize) -> usize {
        let boundary_offset = SWD_MEMORY_BOUNDARY - (addr & (SWD_MEMORY_BOUNDARY - 1));
        let max = boundary_offset.div_ceil(unit) as usize;
        remaining.min(max)
    }

    // Reads `count` DRW values, assuming TAR is set.  Each AP read returns
    // the previous read's value, and the last comes from RDBUFF.
    fn read_drw_posted(
        &mut self,
        count: usize,
        mut store: impl FnMut(usize, u32),
    ) -> Result<(), SwdError> {
        if count == 0 {
            return Ok(());
        }

        let _ = self.transfer(SwdOp::ApRead(DrwRegister::ADDRESS), 0)?;
        for index in 1..count {
            let value = self.transfer(SwdOp::ApRead(DrwRegister::ADDRESS), 0)?;
            store(index - 1, value);
        }
        let value = self.transfer(SwdOp::DpRead(RdBuffRegister::ADDRESS), 0)?;
        store(count - 1, value);

        Ok(())
    }

    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SwdError> {
        let mut remaining = buf;
        let mut current_addr = addr;
        while !remaining.is_empty() {
            let chunk_size = Self::chunk_len(current_addr, 1, remaining.len());
            let (chunk, rest) = core::mem::take(&mut remaining).split_at_mut(chunk_size);

            self.write_ap_register(TarRegister, Tar::from(current_addr))?;
            let base = current_addr;
            self.read_drw_posted(chunk.len(), |index, value| {
                chunk[index] = Drw::from(value).byte_lane(base.wrapping_add(index as u32));
            })?;

            remaining = rest;
            current_addr = current_addr.wrapping_add(chunk_size as u32);
        }

        Ok(())
    }

    fn write_bytes(&mut self, addr: u32, buf: &[u8]) -> Result<(), SwdError> {
        let mut remaining = buf;
        let mut current_addr = addr;
        while !remaining.is_empty() {
            let chunk_size = Self::chunk_len(current_addr, 1, remaining.len());
            let (chunk, rest) = remaining.split_at(chunk_size);

            self.write_ap_register(TarRegister, Tar::from(current_addr))?;
            for (offset, byte) in chunk.iter().enumerate() {
                let lane = Drw::from_byte_lane(current_addr.wrapping_add(offset as u32), *byte);
                self.transfer(SwdOp::ApWrite(DrwRegister::ADDRESS), lane.into())?;
            }
            self.check_dp_errors(false)?;

            remaining = rest;
            current_addr = current_addr.wrapping_add(chunk_size as u32);
        }

        Ok(())
    }

    fn line_reset(&mut self) -> Result<(), SwdError> {
        for _ in 0..LINE_RESET_WORDS {
            self.driver.mosi(0xFFFF_FFFF, 32, LSB)?;
        }
        Ok(())
    }

    fn idle(&mut self) -> Result<(), SwdError> {
        self.driver.mosi(0, IDLE_CYCLES, LSB).map(|_| ())
    }

    fn enqueue(&mut self, request: u8, data: u32) -> Result<SlotHandle, SwdError> {
        let node = self.memory.malloc(FIXED_BUFFER_SIZE)?;
        let Allocation::Fixed(handle) = node else {
            return Err(SwdError::OutOfMemory);
        };

        let bytes = self.memory.bytes_mut(&node);
        bytes.fill(0);
        bytes[NODE_REQUEST] = request;
        bytes[NODE_NEXT] = NODE_NONE;
        bytes[NODE_STATE] = NODE_PENDING;
        bytes[NODE_DATA..NODE_DATA + 4].copy_from_slice(&data.to_le_bytes());

        if let Some(tail) = self.queue_tail {
            self.memory.bytes_mut(&Allocation::Fixed(tail))[NODE_NEXT] = handle.index() as u8;
        } else {
            self.queue_head = Some(handle);
        }
        self.queue_tail = Some(handle);
        self.queue_len += 1;

        Ok(handle)
    }

    fn complete(&mut self, handle: SlotHandle, ack: u8, data: u32) {
        let bytes = self.memory.bytes_mut(&Allocation::Fixed(handle));
        bytes[NODE_ACK] = ack;
        bytes[NODE_STATE] = NODE_DONE;
        bytes[NODE_DATA..NODE_DATA + 4].copy_from_slice(&data.to_le_bytes());
    }

    // Queues and performs a single transfer, retrying on WAIT.
    fn transfer(&mut self, op: SwdOp, data: u32) -> Result<u32, SwdError> {
        let request = op.to_cmd();
        trace!("Exec:  {op} SWD: {request:#04X} {data:#010X}");

        let node = self.enqueue(request, data)?;

        let mut attempt = 0;
        let result = loop {
            let transfers = self.ctx_read(CTX_TRANSFERS)?;
            self.ctx_write(CTX_TRANSFERS, transfers.wrapping_add(1))?;

            match self.transfer_once(op, request, data) {
                Ok(value) => break Ok(value),
                Err(SwdError::WaitAck) => trace!("Wait:  {op}"),
                Err(e) => break Err(e),
            }

            attempt += 1;
            if attempt > self.wait_retries {
                break Err(SwdError::WaitAck);
            } else {
                trace!("Retry: {op} {}", attempt - 1);
            }
        };

        let ack = match &result {
            Ok(_) | Err(SwdError::ReadParity) => 0b001,
            Err(SwdError::WaitAck) => 0b010,
            Err(SwdError::FaultAck) => 0b100,
            Err(SwdError::NoAck(ack)) => *ack,
            Err(_) => 0,
        };
        self.complete(node, ack, *result.as_ref().unwrap_or(&0));

        match &result {
            Ok(value) => trace!("OK:    {op} {value:#010X}"),
            Err(e) => debug!("Error: {op} {e:?}"),
        }

        result
    }

    fn transfer_once(&mut self, op: SwdOp, request: u8, data: u32) -> Result<u32, SwdError> {
        self.driver.mosi(request as u32, 8, LSB)?;
        self.driver.miso_trn(1)?;
        let ack = self.driver.miso(3, LSB)? as u8;

        if let Err(e) = SwdError::from_ack(ack) {
            self.driver.mosi_trn(1)?;
            self.idle()?;
            return Err(e);
        }

        if op.is_read() {
            let value = self.driver.miso(32, LSB)?;
            let parity = self.driver.miso(1, LSB)?;
            self.driver.mosi_trn(1)?;
            self.idle()?;

            if parity != calculate_parity(value) {
                debug!("Error: {op} parity mismatch on {value:#010X}");
                return Err(SwdError::ReadParity);
            }
            Ok(value)
        } else {
            self.driver.mosi_trn(1)?;
            self.driver.mosi(data, 32, LSB)?;
            self.driver.mosi(calculate_parity(data), 1, LSB)?;
            self.idle()?;
            Ok(data)
        }
    }
}

/// Even parity of a value: 1 if an odd number of bits are set
pub fn calculate_parity(value: u32) -> u32 {
    value.count_ones() & 1
}

/// SWD Operations
///
/// Each operation contains the register address as a u8 (0x0, 0x4, etc).
///
/// SWD request format
/// Bit 0: Start (1)
/// Bit 1: APnDP (0=DP, 1=AP)
/// Bit 2: RnW (0=write, 1=read)
/// Bit 3: A2 (address bit 2)
/// Bit 4: A3 (address bit 3)
/// Bit 5: Parity
/// Bit 6: Stop (0)
/// Bit 7: Park (1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdOp {
    DpRead(u8),
    DpWrite(u8),
    ApRead(u8),
    ApWrite(u8),
}

impl SwdOp {
    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_cmd(&self) -> u8 {
        let (base, addr) = match self {
            // start=1, APnDP=0, RnW=1, park=1
            SwdOp::DpRead(a) => (0x85, a),
            // start=1, APnDP=0, RnW=0, park=1
            SwdOp::DpWrite(a) => (0x81, a),
            // start=1, APnDP=1, RnW=1, park=1
            SwdOp::ApRead(a) => (0x87, a),
            // start=1, APnDP=1, RnW=0, park=1
            SwdOp::ApWrite(a) => (0x83, a),
        };

        let cmd = base | ((addr & 0x0C) << 1); // A[3:2] to bits 4:3
        Self::add_parity(cmd)
    }

    fn add_parity(cmd: u8) -> u8 {
        // Parity covers APnDP, RnW and A[3:2]
        let parity = calculate_parity((cmd & 0x1E) as u32) as u8;
        cmd | (parity << 5)
    }

    pub(crate) fn is_read(&self) -> bool {
        matches!(self, SwdOp::DpRead(_) | SwdOp::ApRead(_))
    }

    /// Whether this operation requires the debug domain to be powered up.
    pub(crate) fn requires_power_up(&self) -> bool {
        matches!(self, SwdOp::ApRead(_) | SwdOp::ApWrite(_))
    }
}

impl fmt::Display for SwdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdOp::DpRead(a) => write!(f, "DP Read 0x{a:02X}"),
            SwdOp::DpWrite(a) => write!(f, "DP Write 0x{a:02X}"),
            SwdOp::ApRead(a) => write!(f, "AP Read 0x{a:02X}"),
            SwdOp::ApWrite(a) => write!(f, "AP Write 0x{a:02X}"),
        }
    }
}
