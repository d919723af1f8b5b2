// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD Debug Interface
//!
//! This module implements the small set of target control primitives the
//! Cooper programmer is built from: connect, halt, run, memory access and
//! core register access.
//!
//! If this module does not give you the control you need, use
//! [`DebugInterface::swd_mut()`] to reach the underlying [`SwdInterface`].
//!
//! Every call frees the packet engine's command queue before returning,
//! whether it succeeded or not.  Memory calls are split into blocks of
//! [`READ_BLOCK_SIZE`] or [`WRITE_BLOCK_SIZE`] elements, and the queue is
//! freed after each block, so the engine's fixed pool is never exhausted by
//! a long transfer.

use core::result::Result;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use cooper_core::arm::dp::IdCode;
use cooper_core::arm::register::MemoryMappedRegister;
use cooper_core::arm::scs::{
    CoreRegister, Dcrdr, DcrdrRegister, Dcrsr, DcrsrRegister, Dhcsr, DhcsrRegister,
};

use crate::SwdError;
use crate::config::SwdConfig;
use crate::driver::SwdDriver;
use crate::interface::SwdInterface;
use crate::memory::AllocStats;
use crate::protocol::{BitBang, SwdioPin};

/// Elements per block for memory reads
pub const READ_BLOCK_SIZE: usize = 64;

/// Elements per block for memory writes
pub const WRITE_BLOCK_SIZE: usize = 64;

/// ARM Debug Interface object
///
/// The simplest way to create a `DebugInterface` is to use the
/// [`Self::from_pins()`] method:
///
/// ```rust,ignore
/// use cooper_swd::{DebugInterface, SwdConfig};
///
/// let config = SwdConfig::default();
/// let mut debug = DebugInterface::from_pins(swclk, swdio, delay, config)?;
///
/// debug.connect()?;
/// debug.halt()?;
/// debug.wait_for_halt()?;
/// let pc = debug.reg_read(CoreRegister::Pc)?;
/// ```
#[derive(Debug)]
pub struct DebugInterface<D> {
    swd: SwdInterface<D>,
    config: SwdConfig,
}

impl<CLK, DIO, DL> DebugInterface<BitBang<CLK, DIO, DL>>
where
    CLK: OutputPin,
    DIO: SwdioPin,
    DL: DelayNs,
{
    /// Creates a new, initialized `DebugInterface` bit-banging over the given
    /// pins.
    ///
    /// Arguments:
    /// - `swclk`: SWCLK, push-pull output.
    /// - `swdio`: SWDIO.
    /// - `delay`: Used for the SWCLK half period.
    /// - `config`: Runtime configuration.
    ///
    /// Returns:
    /// - `Ok(DebugInterface)`: ready for [`Self::connect()`].
    /// - `Err(SwdError)`: if a pin could not be configured or the packet
    ///   engine could not be initialized.
    pub fn from_pins(swclk: CLK, swdio: DIO, delay: DL, config: SwdConfig) -> Result<Self, SwdError> {
        let driver = BitBang::new(swclk, swdio, delay, &config)?;
        Self::new(driver, config)
    }
}

impl<D: SwdDriver> DebugInterface<D> {
    /// Creates a new `DebugInterface` using the given driver, and
    /// initializes the packet engine.
    pub fn new(driver: D, config: SwdConfig) -> Result<Self, SwdError> {
        let mut swd = SwdInterface::new(driver);
        swd.set_wait_retries(config.wait_retries);

        let mut debug = Self { swd, config };
        debug.initialize()?;
        Ok(debug)
    }

    /// Initializes the packet engine.  Not required after [`Self::new()`],
    /// only after [`Self::deinitialize()`].
    pub fn initialize(&mut self) -> Result<(), SwdError> {
        self.swd.initialize()
    }

    /// Releases the packet engine's memory.  The target must be connected
    /// again after re-initializing.
    pub fn deinitialize(&mut self) {
        self.swd.deinitialize();
    }

    pub fn config(&self) -> &SwdConfig {
        &self.config
    }

    /// Returns a reference to the underlying [`SwdInterface`].
    pub fn swd(&self) -> &SwdInterface<D> {
        &self.swd
    }

    /// Returns a mutable reference to the underlying [`SwdInterface`].
    ///
    /// Remember to call [`SwdInterface::free_queue()`] after using it.
    pub fn swd_mut(&mut self) -> &mut SwdInterface<D> {
        &mut self.swd
    }

    /// Resets the SWD line and connects to the target.
    ///
    /// Returns:
    /// - `Ok(IdCode)`: the target's IDCODE.
    /// - `Err(SwdError)`: if the connect sequence failed.
    pub fn connect(&mut self) -> Result<IdCode, SwdError> {
        self.execute("connect", |swd| swd.reset_target())
    }

    /// Requests a halt by writing DHCSR.  Does not wait for the core to
    /// stop; use [`Self::halt_check()`] or [`Self::wait_for_halt()`].
    pub fn halt(&mut self) -> Result<(), SwdError> {
        self.write_register::<DhcsrRegister>(Dhcsr::halt())
    }

    /// Lets the core run by writing DHCSR.
    pub fn run(&mut self) -> Result<(), SwdError> {
        self.write_register::<DhcsrRegister>(Dhcsr::run())
    }

    /// Returns whether DHCSR reports the core halted.
    pub fn halt_check(&mut self) -> Result<bool, SwdError> {
        let dhcsr = self.read_register::<DhcsrRegister>()?;
        Ok(dhcsr.halted())
    }

    /// Polls [`Self::halt_check()`] until the core is halted.
    ///
    /// Polls forever unless `halt_poll_limit` is configured.
    ///
    /// Returns:
    /// - `Ok(())`: once halted.
    /// - `Err(SwdError::Timeout)`: if the poll limit was reached.
    pub fn wait_for_halt(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Wait for halt");
        let mut polls: u32 = 0;
        loop {
            if self.halt_check()? {
                debug!("OK:    Core halted after {} checks", polls + 1);
                return Ok(());
            }

            polls += 1;
            if let Some(limit) = self.config.halt_poll_limit {
                if polls >= limit {
                    warn!("Core did not halt after {polls} checks");
                    return Err(SwdError::Timeout);
                }
            }
        }
    }

    /// Writes bytes to the target's memory.
    pub fn mem_write(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        for (index, block) in data.chunks(WRITE_BLOCK_SIZE).enumerate() {
            let block_addr = addr.wrapping_add((index * WRITE_BLOCK_SIZE) as u32);
            self.execute("mem write", |swd| swd.write_mem_bytes(block_addr, block))?;
        }
        Ok(())
    }

    /// Reads bytes from the target's memory.
    pub fn mem_read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), SwdError> {
        for (index, block) in data.chunks_mut(READ_BLOCK_SIZE).enumerate() {
            let block_addr = addr.wrapping_add((index * READ_BLOCK_SIZE) as u32);
            self.execute("mem read", |swd| swd.read_mem_bytes(block_addr, block))?;
        }
        Ok(())
    }

    /// Writes words to the target's memory.
    ///
    /// Arguments:
    /// - `addr`: Word aligned start address.
    /// - `data`: Words to write.
    ///
    /// Returns:
    /// - `Ok(())`: if every block was written.
    /// - `Err(SwdError)`: the first block's error.  Earlier blocks have been
    ///   written.
    pub fn mem_write_words(&mut self, addr: u32, data: &[u32]) -> Result<(), SwdError> {
        for (index, block) in data.chunks(WRITE_BLOCK_SIZE).enumerate() {
            let block_addr = addr.wrapping_add((index * WRITE_BLOCK_SIZE * 4) as u32);
            self.execute("mem write words", |swd| {
                swd.write_mem_words(block_addr, block)
            })?;
        }
        Ok(())
    }

    /// Reads words from the target's memory.
    pub fn mem_read_words(&mut self, addr: u32, data: &mut [u32]) -> Result<(), SwdError> {
        for (index, block) in data.chunks_mut(READ_BLOCK_SIZE).enumerate() {
            let block_addr = addr.wrapping_add((index * READ_BLOCK_SIZE * 4) as u32);
            self.execute("mem read words", |swd| {
                swd.read_mem_words(block_addr, block)
            })?;
        }
        Ok(())
    }

    /// Reads a single word.
    pub fn read_word(&mut self, addr: u32) -> Result<u32, SwdError> {
        self.execute("read word", |swd| swd.read_mem(addr))
    }

    /// Writes a single word.
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), SwdError> {
        self.execute("write word", |swd| swd.write_mem(addr, value))
    }

    /// Writes a core register, through DCRDR and then DCRSR.  The core must
    /// be halted.
    pub fn reg_write(&mut self, reg: CoreRegister, value: u32) -> Result<(), SwdError> {
        trace!("Exec:  Write {reg} {value:#010X}");
        self.write_register::<DcrdrRegister>(Dcrdr::from(value))?;
        self.write_register::<DcrsrRegister>(Dcrsr::write(reg))
    }

    /// Reads a core register, through DCRSR and then DCRDR.  The core must
    /// be halted.
    pub fn reg_read(&mut self, reg: CoreRegister) -> Result<u32, SwdError> {
        self.write_register::<DcrsrRegister>(Dcrsr::read(reg))?;
        let value = self.read_register::<DcrdrRegister>()?.data();
        trace!("Value: {reg} {value:#010X}");
        Ok(value)
    }

    /// Reads a memory-mapped register.
    ///
    /// ```rust,ignore
    /// use cooper_core::arm::scs::DhcsrRegister;
    /// let dhcsr = debug.read_register::<DhcsrRegister>()?;
    /// ```
    pub fn read_register<R: MemoryMappedRegister>(&mut self) -> Result<R::Value, SwdError> {
        self.read_word(R::ADDRESS).map(R::Value::from)
    }

    /// Writes a memory-mapped register.
    pub fn write_register<R: MemoryMappedRegister>(
        &mut self,
        value: R::Value,
    ) -> Result<(), SwdError> {
        self.write_word(R::ADDRESS, value.into())
    }

    /// Returns the packet engine's allocator statistics.
    pub fn alloc_stats(&self) -> AllocStats {
        self.swd.memory().stats()
    }

    /// Logs the packet engine's allocator statistics.
    pub fn print_alloc_stats(&self) {
        self.swd.memory().print_stats();
    }

    // Runs one packet engine operation, then frees the command queue.
    fn execute<T>(
        &mut self,
        op: &str,
        f: impl FnOnce(&mut SwdInterface<D>) -> Result<T, SwdError>,
    ) -> Result<T, SwdError> {
        let result = f(&mut self.swd);

        let freed = self.swd.free_queue();
        trace!("Value: {op} freed {freed} transfers");

        if let Err(e) = &result {
            if self.config.print_swd_errors {
                warn!("Error: {op} failed: {e} ({:#010X})", e.status());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SIM_IDCODE, SimTarget, init_logging};
    use cooper_core::arm::scs::{Demcr, DemcrRegister};

    fn connected(config: SwdConfig) -> DebugInterface<SimTarget> {
        init_logging();
        let mut debug = DebugInterface::new(SimTarget::new(), config).unwrap();
        debug.connect().unwrap();
        debug
    }

    fn sim(debug: &DebugInterface<SimTarget>) -> &SimTarget {
        debug.swd().driver()
    }

    #[test]
    fn connect_frees_queue() {
        let mut debug = DebugInterface::new(SimTarget::new(), SwdConfig::default()).unwrap();
        assert_eq!(debug.connect().unwrap().data(), SIM_IDCODE);
        assert_eq!(debug.swd().queue_len(), 0);
        assert_eq!(debug.alloc_stats().fixed_in_use, 0);
        assert!(debug.alloc_stats().max_fixed_in_use > 0);
    }

    #[test]
    fn failures_free_queue() {
        let mut sim = SimTarget::new();
        sim.absent = true;
        let mut debug = DebugInterface::new(sim, SwdConfig::default()).unwrap();
        assert_eq!(debug.connect(), Err(SwdError::NoAck(7)));
        assert_eq!(debug.swd().queue_len(), 0);
        assert_eq!(debug.alloc_stats().fixed_in_use, 0);
    }

    #[test]
    fn halt_and_run() {
        let mut debug = connected(SwdConfig::default());
        assert!(!debug.halt_check().unwrap());

        debug.halt().unwrap();
        debug.wait_for_halt().unwrap();
        assert!(sim(&debug).is_halted());

        debug.run().unwrap();
        assert!(!debug.halt_check().unwrap());
    }

    #[test]
    fn slow_halt_is_waited_for() {
        let mut debug = connected(SwdConfig::default());
        debug.swd_mut().driver_mut().halt_latency = 20;
        debug.halt().unwrap();
        debug.wait_for_halt().unwrap();
        assert!(debug.halt_check().unwrap());
    }

    #[test]
    fn halt_poll_limit() {
        let config = SwdConfig::default().with_halt_poll_limit(Some(5));
        let mut debug = connected(config);
        debug.swd_mut().driver_mut().halt_latency = 50;
        debug.halt().unwrap();
        assert_eq!(debug.wait_for_halt(), Err(SwdError::Timeout));
    }

    #[test]
    fn core_registers() {
        let mut debug = connected(SwdConfig::default());
        debug.halt().unwrap();
        debug.wait_for_halt().unwrap();

        debug.reg_write(CoreRegister::Pc, 0x2000_00D5).unwrap();
        debug.reg_write(CoreRegister::R7, 0xCAFE_F00D).unwrap();
        assert_eq!(sim(&debug).core_register(CoreRegister::Pc), 0x2000_00D5);

        debug
            .swd_mut()
            .driver_mut()
            .set_core_register(CoreRegister::Psp, 0x2000_4000);
        assert_eq!(debug.reg_read(CoreRegister::Psp).unwrap(), 0x2000_4000);
        assert_eq!(debug.reg_read(CoreRegister::R7).unwrap(), 0xCAFE_F00D);
    }

    #[test]
    fn block_transfers() {
        let mut debug = connected(SwdConfig::default());
        let words: Vec<u32> = (0..300u32).map(|ii| ii.wrapping_mul(0x0101_0101)).collect();

        debug.mem_write_words(0x2000_1000, &words).unwrap();
        assert_eq!(sim(&debug).read_words(0x2000_1000, 300), words);
        assert_eq!(debug.swd().queue_len(), 0);

        let mut back = vec![0u32; 300];
        debug.mem_read_words(0x2000_1000, &mut back).unwrap();
        assert_eq!(back, words);

        let bytes: Vec<u8> = (0..200).map(|ii| ii as u8).collect();
        debug.mem_write(0x2000_2001, &bytes).unwrap();
        let mut back = vec![0u8; 200];
        debug.mem_read(0x2000_2001, &mut back).unwrap();
        assert_eq!(back, bytes);
        assert_eq!(sim(&debug).read_word(0x2000_2000) >> 8, 0x0002_0100);
    }

    #[test]
    fn typed_registers() {
        let mut debug = connected(SwdConfig::default());
        let mut demcr = Demcr::from(0);
        demcr.set_vc_corereset(true);
        debug.write_register::<DemcrRegister>(demcr).unwrap();

        assert_eq!(sim(&debug).demcr(), 1);
        assert!(debug.read_register::<DemcrRegister>().unwrap().vc_corereset());
    }

    #[test]
    fn deinitialize_and_reconnect() {
        let mut debug = connected(SwdConfig::default());
        debug.deinitialize();
        assert_eq!(debug.read_word(0x2000_0000), Err(SwdError::NotReady));

        debug.initialize().unwrap();
        debug.connect().unwrap();
        debug.write_word(0x2000_0000, 5).unwrap();
        assert_eq!(debug.read_word(0x2000_0000).unwrap(), 5);
    }
}
