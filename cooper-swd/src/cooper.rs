// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Cooper flash programmer
//!
//! Cooper's flash is written a 4KB page at a time by a small algorithm which
//! runs from Cooper's own SRAM.  [`Cooper`] loads that algorithm, stages each
//! page in SRAM, hands the algorithm its parameters, starts it, and polls
//! for its result.
//!
//! Partial pages are supported.  Bytes in the first page before the write
//! are read back from flash first, so they survive the page rewrite.  Bytes
//! in the last page after the write are taken from the source buffer beyond
//! `byte_count`, as far as it extends, and from flash after that.  Callers
//! that pass a buffer longer than `byte_count` therefore overwrite the end
//! of the last page with the rest of that buffer.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Write;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::Serialize;

use cooper_core::arm::scs::{
    Aircr, AircrRegister, CfsrRegister, CoreRegister, DemcrRegister, Dhcsr, DhcsrRegister,
    IcsrRegister, Vtor, VtorRegister,
};
use cooper_core::cooper::{
    ADDRESS_REGISTER, ALG_RESET_VECTOR, ALG_STACK_POINTER, ALGORITHM_BASE, DATA_LOCATION,
    KEY1_REGISTER, KEY1_VALUE, KEY2_REGISTER, KEY2_VALUE, LENGTH_REGISTER, PAGE_SIZE_BYTES,
    PAGE_SIZE_WORDS, RETURN_VALUE, SRAM_BASE, VTOR_VALUE, in_sram, page_base,
};

use crate::SwdError;
use crate::debug::DebugInterface;
use crate::driver::SwdDriver;
use crate::protocol::NoPin;

/// Completion checks made after starting the algorithm on a page
pub const PAGE_POLL_LIMIT: u32 = 100;

/// Interval between completion checks
pub const PAGE_POLL_INTERVAL_MS: u32 = 100;

/// Mismatches logged by [`compare_buffers`] before it stops logging
pub const MAX_MISMATCH_REPORTS: usize = 128;

// Words of stack frame logged by read_state
const STACK_FRAME_WORDS: u32 = 8;

// SRAM dumped when the algorithm does not complete
const TIMEOUT_DUMP_BYTES: u32 = 0x1000;

const RESET_HIGH_MS: u32 = 20;
const RESET_LOW_MS: u32 = 20;
const RESET_SETTLE_MS: u32 = 100;

macro_rules! print_info {
    ($self:ident, $($arg:tt)*) => {
        if $self.debug.config().enable_printing {
            info!($($arg)*);
        }
    };
}

/// Cooper core state, as captured by [`Cooper::read_state()`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreState {
    /// R0-R15
    pub regs: [u32; 16],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
    pub msp: u32,
    pub psp: u32,
    pub icsr: u32,
    pub cfsr: u32,
}

/// Counts the bytes which differ between `a` and `b`, logging the first
/// [`MAX_MISMATCH_REPORTS`] of them.  Only the common length is compared.
pub fn compare_buffers(a: &[u8], b: &[u8]) -> usize {
    let mut errors = 0;
    for (offset, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        if x != y {
            errors += 1;
            if errors < MAX_MISMATCH_REPORTS {
                info!("Mismatch (0x{offset:08X}): 0x{x:02X} 0x{y:02X}");
            }
        }
    }
    errors
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn word_at(src: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&src[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Cooper flash programmer
///
/// ```rust,ignore
/// use cooper_swd::{Cooper, DebugInterface, SwdConfig};
///
/// let debug = DebugInterface::from_pins(swclk, swdio, swd_delay, SwdConfig::default())?;
/// let mut cooper = Cooper::new(debug, delay, ALGORITHM);
/// cooper.debug_mut().connect()?;
/// cooper.load_algorithm()?;
/// cooper.program(0x0000_4000, &image, image.len() as u32)?;
/// cooper.verify(0x0000_4000, &image, image.len() as u32)?;
/// ```
#[derive(Debug)]
pub struct Cooper<'a, D, DL, R = NoPin> {
    debug: DebugInterface<D>,
    delay: DL,
    algorithm: &'a [u8],
    reset_pin: Option<R>,
    page: Vec<u32>,
}

impl<'a, D, DL> Cooper<'a, D, DL, NoPin>
where
    D: SwdDriver,
    DL: DelayNs,
{
    /// Creates a programmer with no reset pin.  [`Self::reset()`] will
    /// return [`SwdError::Unsupported`].
    ///
    /// Arguments:
    /// - `debug`: An initialized [`DebugInterface`].
    /// - `delay`: Used between completion checks.
    /// - `algorithm`: The flash algorithm image, linked to run at
    ///   [`ALGORITHM_BASE`].
    pub fn new(debug: DebugInterface<D>, delay: DL, algorithm: &'a [u8]) -> Self {
        Self {
            debug,
            delay,
            algorithm,
            reset_pin: None,
            page: vec![0; PAGE_SIZE_WORDS],
        }
    }
}

impl<'a, D, DL, R> Cooper<'a, D, DL, R>
where
    D: SwdDriver,
    DL: DelayNs,
    R: OutputPin,
{
    /// Creates a programmer which can pulse Cooper's reset line.
    pub fn with_reset_pin(
        debug: DebugInterface<D>,
        delay: DL,
        algorithm: &'a [u8],
        reset_pin: R,
    ) -> Self {
        Self {
            debug,
            delay,
            algorithm,
            reset_pin: Some(reset_pin),
            page: vec![0; PAGE_SIZE_WORDS],
        }
    }

    pub fn debug(&self) -> &DebugInterface<D> {
        &self.debug
    }

    pub fn debug_mut(&mut self) -> &mut DebugInterface<D> {
        &mut self.debug
    }

    /// Applies the configured error policy.
    ///
    /// Logs the error and its status code when `print_swd_errors` is set.
    /// Returns the error if it is fatal under the `halt_on_errors` setting,
    /// otherwise swallows it.
    pub fn report_errors(&self, op: &str, result: Result<(), SwdError>) -> Result<(), SwdError> {
        let Err(e) = result else {
            return Ok(());
        };

        let config = self.debug.config();
        if config.print_swd_errors {
            error!("Error {op}: 0x{:08X} ({})", e.status(), e.status() as i32);
        }

        if e.is_fatal(config.halt_on_errors) {
            Err(e)
        } else {
            Ok(())
        }
    }

    // Halts the core and waits until it is.
    fn halt_and_wait(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Sending halt");
        self.debug.halt()?;
        self.debug.wait_for_halt()
    }

    /// Loads the flash algorithm into SRAM, optionally reads it back, and
    /// then resets the core, catching it at its reset vector.
    pub fn load_algorithm(&mut self) -> Result<(), SwdError> {
        let result = self.halt_and_wait();
        self.report_errors("halt", result)?;

        print_info!(self, "Loading algorithm... ");
        let result = self.debug.mem_write(ALGORITHM_BASE, self.algorithm);
        self.report_errors("load algorithm", result)?;
        print_info!(self, "DONE.");

        if self.debug.config().verify_algorithm {
            print_info!(self, "Verifying algorithm... ");
            let mut readback = vec![0u8; self.algorithm.len()];
            let result = self.debug.mem_read(ALGORITHM_BASE, &mut readback);
            self.report_errors("read algorithm", result)?;

            let errors = compare_buffers(self.algorithm, &readback);
            let result = if errors == 0 {
                Ok(())
            } else {
                Err(SwdError::VerifyFailed(ALGORITHM_BASE))
            };
            self.report_errors("verify algorithm", result)?;
            print_info!(self, "DONE.");
        }

        self.soft_reset(true)
    }

    /// Resets the core through AIRCR.
    ///
    /// Arguments:
    /// - `halt`: Catch the core at its reset vector, and wait for it to
    ///   halt there.
    pub fn soft_reset(&mut self, halt: bool) -> Result<(), SwdError> {
        if halt {
            debug!("Exec:  Sending reset halt");
            self.debug.write_register::<DhcsrRegister>(Dhcsr::halt())?;
            let mut demcr = self.debug.read_register::<DemcrRegister>()?;
            demcr.set_vc_corereset(true);
            self.debug.write_register::<DemcrRegister>(demcr)?;
        } else {
            debug!("Exec:  Sending soft reset (AIRCR)");
        }

        self.debug
            .write_register::<AircrRegister>(Aircr::system_reset())?;

        if halt {
            self.debug.wait_for_halt()?;
            debug!("OK:    Core halted");
        }

        Ok(())
    }

    // Sets the PC and the Thumb bit, and lets the core run.
    fn setpc_go(&mut self, pc: u32) -> Result<(), SwdError> {
        let result = self.debug.reg_write(CoreRegister::Pc, pc);
        self.report_errors("set pc", result)?;

        let xpsr = match self.debug.reg_read(CoreRegister::Xpsr) {
            Ok(xpsr) => xpsr,
            Err(e) => {
                self.report_errors("read xpsr", Err(e))?;
                0
            }
        };
        let result = self
            .debug
            .reg_write(CoreRegister::Xpsr, xpsr | CoreRegister::XPSR_THUMB);
        self.report_errors("set xpsr", result)?;

        let result = self.debug.run();
        self.report_errors("run", result)
    }

    // Polls the algorithm's return value until it reads zero.
    fn poll_completion(&mut self) -> Result<(), SwdError> {
        let mut tries = 0;
        loop {
            let value = self.debug.read_word(RETURN_VALUE)?;
            self.delay.delay_ms(PAGE_POLL_INTERVAL_MS);
            tries += 1;

            if value == 0 {
                debug!("OK:    Page written, tries: {tries}");
                return Ok(());
            }

            if tries >= PAGE_POLL_LIMIT {
                error!("Flash algorithm did not complete after {tries} checks");
                if let Err(e) = self.read_state() {
                    warn!("Failed to read core state: {e}");
                }
                if let Err(e) = self.print_memory(SRAM_BASE, TIMEOUT_DUMP_BYTES) {
                    warn!("Failed to dump SRAM: {e}");
                }
                return Err(SwdError::Timeout);
            }
        }
    }

    /// Programs one flash page.
    ///
    /// Arguments:
    /// - `addr`: Flash address of the page.
    /// - `page`: The complete page contents, [`PAGE_SIZE_WORDS`] words.
    ///
    /// Returns:
    /// - `Ok(())`: once the algorithm reports success.
    /// - `Err(SwdError::Timeout)`: if it never did.  Core state and SRAM
    ///   have been logged.
    /// - `Err(SwdError)`: any other failure, returned as soon as it happens.
    pub fn program_page(&mut self, addr: u32, page: &[u32]) -> Result<(), SwdError> {
        if page.len() != PAGE_SIZE_WORDS {
            warn!("Page buffer is {} words", page.len());
            return Err(SwdError::Api);
        }
        if addr & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }

        print_info!(
            self,
            "Programming 0x{addr:08X} to 0x{:08X}.",
            addr.wrapping_add(PAGE_SIZE_BYTES)
        );

        self.halt_and_wait()?;

        trace!("Exec:  Writing binary to SRAM");
        self.debug.mem_write_words(DATA_LOCATION, page)?;

        if self.debug.config().verify_download_buffer {
            trace!("Exec:  Verifying download buffer");
            let mut readback = vec![0u32; PAGE_SIZE_WORDS];
            self.debug.mem_read_words(DATA_LOCATION, &mut readback)?;

            let errors = compare_buffers(&words_to_bytes(&readback), &words_to_bytes(page));
            let result = if errors == 0 {
                Ok(())
            } else {
                Err(SwdError::VerifyFailed(DATA_LOCATION))
            };
            self.report_errors("verify download buffer", result)?;
        }

        trace!("Exec:  Loading parameters");
        self.debug.write_word(ADDRESS_REGISTER, addr)?;
        self.debug.write_word(LENGTH_REGISTER, PAGE_SIZE_BYTES)?;
        self.debug.write_word(KEY1_REGISTER, KEY1_VALUE)?;
        self.debug.write_word(KEY2_REGISTER, KEY2_VALUE)?;
        self.debug
            .write_register::<VtorRegister>(Vtor::from(VTOR_VALUE))?;

        trace!("Exec:  Running algorithm");
        self.debug.reg_write(CoreRegister::Sp, ALG_STACK_POINTER)?;
        self.setpc_go(ALG_RESET_VECTOR)?;

        self.poll_completion()
    }

    /// Programs `byte_count` bytes of `src` to flash at `addr`, a page at a
    /// time.
    ///
    /// The flash algorithm must already be loaded, see
    /// [`Self::load_algorithm()`].
    ///
    /// Returns:
    /// - `Err(SwdError::Alignment)`: if `addr` or `byte_count` is not a
    ///   multiple of 4.
    /// - `Err(SwdError::Api)`: if `src` is shorter than `byte_count`.
    /// - `Err(SwdError)`: the first page's error.  Earlier pages have been
    ///   written.
    pub fn program(&mut self, addr: u32, src: &[u8], byte_count: u32) -> Result<(), SwdError> {
        if addr & 0x3 != 0 || byte_count & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }
        if src.len() < byte_count as usize {
            return Err(SwdError::Api);
        }

        let mut page = core::mem::take(&mut self.page);
        let result = self.program_pages(addr, src, byte_count, &mut page);
        self.page = page;
        result
    }

    fn program_pages(
        &mut self,
        addr: u32,
        src: &[u8],
        byte_count: u32,
        page: &mut [u32],
    ) -> Result<(), SwdError> {
        let mut preceding = ((addr & (PAGE_SIZE_BYTES - 1)) / 4) as usize;
        let mut page_addr = page_base(addr);
        let mut remaining = (byte_count / 4) as usize;
        let mut src_offset = 0;

        if preceding > 0 {
            self.debug
                .mem_read_words(page_addr, &mut page[..preceding])?;
        }

        while remaining > 0 {
            let words = remaining.min(PAGE_SIZE_WORDS - preceding);
            let end = preceding + words;

            for (index, word) in page[preceding..end].iter_mut().enumerate() {
                *word = word_at(src, src_offset + index * 4);
            }

            if end < PAGE_SIZE_WORDS {
                // Last page: source words past byte_count first, then flash
                let trailing_src = src.len().saturating_sub(src_offset + words * 4) / 4;
                let from_src = trailing_src.min(PAGE_SIZE_WORDS - end);
                for index in 0..from_src {
                    page[end + index] = word_at(src, src_offset + (words + index) * 4);
                }

                let flash_start = end + from_src;
                if flash_start < PAGE_SIZE_WORDS {
                    let flash_addr = page_addr + (flash_start as u32) * 4;
                    self.debug
                        .mem_read_words(flash_addr, &mut page[flash_start..])?;
                }
            }

            self.program_page(page_addr, page)?;

            page_addr = page_addr.wrapping_add(PAGE_SIZE_BYTES);
            src_offset += words * 4;
            remaining -= words;
            preceding = 0;
        }

        Ok(())
    }

    /// Reads back `byte_count` bytes of flash at `addr`, up to a page at a
    /// time, and compares them with `src`.
    ///
    /// Returns:
    /// - `Ok(())`: if they match.
    /// - `Err(SwdError::VerifyFailed(addr))`: the first mismatching word's
    ///   address.
    pub fn verify(&mut self, addr: u32, src: &[u8], byte_count: u32) -> Result<(), SwdError> {
        if addr & 0x3 != 0 || byte_count & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }
        if src.len() < byte_count as usize {
            return Err(SwdError::Api);
        }

        let mut buf = core::mem::take(&mut self.page);
        let result = self.verify_pages(addr, src, byte_count, &mut buf);
        self.page = buf;
        result
    }

    fn verify_pages(
        &mut self,
        addr: u32,
        src: &[u8],
        byte_count: u32,
        buf: &mut [u32],
    ) -> Result<(), SwdError> {
        let mut remaining = (byte_count / 4) as usize;
        let mut offset = 0;

        while remaining > 0 {
            let words = remaining.min(PAGE_SIZE_WORDS);
            let start = addr.wrapping_add((offset * 4) as u32);
            print_info!(
                self,
                "Verifying 0x{start:08X} to 0x{:08X}.",
                start.wrapping_add((words * 4) as u32)
            );

            self.debug.mem_read_words(start, &mut buf[..words])?;
            for (index, word) in buf[..words].iter().enumerate() {
                if *word != word_at(src, (offset + index) * 4) {
                    let mismatch = start.wrapping_add((index * 4) as u32);
                    print_info!(self, "Mismatch found at 0x{mismatch:08X}.");
                    return Err(SwdError::VerifyFailed(mismatch));
                }
            }

            offset += words;
            remaining -= words;
        }

        Ok(())
    }

    /// Halts the core and captures its registers, logging them when printing
    /// is enabled.  The stack frame is then dumped too, if SP points into
    /// SRAM.
    pub fn read_state(&mut self) -> Result<CoreState, SwdError> {
        print_info!(self, "Printing Cooper internal state:");

        let result = self.halt_and_wait();
        self.report_errors("halt", result)?;

        let mut state = CoreState::default();
        for (index, reg) in state.regs.iter_mut().enumerate() {
            let core_reg = CoreRegister::from_index(index as u8).ok_or(SwdError::Api)?;
            *reg = self.debug.reg_read(core_reg)?;
            print_info!(self, "R{index:02}: 0x{:08X}", *reg);
        }

        state.sp = self.debug.reg_read(CoreRegister::Sp)?;
        state.lr = self.debug.reg_read(CoreRegister::Lr)?;
        state.pc = self.debug.reg_read(CoreRegister::Pc)?;
        state.xpsr = self.debug.reg_read(CoreRegister::Xpsr)?;
        state.msp = self.debug.reg_read(CoreRegister::Msp)?;
        state.psp = self.debug.reg_read(CoreRegister::Psp)?;
        state.icsr = self.debug.read_register::<IcsrRegister>()?.into();
        state.cfsr = self.debug.read_register::<CfsrRegister>()?.into();

        print_info!(self, "SP:  0x{:08X}", state.sp);
        print_info!(self, "LR:  0x{:08X}", state.lr);
        print_info!(self, "PC:  0x{:08X}", state.pc);
        print_info!(self, "PSR: 0x{:08X}", state.xpsr);
        print_info!(self, "MSP: 0x{:08X}", state.msp);
        print_info!(self, "PSP: 0x{:08X}", state.psp);
        print_info!(self, "ICSR: 0x{:08X}", state.icsr);
        print_info!(self, "CFSR: 0x{:08X}", state.cfsr);

        if !self.debug.config().enable_printing {
            return Ok(state);
        }
        if in_sram(state.sp) {
            info!("Stack Frame:");
            self.print_memory(state.sp, STACK_FRAME_WORDS * 4)?;
        } else {
            info!("Stack pointer outside of SRAM.");
        }

        Ok(state)
    }

    /// Logs `num_bytes` of target memory from `addr`, four words per line.
    pub fn print_memory(&mut self, addr: u32, num_bytes: u32) -> Result<(), SwdError> {
        let mut line = String::new();
        for offset in (0..num_bytes).step_by(4) {
            let read_addr = addr.wrapping_add(offset);
            if offset % 16 == 0 {
                if offset != 0 {
                    info!("{line}");
                    line.clear();
                }
                let _ = write!(line, "0x{read_addr:08X}:");
            }

            let word = self.debug.read_word(read_addr)?;
            let _ = write!(line, " {word:08X}");
        }

        if !line.is_empty() {
            info!("{line}");
        }

        Ok(())
    }

    /// Pulses Cooper's reset line (high, low, high) and reconnects.
    ///
    /// Returns:
    /// - `Err(SwdError::Unsupported)`: if there is no reset pin.
    pub fn reset(&mut self) -> Result<(), SwdError> {
        let Some(pin) = self.reset_pin.as_mut() else {
            warn!("No Cooper reset pin");
            return Err(SwdError::Unsupported);
        };

        print_info!(self, "Resetting Cooper...");
        pin.set_high().map_err(|_| SwdError::Gpio)?;
        self.delay.delay_ms(RESET_HIGH_MS);
        pin.set_low().map_err(|_| SwdError::Gpio)?;
        self.delay.delay_ms(RESET_LOW_MS);
        pin.set_high().map_err(|_| SwdError::Gpio)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        print_info!(self, "Resetting Cooper Done...");

        let result = self.debug.connect().map(|_| ());
        self.report_errors("connect", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwdConfig;
    use crate::sim::{ERASED, SimDelay, SimTarget, init_logging};
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;
    use std::cell::RefCell;
    use std::rc::Rc;

    const ALGORITHM: [u8; 12] = [
        0x00, 0x70, 0x00, 0x20, 0xD5, 0x00, 0x00, 0x20, 0x70, 0x47, 0x00, 0xBF,
    ];

    fn cooper_with(sim: SimTarget, config: SwdConfig) -> Cooper<'static, SimTarget, SimDelay> {
        init_logging();
        let mut debug = DebugInterface::new(sim, config).unwrap();
        debug.connect().unwrap();
        Cooper::new(debug, SimDelay::default(), &ALGORITHM)
    }

    fn cooper() -> Cooper<'static, SimTarget, SimDelay> {
        cooper_with(SimTarget::new(), SwdConfig::default())
    }

    fn target<'b, R: OutputPin>(cooper: &'b Cooper<'_, SimTarget, SimDelay, R>) -> &'b SimTarget {
        cooper.debug().swd().driver()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|ii| ii as u8).collect()
    }

    fn flash_with(sim: &mut SimTarget, base: u32, pages: u32) {
        let words: Vec<u32> = (0..pages * PAGE_SIZE_WORDS as u32)
            .map(|ii| 0xF1A5_0000 | ii)
            .collect();
        sim.load_words(base, &words);
    }

    #[test]
    fn compare_counts_differences() {
        assert_eq!(compare_buffers(&[1, 2, 3], &[1, 2, 3]), 0);
        assert_eq!(compare_buffers(&[1, 2, 3, 4], &[0, 2, 0, 4]), 2);
        let a = vec![0u8; 300];
        let b = vec![1u8; 300];
        assert_eq!(compare_buffers(&a, &b), 300);
    }

    #[test]
    fn load_algorithm_and_catch_reset() {
        let mut cooper = cooper();
        cooper.load_algorithm().unwrap();

        let sim = target(&cooper);
        let words = sim.read_words(ALGORITHM_BASE, 3);
        assert_eq!(words, [0x2000_7000, 0x2000_00D5, 0xBF00_4770]);
        assert_eq!(sim.system_resets, 1);
        assert_eq!(sim.demcr() & 1, 1);
        assert!(sim.is_halted());
    }

    #[test]
    fn soft_reset_without_halt() {
        let mut cooper = cooper();
        cooper.soft_reset(false).unwrap();
        assert_eq!(target(&cooper).system_resets, 1);
        assert!(!target(&cooper).is_halted());
    }

    #[test]
    fn single_page() {
        let mut cooper = cooper();
        let page: Vec<u32> = (0..PAGE_SIZE_WORDS as u32).collect();
        cooper.program_page(0x4000, &page).unwrap();

        let sim = target(&cooper);
        assert_eq!(sim.page_writes.len(), 1);
        assert_eq!(sim.page_writes[0], (0x4000, page.clone()));
        assert_eq!(sim.read_word(KEY2_REGISTER), 0);
        assert_eq!(sim.core_register(CoreRegister::Sp), ALG_STACK_POINTER);
        assert_ne!(
            sim.core_register(CoreRegister::Xpsr) & CoreRegister::XPSR_THUMB,
            0
        );
    }

    #[test]
    fn algorithm_readback_mismatch() {
        let mut sim = SimTarget::new();
        sim.corrupt_reads = Some(ALGORITHM_BASE + 4);
        let mut strict = cooper_with(sim, SwdConfig::default());
        assert_eq!(
            strict.load_algorithm(),
            Err(SwdError::VerifyFailed(ALGORITHM_BASE))
        );
        assert_eq!(target(&strict).system_resets, 0);

        let mut sim = SimTarget::new();
        sim.corrupt_reads = Some(ALGORITHM_BASE + 4);
        let mut lenient = cooper_with(sim, SwdConfig::default().with_halt_on_errors(false));
        lenient.load_algorithm().unwrap();
        assert_eq!(target(&lenient).system_resets, 1);
        assert!(target(&lenient).is_halted());

        // Skipping the readback ignores the corruption
        let mut sim = SimTarget::new();
        sim.corrupt_reads = Some(ALGORITHM_BASE + 4);
        let mut unchecked = cooper_with(sim, SwdConfig::default().with_verify_algorithm(false));
        unchecked.load_algorithm().unwrap();
        assert_eq!(target(&unchecked).system_resets, 1);
    }

    #[test]
    fn download_buffer_verify() {
        let page: Vec<u32> = (0..PAGE_SIZE_WORDS as u32).map(|ii| ii << 8).collect();
        let config = SwdConfig::default().with_verify_download_buffer(true);

        let mut cooper = cooper_with(SimTarget::new(), config);
        cooper.program_page(0x4000, &page).unwrap();
        assert_eq!(target(&cooper).page_writes, [(0x4000, page.clone())]);

        let mut sim = SimTarget::new();
        sim.corrupt_reads = Some(DATA_LOCATION + 0x10);
        let mut strict = cooper_with(sim, config);
        assert_eq!(
            strict.program_page(0x4000, &page),
            Err(SwdError::VerifyFailed(DATA_LOCATION))
        );
        assert!(target(&strict).page_writes.is_empty());
        assert_eq!(target(&strict).algorithm_runs, 0);

        // Not fatal, so the page is still programmed
        let mut sim = SimTarget::new();
        sim.corrupt_reads = Some(DATA_LOCATION + 0x10);
        let mut lenient = cooper_with(sim, config.with_halt_on_errors(false));
        lenient.program_page(0x4000, &page).unwrap();
        assert_eq!(target(&lenient).page_writes, [(0x4000, page)]);
    }

    #[test]
    fn page_buffer_must_be_a_page() {
        let mut cooper = cooper();
        assert_eq!(cooper.program_page(0x4000, &[0; 16]), Err(SwdError::Api));
    }

    #[test]
    fn in_page_write_preserves_flash() {
        let mut sim = SimTarget::new();
        flash_with(&mut sim, 0x1000, 1);
        let original = sim.read_words(0x1000, PAGE_SIZE_WORDS);
        let mut cooper = cooper_with(sim, SwdConfig::default());

        let src = pattern(64);
        cooper.program(0x1000, &src, 64).unwrap();

        let sim = target(&cooper);
        assert_eq!(sim.page_writes.len(), 1);
        let (addr, written) = &sim.page_writes[0];
        assert_eq!(*addr, 0x1000);
        assert_eq!(words_to_bytes(&written[..16]), src);
        assert_eq!(written[16..], original[16..]);
    }

    #[test]
    fn unaligned_write_spans_two_pages() {
        let mut sim = SimTarget::new();
        flash_with(&mut sim, 0x1000, 2);
        let original = sim.read_words(0x1000, 2 * PAGE_SIZE_WORDS);
        let mut cooper = cooper_with(sim, SwdConfig::default());

        let src = pattern(16);
        cooper.program(0x1FF8, &src, 16).unwrap();

        let sim = target(&cooper);
        assert_eq!(sim.page_writes.len(), 2);

        let (addr, first) = &sim.page_writes[0];
        assert_eq!(*addr, 0x1000);
        assert_eq!(first[..1022], original[..1022]);
        assert_eq!(words_to_bytes(&first[1022..]), src[..8]);

        let (addr, second) = &sim.page_writes[1];
        assert_eq!(*addr, 0x2000);
        assert_eq!(words_to_bytes(&second[..2]), src[8..]);
        assert_eq!(second[2..], original[PAGE_SIZE_WORDS + 2..]);
    }

    #[test]
    fn trailing_bytes_come_from_longer_source() {
        let mut sim = SimTarget::new();
        flash_with(&mut sim, 0x3000, 1);
        let original = sim.read_words(0x3000, PAGE_SIZE_WORDS);
        let mut cooper = cooper_with(sim, SwdConfig::default());

        // 32 bytes are requested, but the buffer holds 48, so the 16 beyond
        // byte_count land in the page too.  The rest is preserved from flash.
        let src = pattern(48);
        cooper.program(0x3100, &src, 32).unwrap();

        let (_, written) = &target(&cooper).page_writes[0];
        assert_eq!(written[..64], original[..64]);
        assert_eq!(words_to_bytes(&written[64..76]), src);
        assert_eq!(written[76..], original[76..]);
    }

    #[test]
    fn multi_page_completeness() {
        let mut cooper = cooper();
        let src = pattern(3 * PAGE_SIZE_BYTES as usize);
        let count = 2 * PAGE_SIZE_BYTES + 8;
        cooper.program(0x8FF0, &src, count).unwrap();

        let sim = target(&cooper);
        let pages: Vec<u32> = sim.page_writes.iter().map(|(addr, _)| *addr).collect();
        assert_eq!(pages, [0x8000, 0x9000, 0xA000]);

        let flash = words_to_bytes(&sim.read_words(0x8FF0, count as usize / 4));
        assert_eq!(flash, src[..count as usize]);

        cooper.verify(0x8FF0, &src, count).unwrap();
    }

    #[test]
    fn alignment_and_length_checks() {
        let mut cooper = cooper();
        let src = pattern(64);
        assert_eq!(cooper.program(0x1002, &src, 8), Err(SwdError::Alignment));
        assert_eq!(cooper.program(0x1000, &src, 6), Err(SwdError::Alignment));
        assert_eq!(cooper.program(0x1000, &src, 128), Err(SwdError::Api));
        assert_eq!(SwdError::Alignment.status(), cooper_mbox::STATUS_FAILED);
        assert!(target(&cooper).page_writes.is_empty());
    }

    #[test]
    fn verify_reports_first_mismatch() {
        let mut sim = SimTarget::new();
        sim.load_words(0x5000, &[0x0302_0100, 0x0706_0504, 0xDEAD_BEEF]);
        let mut cooper = cooper_with(sim, SwdConfig::default());

        let src = pattern(12);
        assert_eq!(cooper.verify(0x5000, &src, 8), Ok(()));
        assert_eq!(
            cooper.verify(0x5000, &src, 12),
            Err(SwdError::VerifyFailed(0x5008))
        );
        assert_eq!(SwdError::VerifyFailed(0x5008).status(), 1);
    }

    #[test]
    fn algorithm_timeout() {
        let mut sim = SimTarget::new();
        sim.algorithm_hangs = true;
        let mut cooper = cooper_with(sim, SwdConfig::default().with_halt_on_errors(false));

        let page = vec![0u32; PAGE_SIZE_WORDS];
        let result = cooper.program_page(0x4000, &page);
        assert_eq!(result, Err(SwdError::Timeout));
        assert!(result.unwrap_err().is_fatal(false));

        assert_eq!(
            cooper.delay.total_ns,
            (PAGE_POLL_LIMIT * PAGE_POLL_INTERVAL_MS) as u64 * 1_000_000
        );
        // The dump halted the core
        assert!(target(&cooper).is_halted());
        assert!(target(&cooper).page_writes.is_empty());
    }

    #[test]
    fn read_state_captures_registers() {
        let mut sim = SimTarget::new();
        sim.set_core_register(CoreRegister::R3, 0x33);
        sim.set_core_register(CoreRegister::Sp, 0x2000_6FE0);
        sim.set_core_register(CoreRegister::Pc, 0x0000_1234);
        sim.load_words(0x2000_6FE0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut cooper = cooper_with(sim, SwdConfig::default());

        let state = cooper.read_state().unwrap();
        assert_eq!(state.regs[3], 0x33);
        assert_eq!(state.regs[13], 0x2000_6FE0);
        assert_eq!(state.sp, 0x2000_6FE0);
        assert_eq!(state.pc, 0x0000_1234);
    }

    #[test]
    fn read_state_quietly() {
        let run = |config: SwdConfig| {
            let mut sim = SimTarget::new();
            sim.set_core_register(CoreRegister::Sp, 0x2000_6FE0);
            sim.load_words(0x2000_6FE0, &[1, 2, 3, 4, 5, 6, 7, 8]);
            let mut cooper = cooper_with(sim, config);
            let before = target(&cooper).requests;
            let state = cooper.read_state().unwrap();
            (state, target(&cooper).requests - before)
        };

        let (loud, loud_requests) = run(SwdConfig::default());
        let (quiet, quiet_requests) = run(SwdConfig::default().with_enable_printing(false));
        assert_eq!(quiet, loud);
        // No stack frame dump without printing
        assert!(quiet_requests < loud_requests);
    }

    #[test]
    fn print_memory_reads_each_word() {
        let mut cooper = cooper();
        let before = target(&cooper).requests;
        cooper.print_memory(SRAM_BASE, 24).unwrap();
        assert!(target(&cooper).requests > before);
        assert_eq!(target(&cooper).read_word(SRAM_BASE + 24), ERASED);
    }

    #[derive(Debug, Clone, Default)]
    struct RecordingPin(Rc<RefCell<Vec<bool>>>);

    impl ErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().push(true);
            Ok(())
        }
    }

    #[test]
    fn reset_pulses_pin_and_reconnects() {
        let mut cooper = cooper();
        assert_eq!(cooper.reset(), Err(SwdError::Unsupported));

        let pin = RecordingPin::default();
        let log = pin.0.clone();
        let debug = DebugInterface::new(SimTarget::new(), SwdConfig::default()).unwrap();
        let mut cooper = Cooper::with_reset_pin(debug, SimDelay::default(), &ALGORITHM, pin);

        cooper.reset().unwrap();
        assert_eq!(*log.borrow(), [true, false, true]);
        assert_eq!(cooper.delay.total_ns, 140 * 1_000_000);
        assert!(cooper.debug().swd().is_connected());
    }

    #[test]
    fn error_policy() {
        let lenient = cooper_with(SimTarget::new(), SwdConfig::default().with_halt_on_errors(false));
        assert_eq!(lenient.report_errors("test", Err(SwdError::FaultAck)), Ok(()));
        assert_eq!(
            lenient.report_errors("test", Err(SwdError::OutOfMemory)),
            Err(SwdError::OutOfMemory)
        );

        let strict = cooper();
        assert_eq!(
            strict.report_errors("test", Err(SwdError::FaultAck)),
            Err(SwdError::FaultAck)
        );
        assert_eq!(strict.report_errors("test", Ok(())), Ok(()));
    }
}
