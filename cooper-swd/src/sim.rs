// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Simulated SWD target, for tests
//!
//! [`SimTarget`] implements [`SwdDriver`] and decodes the bits it is given
//! as SWD packets.  It models an ADIv5 DP, a single MEM-AP, sparse memory,
//! the System Control Space debug registers, and the Cooper flash algorithm
//! (which copies the staged page to the flash address it is given).
//!
//! Framing errors panic, so a test fails at the offending transfer.

use std::collections::BTreeMap;

use embedded_hal::delay::DelayNs;

use cooper_core::arm::scs::CoreRegister;
use cooper_core::cooper::{
    ADDRESS_REGISTER, ALG_RESET_VECTOR, ALG_STACK_POINTER, DATA_LOCATION, KEY1_REGISTER,
    KEY1_VALUE, KEY2_REGISTER, KEY2_VALUE, LENGTH_REGISTER, VTOR_VALUE,
};

use crate::SwdError;
use crate::driver::{BitOrder, SwdDriver, check_bits, check_turnaround};

/// Routes log output through the test harness.  Safe to call from every
/// test.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) const SIM_IDCODE: u32 = 0x0BC1_1477;

/// Value read from memory that has never been written
pub(crate) const ERASED: u32 = 0xFFFF_FFFF;
const LINE_RESET_BITS: u32 = 50;

const DHCSR: u32 = 0xE000_EDF0;
const DCRSR: u32 = 0xE000_EDF4;
const DCRDR: u32 = 0xE000_EDF8;
const DEMCR: u32 = 0xE000_EDFC;
const AIRCR: u32 = 0xE000_ED0C;
const VTOR: u32 = 0xE000_ED08;
const ICSR: u32 = 0xE000_ED04;
const CFSR: u32 = 0xE000_ED28;

const STICKY: u32 = (1 << 1) | (1 << 4) | (1 << 5) | (1 << 7);
const STICKYERR: u32 = 1 << 5;
const WDATAERR: u32 = 1 << 7;
const READOK: u32 = 1 << 6;
const POWER_REQS: u32 = (1 << 28) | (1 << 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Request(u8),
    Ack(u8),
    ReadData(u32),
    ReadParity(u32),
    ReadTrn,
    WriteTrn(u8),
    WriteData(u8),
    WriteParity(u8, u32),
    AckTrn,
}

#[derive(Debug)]
pub(crate) struct SimTarget {
    phase: Phase,

    // DP
    ctrl_stat: u32,
    select: u32,
    rdbuff: u32,

    // MEM-AP
    csw: u32,
    tar: u32,

    // Core
    core: [u32; 19],
    dcrdr: u32,
    demcr: u32,
    vtor: u32,
    debugen: bool,
    halted: bool,
    halt_countdown: Option<u32>,
    // Consecutive high SWDIO bits, a line reset needs at least 50
    high_bits: u32,

    memory: BTreeMap<u32, u32>,

    // Fault injection
    pub(crate) absent: bool,
    pub(crate) wait_acks: u32,
    pub(crate) fault_acks: u32,
    pub(crate) corrupt_parity: u32,
    pub(crate) power_ack_fails: bool,
    pub(crate) sticky_after_write: bool,
    pub(crate) halt_latency: u32,
    pub(crate) algorithm_hangs: bool,
    // Bus reads of this word come back with bit 0 flipped
    pub(crate) corrupt_reads: Option<u32>,

    // Observations
    pub(crate) line_resets: u32,
    pub(crate) jtag_to_swd: u32,
    pub(crate) requests: u32,
    pub(crate) system_resets: u32,
    pub(crate) algorithm_runs: u32,
    pub(crate) page_writes: Vec<(u32, Vec<u32>)>,
}

impl SimTarget {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Idle,
            ctrl_stat: 0,
            select: 0,
            rdbuff: 0,
            csw: 0,
            tar: 0,
            core: [0; 19],
            dcrdr: 0,
            demcr: 0,
            vtor: 0,
            debugen: false,
            halted: false,
            halt_countdown: None,
            high_bits: 0,
            memory: BTreeMap::new(),
            absent: false,
            wait_acks: 0,
            fault_acks: 0,
            corrupt_parity: 0,
            power_ack_fails: false,
            sticky_after_write: false,
            halt_latency: 0,
            algorithm_hangs: false,
            corrupt_reads: None,
            line_resets: 0,
            jtag_to_swd: 0,
            requests: 0,
            system_resets: 0,
            algorithm_runs: 0,
            page_writes: Vec::new(),
        }
    }

    pub(crate) fn read_word(&self, addr: u32) -> u32 {
        *self.memory.get(&(addr & !0x3)).unwrap_or(&ERASED)
    }

    pub(crate) fn write_word(&mut self, addr: u32, value: u32) {
        self.memory.insert(addr & !0x3, value);
    }

    pub(crate) fn read_words(&self, addr: u32, count: usize) -> Vec<u32> {
        (0..count)
            .map(|ii| self.read_word(addr + (ii as u32) * 4))
            .collect()
    }

    pub(crate) fn load_words(&mut self, addr: u32, words: &[u32]) {
        for (ii, word) in words.iter().enumerate() {
            self.write_word(addr + (ii as u32) * 4, *word);
        }
    }

    pub(crate) fn csw(&self) -> u32 {
        self.csw
    }

    pub(crate) fn core_register(&self, reg: CoreRegister) -> u32 {
        self.core[reg.code() as usize]
    }

    pub(crate) fn set_core_register(&mut self, reg: CoreRegister, value: u32) {
        self.core[reg.code() as usize] = value;
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted
    }

    pub(crate) fn demcr(&self) -> u32 {
        self.demcr
    }

    fn request_parity_ok(request: u8) -> bool {
        let parity = ((request & 0x1E).count_ones() & 1) as u8;
        (request >> 5) & 1 == parity
    }

    fn is_ap(request: u8) -> bool {
        request & 0x02 != 0
    }

    fn is_read(request: u8) -> bool {
        request & 0x04 != 0
    }

    fn addr(request: u8) -> u8 {
        (request >> 1) & 0x0C
    }

    fn unexpected(&self, what: &str) -> ! {
        panic!("SWD framing error: {what} during {:?}", self.phase)
    }

    fn start_request(&mut self, request: u8) {
        assert!(
            request & 0x40 == 0 && request & 0x80 != 0,
            "bad stop/park in request {request:#04X}"
        );
        assert!(
            Self::request_parity_ok(request),
            "bad parity in request {request:#04X}"
        );
        self.requests += 1;
        self.phase = Phase::Request(request);
    }

    fn ack(&mut self, request: u8) -> u32 {
        if self.absent {
            self.phase = Phase::AckTrn;
            return 0b111;
        }
        if self.wait_acks > 0 {
            self.wait_acks -= 1;
            self.phase = Phase::AckTrn;
            return 0b010;
        }
        if self.fault_acks > 0 {
            self.fault_acks -= 1;
            self.phase = Phase::AckTrn;
            return 0b100;
        }

        self.phase = if Self::is_read(request) {
            let value = if Self::is_ap(request) {
                self.ap_read(Self::addr(request))
            } else {
                self.dp_read(Self::addr(request))
            };
            Phase::ReadData(value)
        } else {
            Phase::WriteTrn(request)
        };

        0b001
    }

    fn finish_write(&mut self, request: u8, data: u32, parity: u32) {
        if parity != (data.count_ones() & 1) {
            self.ctrl_stat |= WDATAERR;
            return;
        }

        if Self::is_ap(request) {
            self.ap_write(Self::addr(request), data);
        } else {
            self.dp_write(Self::addr(request), data);
        }
    }

    fn dp_read(&mut self, addr: u8) -> u32 {
        match addr {
            0x00 => SIM_IDCODE,
            0x04 => {
                let acks = if self.power_ack_fails {
                    0
                } else {
                    (self.ctrl_stat & POWER_REQS) << 1
                };
                self.ctrl_stat | acks
            }
            0x0C => self.rdbuff,
            _ => 0,
        }
    }

    fn dp_write(&mut self, addr: u8, data: u32) {
        match addr {
            0x00 => {
                if data & 0x1E != 0 {
                    self.ctrl_stat &= !STICKY;
                }
            }
            0x04 => self.ctrl_stat = (self.ctrl_stat & STICKY) | (data & POWER_REQS),
            0x08 => self.select = data,
            _ => panic!("write to read-only DP register {addr:#04X}"),
        }
    }

    fn ap_addr(&self, addr: u8) -> u8 {
        (((self.select >> 4) & 0xF) << 4) as u8 | addr
    }

    fn increment_tar(&mut self) {
        let step = match self.csw & 0x7 {
            0 => 1,
            1 => 2,
            _ => 4,
        };
        if (self.csw >> 4) & 0x3 != 0 {
            // Auto-increment wraps within 1KB
            self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(step) & 0x3FF);
        }
    }

    fn ap_read(&mut self, addr: u8) -> u32 {
        let value = match self.ap_addr(addr) {
            0x00 => self.csw,
            0x04 => self.tar,
            0x0C => {
                let value = self.bus_read(self.tar);
                self.increment_tar();
                value
            }
            other => panic!("read of unmodelled AP register {other:#04X}"),
        };

        // Posted: return the previous result, keep this one in RDBUFF
        self.ctrl_stat |= READOK;
        core::mem::replace(&mut self.rdbuff, value)
    }

    fn ap_write(&mut self, addr: u8, data: u32) {
        match self.ap_addr(addr) {
            0x00 => self.csw = data,
            0x04 => self.tar = data,
            0x0C => {
                let tar = self.tar;
                if self.csw & 0x7 == 0 {
                    let shift = (tar & 0x3) * 8;
                    let word = self.bus_read(tar & !0x3);
                    let merged = (word & !(0xFF << shift)) | (data & (0xFF << shift));
                    self.bus_write(tar & !0x3, merged);
                } else {
                    self.bus_write(tar, data);
                }
                self.increment_tar();
            }
            other => panic!("write of unmodelled AP register {other:#04X}"),
        }

        if self.sticky_after_write {
            self.ctrl_stat |= STICKYERR;
        }
    }

    fn bus_read(&mut self, addr: u32) -> u32 {
        match addr & !0x3 {
            DHCSR => {
                if let Some(countdown) = self.halt_countdown {
                    if countdown == 0 {
                        self.halted = true;
                        self.halt_countdown = None;
                    } else {
                        self.halt_countdown = Some(countdown - 1);
                    }
                }
                let mut value = (1 << 16) | self.debugen as u32;
                if self.halted {
                    value |= (1 << 17) | (1 << 1);
                }
                value
            }
            DCRDR => self.dcrdr,
            DEMCR => self.demcr,
            VTOR => self.vtor,
            ICSR | CFSR | DCRSR | AIRCR => 0,
            other if self.corrupt_reads == Some(other) => self.read_word(other) ^ 1,
            other => self.read_word(other),
        }
    }

    fn bus_write(&mut self, addr: u32, data: u32) {
        match addr & !0x3 {
            DHCSR => {
                if data >> 16 != 0xA05F {
                    return;
                }
                self.debugen = data & 1 != 0;
                if data & 0x2 != 0 {
                    if !self.halted {
                        if self.halt_latency == 0 {
                            self.halted = true;
                        } else {
                            self.halt_countdown = Some(self.halt_latency);
                        }
                    }
                } else if self.halted {
                    self.halted = false;
                    self.resume();
                }
            }
            DCRSR => {
                let index = (data & 0x7F) as usize;
                if index < self.core.len() {
                    if data & (1 << 16) != 0 {
                        self.core[index] = self.dcrdr;
                    } else {
                        self.dcrdr = self.core[index];
                    }
                }
            }
            DCRDR => self.dcrdr = data,
            DEMCR => self.demcr = data,
            VTOR => self.vtor = data,
            AIRCR => {
                if data == 0x05FA_0004 {
                    self.system_reset();
                }
            }
            ICSR | CFSR => {}
            other => self.write_word(other, data),
        }
    }

    fn system_reset(&mut self) {
        self.system_resets += 1;
        self.core = [0; 19];
        self.core[CoreRegister::Sp.code() as usize] = self.read_word(0);
        self.core[CoreRegister::Pc.code() as usize] = self.read_word(4);
        self.core[CoreRegister::Xpsr.code() as usize] = CoreRegister::XPSR_THUMB;
        self.vtor = 0;
        self.halt_countdown = None;
        self.halted = self.demcr & 1 != 0;
    }

    // The core has been told to run.  Only the flash algorithm is modelled.
    fn resume(&mut self) {
        if self.core[CoreRegister::Pc.code() as usize] != ALG_RESET_VECTOR {
            return;
        }
        self.algorithm_runs += 1;

        let sp_ok = self.core[CoreRegister::Sp.code() as usize] == ALG_STACK_POINTER;
        let thumb = self.core[CoreRegister::Xpsr.code() as usize] & CoreRegister::XPSR_THUMB != 0;
        let keys_ok = self.read_word(KEY1_REGISTER) == KEY1_VALUE
            && self.read_word(KEY2_REGISTER) == KEY2_VALUE;
        if !sp_ok || !thumb || self.vtor != VTOR_VALUE || !keys_ok || self.algorithm_hangs {
            return;
        }

        let addr = self.read_word(ADDRESS_REGISTER);
        let len = self.read_word(LENGTH_REGISTER) as usize;
        let words = self.read_words(DATA_LOCATION, len / 4);
        self.load_words(addr, &words);
        self.page_writes.push((addr, words));

        self.write_word(KEY2_REGISTER, 0);
        self.halted = true;
    }
}

impl SwdDriver for SimTarget {
    fn mosi(&mut self, data: u32, bits: u8, order: BitOrder) -> Result<u8, SwdError> {
        check_bits(bits)?;
        assert_eq!(order, BitOrder::LsbFirst, "SWD is always LSB first");

        let all_ones = bits == 32 && data == 0xFFFF_FFFF;
        if self.phase != Phase::Idle || !all_ones {
            self.high_bits = 0;
        }

        match (self.phase, bits) {
            (Phase::Idle, 32) if all_ones => {
                let before = self.high_bits;
                self.high_bits = self.high_bits.saturating_add(32);
                if before < LINE_RESET_BITS && self.high_bits >= LINE_RESET_BITS {
                    self.line_resets += 1;
                    self.select = 0;
                }
            }
            (Phase::Idle, 16) => {
                assert_eq!(data, 0xE79E, "bad JTAG-to-SWD sequence");
                self.jtag_to_swd += 1;
            }
            (Phase::Idle, 8) if data == 0 => {}
            (Phase::Idle, 8) if data & 1 == 1 => self.start_request(data as u8),
            (Phase::WriteData(request), 32) => self.phase = Phase::WriteParity(request, data),
            (Phase::WriteParity(request, value), 1) => {
                self.finish_write(request, value, data & 1);
                self.phase = Phase::Idle;
            }
            _ => self.unexpected("mosi"),
        }

        Ok(bits)
    }

    fn miso(&mut self, bits: u8, order: BitOrder) -> Result<u32, SwdError> {
        check_bits(bits)?;
        assert_eq!(order, BitOrder::LsbFirst, "SWD is always LSB first");

        match (self.phase, bits) {
            (Phase::Ack(request), 3) => Ok(self.ack(request)),
            (Phase::ReadData(value), 32) => {
                self.phase = Phase::ReadParity(value);
                Ok(value)
            }
            (Phase::ReadParity(value), 1) => {
                self.phase = Phase::ReadTrn;
                let mut parity = value.count_ones() & 1;
                if self.corrupt_parity > 0 {
                    self.corrupt_parity -= 1;
                    parity ^= 1;
                }
                Ok(parity)
            }
            _ => self.unexpected("miso"),
        }
    }

    fn mosi_trn(&mut self, bits: u8) -> Result<u8, SwdError> {
        check_turnaround(bits)?;

        self.phase = match self.phase {
            Phase::ReadTrn | Phase::AckTrn => Phase::Idle,
            Phase::WriteTrn(request) => Phase::WriteData(request),
            _ => self.unexpected("mosi_trn"),
        };

        Ok(bits)
    }

    fn miso_trn(&mut self, bits: u8) -> Result<u8, SwdError> {
        check_turnaround(bits)?;

        self.phase = match self.phase {
            Phase::Request(request) => Phase::Ack(request),
            _ => self.unexpected("miso_trn"),
        };

        Ok(bits)
    }
}

/// A delay which only counts how long it was asked to wait
#[derive(Debug, Default)]
pub(crate) struct SimDelay {
    pub(crate) total_ns: u64,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}
