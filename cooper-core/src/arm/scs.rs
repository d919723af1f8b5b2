// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Cortex-M System Control Space debug registers
//!
//! These live in the target's memory map and are accessed through the
//! MEM-AP rather than by SWD address.  Halting, resuming, resetting and
//! core register access all go through this handful of words.

use crate::arm::register::{MemoryMappedRegister, flag};
use crate::register_data;
use core::fmt;

/// Debug Halting Control and Status Register
pub struct DhcsrRegister;

impl MemoryMappedRegister for DhcsrRegister {
    const ADDRESS: u32 = 0xE000_EDF0;
    type Value = Dhcsr;
}

/// DHCSR data.  Writes must carry [`Dhcsr::DBGKEY`] in the top half-word or
/// they are ignored by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dhcsr(u32);

register_data!(Dhcsr);

impl Dhcsr {
    pub const DBGKEY: u32 = 0xA05F << 16;

    const C_DEBUGEN: u32 = 1 << 0;
    const C_HALT: u32 = 1 << 1;
    const C_STEP: u32 = 1 << 2;
    const C_MASKINTS: u32 = 1 << 3;
    const S_REGRDY: u32 = 1 << 16;
    const S_HALT: u32 = 1 << 17;
    const S_SLEEP: u32 = 1 << 18;
    const S_LOCKUP: u32 = 1 << 19;
    const S_RETIRE_ST: u32 = 1 << 24;
    const S_RESET_ST: u32 = 1 << 25;

    /// Debug enabled, core halted
    pub const HALT: u32 = Self::DBGKEY | Self::C_DEBUGEN | Self::C_HALT;

    /// Debug enabled, core running
    pub const RUN: u32 = Self::DBGKEY | Self::C_DEBUGEN;

    pub fn halt() -> Self {
        Dhcsr(Self::HALT)
    }

    pub fn run() -> Self {
        Dhcsr(Self::RUN)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn debugen(&self) -> bool {
        self.0 & Self::C_DEBUGEN != 0
    }

    pub fn c_halt(&self) -> bool {
        self.0 & Self::C_HALT != 0
    }

    pub fn step(&self) -> bool {
        self.0 & Self::C_STEP != 0
    }

    pub fn maskints(&self) -> bool {
        self.0 & Self::C_MASKINTS != 0
    }

    pub fn regrdy(&self) -> bool {
        self.0 & Self::S_REGRDY != 0
    }

    /// Core is in debug state
    pub fn halted(&self) -> bool {
        self.0 & Self::S_HALT != 0
    }

    pub fn sleeping(&self) -> bool {
        self.0 & Self::S_SLEEP != 0
    }

    pub fn lockup(&self) -> bool {
        self.0 & Self::S_LOCKUP != 0
    }

    pub fn retired(&self) -> bool {
        self.0 & Self::S_RETIRE_ST != 0
    }

    pub fn reset_seen(&self) -> bool {
        self.0 & Self::S_RESET_ST != 0
    }
}

/// Debug Core Register Selector Register (write-only)
pub struct DcrsrRegister;

impl MemoryMappedRegister for DcrsrRegister {
    const ADDRESS: u32 = 0xE000_EDF4;
    type Value = Dcrsr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dcrsr(u32);

register_data!(Dcrsr);

impl Dcrsr {
    const REGWNR: u32 = 1 << 16;
    const REGSEL_MASK: u32 = 0x7F;

    /// Request a transfer from `reg` into DCRDR
    pub fn read(reg: CoreRegister) -> Self {
        Dcrsr(reg.code() as u32)
    }

    /// Request a transfer from DCRDR into `reg`
    pub fn write(reg: CoreRegister) -> Self {
        Dcrsr(reg.code() as u32 | Self::REGWNR)
    }

    pub fn is_write(&self) -> bool {
        self.0 & Self::REGWNR != 0
    }

    pub fn regsel(&self) -> u8 {
        (self.0 & Self::REGSEL_MASK) as u8
    }
}

/// Debug Core Register Data Register
pub struct DcrdrRegister;

impl MemoryMappedRegister for DcrdrRegister {
    const ADDRESS: u32 = 0xE000_EDF8;
    type Value = Dcrdr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dcrdr(u32);

register_data!(Dcrdr);

impl Dcrdr {
    pub fn data(&self) -> u32 {
        self.0
    }
}

/// Debug Exception and Monitor Control Register
pub struct DemcrRegister;

impl MemoryMappedRegister for DemcrRegister {
    const ADDRESS: u32 = 0xE000_EDFC;
    type Value = Demcr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Demcr(u32);

register_data!(Demcr);

impl Demcr {
    const VC_CORERESET: u32 = 1 << 0;
    const TRCENA: u32 = 1 << 24;

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Halt on reset vector catch
    pub fn vc_corereset(&self) -> bool {
        self.0 & Self::VC_CORERESET != 0
    }

    pub fn set_vc_corereset(&mut self, enable: bool) {
        self.0 = flag(self.0, Self::VC_CORERESET, enable);
    }

    pub fn trcena(&self) -> bool {
        self.0 & Self::TRCENA != 0
    }
}

/// Application Interrupt and Reset Control Register
pub struct AircrRegister;

impl MemoryMappedRegister for AircrRegister {
    const ADDRESS: u32 = 0xE000_ED0C;
    type Value = Aircr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aircr(u32);

register_data!(Aircr);

impl Aircr {
    pub const VECTKEY: u32 = 0x05FA << 16;
    const SYSRESETREQ: u32 = 1 << 2;

    /// Keyed system reset request
    pub fn system_reset() -> Self {
        Aircr(Self::VECTKEY | Self::SYSRESETREQ)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Vector Table Offset Register
pub struct VtorRegister;

impl MemoryMappedRegister for VtorRegister {
    const ADDRESS: u32 = 0xE000_ED08;
    type Value = Vtor;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vtor(u32);

register_data!(Vtor);

impl Vtor {
    pub fn table_offset(&self) -> u32 {
        self.0 & !0x7F
    }
}

/// Interrupt Control and State Register
pub struct IcsrRegister;

impl MemoryMappedRegister for IcsrRegister {
    const ADDRESS: u32 = 0xE000_ED04;
    type Value = Icsr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Icsr(u32);

register_data!(Icsr);

impl Icsr {
    /// Active exception number, 0 in thread mode
    pub fn vectactive(&self) -> u32 {
        self.0 & 0x1FF
    }

    pub fn vectpending(&self) -> u32 {
        (self.0 >> 12) & 0x1FF
    }
}

/// Configurable Fault Status Register
pub struct CfsrRegister;

impl MemoryMappedRegister for CfsrRegister {
    const ADDRESS: u32 = 0xE000_ED28;
    type Value = Cfsr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cfsr(u32);

register_data!(Cfsr);

impl Cfsr {
    pub fn mmfsr(&self) -> u8 {
        self.0 as u8
    }

    pub fn bfsr(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn ufsr(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn has_faults(&self) -> bool {
        self.0 != 0
    }
}

/// Core register selector, as written to DCRSR.REGSEL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoreRegister {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    Sp = 13,
    Lr = 14,
    Pc = 15,
    Xpsr = 16,
    Msp = 17,
    Psp = 18,
}

impl CoreRegister {
    /// xPSR Thumb state bit.  Must be set before resuming at a new PC.
    pub const XPSR_THUMB: u32 = 1 << 24;

    const ALL: [CoreRegister; 19] = [
        CoreRegister::R0,
        CoreRegister::R1,
        CoreRegister::R2,
        CoreRegister::R3,
        CoreRegister::R4,
        CoreRegister::R5,
        CoreRegister::R6,
        CoreRegister::R7,
        CoreRegister::R8,
        CoreRegister::R9,
        CoreRegister::R10,
        CoreRegister::R11,
        CoreRegister::R12,
        CoreRegister::Sp,
        CoreRegister::Lr,
        CoreRegister::Pc,
        CoreRegister::Xpsr,
        CoreRegister::Msp,
        CoreRegister::Psp,
    ];

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// General purpose register Rn, 0-15
    pub fn general(n: u8) -> Option<Self> {
        if n < 16 { Self::from_index(n) } else { None }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoreRegister::R0 => "R0",
            CoreRegister::R1 => "R1",
            CoreRegister::R2 => "R2",
            CoreRegister::R3 => "R3",
            CoreRegister::R4 => "R4",
            CoreRegister::R5 => "R5",
            CoreRegister::R6 => "R6",
            CoreRegister::R7 => "R7",
            CoreRegister::R8 => "R8",
            CoreRegister::R9 => "R9",
            CoreRegister::R10 => "R10",
            CoreRegister::R11 => "R11",
            CoreRegister::R12 => "R12",
            CoreRegister::Sp => "SP",
            CoreRegister::Lr => "LR",
            CoreRegister::Pc => "PC",
            CoreRegister::Xpsr => "xPSR",
            CoreRegister::Msp => "MSP",
            CoreRegister::Psp => "PSP",
        }
    }
}

impl fmt::Display for CoreRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
