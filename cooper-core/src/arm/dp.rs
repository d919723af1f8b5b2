// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Debug Port Registers
//!
//! Only the ADIv5 DP registers used to connect to and drive a single MEM-AP
//! are described.  Multi-drop (TARGETSEL) is not used by Cooper.

use crate::arm::register::{
    DpRegister, ReadableRegister, RegisterDescriptor, WritableRegister, field, flag,
};
use crate::register_data;
use alloc::{format, string::String};
use core::fmt;

/// IDCODE Register descriptor (read-only)
pub struct IdCodeRegister;

impl RegisterDescriptor for IdCodeRegister {
    const ADDRESS: u8 = 0x00;
    type Value = IdCode;
}

impl ReadableRegister for IdCodeRegister {}
impl DpRegister for IdCodeRegister {}

/// ARM Debug Port IDCODE (DPIDR) register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdCode(u32);

impl IdCode {
    /// ARM Ltd's JEP106 designer code
    pub const DESIGNER_ARM: u16 = 0x23B;

    pub const fn from_u32(value: u32) -> Self {
        IdCode(value)
    }

    pub fn data(&self) -> u32 {
        self.0
    }

    /// Revision (bits 31:28)
    pub fn revision(&self) -> u8 {
        ((self.0 >> 28) & 0xF) as u8
    }

    /// Part number (bits 27:20)
    pub fn part_number(&self) -> u8 {
        ((self.0 >> 20) & 0xFF) as u8
    }

    /// DP architecture version (bits 15:12)
    pub fn version(&self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    /// JEDEC designer ID (bits 11:1)
    pub fn designer_id(&self) -> u16 {
        ((self.0 >> 1) & 0x7FF) as u16
    }

    /// A real IDCODE always reads with bit 0 set.  An all-ones word is what
    /// a floating SWDIO line returns.
    pub fn is_valid(&self) -> bool {
        (self.0 & 1) == 1 && self.0 != 0xFFFF_FFFF
    }

    pub fn designer_name(&self) -> &'static str {
        match self.designer_id() {
            Self::DESIGNER_ARM => "ARM Ltd",
            _ => "Unknown",
        }
    }
}

impl From<u32> for IdCode {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl From<IdCode> for u32 {
    fn from(value: IdCode) -> u32 {
        value.0
    }
}

impl fmt::Display for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(
                f,
                "0x{:08X} ({} DPv{} rev {})",
                self.0,
                self.designer_name(),
                self.version(),
                self.revision()
            )
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

/// ABORT Register descriptor (write-only)
pub struct AbortRegister;

impl RegisterDescriptor for AbortRegister {
    const ADDRESS: u8 = 0x00;
    type Value = Abort;
}

impl WritableRegister for AbortRegister {}
impl DpRegister for AbortRegister {}

/// ARM Debug Port ABORT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Abort(u32);

register_data!(Abort, write_only);

impl Abort {
    const STKCMPCLR: u32 = 1 << 1;
    const STKERRCLR: u32 = 1 << 2;
    const WDERRCLR: u32 = 1 << 3;
    const ORUNERRCLR: u32 = 1 << 4;

    /// An ABORT value clearing every sticky error flag, without aborting
    /// the current AP transaction.
    pub const fn clear_all() -> Self {
        Abort(Self::STKCMPCLR | Self::STKERRCLR | Self::WDERRCLR | Self::ORUNERRCLR)
    }
}

/// CTRL/STAT Register descriptor (read-write)
pub struct CtrlStatRegister;

impl RegisterDescriptor for CtrlStatRegister {
    const ADDRESS: u8 = 0x04;
    type Value = CtrlStat;
}

impl ReadableRegister for CtrlStatRegister {}
impl WritableRegister for CtrlStatRegister {}
impl DpRegister for CtrlStatRegister {}

/// ARM Debug Port CTRL/STAT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtrlStat(u32);

register_data!(CtrlStat);

impl CtrlStat {
    const STICKYORUN: u32 = 1 << 1;
    const STICKYCMP: u32 = 1 << 4;
    const STICKYERR: u32 = 1 << 5;
    const READOK: u32 = 1 << 6;
    const WDATAERR: u32 = 1 << 7;
    const CDBGPWRUPREQ: u32 = 1 << 28;
    const CDBGPWRUPACK: u32 = 1 << 29;
    const CSYSPWRUPREQ: u32 = 1 << 30;
    const CSYSPWRUPACK: u32 = 1 << 31;

    /// Sticky flags cleared by [`Abort::clear_all`]
    pub const STICKY_ERRORS: u32 =
        Self::STICKYORUN | Self::STICKYCMP | Self::STICKYERR | Self::WDATAERR;

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn stickyorun(&self) -> bool {
        self.0 & Self::STICKYORUN != 0
    }

    pub fn stickycmp(&self) -> bool {
        self.0 & Self::STICKYCMP != 0
    }

    pub fn stickyerr(&self) -> bool {
        self.0 & Self::STICKYERR != 0
    }

    pub fn readok(&self) -> bool {
        self.0 & Self::READOK != 0
    }

    pub fn wdataerr(&self) -> bool {
        self.0 & Self::WDATAERR != 0
    }

    pub fn cdbgpwrupack(&self) -> bool {
        self.0 & Self::CDBGPWRUPACK != 0
    }

    pub fn csyspwrupack(&self) -> bool {
        self.0 & Self::CSYSPWRUPACK != 0
    }

    /// Whether any sticky error flag is set
    pub fn has_errors(&self) -> bool {
        self.0 & Self::STICKY_ERRORS != 0
    }

    pub fn set_cdbgpwrupreq(&mut self, enable: bool) {
        self.0 = flag(self.0, Self::CDBGPWRUPREQ, enable);
    }

    pub fn set_csyspwrupreq(&mut self, enable: bool) {
        self.0 = flag(self.0, Self::CSYSPWRUPREQ, enable);
    }

    /// Human readable list of the sticky error flags which are set
    pub fn error_states(&self) -> String {
        let names = [
            (self.stickyorun(), "STICKYORUN"),
            (self.stickycmp(), "STICKYCMP"),
            (self.stickyerr(), "STICKYERR"),
            (self.wdataerr(), "WDATAERR"),
        ];
        let mut out = String::new();
        for (_, name) in names.iter().filter(|(set, _)| *set) {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(name);
        }
        if out.is_empty() {
            String::from("No errors")
        } else {
            format!("Errors: {out}")
        }
    }

    /// Human readable power request/acknowledge state
    pub fn power_states(&self) -> String {
        format!(
            "Debug: {}/{}, System: {}/{}",
            if self.0 & Self::CDBGPWRUPREQ != 0 { "REQ" } else { "off" },
            if self.cdbgpwrupack() { "ACK" } else { "nak" },
            if self.0 & Self::CSYSPWRUPREQ != 0 { "REQ" } else { "off" },
            if self.csyspwrupack() { "ACK" } else { "nak" }
        )
    }
}

/// SELECT Register descriptor (write-only on ADIv5)
pub struct SelectRegister;

impl RegisterDescriptor for SelectRegister {
    const ADDRESS: u8 = 0x08;
    type Value = Select;
}

impl WritableRegister for SelectRegister {}
impl DpRegister for SelectRegister {}

/// ARM Debug Port SELECT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Select(u32);

register_data!(Select);

impl Select {
    const APSEL_MASK: u32 = 0xFF;
    const APSEL_SHIFT: u32 = 24;
    const APBANKSEL_MASK: u32 = 0xF;
    const APBANKSEL_SHIFT: u32 = 4;

    pub fn apsel(&self) -> u32 {
        (self.0 >> Self::APSEL_SHIFT) & Self::APSEL_MASK
    }

    pub fn apbanksel(&self) -> u32 {
        (self.0 >> Self::APBANKSEL_SHIFT) & Self::APBANKSEL_MASK
    }

    /// Selects the AP register bank holding the given AP register address
    pub fn set_apbanksel_from_addr(&mut self, addr: u8) {
        let bank = ((addr >> 4) & 0xF) as u32;
        self.0 = field(self.0, Self::APBANKSEL_MASK, Self::APBANKSEL_SHIFT, bank);
    }
}

/// RDBUFF Register descriptor (read-only)
pub struct RdBuffRegister;

impl RegisterDescriptor for RdBuffRegister {
    const ADDRESS: u8 = 0x0C;
    type Value = RdBuff;
}

impl ReadableRegister for RdBuffRegister {}
impl DpRegister for RdBuffRegister {}

/// ARM Debug Port RDBUFF register data - the result of the last posted AP
/// read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdBuff(u32);

register_data!(RdBuff);

impl RdBuff {
    pub fn data(&self) -> u32 {
        self.0
    }
}
