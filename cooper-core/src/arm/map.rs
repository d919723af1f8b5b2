// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Memory Access Port Registers

use crate::arm::register::{
    ApRegister, ReadableRegister, RegisterDescriptor, WritableRegister, field, flag,
};
use crate::register_data;
use alloc::{format, string::String};
use core::fmt;

/// Control/Status Word Register descriptor (read-write)
pub struct CswRegister;

impl RegisterDescriptor for CswRegister {
    const ADDRESS: u8 = 0x00;
    type Value = Csw;
}

impl ReadableRegister for CswRegister {}
impl WritableRegister for CswRegister {}
impl ApRegister for CswRegister {}

/// Control/Status Word register data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csw(u32);

register_data!(Csw);

impl Csw {
    const SIZE_MASK: u32 = 0b111;
    const SIZE_SHIFT: u32 = 0;

    const ADDRINC_MASK: u32 = 0b11;
    const ADDRINC_SHIFT: u32 = 4;

    const DEVICE_EN: u32 = 1 << 6;

    const PROT_MASK: u32 = 0b111_1111;
    const PROT_SHIFT: u32 = 24;

    // Size values
    pub const SIZE_8BIT: u32 = 0b000;
    pub const SIZE_16BIT: u32 = 0b001;
    pub const SIZE_32BIT: u32 = 0b010;

    // Address increment values
    pub const ADDRINC_OFF: u32 = 0b00;
    pub const ADDRINC_SINGLE: u32 = 0b01;
    pub const ADDRINC_PACKED: u32 = 0b10;

    // HPROT: privileged, data access, master type debug
    pub const PROT_DEFAULT: u32 = 0b010_0011;

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn size(&self) -> u32 {
        (self.0 >> Self::SIZE_SHIFT) & Self::SIZE_MASK
    }

    pub fn addrinc(&self) -> u32 {
        (self.0 >> Self::ADDRINC_SHIFT) & Self::ADDRINC_MASK
    }

    pub fn device_en(&self) -> bool {
        self.0 & Self::DEVICE_EN != 0
    }

    pub fn prot(&self) -> u32 {
        (self.0 >> Self::PROT_SHIFT) & Self::PROT_MASK
    }

    pub fn set_size(&mut self, size: u32) {
        self.0 = field(self.0, Self::SIZE_MASK, Self::SIZE_SHIFT, size);
    }

    pub fn set_addrinc(&mut self, addrinc: u32) {
        self.0 = field(self.0, Self::ADDRINC_MASK, Self::ADDRINC_SHIFT, addrinc);
    }

    pub fn set_device_en(&mut self, enable: bool) {
        self.0 = flag(self.0, Self::DEVICE_EN, enable);
    }

    pub fn set_prot(&mut self, prot: u32) {
        self.0 = field(self.0, Self::PROT_MASK, Self::PROT_SHIFT, prot);
    }

    /// Returns a copy with the access size changed.  Used to flip between
    /// word and byte access without disturbing the other fields.
    pub fn with_size(mut self, size: u32) -> Self {
        self.set_size(size);
        self
    }

    /// Get transfer configuration description
    pub fn transfer_config(&self) -> String {
        let size = match self.size() {
            Self::SIZE_8BIT => "8-bit",
            Self::SIZE_16BIT => "16-bit",
            Self::SIZE_32BIT => "32-bit",
            _ => "Reserved",
        };
        let addrinc = match self.addrinc() {
            Self::ADDRINC_OFF => "Off",
            Self::ADDRINC_SINGLE => "Single",
            Self::ADDRINC_PACKED => "Packed",
            _ => "Reserved",
        };
        format!("Size: {size}, AddrInc: {addrinc}")
    }
}

impl Default for Csw {
    /// 32-bit accesses with single auto-increment, which is what every bulk
    /// memory operation in this workspace expects.
    fn default() -> Self {
        let mut csw = Csw(0);
        csw.set_prot(Self::PROT_DEFAULT);
        csw.set_size(Self::SIZE_32BIT);
        csw.set_addrinc(Self::ADDRINC_SINGLE);
        csw.set_device_en(true);
        csw
    }
}

/// Transfer Address Register descriptor (read-write)
pub struct TarRegister;

impl RegisterDescriptor for TarRegister {
    const ADDRESS: u8 = 0x04;
    type Value = Tar;
}

impl ReadableRegister for TarRegister {}
impl WritableRegister for TarRegister {}
impl ApRegister for TarRegister {}

/// Transfer Address Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tar(u32);

register_data!(Tar);

impl Tar {
    pub fn target_address(&self) -> u32 {
        self.0
    }
}

/// Data Read/Write Register descriptor (read-write)
pub struct DrwRegister;

impl RegisterDescriptor for DrwRegister {
    const ADDRESS: u8 = 0x0C;
    type Value = Drw;
}

impl ReadableRegister for DrwRegister {}
impl WritableRegister for DrwRegister {}
impl ApRegister for DrwRegister {}

/// Data Read/Write Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drw(u32);

register_data!(Drw);

impl Drw {
    pub fn data(&self) -> u32 {
        self.0
    }

    /// Places a byte on the lane the MEM-AP uses for an 8-bit access at
    /// `addr`
    pub fn from_byte_lane(addr: u32, byte: u8) -> Self {
        Drw((byte as u32) << ((addr & 0x3) * 8))
    }

    /// Extracts the byte an 8-bit access at `addr` returned
    pub fn byte_lane(&self, addr: u32) -> u8 {
        (self.0 >> ((addr & 0x3) * 8)) as u8
    }
}
