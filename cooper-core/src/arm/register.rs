// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Debug Register Access Traits
//!
//! Two families of register are described here:
//!
//! * SWD-addressed registers (DP and AP), whose 8-bit address goes in the
//!   SWD request packet.  These are used by
//!   `cooper_swd::interface::SwdInterface::read_dp_register` and friends.
//! * Memory-mapped registers, whose 32-bit address is in the target's
//!   address space and accessed through the MEM-AP.  These are used by
//!   `cooper_swd::debug::DebugInterface::read_register` and
//!   `cooper_swd::debug::DebugInterface::write_register`.
//!
//! Unless you are extending the debug/SWD protocol support, it is unlikely
//! that you will need to use these traits directly.

/// Base trait for all SWD-addressed ARM debug register descriptors
pub trait RegisterDescriptor {
    const ADDRESS: u8;
    type Value;
}

/// Registers that can be read
pub trait ReadableRegister: RegisterDescriptor {
    /// Convert raw 32-bit data to register value
    fn from_raw(data: u32) -> Self::Value
    where
        Self::Value: From<u32>,
    {
        Self::Value::from(data)
    }
}

/// Registers that can be written
pub trait WritableRegister: RegisterDescriptor {
    /// Convert register value to raw 32-bit data
    fn to_raw(value: Self::Value) -> u32
    where
        Self::Value: Into<u32>,
    {
        value.into()
    }
}

/// Debug Port registers (accessed via DP operations)
pub trait DpRegister: RegisterDescriptor {}

/// Access Port registers (accessed via AP operations)
pub trait ApRegister: RegisterDescriptor {}

/// A register in the target's memory map, such as the System Control Space
/// debug registers.  The value type converts to and from the raw word.
pub trait MemoryMappedRegister {
    const ADDRESS: u32;
    type Value: From<u32> + Into<u32>;
}

/// Generates the raw conversions and `Display` for a register data type
/// wrapping a `u32`.  Pass `write_only` to omit the `From<u32>` conversion
/// for registers that can never be read back.
#[macro_export]
macro_rules! register_data {
    ($name:ident) => {
        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }

        $crate::register_data!($name, write_only);
    };
    ($name:ident, write_only) => {
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
}

// Sets or clears the bits in `mask`.
#[inline]
pub(crate) const fn flag(value: u32, mask: u32, enable: bool) -> u32 {
    if enable { value | mask } else { value & !mask }
}

// Replaces the field `mask << shift` with `field`.
#[inline]
pub(crate) const fn field(value: u32, mask: u32, shift: u32, field: u32) -> u32 {
    (value & !(mask << shift)) | ((field & mask) << shift)
}
