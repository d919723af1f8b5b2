// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD bit driver
//!
//! [`SwdDriver`] is the seam between the packet engine and whatever actually
//! moves bits on the wire.  [`crate::protocol::BitBang`] is the GPIO
//! implementation.  Tests substitute a simulated target.
//!
//! Bits are passed to and from the wire as a [`BitBuffer`], one 0/1 value
//! per bit, in the order they are clocked.

use heapless::Vec;

use crate::SwdError;

/// Maximum number of bits in one driver transfer
pub const MAX_BITS: u8 = 32;

/// Turnaround periods the driver accepts
pub const MIN_TURNAROUND: u8 = 1;
pub const MAX_TURNAROUND: u8 = 4;

/// One 0/1 value per bit, in wire order
pub type BitBuffer = Vec<u8, { MAX_BITS as usize }>;

/// Order in which the bits of a value are placed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Bit 0 first.  All SWD packet fields are sent this way.
    #[default]
    LsbFirst,
    MsbFirst,
}

impl TryFrom<u8> for BitOrder {
    type Error = SwdError;

    /// Converts the packet engine's raw order flag, where 0 is LSB first
    /// and 1 is MSB first.
    fn try_from(flag: u8) -> Result<Self, Self::Error> {
        match flag {
            0 => Ok(BitOrder::LsbFirst),
            1 => Ok(BitOrder::MsbFirst),
            _ => Err(SwdError::Param),
        }
    }
}

/// Clocks bits to and from the target
///
/// Each method returns the number of bits clocked on success.
pub trait SwdDriver {
    /// Clocks `bits` bits of `data` out on SWDIO.
    ///
    /// Arguments:
    /// - `data`: Value to send.  Bits above `bits` are ignored.
    /// - `bits`: Number of bits, 1-32.
    /// - `order`: Which end of `data` goes first.
    ///
    /// Returns:
    /// - `Ok(u8)`: The number of bits clocked.
    /// - `Err(SwdError::Param)`: If `bits` is out of range.
    fn mosi(&mut self, data: u32, bits: u8, order: BitOrder) -> Result<u8, SwdError>;

    /// Clocks `bits` bits in from SWDIO.
    ///
    /// Returns:
    /// - `Ok(u32)`: The value read, in the low `bits` bits.
    /// - `Err(SwdError::Param)`: If `bits` is out of range.
    fn miso(&mut self, bits: u8, order: BitOrder) -> Result<u32, SwdError>;

    /// Clocks turnaround periods before a host-driven phase.
    fn mosi_trn(&mut self, bits: u8) -> Result<u8, SwdError>;

    /// Clocks turnaround periods before a target-driven phase, releasing
    /// SWDIO.
    fn miso_trn(&mut self, bits: u8) -> Result<u8, SwdError>;
}

impl<T: SwdDriver + ?Sized> SwdDriver for &mut T {
    fn mosi(&mut self, data: u32, bits: u8, order: BitOrder) -> Result<u8, SwdError> {
        (**self).mosi(data, bits, order)
    }

    fn miso(&mut self, bits: u8, order: BitOrder) -> Result<u32, SwdError> {
        (**self).miso(bits, order)
    }

    fn mosi_trn(&mut self, bits: u8) -> Result<u8, SwdError> {
        (**self).mosi_trn(bits)
    }

    fn miso_trn(&mut self, bits: u8) -> Result<u8, SwdError> {
        (**self).miso_trn(bits)
    }
}

/// Checks a data bit count
pub fn check_bits(bits: u8) -> Result<(), SwdError> {
    if bits == 0 || bits > MAX_BITS {
        Err(SwdError::Param)
    } else {
        Ok(())
    }
}

/// Checks a turnaround bit count
pub fn check_turnaround(bits: u8) -> Result<(), SwdError> {
    if (MIN_TURNAROUND..=MAX_TURNAROUND).contains(&bits) {
        Ok(())
    } else {
        Err(SwdError::Turnaround)
    }
}

/// Expands the low `bits` bits of `value` into a [`BitBuffer`] in wire
/// order.  For MSB first, bit `i` lands at index `bits - i - 1`.
pub fn bits_to_words(value: u32, bits: u8, order: BitOrder) -> Result<BitBuffer, SwdError> {
    check_bits(bits)?;
    let n = bits as usize;

    let mut words = BitBuffer::new();
    for ii in 0..n {
        let bit_index = match order {
            BitOrder::LsbFirst => ii,
            BitOrder::MsbFirst => n - ii - 1,
        };
        let bit = ((value >> bit_index) & 1) as u8;
        words.push(bit).map_err(|_| SwdError::Param)?;
    }

    Ok(words)
}

/// Compacts a [`BitBuffer`] in wire order back into a value.  Any non-zero
/// entry counts as a 1.
pub fn words_to_bits(words: &[u8], order: BitOrder) -> u32 {
    let n = words.len().min(MAX_BITS as usize);

    let mut value = 0;
    for ii in 0..n {
        let index = match order {
            BitOrder::LsbFirst => ii,
            BitOrder::MsbFirst => n - ii - 1,
        };
        if words[index] != 0 {
            value |= 1 << ii;
        }
    }

    value
}
