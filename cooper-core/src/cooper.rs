// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Cooper flash programming constants
//!
//! The flash algorithm is a position-dependent blob linked to run from the
//! start of SRAM.  The programmer and the algorithm communicate through a
//! small set of fixed SRAM words, all of which are described here.  Changing
//! any of these requires rebuilding the algorithm.

use static_assertions::const_assert;

/// Flash page size in bytes.  Programming is always done a page at a time.
pub const PAGE_SIZE_BYTES: u32 = 4096;

/// Flash page size in 32-bit words
pub const PAGE_SIZE_WORDS: usize = (PAGE_SIZE_BYTES / 4) as usize;

/// Start of the target's SRAM
pub const SRAM_BASE: u32 = 0x2000_0000;

/// End (exclusive) of the address range treated as SRAM when sanity
/// checking a stack pointer
pub const SRAM_END: u32 = 0x3000_0000;

/// Load address of the flash algorithm
pub const ALGORITHM_BASE: u32 = SRAM_BASE;

/// Reset vector of the flash algorithm (Thumb bit set)
pub const ALG_RESET_VECTOR: u32 = 0x2000_00D5;

/// Initial stack pointer for the flash algorithm
pub const ALG_STACK_POINTER: u32 = 0x2000_7000;

/// Vector table offset programmed before running the algorithm
pub const VTOR_VALUE: u32 = SRAM_BASE;

/// Scratch buffer the algorithm copies a page from
pub const DATA_LOCATION: u32 = 0x2000_1000;

/// Destination flash address parameter
pub const ADDRESS_REGISTER: u32 = 0x2000_0FC0;

/// Length in bytes parameter
pub const LENGTH_REGISTER: u32 = 0x2000_0FD0;

/// First handshake key location
pub const KEY1_REGISTER: u32 = 0x2000_0F00;

/// Second handshake key location.  The algorithm overwrites this with its
/// result, 0 on success.
pub const KEY2_REGISTER: u32 = 0x2000_0FF0;

/// Where the algorithm's result is read back from
pub const RETURN_VALUE: u32 = KEY2_REGISTER;

pub const KEY1_VALUE: u32 = 0x4234_5255;
pub const KEY2_VALUE: u32 = 0x7856_3412;

/// Returns whether `addr` is inside the SRAM window
pub const fn in_sram(addr: u32) -> bool {
    addr >= SRAM_BASE && addr < SRAM_END
}

/// Returns the flash page containing `addr`
pub const fn page_base(addr: u32) -> u32 {
    addr & !(PAGE_SIZE_BYTES - 1)
}

const_assert!(PAGE_SIZE_BYTES.is_power_of_two());
const_assert!(DATA_LOCATION % 4 == 0);
const_assert!(DATA_LOCATION + PAGE_SIZE_BYTES <= ALG_STACK_POINTER);
const_assert!(ALGORITHM_BASE < KEY1_REGISTER);
const_assert!(ALG_RESET_VECTOR & 1 == 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_geometry() {
        assert_eq!(PAGE_SIZE_WORDS, 1024);
        assert_eq!(page_base(0x0000_5123), 0x0000_5000);
        assert_eq!(page_base(0x0000_5000), 0x0000_5000);
    }

    #[test]
    fn sram_window() {
        assert!(in_sram(ALG_STACK_POINTER));
        assert!(in_sram(0x2FFF_FFFC));
        assert!(!in_sram(SRAM_END));
        assert!(!in_sram(0x1004_0000));
    }
}
