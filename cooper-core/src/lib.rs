// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! cooper-core - ARM debug register definitions and Cooper target constants.
//!
//! Designed to be used in conjunction with the `cooper-swd` library, which
//! drives these registers over a bit-banged ARM Serial Wire Debug (SWD) link
//! in order to program the flash of a Cooper co-processor.
//!
//! Nothing in this crate performs I/O.  It contains:
//!
//! * [`arm`] - strongly typed Debug Port, MEM-AP and System Control Space
//!   debug registers, plus the core register selector codes used with
//!   DCRSR.
//! * [`cooper`] - fixed addresses, key values and sizes agreed between the
//!   programmer and the RAM-resident flash algorithm.
//!
//! This library is `no_std` compatible, and requires an `alloc`
//! implementation.

#![cfg_attr(not(test), no_std)]

pub mod arm;
pub mod cooper;

extern crate alloc;
