// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD Wire Protocol Implementation
//!
//! This module bit-bangs SWD over `embedded-hal` GPIOs.  It provides
//! [`BitBang`], which implements [`SwdDriver`], and is not expected to be
//! used directly by applications beyond construction.
//!
//! Each bit takes two half periods of `half_clock_us`.  With SWCLK idling
//! high (the default):
//!
//! ```text
//! out:  SWCLK low + SWDIO change, wait, SWCLK high, wait
//! in:   SWCLK low, wait, sample SWDIO, SWCLK high, wait
//! ```
//!
//! With SWCLK idling low the clock edges are swapped.  An optional trace pin
//! is high while the host drives SWDIO, low while SWDIO is released, and
//! pulses high around each sample.  It is intended for a logic analyser.

use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::config::SwdConfig;
use crate::driver::{BitBuffer, BitOrder, SwdDriver, bits_to_words, check_bits, check_turnaround};
use crate::driver::{MAX_TURNAROUND, words_to_bits};

/// A bidirectional GPIO, used for SWDIO
///
/// Most HALs provide a flex or open-drain pin type that can be read and
/// driven, and re-configured at runtime.  Implement this trait for it.
pub trait SwdioPin: InputPin + OutputPin {
    /// Releases the pin so the target can drive it
    fn set_as_input(&mut self) -> Result<(), Self::Error>;

    /// Drives the pin from the output register
    fn set_as_output(&mut self) -> Result<(), Self::Error>;
}

/// What to do with SWDIO on a clock edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdioState {
    /// Drive high
    OutputHigh,
    /// Drive low
    OutputLow,
    /// Released to the target
    Input,
    /// Leave as is
    Keep,
}

impl SwdioState {
    fn from_bit(bit: u8) -> Self {
        if bit != 0 {
            SwdioState::OutputHigh
        } else {
            SwdioState::OutputLow
        }
    }
}

/// A pin that does nothing, for when there is no trace or reset pin
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn gpio<E>(result: Result<(), E>) -> Result<(), SwdError> {
    result.map_err(|_| SwdError::Gpio)
}

/// Bit-banged SWD driver
///
/// Create using `BitBang::new()` passing in the pins, a delay and the
/// configuration.
///
/// ```rust,ignore
/// use cooper_swd::{BitBang, SwdConfig};
///
/// let config = SwdConfig::default();
/// let swd = BitBang::new(swclk, swdio, delay, &config)?;
/// ```
#[derive(Debug)]
pub struct BitBang<CLK, DIO, DL, T = NoPin> {
    swclk: CLK,
    swdio: DIO,
    delay: DL,
    trace: T,
    idle_low: bool,
    half_clock_us: u32,
}

impl<CLK, DIO, DL> BitBang<CLK, DIO, DL, NoPin>
where
    CLK: OutputPin,
    DIO: SwdioPin,
    DL: DelayNs,
{
    /// Create a new bit-bang driver without a trace pin.
    ///
    /// Arguments:
    /// - `swclk`: SWCLK, push-pull output.
    /// - `swdio`: SWDIO.
    /// - `delay`: Used for the half clock period.
    /// - `config`: Clock polarity and period are taken from this.
    ///
    /// Returns:
    /// - `Ok(BitBang)`: with both pins driven to the idle level.
    /// - `Err(SwdError::Gpio)`: if a pin could not be configured.
    pub fn new(swclk: CLK, swdio: DIO, delay: DL, config: &SwdConfig) -> Result<Self, SwdError> {
        Self::with_trace(swclk, swdio, delay, NoPin, config)
    }
}

impl<CLK, DIO, DL, T> BitBang<CLK, DIO, DL, T>
where
    CLK: OutputPin,
    DIO: SwdioPin,
    DL: DelayNs,
    T: OutputPin,
{
    /// Create a new bit-bang driver with a trace pin.
    pub fn with_trace(
        swclk: CLK,
        swdio: DIO,
        delay: DL,
        trace: T,
        config: &SwdConfig,
    ) -> Result<Self, SwdError> {
        let mut swd = Self {
            swclk,
            swdio,
            delay,
            trace,
            idle_low: config.idle_low,
            half_clock_us: config.half_clock_us,
        };

        // Both lines sit at the idle level until the first transfer
        let idle_high = !swd.idle_low;
        gpio(swd.swclk.set_state(idle_high.into()))?;
        gpio(swd.swdio.set_state(idle_high.into()))?;
        gpio(swd.swdio.set_as_output())?;
        gpio(swd.trace.set_high())?;

        debug!(
            "OK:    SWD pins configured, idle {}, half clock {}us",
            if swd.idle_low { "low" } else { "high" },
            swd.half_clock_us
        );

        Ok(swd)
    }

    /// Returns whether SWCLK idles low
    pub fn idle_low(&self) -> bool {
        self.idle_low
    }

    /// Releases the pins, delay and trace pin
    pub fn release(self) -> (CLK, DIO, DL, T) {
        (self.swclk, self.swdio, self.delay, self.trace)
    }

    /// Sets SWCLK and SWDIO for one half period.
    ///
    /// The trace pin follows the SWDIO direction: high while driven, low
    /// while released.
    pub fn set_pin_state(&mut self, clock_high: bool, swdio: SwdioState) -> Result<(), SwdError> {
        gpio(self.swclk.set_state(clock_high.into()))?;

        match swdio {
            SwdioState::OutputHigh => {
                gpio(self.trace.set_high())?;
                gpio(self.swdio.set_high())?;
            }
            SwdioState::OutputLow => {
                gpio(self.trace.set_high())?;
                gpio(self.swdio.set_low())?;
            }
            SwdioState::Input => gpio(self.trace.set_low())?,
            SwdioState::Keep => (),
        }

        Ok(())
    }

    fn clock_wait(&mut self) {
        self.delay.delay_us(self.half_clock_us);
    }

    fn sample(&mut self) -> Result<u8, SwdError> {
        gpio(self.trace.set_high())?;
        let high = self.swdio.is_high().map_err(|_| SwdError::Gpio)?;
        gpio(self.trace.set_low())?;
        Ok(high as u8)
    }

    // Drives each entry of `words` onto SWDIO for one clock period.
    fn clock_out(&mut self, words: &[u8]) -> Result<(), SwdError> {
        gpio(self.swdio.set_as_output())?;

        for bit in words {
            let state = SwdioState::from_bit(*bit);
            if self.idle_low {
                self.set_pin_state(true, SwdioState::Keep)?;
                self.clock_wait();
                self.set_pin_state(false, state)?;
                self.clock_wait();
            } else {
                self.set_pin_state(false, state)?;
                self.clock_wait();
                self.set_pin_state(true, SwdioState::Keep)?;
                self.clock_wait();
            }
        }

        Ok(())
    }

    // Samples SWDIO once per clock period for `bits` periods.
    fn clock_in(&mut self, bits: u8) -> Result<BitBuffer, SwdError> {
        gpio(self.swdio.set_as_input())?;

        let mut words = BitBuffer::new();
        for _ in 0..bits {
            let bit = if self.idle_low {
                self.set_pin_state(true, SwdioState::Input)?;
                self.clock_wait();
                self.set_pin_state(false, SwdioState::Input)?;
                let bit = self.sample()?;
                self.clock_wait();
                bit
            } else {
                self.set_pin_state(false, SwdioState::Input)?;
                self.clock_wait();
                let bit = self.sample()?;
                self.set_pin_state(true, SwdioState::Input)?;
                self.clock_wait();
                bit
            };
            words.push(bit).map_err(|_| SwdError::Param)?;
        }

        Ok(words)
    }
}

impl<CLK, DIO, DL, T> SwdDriver for BitBang<CLK, DIO, DL, T>
where
    CLK: OutputPin,
    DIO: SwdioPin,
    DL: DelayNs,
    T: OutputPin,
{
    fn mosi(&mut self, data: u32, bits: u8, order: BitOrder) -> Result<u8, SwdError> {
        let words = bits_to_words(data, bits, order)?;
        self.clock_out(&words)?;
        Ok(bits)
    }

    fn miso(&mut self, bits: u8, order: BitOrder) -> Result<u32, SwdError> {
        check_bits(bits)?;
        let words = self.clock_in(bits)?;
        Ok(words_to_bits(&words, order))
    }

    fn mosi_trn(&mut self, bits: u8) -> Result<u8, SwdError> {
        check_turnaround(bits)?;
        let dummy = [0u8; MAX_TURNAROUND as usize];
        self.clock_out(&dummy[..bits as usize])?;
        Ok(bits)
    }

    fn miso_trn(&mut self, bits: u8) -> Result<u8, SwdError> {
        check_turnaround(bits)?;
        self.clock_in(bits)?;
        Ok(bits)
    }
}
