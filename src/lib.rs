//! Battery and charger management for a two-chip handheld power subsystem
//!
//! The crate loads the ADC calibration, watches battery and charger
//! presence, enforces the voltage and ADC safety limits and drives the
//! charger PWM on behalf of a pluggable charge profile.
//!
//! Hardware is reached only through the capability traits in
//! [`peripherals`]. A firmware binds them to its HAL, builds one
//! [`BatteryManager`], calls [`BatteryManager::probe`] and spawns
//! [`BatteryManager::run_monitor`] and [`BatteryManager::run_current_sampler`]
//! as executor tasks. The current timer IRQ handler calls
//! [`BatteryManager::current_timer_fired`].

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod attributes;
pub mod battery;
pub mod calibration;
pub mod charger;
pub mod driver;
pub mod peripherals;
pub mod system;
pub mod tasks;

pub use driver::{AttachError, BatteryManager, Status};
