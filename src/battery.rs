//! Battery measurement
//!
//! Converts ADC conversions of the sense chip into battery voltage,
//! capacity and charge level. Charger voltage, backup voltage and
//! temperature have no known transfer function and are reported raw.

use crate::peripherals::{
    current_sense::CurrentSense,
    emergency,
    regs::{charge, sense},
    ChipRegisters, EmergencyHalt, IoError, SenseChip,
};
use crate::system::config::GROUND_MAX_RAW;

/// ADC reading at and below which the battery is considered empty
const RAW_EMPTY: u32 = 0x37;
/// ADC reading of a full battery
const RAW_FULL: u32 = 0x236;
/// Highest reading of the 10 bit ADC
const RAW_MAX: u32 = 0x3FF;
const MV_EMPTY: u32 = 2800;
const MV_FULL: u32 = 4200;

/// BSI reading of the 1500 mAh battery
const BSI_1500MAH: u32 = 0x3B5;
const BSI_HYSTERESIS: u32 = 20;

/// Charge level range used for percentage estimation
const LEVEL_MIN_MV: u16 = 3700;
const LEVEL_MAX_MV: u16 = 4150;

/// Measurement failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// ADC conversion failed
    Io(IoError),
    /// Averaging over zero conversions requested
    NoPasses,
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

/// Battery size as reported by the BSI resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Capacity {
    /// A battery is inserted, but its size indicator is not recognized
    Unknown,
    /// No battery inserted
    None,
    /// Nominal capacity in mAh
    Known(u16),
}

impl Capacity {
    /// Capacity in mAh of a recognized battery.
    pub fn mah(self) -> Option<u16> {
        match self {
            Capacity::Known(mah) if mah > 0 => Some(mah),
            _ => None,
        }
    }

    pub fn is_known(self) -> bool {
        self.mah().is_some()
    }
}

/// Main battery as last seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryState {
    pub present: bool,
    pub capacity: Capacity,
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            present: false,
            capacity: Capacity::None,
        }
    }
}

impl BatteryState {
    /// A battery with recognized capacity is inserted.
    pub fn known_present(&self) -> bool {
        self.present && self.capacity.is_known()
    }
}

/// Average `passes` conversions of one ADC input.
///
/// Stops at the first failed conversion. The average is truncated.
pub fn read_channel_averaged<S: SenseChip>(chip: &mut S, channel: u8, passes: u8) -> Result<u32, Error> {
    if passes == 0 {
        return Err(Error::NoPasses);
    }

    let mut sum: u64 = 0;
    for _ in 0..passes {
        let value = chip.read_adc(channel)?;
        // A negative conversion result is a failed conversion
        let value = u32::try_from(value).map_err(|_| Error::Io(IoError))?;
        sum += value as u64;
    }
    Ok((sum / passes as u64) as u32)
}

/// Convert a battery voltage ADC reading to millivolts.
///
/// Readings beyond the ADC range are treated as full scale.
pub fn raw_to_millivolts(raw: u32) -> u32 {
    if raw <= RAW_EMPTY {
        return MV_EMPTY;
    }
    let raw = raw.min(RAW_MAX);
    MV_EMPTY + (raw - RAW_EMPTY) * (MV_FULL - MV_EMPTY) / (RAW_FULL - RAW_EMPTY)
}

/// Map a battery size indicator reading to a capacity.
pub fn raw_to_capacity(raw: u32) -> Capacity {
    if (BSI_1500MAH - BSI_HYSTERESIS..=BSI_1500MAH + BSI_HYSTERESIS).contains(&raw) {
        Capacity::Known(1500)
    } else {
        error!("Capacity indicator {} unknown", raw);
        Capacity::Unknown
    }
}

/// Estimate the charge level in percent from the battery voltage.
pub fn millivolts_to_percent(mv: u32) -> u8 {
    let mv = mv.clamp(LEVEL_MIN_MV as u32, LEVEL_MAX_MV as u32);
    ((mv - LEVEL_MIN_MV as u32) * 100 / (LEVEL_MAX_MV - LEVEL_MIN_MV) as u32) as u8
}

/// Battery voltage in mV.
pub fn measure_voltage<S: SenseChip>(chip: &mut S) -> Result<u32, Error> {
    let raw = read_channel_averaged(chip, sense::adc::BATTVOLT, 5)?;
    Ok(raw_to_millivolts(raw))
}

/// Read the battery size indicator.
///
/// A failed read reports [`Capacity::Unknown`].
pub fn detect_capacity<S: SenseChip>(chip: &mut S) -> Capacity {
    match read_channel_averaged(chip, sense::adc::BSI, 5) {
        Ok(raw) => raw_to_capacity(raw),
        Err(e) => {
            error!("Failed to read BSI ADC: {:?}", e);
            Capacity::Unknown
        }
    }
}

/// Charger voltage, raw ADC units.
pub fn measure_charger_voltage<S: SenseChip>(chip: &mut S) -> Result<u32, Error> {
    read_channel_averaged(chip, sense::adc::CHGVOLT, 5)
}

/// Backup battery voltage, raw ADC units.
pub fn measure_backup_voltage<S: SenseChip>(chip: &mut S) -> Result<u32, Error> {
    read_channel_averaged(chip, sense::adc::BKUPVOLT, 3)
}

/// Battery temperature, raw ADC units.
pub fn measure_temperature<S: SenseChip>(chip: &mut S) -> Result<u32, Error> {
    read_channel_averaged(chip, sense::adc::BATTEMP, 3)
}

/// Battery current, three reads of the signed current register.
///
/// Only meaningful while the measurement circuitry is enabled, returns 0
/// otherwise. Positive values mean the battery is charging.
pub fn measure_current<C: ChipRegisters>(chip: &mut C, current_sense: &CurrentSense) -> i32 {
    if !current_sense.is_enabled() {
        warn!("Battery current read without enabled measurement circuitry");
        return 0;
    }

    let sum: i32 = (0..3)
        .map(|_| chip.read_reg(charge::BATCURR) as i16 as i32)
        .sum();
    sum / 3
}

/// Verify that the ground reference converts to (almost) zero.
///
/// One conversion is discarded first. A reading above
/// [`GROUND_MAX_RAW`] means the ADC cannot be trusted and halts the system.
pub fn check_ground<S: SenseChip, H: EmergencyHalt>(chip: &mut S, halt: &mut H) -> Result<(), Error> {
    chip.write_reg(sense::ADCSCR, 0);
    let _ = chip.read_adc(sense::adc::GND2);

    let value = chip.read_adc(sense::adc::GND2).map_err(|e| {
        error!("Failed to read GND ADC channel {}", sense::adc::GND2);
        Error::Io(e)
    })?;
    debug!("GND ADC channel sanity check got value: {}", value);

    if value > GROUND_MAX_RAW {
        emergency(halt, "GND ADC sanity check failed");
    }
    Ok(())
}
