//! Battery manager configuration

use embassy_time::Duration;

/// Battery voltage below which the system is halted, in mV
pub const MIN_VOLTAGE_MV: u32 = 3200;

/// Highest acceptable conversion of the ground reference
pub const GROUND_MAX_RAW: i32 = 5;

/// Period of the hardware current measurement timer while charging
pub const CURRENT_SAMPLE_PERIOD_MS: u16 = 250;

/// Settle time after forcing the PWM state, before sampling the voltage
pub const SETTLE_TIME_MS: u32 = 10;

/// Interval between two battery and charger checks
pub const CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Calibration image requested at attach
pub const CALIBRATION_FIRMWARE: &str = "n810-cal-bme-pmm.fw";

/// What to do when the calibration image is missing or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationFallback {
    /// Fail the attach
    Abort,
    /// Continue with the compiled-in calibration
    UseDefaults,
}

/// Maximum charge rate in C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeRate {
    /// 0.6 C
    P6C,
}

/// Parameters handed to the charge profile before the first charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargeParams {
    pub rate: ChargeRate,
    /// End of charge voltage in mV
    pub top_voltage_mv: u32,
    /// Highest PWM duty cycle the profile may request
    pub duty_cycle_max: u16,
}

impl Default for ChargeParams {
    fn default() -> Self {
        Self {
            rate: ChargeRate::P6C,
            top_voltage_mv: 4100,
            duty_cycle_max: 0xFF,
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Calibration image name passed to the firmware loader
    pub firmware: &'static str,
    /// Battery and charger check interval
    pub check_interval: Duration,
    pub calibration_fallback: CalibrationFallback,
    /// Initial charging policy
    pub charger_enabled: bool,
    /// Log every charge sample
    pub verbose_charge_log: bool,
    pub charge: ChargeParams,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            firmware: CALIBRATION_FIRMWARE,
            check_interval: CHECK_INTERVAL,
            calibration_fallback: CalibrationFallback::Abort,
            // Charging is opt-in until the profile has been proven on the device
            charger_enabled: false,
            verbose_charge_log: false,
            charge: ChargeParams::default(),
        }
    }
}
