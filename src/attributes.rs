//! Attribute table for the presentation layer
//!
//! Every value is a plain integer. Formatting and transport (sysfs-like
//! files, BLE characteristics, a debug shell) are up to the consumer.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::battery;
use crate::charger::ChargeProfile;
use crate::driver::BatteryManager;
use crate::peripherals::Board;
use crate::system::notify::Notifications;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attribute {
    BatteryPresent,
    /// Charge level in percent, 0 while charging or without battery
    BatteryLevel,
    /// On-demand current measurement
    BatteryCurrent,
    /// Capacity in mAh, 0 unless recognized
    BatteryCapacity,
    BatteryTemp,
    BackupBatteryVoltage,
    ChargerPresent,
    ChargerState,
    ChargerVerbose,
    /// Charger voltage, 0 without charger
    ChargerVoltage,
    ChargerEnable,
    ChargerPwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttributeError {
    ReadOnly,
    Measurement(battery::Error),
}

/// One table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    pub attribute: Attribute,
    pub name: &'static str,
    pub writable: bool,
    /// Notification raised when the value changes
    pub notify: Notifications,
}

const fn ro(attribute: Attribute, name: &'static str) -> AttributeInfo {
    AttributeInfo {
        attribute,
        name,
        writable: false,
        notify: Notifications::empty(),
    }
}

pub static ATTRIBUTES: [AttributeInfo; 12] = [
    ro(Attribute::BatteryPresent, "battery_present"),
    ro(Attribute::BatteryLevel, "battery_level"),
    ro(Attribute::BatteryCurrent, "battery_current"),
    ro(Attribute::BatteryCapacity, "battery_capacity"),
    ro(Attribute::BatteryTemp, "battery_temp"),
    ro(Attribute::BackupBatteryVoltage, "backup_battery_voltage"),
    AttributeInfo {
        notify: Notifications::CHARGER_PRESENT,
        ..ro(Attribute::ChargerPresent, "charger_present")
    },
    AttributeInfo {
        notify: Notifications::CHARGER_STATE,
        ..ro(Attribute::ChargerState, "charger_state")
    },
    AttributeInfo {
        writable: true,
        ..ro(Attribute::ChargerVerbose, "charger_verbose")
    },
    ro(Attribute::ChargerVoltage, "charger_voltage"),
    AttributeInfo {
        writable: true,
        ..ro(Attribute::ChargerEnable, "charger_enable")
    },
    AttributeInfo {
        notify: Notifications::CHARGER_PWM,
        ..ro(Attribute::ChargerPwm, "charger_pwm")
    },
];

impl Attribute {
    pub fn info(self) -> &'static AttributeInfo {
        &ATTRIBUTES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ATTRIBUTES.iter().find(|a| a.name == name).map(|a| a.attribute)
    }
}

impl<M: RawMutex, B: Board, P: ChargeProfile> BatteryManager<M, B, P> {
    pub async fn read_attribute(&self, attribute: Attribute) -> Result<i32, AttributeError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let value = match attribute {
            Attribute::BatteryPresent => Ok(inner.battery.present as i32),
            Attribute::BatteryLevel => {
                if !inner.battery.present || inner.charger.charging {
                    Ok(battery::millivolts_to_percent(0) as i32)
                } else {
                    battery::measure_voltage(&mut inner.hw.sense)
                        .map(|mv| battery::millivolts_to_percent(mv) as i32)
                }
            }
            Attribute::BatteryCurrent => Ok(inner.measure_current_now()),
            Attribute::BatteryCapacity => Ok(inner
                .battery
                .capacity
                .mah()
                .filter(|_| inner.battery.present)
                .unwrap_or(0) as i32),
            Attribute::BatteryTemp => battery::measure_temperature(&mut inner.hw.sense).map(|k| k as i32),
            Attribute::BackupBatteryVoltage => {
                battery::measure_backup_voltage(&mut inner.hw.sense).map(|mv| mv as i32)
            }
            Attribute::ChargerPresent => Ok(inner.charger.present as i32),
            Attribute::ChargerState => Ok(inner.charge_status() as i32),
            Attribute::ChargerVerbose => Ok(inner.verbose as i32),
            Attribute::ChargerVoltage => {
                if inner.charger.present {
                    battery::measure_charger_voltage(&mut inner.hw.sense).map(|mv| mv as i32)
                } else {
                    Ok(0)
                }
            }
            Attribute::ChargerEnable => Ok(inner.charger.enabled as i32),
            Attribute::ChargerPwm => Ok(inner.charger.duty_cycle as i32),
        };

        self.release(guard);
        value.map_err(AttributeError::Measurement)
    }

    /// Store a writable attribute. Any non-zero value enables.
    pub async fn write_attribute(&self, attribute: Attribute, value: i32) -> Result<(), AttributeError> {
        match attribute {
            Attribute::ChargerEnable => self.set_charging_enabled(value != 0).await,
            Attribute::ChargerVerbose => self.set_verbose(value != 0).await,
            _ => return Err(AttributeError::ReadOnly),
        }
        Ok(())
    }
}
