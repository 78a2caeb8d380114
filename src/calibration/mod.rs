//! ADC calibration data
//!
//! One [`CalibrationRecord`] per analog channel, kept in a fixed slot table.
//! A store is either built from the compiled-in defaults or parsed from the
//! vendor calibration image (see [`parser`]). Once handed to the driver it
//! is only ever replaced as a whole.

pub mod error;
pub mod parser;

pub use error::CalibError;
pub use parser::parse;

/// Flags value marking an unused slot.
pub const ABSENT_FLAGS: u8 = 0xFF;

/// Number of slots in the calibration table.
pub const SLOT_COUNT: usize = 25;

/// Channels that must pass the sanity check for an image to be accepted.
pub const REQUIRED_CHANNELS: u8 = 7;

/// Analog channel identifiers as encoded in the calibration image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChannelId {
    /// Battery voltage
    BatteryVoltage = 0x01,
    /// Charger voltage
    ChargerVoltage = 0x02,
    /// Ground, 0 V
    Ground = 0x03,
    /// Battery size indicator
    BatterySize = 0x04,
    /// Battery temperature
    BatteryTemp = 0x05,
    /// Headset detection
    Headset = 0x06,
    /// Hook detection
    HookDetect = 0x07,
    /// Light sensor
    LightSensor = 0x08,
    /// Battery current
    BatteryCurrent = 0x0E,
    /// Backup battery voltage
    BackupVoltage = 0x13,
    /// Light sensor temperature
    LightTemp = 0x14,
    /// RF general purpose
    RfGp = 0x15,
    /// Wideband TX detection
    WidebandTx = 0x16,
    /// Sense chip die temperature
    ChipTemp = 0x17,
    /// Internal reference
    Reference = 0xFE,
}

impl ChannelId {
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Slot of this channel in the calibration table.
    pub const fn slot(self) -> usize {
        match self {
            ChannelId::Reference => 0,
            other => other as usize + 1,
        }
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = CalibError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0x01 => ChannelId::BatteryVoltage,
            0x02 => ChannelId::ChargerVoltage,
            0x03 => ChannelId::Ground,
            0x04 => ChannelId::BatterySize,
            0x05 => ChannelId::BatteryTemp,
            0x06 => ChannelId::Headset,
            0x07 => ChannelId::HookDetect,
            0x08 => ChannelId::LightSensor,
            0x0E => ChannelId::BatteryCurrent,
            0x13 => ChannelId::BackupVoltage,
            0x14 => ChannelId::LightTemp,
            0x15 => ChannelId::RfGp,
            0x16 => ChannelId::WidebandTx,
            0x17 => ChannelId::ChipTemp,
            0xFE => ChannelId::Reference,
            other => return Err(CalibError::UnknownChannel(other)),
        })
    }
}

/// Table slot for a raw id, if the table has room for it.
pub(crate) fn slot_for_raw(id: u8) -> Option<usize> {
    let slot = if id == ChannelId::Reference.id() {
        0
    } else {
        id as usize + 1
    };
    (slot < SLOT_COUNT).then_some(slot)
}

/// Coefficient selector used in sanity check reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    Field1,
    Field2,
}

/// Calibration of one analog channel.
///
/// The meaning of the coefficients is channel specific. Fields without a
/// known interpretation are carried bit-exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    /// Owning channel, `None` for unused slots
    pub channel: Option<ChannelId>,
    /// Layout/version tag, [`ABSENT_FLAGS`] when not present
    pub flags: u8,
    /// ADC group number
    pub group: u8,
    pub field1: u32,
    pub field2: u32,
    pub field3: u16,
    pub field4: u16,
}

impl CalibrationRecord {
    pub const ABSENT: Self = Self {
        channel: None,
        flags: ABSENT_FLAGS,
        group: 0,
        field1: 0,
        field2: 0,
        field3: 0,
        field4: 0,
    };

    const fn new(channel: ChannelId, flags: u8, group: u8, field1: u32, field2: u32) -> Self {
        Self {
            channel: Some(channel),
            flags,
            group,
            field1,
            field2,
            field3: 0,
            field4: 0,
        }
    }

    pub fn is_present(&self) -> bool {
        self.flags != ABSENT_FLAGS
    }
}

/// Compiled-in calibration, used as the base of every parse.
const DEFAULTS: [CalibrationRecord; 15] = [
    // ADC group 0
    CalibrationRecord::new(ChannelId::Headset, 0x00, 0, 0, 0),
    CalibrationRecord::new(ChannelId::HookDetect, 0x00, 0, 0, 0),
    CalibrationRecord::new(ChannelId::RfGp, 0x00, 0, 0, 0),
    CalibrationRecord::new(ChannelId::LightSensor, 0x00, 0, 0, 0),
    CalibrationRecord::new(ChannelId::WidebandTx, 0x00, 0, 0, 0),
    CalibrationRecord::new(ChannelId::ChipTemp, 0x00, 0, 0, 0),
    CalibrationRecord::new(ChannelId::Ground, 0x00, 0, 0, 0),
    // ADC group 1
    CalibrationRecord::new(ChannelId::Reference, 0x05, 1, -2i32 as u32, 13189),
    CalibrationRecord::new(ChannelId::BatteryVoltage, 0x01, 1, 2527, 21373),
    CalibrationRecord::new(ChannelId::ChargerVoltage, 0x01, 1, 0, 129848),
    CalibrationRecord::new(ChannelId::BackupVoltage, 0x01, 1, 0, 20000),
    CalibrationRecord::new(ChannelId::BatteryCurrent, 0x06, 1, 0, 9660),
    // ADC group 2
    CalibrationRecord::new(ChannelId::BatterySize, 0x02, 2, 1169, 0),
    // ADC group 3
    CalibrationRecord::new(ChannelId::BatteryTemp, 0x03, 3, 265423000, 298),
    // ADC group 4
    CalibrationRecord {
        field3: 4700,
        field4: 2500,
        ..CalibrationRecord::new(ChannelId::LightTemp, 0x04, 4, 19533778, 308019670)
    },
];

/// Calibration records of all channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationStore {
    slots: [CalibrationRecord; SLOT_COUNT],
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::defaults()
    }
}

impl CalibrationStore {
    /// Every slot absent, then the compiled-in records.
    pub fn defaults() -> Self {
        let mut store = Self {
            slots: [CalibrationRecord::ABSENT; SLOT_COUNT],
        };
        for record in DEFAULTS.iter() {
            if let Some(channel) = record.channel {
                store.slots[channel.slot()] = *record;
            }
        }
        store
    }

    /// Calibration of `channel`, if present.
    pub fn get(&self, channel: ChannelId) -> Option<&CalibrationRecord> {
        let record = &self.slots[channel.slot()];
        record.is_present().then_some(record)
    }

    /// All present records in slot order.
    pub fn present(&self) -> impl Iterator<Item = &CalibrationRecord> {
        self.slots.iter().filter(|r| r.is_present())
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut CalibrationRecord {
        &mut self.slots[slot]
    }

    /// Run the sanity check over all present records.
    ///
    /// Returns the number of channels that passed, which is always
    /// [`REQUIRED_CHANNELS`] on success.
    pub fn validate(&self) -> Result<u8, CalibError> {
        let mut count = 0u8;

        for record in self.present() {
            let Some(channel) = record.channel else {
                continue;
            };
            match channel {
                ChannelId::BatteryVoltage => {
                    check_range(channel, Field::Field1, record.field1 as i64, 2400, 2700)?;
                    check_range(channel, Field::Field2, record.field2 as i64, 20000, 23000)?;
                    count += 1;
                }
                ChannelId::BatterySize => {
                    check_range(channel, Field::Field1, record.field1 as i64, 1100, 1300)?;
                    count += 1;
                }
                ChannelId::BatteryCurrent => {
                    check_range(channel, Field::Field2, record.field2 as i64, 7000, 12000)?;
                    count += 1;
                }
                ChannelId::Reference => {
                    check_range(channel, Field::Field1, record.field1 as i32 as i64, -14, 14)?;
                    check_range(channel, Field::Field2, record.field2 as i64, 13000, 13350)?;
                    count += 1;
                }
                ChannelId::ChargerVoltage | ChannelId::BatteryTemp | ChannelId::BackupVoltage => {
                    count += 1;
                }
                ChannelId::Ground
                | ChannelId::Headset
                | ChannelId::HookDetect
                | ChannelId::LightSensor
                | ChannelId::LightTemp
                | ChannelId::RfGp
                | ChannelId::WidebandTx
                | ChannelId::ChipTemp => {}
            }
            debug!(
                "ADC {:?} calib: flags {} group {} {} {} {} {}",
                channel,
                record.flags,
                record.group,
                record.field1,
                record.field2,
                record.field3,
                record.field4
            );
        }

        if count != REQUIRED_CHANNELS {
            error!("Calibration sanity check: only {} required values found", count);
            return Err(CalibError::IncompleteSet { found: count });
        }
        Ok(count)
    }
}

fn check_range(channel: ChannelId, field: Field, value: i64, min: i64, max: i64) -> Result<(), CalibError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        error!(
            "Calibration sanity check failed: {:?} {:?} = {}",
            channel, field, value
        );
        Err(CalibError::OutOfRange {
            channel,
            field,
            value,
        })
    }
}
