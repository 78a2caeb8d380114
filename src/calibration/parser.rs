//! Parser for the vendor calibration image
//!
//! The image is a fixed 1536 byte block of three 512 byte groups, each made
//! of 16 byte elements. Byte 16 of the block holds a bitmask of the groups
//! that carry data. Element 0 of group 0 starts with the magic string.

use super::{slot_for_raw, CalibError, CalibrationStore, ChannelId};

/// Total image size.
pub const BLOCK_SIZE: usize = 0x600;
/// Size of one group.
pub const GROUP_SIZE: usize = 0x200;
/// Size of one element.
pub const ELEMENT_SIZE: usize = 0x10;
/// Image identification at offset 0.
pub const MAGIC: &[u8; 15] = b"BME-PMM-BLOCK01";

const ACTIVE_GROUP_MASK: usize = 16;
const GROUP1_ELEMENT_LEN: usize = 12;

/// Validated view of a calibration image.
#[derive(Debug, Clone, Copy)]
pub struct PmmBlock<'a> {
    data: &'a [u8],
}

impl<'a> PmmBlock<'a> {
    /// Check size and magic.
    pub fn new(data: &'a [u8]) -> Result<Self, CalibError> {
        if data.len() != BLOCK_SIZE || !data.starts_with(MAGIC) {
            error!("Calibration image has wrong size or magic ({} bytes)", data.len());
            return Err(CalibError::BadFormat);
        }
        Ok(Self { data })
    }

    pub fn group_active(&self, group: u8) -> bool {
        group < 8 && self.data[ACTIVE_GROUP_MASK] & (1 << group) != 0
    }

    /// `len` bytes at `offset` inside one element.
    pub fn record(&self, group: u8, element: u8, offset: usize, len: usize) -> Result<&'a [u8], CalibError> {
        let (g, e) = (group as usize, element as usize);
        if g >= BLOCK_SIZE / GROUP_SIZE
            || e >= GROUP_SIZE / ELEMENT_SIZE
            || offset >= ELEMENT_SIZE
            || len > ELEMENT_SIZE - offset
        {
            return Err(CalibError::InvalidLocation { group, element });
        }
        if !self.group_active(group) {
            debug!("Requested calibration group {}, but group is not active", group);
            return Err(CalibError::GroupInactive { group });
        }

        let start = g * GROUP_SIZE + e * ELEMENT_SIZE + offset;
        Ok(&self.data[start..start + len])
    }
}

/// One group 1 element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Group1Element {
    id: u8,
    flags: u8,
    field1: u32,
    field2: u32,
}

impl Group1Element {
    fn read(block: &PmmBlock<'_>, element: u8) -> Result<Self, CalibError> {
        let raw = block.record(1, element, 0, GROUP1_ELEMENT_LEN)?;
        // raw[2] is the ADC group, raw[3] padding
        Ok(Self {
            id: raw[0],
            flags: raw[1],
            field1: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            field2: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
        })
    }
}

/// Group 1 channels with the bits kept of (field1, field2).
const GROUP1_CHANNELS: [(ChannelId, u32, u32); 6] = [
    (ChannelId::BatteryVoltage, 0xFFFF_FFFF, 0xFFFF_FFFF),
    (ChannelId::ChargerVoltage, 0xFFFF_FFFF, 0xFFFF_FFFF),
    (ChannelId::BackupVoltage, 0xFFFF_FFFF, 0xFFFF_FFFF),
    (ChannelId::BatteryCurrent, 0xFFFF_FFFF, 0xFFFF_FFFF),
    (ChannelId::BatterySize, 0xFFFF_FFFF, 0),
    (ChannelId::BatteryTemp, 0xFFFF_FFFF, 0x0000_FFFF),
];

/// Parse a calibration image on top of the defaults and sanity check it.
pub fn parse(data: &[u8]) -> Result<CalibrationStore, CalibError> {
    let block = PmmBlock::new(data)?;
    let mut store = CalibrationStore::defaults();

    let sentinel0 = block.record(1, 0, 0, 1)?[0];
    let sentinel1 = block.record(1, 1, 0, 1)?[0];
    if sentinel0 != 0x01 || sentinel1 != 0x01 {
        error!("Calibration image uses an unsupported layout");
        return Err(CalibError::FormatUnsupported);
    }
    parse_group1(&block, &mut store)?;

    store.validate()?;
    Ok(store)
}

fn parse_group1(block: &PmmBlock<'_>, store: &mut CalibrationStore) -> Result<(), CalibError> {
    let reference = Group1Element::read(block, 2).map_err(|e| {
        error!("Failed to get calibration group 1 / element 2");
        e
    })?;
    if reference.id == ChannelId::Reference.id() && reference.flags == 0x05 {
        let record = store.slot_mut(ChannelId::Reference.slot());
        record.channel = Some(ChannelId::Reference);
        record.flags = reference.flags;
        record.field1 = reference.field1;
        record.field2 = reference.field2;
    }

    for (channel, mask1, mask2) in GROUP1_CHANNELS {
        let element = match Group1Element::read(block, channel.id() + 3) {
            Ok(element) => element,
            Err(e) => {
                debug!("No calibration element for {:?}: {:?}", channel, e);
                continue;
            }
        };
        let slot = slot_for_raw(element.id).ok_or_else(|| {
            error!("Calibration element names unknown channel {}", element.id);
            CalibError::UnknownChannel(element.id)
        })?;

        let record = store.slot_mut(slot);
        if record.flags == element.flags {
            record.field1 = element.field1 & mask1;
            record.field2 = element.field2 & mask2;
        } else {
            debug!(
                "Not extracting calibration fields due to flags mismatch: {} vs {}",
                record.flags, element.flags
            );
        }
    }
    Ok(())
}
