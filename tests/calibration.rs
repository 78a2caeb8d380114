mod common;

use pocket_bms::calibration::{
    self,
    parser::{ELEMENT_SIZE, GROUP_SIZE},
    CalibError, CalibrationStore, ChannelId, Field, REQUIRED_CHANNELS,
};

#[test]
fn image_yields_seven_validated_channels() {
    let store = calibration::parse(&common::calibration_image()).unwrap();

    assert_eq!(store.validate(), Ok(REQUIRED_CHANNELS));
    let reference = store.get(ChannelId::Reference).unwrap();
    assert_eq!(reference.field1 as i32, -4);
    assert_eq!(reference.field2, 13100);
    assert_eq!(store.get(ChannelId::BatteryCurrent).unwrap().field2, 9500);
}

#[test]
fn parsed_store_differs_from_defaults_only_in_group1() {
    let store = calibration::parse(&common::calibration_image()).unwrap();
    let defaults = CalibrationStore::defaults();

    for channel in [ChannelId::Headset, ChannelId::Ground, ChannelId::LightTemp] {
        assert_eq!(store.get(channel), defaults.get(channel));
    }
    assert_eq!(store.present().count(), defaults.present().count());
}

/// Overwrite one coefficient of a group 1 element.
fn put_field(image: &mut [u8], element: usize, field: Field, value: i64) {
    let offset = match field {
        Field::Field1 => 4,
        Field::Field2 => 8,
    };
    let start = GROUP_SIZE + element * ELEMENT_SIZE + offset;
    image[start..start + 4].copy_from_slice(&(value as i32 as u32).to_le_bytes());
}

#[test]
fn every_checked_coefficient_is_bounded_inclusively() {
    // (channel, element, field, min, max)
    let bounds = [
        (ChannelId::BatteryVoltage, 0x01 + 3, Field::Field1, 2400, 2700),
        (ChannelId::BatteryVoltage, 0x01 + 3, Field::Field2, 20000, 23000),
        (ChannelId::BatterySize, 0x04 + 3, Field::Field1, 1100, 1300),
        (ChannelId::BatteryCurrent, 0x0E + 3, Field::Field2, 7000, 12000),
        (ChannelId::Reference, 2, Field::Field1, -14, 14),
        (ChannelId::Reference, 2, Field::Field2, 13000, 13350),
    ];

    for (channel, element, field, min, max) in bounds {
        for value in [min, max] {
            let mut image = common::calibration_image();
            put_field(&mut image, element, field, value);
            assert!(
                calibration::parse(&image).is_ok(),
                "{:?} {:?} = {} rejected",
                channel,
                field,
                value
            );
        }
        for value in [min - 1, max + 1] {
            let mut image = common::calibration_image();
            put_field(&mut image, element, field, value);
            assert_eq!(
                calibration::parse(&image),
                Err(CalibError::OutOfRange { channel, field, value }),
                "{:?} {:?} = {} accepted",
                channel,
                field,
                value
            );
        }
    }
}

#[test]
fn truncated_image_is_rejected() {
    let image = common::calibration_image();
    assert_eq!(calibration::parse(&image[..1024]), Err(CalibError::BadFormat));
    assert_eq!(calibration::parse(&[]), Err(CalibError::BadFormat));
}
