//! Errors of the calibration block parser

use super::{ChannelId, Field};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibError {
    /// Wrong image size or magic
    BadFormat,
    /// The requested group is not flagged active in the image
    GroupInactive { group: u8 },
    /// Element location outside the image layout
    InvalidLocation { group: u8, element: u8 },
    /// Old style image layout, no parser available
    FormatUnsupported,
    /// An element names an id outside the calibration table
    UnknownChannel(u8),
    /// A coefficient failed the sanity check
    OutOfRange {
        channel: ChannelId,
        field: Field,
        value: i64,
    },
    /// Not every required channel passed the sanity check
    IncompleteSet { found: u8 },
}
