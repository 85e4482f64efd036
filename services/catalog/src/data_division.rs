use crate::config::StorageLayout;
use serde::{Deserialize, Serialize};
use std::fmt;

const KB_BYTES: u128 = 1024;
const MB_BYTES: u128 = 1024 * 1024;

/// Dataset format of a file attached to a scenario.
///
/// Serialized as the numeric code the front end and the download history use
/// (`"0"` to `"4"`). Declaration order is the classification order and the
/// sort order of scenario data lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataDivision {
    #[serde(rename = "0")]
    OpenDrive,
    #[serde(rename = "1")]
    VehicleTrajectory,
    #[serde(rename = "2")]
    SdmgScenario,
    #[serde(rename = "3")]
    OpenScenario,
    #[serde(rename = "4")]
    MachineLearning,
}

impl DataDivision {
    pub const ALL: [DataDivision; 5] = [
        DataDivision::OpenDrive,
        DataDivision::VehicleTrajectory,
        DataDivision::SdmgScenario,
        DataDivision::OpenScenario,
        DataDivision::MachineLearning,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DataDivision::OpenDrive => "0",
            DataDivision::VehicleTrajectory => "1",
            DataDivision::SdmgScenario => "2",
            DataDivision::OpenScenario => "3",
            DataDivision::MachineLearning => "4",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.code() == code)
    }
}

impl fmt::Display for DataDivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Classify a file name by the part starting at its first `_`.
///
/// Divisions are compared in declaration order and the first exact match
/// wins. Names without `_` or with an unknown tail are unclassified.
pub fn classify(file_name: &str, layout: &StorageLayout) -> Option<DataDivision> {
    let underscore = file_name.find('_')?;
    let tail = &file_name[underscore..];

    DataDivision::ALL
        .into_iter()
        .find(|division| layout.suffix_for(*division) == tail)
}

/// Render a byte count as `KB` below one MiB and `MB` from one MiB up,
/// two decimals, halves rounded up.
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as u128;
    let (unit_bytes, unit) = if bytes < MB_BYTES {
        (KB_BYTES, "KB")
    } else {
        (MB_BYTES, "MB")
    };

    // Integer arithmetic keeps the half-up rounding exact.
    let hundredths = (bytes * 100 + unit_bytes / 2) / unit_bytes;
    format!("{}.{:02}{}", hundredths / 100, hundredths % 100, unit)
}
