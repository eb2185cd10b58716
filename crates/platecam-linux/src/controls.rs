//! V4L2 control identifiers used by platecam.
//!
//! Only the user and camera class controls needed for exposure, white
//! balance, focus and flipping are listed. Values match `videodev2.h`.

use v4l::control::{Description, MenuItem};

const CID_BASE: u32 = 0x0098_0900;
const CID_CAMERA_CLASS_BASE: u32 = 0x009a_0900;

/// A V4L2 control platecam knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    /// `V4L2_CID_AUTO_WHITE_BALANCE` (boolean).
    AutoWhiteBalance,
    /// `V4L2_CID_RED_BALANCE` (integer).
    RedBalance,
    /// `V4L2_CID_BLUE_BALANCE` (integer).
    BlueBalance,
    /// `V4L2_CID_HFLIP` (boolean).
    HorizontalFlip,
    /// `V4L2_CID_VFLIP` (boolean).
    VerticalFlip,
    /// `V4L2_CID_EXPOSURE_AUTO` (menu).
    ExposureAuto,
    /// `V4L2_CID_EXPOSURE_ABSOLUTE` (integer, 100 µs units).
    ExposureAbsolute,
    /// `V4L2_CID_FOCUS_ABSOLUTE` (integer, driver-defined units).
    FocusAbsolute,
    /// `V4L2_CID_FOCUS_AUTO` (boolean).
    FocusAuto,
    /// `V4L2_CID_ISO_SENSITIVITY` (integer menu).
    IsoSensitivity,
    /// `V4L2_CID_ISO_SENSITIVITY_AUTO` (menu).
    IsoSensitivityAuto,
}

impl ControlId {
    /// `V4L2_EXPOSURE_AUTO` menu value.
    pub const EXPOSURE_MODE_AUTO: i64 = 0;
    /// `V4L2_EXPOSURE_MANUAL` menu value.
    pub const EXPOSURE_MODE_MANUAL: i64 = 1;
    /// `V4L2_ISO_SENSITIVITY_MANUAL` menu value.
    pub const ISO_MODE_MANUAL: i64 = 0;
    /// `V4L2_ISO_SENSITIVITY_AUTO` menu value.
    pub const ISO_MODE_AUTO: i64 = 1;

    /// The raw control id.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::AutoWhiteBalance => CID_BASE + 12,
            Self::RedBalance => CID_BASE + 14,
            Self::BlueBalance => CID_BASE + 15,
            Self::HorizontalFlip => CID_BASE + 20,
            Self::VerticalFlip => CID_BASE + 21,
            Self::ExposureAuto => CID_CAMERA_CLASS_BASE + 1,
            Self::ExposureAbsolute => CID_CAMERA_CLASS_BASE + 2,
            Self::FocusAbsolute => CID_CAMERA_CLASS_BASE + 10,
            Self::FocusAuto => CID_CAMERA_CLASS_BASE + 12,
            Self::IsoSensitivity => CID_CAMERA_CLASS_BASE + 23,
            Self::IsoSensitivityAuto => CID_CAMERA_CLASS_BASE + 24,
        }
    }

    /// Look up a known control by raw id.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.raw() == raw)
    }

    /// Every control platecam drives.
    pub const ALL: [Self; 11] = [
        Self::AutoWhiteBalance,
        Self::RedBalance,
        Self::BlueBalance,
        Self::HorizontalFlip,
        Self::VerticalFlip,
        Self::ExposureAuto,
        Self::ExposureAbsolute,
        Self::FocusAbsolute,
        Self::FocusAuto,
        Self::IsoSensitivity,
        Self::IsoSensitivityAuto,
    ];
}

/// Range information for a control exposed by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    /// Which control this is.
    pub id: ControlId,
    /// Driver-provided name.
    pub name: String,
    /// Minimum accepted value.
    pub minimum: i64,
    /// Maximum accepted value.
    pub maximum: i64,
    /// Default value.
    pub default: i64,
    /// `(index, value)` pairs of an integer menu control.
    pub menu_values: Vec<(i64, i64)>,
}

impl ControlInfo {
    /// Build from a V4L2 control description, if it is one we drive.
    #[must_use]
    pub fn from_description(desc: &Description) -> Option<Self> {
        let id = ControlId::from_raw(desc.id)?;
        Some(Self {
            id,
            name: desc.name.clone(),
            minimum: desc.minimum,
            maximum: desc.maximum,
            default: desc.default,
            menu_values: desc
                .items
                .iter()
                .flatten()
                .filter_map(|(index, item)| match item {
                    MenuItem::Value(value) => Some((i64::from(*index), *value)),
                    MenuItem::Name(_) => None,
                })
                .collect(),
        })
    }

    /// Clamp a value into this control's range.
    #[must_use]
    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.minimum, self.maximum)
    }

    /// The integer menu entry closest to `target`, as `(index, value)`.
    ///
    /// Ties go to the lower value. `None` if the control has no integer menu.
    #[must_use]
    pub fn nearest_menu_value(&self, target: i64) -> Option<(i64, i64)> {
        self.menu_values
            .iter()
            .copied()
            .min_by_key(|&(_, value)| (value.abs_diff(target), value))
    }
}
