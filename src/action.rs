use serde::{Deserialize, Serialize};

/// Typed action routed to a device by [`DeviceRegistry::dispatch`](crate::DeviceRegistry::dispatch)
///
/// `duration` is the transition time in milliseconds; `value` is a
/// brightness percentage, a packed `0xRRGGBB` color or a Kelvin temperature
/// depending on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceAction {
    Open { duration: u32 },
    Close { duration: u32 },
    Brightness { value: u32, duration: u32 },
    Color { value: u32, duration: u32 },
    ColorTemperature { value: u32, duration: u32 },
    IncreaseBrightness { duration: u32 },
    DecreaseBrightness { duration: u32 },
    IncreaseCt { duration: u32 },
    DecreaseCt { duration: u32 },
}

impl DeviceAction {
    /// Transition time in milliseconds
    pub fn duration(&self) -> u32 {
        match *self {
            DeviceAction::Open { duration }
            | DeviceAction::Close { duration }
            | DeviceAction::Brightness { duration, .. }
            | DeviceAction::Color { duration, .. }
            | DeviceAction::ColorTemperature { duration, .. }
            | DeviceAction::IncreaseBrightness { duration }
            | DeviceAction::DecreaseBrightness { duration }
            | DeviceAction::IncreaseCt { duration }
            | DeviceAction::DecreaseCt { duration } => duration,
        }
    }

    /// Action-specific value, if the variant carries one
    pub fn value(&self) -> Option<u32> {
        match *self {
            DeviceAction::Brightness { value, .. }
            | DeviceAction::Color { value, .. }
            | DeviceAction::ColorTemperature { value, .. } => Some(value),
            _ => None,
        }
    }
}
