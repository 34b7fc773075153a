use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Manual indicator command carried on the broker command topic.
///
/// Both fields are optional. `power: false` turns the indicator off and wins
/// over any color in the same message; a color is only applied when it has
/// exactly three components.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Vec<u8>>,
}

impl LedCommand {
    pub fn off() -> Self {
        Self {
            power: Some(false),
            color: None,
        }
    }

    pub fn color(r: u8, g: u8, b: u8) -> Self {
        Self {
            power: None,
            color: Some(alloc::vec![r, g, b]),
        }
    }

    /// Whether the payload carried anything this device understands
    pub fn is_recognized(&self) -> bool {
        self.power.is_some() || self.color.is_some()
    }

    /// The explicit color, if the array had exactly three components
    pub fn rgb(&self) -> Option<[u8; 3]> {
        match self.color.as_deref() {
            Some(&[r, g, b]) => Some([r, g, b]),
            _ => None,
        }
    }

    #[cfg(feature = "std")]
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    #[cfg(feature = "std")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
