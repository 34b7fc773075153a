//! GATT attribute access for the wireless command service.
//!
//! The platform BLE stack maps each characteristic handle back to a 16-bit UUID
//! and forwards reads and writes here. Errors are ATT protocol codes which the
//! stack returns to the peer unchanged.

use std::fmt;

use log::{info, warn};
use rgb::RGB8;

use common::protocol;

use super::ManualControl;
use crate::config::BleConfig;

const SOURCE: &str = "wireless";

/// Characteristics the device exposes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    LedCommand,
    LedStatus,
    ManufacturerName,
    ModelNumber,
    CurrentTime,
    BatteryLevel,
}

impl Attribute {
    pub const ALL: [Attribute; 6] = [
        Attribute::LedCommand,
        Attribute::LedStatus,
        Attribute::ManufacturerName,
        Attribute::ModelNumber,
        Attribute::CurrentTime,
        Attribute::BatteryLevel,
    ];

    pub fn from_uuid16(uuid: u16) -> Option<Self> {
        match uuid {
            protocol::LED_COMMAND_CHR_UUID => Some(Attribute::LedCommand),
            protocol::LED_STATUS_CHR_UUID => Some(Attribute::LedStatus),
            protocol::MANUFACTURER_NAME_CHR_UUID => Some(Attribute::ManufacturerName),
            protocol::MODEL_NUMBER_CHR_UUID => Some(Attribute::ModelNumber),
            protocol::CURRENT_TIME_CHR_UUID => Some(Attribute::CurrentTime),
            protocol::BATTERY_LEVEL_CHR_UUID => Some(Attribute::BatteryLevel),
            _ => None,
        }
    }

    pub fn uuid16(self) -> u16 {
        match self {
            Attribute::LedCommand => protocol::LED_COMMAND_CHR_UUID,
            Attribute::LedStatus => protocol::LED_STATUS_CHR_UUID,
            Attribute::ManufacturerName => protocol::MANUFACTURER_NAME_CHR_UUID,
            Attribute::ModelNumber => protocol::MODEL_NUMBER_CHR_UUID,
            Attribute::CurrentTime => protocol::CURRENT_TIME_CHR_UUID,
            Attribute::BatteryLevel => protocol::BATTERY_LEVEL_CHR_UUID,
        }
    }

    /// Primary service the characteristic lives in
    pub fn service_uuid16(self) -> u16 {
        match self {
            Attribute::LedCommand | Attribute::LedStatus => protocol::COMMAND_SERVICE_UUID,
            Attribute::ManufacturerName | Attribute::ModelNumber => {
                protocol::DEVICE_INFO_SERVICE_UUID
            }
            Attribute::CurrentTime => protocol::CURRENT_TIME_SERVICE_UUID,
            Attribute::BatteryLevel => protocol::BATTERY_SERVICE_UUID,
        }
    }

    pub fn is_readable(self) -> bool {
        !matches!(self, Attribute::LedCommand)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Attribute::LedCommand)
    }

    pub fn notifies(self) -> bool {
        matches!(self, Attribute::LedStatus)
    }
}

/// ATT error codes returned to the peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttError {
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidAttributeValueLength,
    Unlikely,
}

impl AttError {
    pub fn code(self) -> u8 {
        match self {
            AttError::ReadNotPermitted => 0x02,
            AttError::WriteNotPermitted => 0x03,
            AttError::InvalidAttributeValueLength => 0x0D,
            AttError::Unlikely => 0x0E,
        }
    }
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttError::ReadNotPermitted => "read not permitted",
            AttError::WriteNotPermitted => "write not permitted",
            AttError::InvalidAttributeValueLength => "invalid attribute value length",
            AttError::Unlikely => "unlikely error",
        };
        write!(f, "ATT error 0x{:02X}: {}", self.code(), name)
    }
}

impl std::error::Error for AttError {}

pub struct WirelessChannel {
    control: ManualControl,
    default_on: RGB8,
    manufacturer: String,
    model_number: String,
    battery_level: u8,
}

impl WirelessChannel {
    pub fn new(control: ManualControl, config: &BleConfig) -> Self {
        Self {
            control,
            default_on: config.default_on_color,
            manufacturer: config.manufacturer.clone(),
            model_number: config.model_number.clone(),
            battery_level: config.battery_level,
        }
    }

    /// Handle a write to the characteristic with `uuid`.
    ///
    /// The command attribute takes one byte (zero for off, anything else for the
    /// default color) or three bytes of explicit RGB. Returns the color shown.
    pub fn handle_write(&self, uuid: u16, value: &[u8]) -> Result<RGB8, AttError> {
        let attribute = Attribute::from_uuid16(uuid).ok_or_else(|| {
            warn!("commands::wireless: write to unknown attribute 0x{:04X}", uuid);
            AttError::Unlikely
        })?;
        if !attribute.is_writable() {
            warn!(
                "commands::wireless: write to read-only {:?} rejected",
                attribute
            );
            return Err(AttError::WriteNotPermitted);
        }

        let color = match *value {
            [0] => {
                self.control.turn_off(SOURCE);
                return Ok(crate::state::BLACK);
            }
            [_] => self.default_on,
            [r, g, b] => RGB8::new(r, g, b),
            _ => {
                warn!(
                    "commands::wireless: command of {} bytes rejected",
                    value.len()
                );
                return Err(AttError::InvalidAttributeValueLength);
            }
        };
        self.control.set_color(SOURCE, color);
        Ok(color)
    }

    pub fn handle_read(&self, uuid: u16) -> Result<Vec<u8>, AttError> {
        let attribute = Attribute::from_uuid16(uuid).ok_or_else(|| {
            warn!("commands::wireless: read of unknown attribute 0x{:04X}", uuid);
            AttError::Unlikely
        })?;

        let value = match attribute {
            Attribute::LedCommand => return Err(AttError::ReadNotPermitted),
            Attribute::LedStatus => self.status_value().to_vec(),
            Attribute::ManufacturerName => self.manufacturer.as_bytes().to_vec(),
            Attribute::ModelNumber => self.model_number.as_bytes().to_vec(),
            Attribute::CurrentTime => vec![0; protocol::CURRENT_TIME_LEN],
            Attribute::BatteryLevel => vec![self.battery_level],
        };
        info!(
            "commands::wireless: read {:?} ({} bytes)",
            attribute,
            value.len()
        );
        Ok(value)
    }

    /// Value of the status characteristic: 1 while the override is active
    pub fn status_value(&self) -> [u8; 1] {
        [self.control.is_active() as u8]
    }

    /// Initial value for every readable characteristic, used to build the
    /// attribute table
    pub fn initial_value(&self, attribute: Attribute) -> Vec<u8> {
        self.handle_read(attribute.uuid16()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::{Indicator, MemoryPixel};
    use crate::state::{OverrideCell, BLACK};

    fn channel() -> (WirelessChannel, MemoryPixel, OverrideCell) {
        let pixel = MemoryPixel::new();
        let display_override = OverrideCell::new();
        let control = ManualControl::new(Indicator::new(pixel.clone()), display_override.clone());
        (
            WirelessChannel::new(control, &BleConfig::default()),
            pixel,
            display_override,
        )
    }

    #[test]
    fn rgb_write_then_status_reads_one() {
        let (channel, pixel, _) = channel();
        assert_eq!(channel.handle_read(0xBB02), Ok(vec![0]));

        let color = channel.handle_write(0xBB01, &[10, 20, 30]).unwrap();
        assert_eq!(color, RGB8::new(10, 20, 30));
        assert_eq!(pixel.last(), Some(RGB8::new(10, 20, 30)));
        assert_eq!(channel.handle_read(0xBB02), Ok(vec![1]));
    }

    #[test]
    fn single_byte_commands() {
        let (channel, pixel, display_override) = channel();
        assert_eq!(channel.handle_write(0xBB01, &[7]), Ok(RGB8::new(255, 255, 255)));
        assert_eq!(channel.handle_write(0xBB01, &[0]), Ok(BLACK));
        assert_eq!(pixel.history(), vec![RGB8::new(255, 255, 255), BLACK]);
        assert!(display_override.is_active());
    }

    #[test]
    fn bad_length_is_rejected_without_side_effects() {
        let (channel, pixel, display_override) = channel();
        let values: [&[u8]; 3] = [&[], &[1, 2], &[1, 2, 3, 4]];
        for value in values {
            let err = channel.handle_write(0xBB01, value).unwrap_err();
            assert_eq!(err, AttError::InvalidAttributeValueLength);
            assert_eq!(err.code(), 0x0D);
        }
        assert_eq!(pixel.writes(), 0);
        assert!(!display_override.is_active());
    }

    #[test]
    fn read_only_and_unknown_attributes() {
        let (channel, _, _) = channel();
        assert_eq!(
            channel.handle_write(0x2A2B, &[1]),
            Err(AttError::WriteNotPermitted)
        );
        assert_eq!(channel.handle_write(0x1234, &[1]), Err(AttError::Unlikely));
        assert_eq!(channel.handle_read(0x1234), Err(AttError::Unlikely));
        assert_eq!(channel.handle_read(0xBB01), Err(AttError::ReadNotPermitted));
    }

    #[test]
    fn fixed_information_attributes() {
        let (channel, _, _) = channel();
        assert_eq!(channel.handle_read(0x2A2B), Ok(vec![0; 10]));
        assert_eq!(channel.handle_read(0x2A29), Ok(b"Ivan-Corp".to_vec()));
        assert_eq!(channel.handle_read(0x2A24), Ok(b"ESP32S3-Ivan-Dev".to_vec()));
        assert_eq!(channel.handle_read(0x2A19), Ok(vec![98]));
    }

    #[test]
    fn attribute_table_is_consistent() {
        for attribute in Attribute::ALL {
            assert_eq!(Attribute::from_uuid16(attribute.uuid16()), Some(attribute));
            assert_ne!(attribute.is_readable(), attribute.is_writable());
        }
        assert_eq!(Attribute::LedStatus.service_uuid16(), 0xBB00);
        assert!(Attribute::LedStatus.notifies());
    }
}
