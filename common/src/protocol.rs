//! Fixed identifiers shared between the device and anything talking to it.

/// Topic the device subscribes to for [`crate::LedCommand`] payloads
pub const COMMAND_TOPIC: &str = "esp-lection/cmd";

/// Topic the device announces itself on after each broker session starts
pub const STATUS_TOPIC: &str = "esp-lection/status";

pub const DEFAULT_BROKER_URI: &str = "mqtt://broker.hivemq.com:1883";

pub const DEFAULT_ANNOUNCEMENT: &str = "Hello, I'm Ivan, and Esp32 connected";

// GATT services and characteristics (16-bit UUIDs)

pub const COMMAND_SERVICE_UUID: u16 = 0xBB00;
pub const LED_COMMAND_CHR_UUID: u16 = 0xBB01;
pub const LED_STATUS_CHR_UUID: u16 = 0xBB02;

pub const DEVICE_INFO_SERVICE_UUID: u16 = 0x180A;
pub const MANUFACTURER_NAME_CHR_UUID: u16 = 0x2A29;
pub const MODEL_NUMBER_CHR_UUID: u16 = 0x2A24;

pub const CURRENT_TIME_SERVICE_UUID: u16 = 0x1805;
pub const CURRENT_TIME_CHR_UUID: u16 = 0x2A2B;

pub const BATTERY_SERVICE_UUID: u16 = 0x180F;
pub const BATTERY_LEVEL_CHR_UUID: u16 = 0x2A19;

/// Length of the current-time placeholder value
pub const CURRENT_TIME_LEN: usize = 10;
