//! Shared state cells
//!
//! Every value that crosses thread boundaries lives in a single atomic word, so a
//! reader on another thread sees either the old value or the new one, never a mix.
//!
//! `ConnectivityState` and `SelectedMode` each have exactly one logical writer.
//! That is enforced by [`cell`], which hands out one non-`Clone` [`Writer`] and a
//! cloneable [`Reader`]. The display override has several writers (both command
//! channels and the mode controller), so [`OverrideCell`] is freely cloneable.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use rgb::RGB8;
use serde::{Deserialize, Serialize};

pub const BLACK: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// Values that can be stored in a one-byte atomic cell
pub trait CellValue: Copy {
    fn to_bits(self) -> u8;
    fn from_bits(bits: u8) -> Self;
}

/// Network lifecycle phase of the device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectivityState {
    Idle = 0,
    StationConnecting = 1,
    StationError = 2,
    StationAddressed = 3,
    InternetVerified = 4,
    AccessPointActive = 5,
    AccessPointConnected = 6,
}

impl ConnectivityState {
    pub const ALL: [ConnectivityState; 7] = [
        ConnectivityState::Idle,
        ConnectivityState::StationConnecting,
        ConnectivityState::StationError,
        ConnectivityState::StationAddressed,
        ConnectivityState::InternetVerified,
        ConnectivityState::AccessPointActive,
        ConnectivityState::AccessPointConnected,
    ];

    pub fn is_station(self) -> bool {
        matches!(
            self,
            ConnectivityState::StationConnecting
                | ConnectivityState::StationError
                | ConnectivityState::StationAddressed
                | ConnectivityState::InternetVerified
        )
    }

    pub fn is_access_point(self) -> bool {
        matches!(
            self,
            ConnectivityState::AccessPointActive | ConnectivityState::AccessPointConnected
        )
    }
}

impl CellValue for ConnectivityState {
    fn to_bits(self) -> u8 {
        self as u8
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => ConnectivityState::StationConnecting,
            2 => ConnectivityState::StationError,
            3 => ConnectivityState::StationAddressed,
            4 => ConnectivityState::InternetVerified,
            5 => ConnectivityState::AccessPointActive,
            6 => ConnectivityState::AccessPointConnected,
            _ => ConnectivityState::Idle,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Idle => "idle",
            ConnectivityState::StationConnecting => "station connecting",
            ConnectivityState::StationError => "station error",
            ConnectivityState::StationAddressed => "station addressed",
            ConnectivityState::InternetVerified => "internet verified",
            ConnectivityState::AccessPointActive => "access point active",
            ConnectivityState::AccessPointConnected => "access point connected",
        };
        f.write_str(name)
    }
}

/// Operating configuration chosen with the joystick
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SelectedMode {
    None = 0,
    AccessPoint = 1,
    Station = 2,
    WirelessCommand = 3,
}

impl CellValue for SelectedMode {
    fn to_bits(self) -> u8 {
        self as u8
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => SelectedMode::AccessPoint,
            2 => SelectedMode::Station,
            3 => SelectedMode::WirelessCommand,
            _ => SelectedMode::None,
        }
    }
}

impl fmt::Display for SelectedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectedMode::None => "none",
            SelectedMode::AccessPoint => "access point",
            SelectedMode::Station => "station",
            SelectedMode::WirelessCommand => "wireless command",
        };
        f.write_str(name)
    }
}

/// Create a single-writer cell holding `initial`
pub fn cell<T: CellValue>(initial: T) -> (Writer<T>, Reader<T>) {
    let bits = Arc::new(AtomicU8::new(initial.to_bits()));
    (
        Writer {
            bits: bits.clone(),
            _value: PhantomData,
        },
        Reader {
            bits,
            _value: PhantomData,
        },
    )
}

/// The only handle allowed to change a cell
pub struct Writer<T> {
    bits: Arc<AtomicU8>,
    _value: PhantomData<T>,
}

impl<T: CellValue> Writer<T> {
    pub fn set(&mut self, value: T) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> T {
        T::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn reader(&self) -> Reader<T> {
        Reader {
            bits: self.bits.clone(),
            _value: PhantomData,
        }
    }
}

pub struct Reader<T> {
    bits: Arc<AtomicU8>,
    _value: PhantomData<T>,
}

impl<T: CellValue> Reader<T> {
    pub fn get(&self) -> T {
        T::from_bits(self.bits.load(Ordering::Acquire))
    }
}

impl<T> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self {
            bits: self.bits.clone(),
            _value: PhantomData,
        }
    }
}

pub type ConnectivityWriter = Writer<ConnectivityState>;
pub type ConnectivityReader = Reader<ConnectivityState>;
pub type ModeWriter = Writer<SelectedMode>;
pub type ModeReader = Reader<SelectedMode>;

/// Manual color that suppresses the automatic status display while active
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayOverride {
    pub active: bool,
    pub color: RGB8,
}

impl DisplayOverride {
    pub const INACTIVE: DisplayOverride = DisplayOverride {
        active: false,
        color: BLACK,
    };

    const ACTIVE_BIT: u32 = 1 << 24;

    fn pack(self) -> u32 {
        let rgb = (self.color.r as u32) << 16 | (self.color.g as u32) << 8 | self.color.b as u32;
        if self.active {
            rgb | Self::ACTIVE_BIT
        } else {
            rgb
        }
    }

    fn unpack(word: u32) -> Self {
        DisplayOverride {
            active: word & Self::ACTIVE_BIT != 0,
            color: RGB8::new((word >> 16) as u8, (word >> 8) as u8, word as u8),
        }
    }
}

impl Default for DisplayOverride {
    fn default() -> Self {
        Self::INACTIVE
    }
}

/// Lock-free holder for the [`DisplayOverride`] tuple
#[derive(Clone, Debug)]
pub struct OverrideCell {
    word: Arc<AtomicU32>,
}

impl OverrideCell {
    pub fn new() -> Self {
        Self {
            word: Arc::new(AtomicU32::new(DisplayOverride::INACTIVE.pack())),
        }
    }

    pub fn activate(&self, color: RGB8) {
        self.store(DisplayOverride {
            active: true,
            color,
        });
    }

    pub fn deactivate(&self) {
        self.store(DisplayOverride::INACTIVE);
    }

    pub fn store(&self, value: DisplayOverride) {
        self.word.store(value.pack(), Ordering::Release);
    }

    pub fn snapshot(&self) -> DisplayOverride {
        DisplayOverride::unpack(self.word.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.snapshot().active
    }
}

impl Default for OverrideCell {
    fn default() -> Self {
        Self::new()
    }
}
