//! The single RGB status pixel.
//!
//! [`Indicator`] is cloned into every context that may write the pixel: the
//! display arbitrator for automatic renders and the command channels for manual
//! ones. Writes are last-writer-wins with no queueing. The color most recently
//! handed to the sink is mirrored into an atomic so it can be read without
//! touching the driver.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{debug, warn};
use rgb::RGB8;

use crate::state::BLACK;

/// Something that can physically show one color
pub trait PixelSink: Send {
    fn show(&mut self, color: RGB8) -> Result<()>;
}

/// Sink used when the LED driver failed to initialise
pub struct NullPixel;

impl PixelSink for NullPixel {
    fn show(&mut self, color: RGB8) -> Result<()> {
        debug!(
            "indicator: driver unavailable, dropping RGB({}, {}, {})",
            color.r, color.g, color.b
        );
        Ok(())
    }
}

/// In-memory sink that records every color it was asked to show
#[derive(Clone, Default)]
pub struct MemoryPixel {
    history: Arc<Mutex<Vec<RGB8>>>,
}

impl MemoryPixel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<RGB8> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn writes(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn last(&self) -> Option<RGB8> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .copied()
    }
}

impl PixelSink for MemoryPixel {
    fn show(&mut self, color: RGB8) -> Result<()> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(color);
        Ok(())
    }
}

#[derive(Clone)]
pub struct Indicator {
    sink: Arc<Mutex<Box<dyn PixelSink>>>,
    shown: Arc<AtomicU32>,
}

impl Indicator {
    pub fn new(sink: impl PixelSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            shown: Arc::new(AtomicU32::new(pack(BLACK))),
        }
    }

    /// Indicator whose writes go nowhere, for a board without a working LED
    pub fn disabled() -> Self {
        Self::new(NullPixel)
    }

    /// Write `color` to the pixel.
    ///
    /// A failing driver is logged and otherwise ignored; the display degrading
    /// never takes the rest of the device down.
    pub fn show(&self, color: RGB8) {
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match sink.show(color) {
            Ok(()) => self.shown.store(pack(color), Ordering::Release),
            Err(e) => warn!(
                "indicator: failed to show RGB({}, {}, {}): {:#}",
                color.r, color.g, color.b, e
            ),
        }
    }

    /// Write `color` unless `suppressed` holds once the sink is locked.
    ///
    /// Manual writers raise the override before taking the lock, so checking
    /// under the lock means an automatic render never lands after a manual
    /// color it raced with. Returns whether the color was written.
    pub fn show_unless(&self, color: RGB8, suppressed: impl Fn() -> bool) -> bool {
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if suppressed() {
            return false;
        }
        match sink.show(color) {
            Ok(()) => self.shown.store(pack(color), Ordering::Release),
            Err(e) => warn!(
                "indicator: failed to show RGB({}, {}, {}): {:#}",
                color.r, color.g, color.b, e
            ),
        }
        true
    }

    pub fn clear(&self) {
        self.show(BLACK);
    }

    /// The last color the sink accepted
    pub fn current(&self) -> RGB8 {
        unpack(self.shown.load(Ordering::Acquire))
    }
}

fn pack(color: RGB8) -> u32 {
    (color.r as u32) << 16 | (color.g as u32) << 8 | color.b as u32
}

fn unpack(word: u32) -> RGB8 {
    RGB8::new((word >> 16) as u8, (word >> 8) as u8, word as u8)
}
