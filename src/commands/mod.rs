//! Remote command channels.
//!
//! Both channels end up in [`ManualControl`], which raises the display override
//! before touching the pixel so the render loop can never paint over a manual
//! color it has not seen yet.

pub mod broker;
pub mod wireless;

use log::info;
use rgb::RGB8;

use crate::indicator::Indicator;
use crate::state::{OverrideCell, BLACK};

pub use broker::{BrokerChannel, BrokerSession, MessageOutcome, SessionEvent};
pub use wireless::{AttError, Attribute, WirelessChannel};

/// Shared handle the command channels use to take over the indicator
#[derive(Clone)]
pub struct ManualControl {
    indicator: Indicator,
    display_override: OverrideCell,
}

impl ManualControl {
    pub fn new(indicator: Indicator, display_override: OverrideCell) -> Self {
        Self {
            indicator,
            display_override,
        }
    }

    /// Enter manual override and show `color`
    pub fn set_color(&self, source: &str, color: RGB8) {
        self.display_override.activate(color);
        self.indicator.show(color);
        info!(
            "commands::{}: color set to RGB({}, {}, {})",
            source, color.r, color.g, color.b
        );
    }

    pub fn turn_off(&self, source: &str) {
        self.display_override.activate(BLACK);
        self.indicator.show(BLACK);
        info!("commands::{}: indicator off", source);
    }

    /// Enter manual override keeping whatever the pixel shows right now
    pub fn hold(&self, source: &str) {
        let color = self.indicator.current();
        self.display_override.activate(color);
        info!(
            "commands::{}: holding RGB({}, {}, {})",
            source, color.r, color.g, color.b
        );
    }

    pub fn is_active(&self) -> bool {
        self.display_override.is_active()
    }

    pub fn current(&self) -> RGB8 {
        self.indicator.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::MemoryPixel;

    #[test]
    fn same_color_twice_is_the_same_as_once() {
        let once = ManualControl::new(Indicator::new(MemoryPixel::new()), OverrideCell::new());
        let twice = ManualControl::new(Indicator::new(MemoryPixel::new()), OverrideCell::new());

        let color = RGB8::new(10, 20, 30);
        once.set_color("test", color);
        twice.set_color("test", color);
        twice.set_color("test", color);

        assert_eq!(once.current(), twice.current());
        assert_eq!(once.is_active(), twice.is_active());
    }

    #[test]
    fn hold_keeps_the_current_pixel() {
        let indicator = Indicator::new(MemoryPixel::new());
        let display_override = OverrideCell::new();
        indicator.show(RGB8::new(0, 50, 0));

        let control = ManualControl::new(indicator, display_override.clone());
        control.hold("test");

        let snap = display_override.snapshot();
        assert!(snap.active);
        assert_eq!(snap.color, RGB8::new(0, 50, 0));
    }
}
