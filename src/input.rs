use std::time::{Duration, Instant};

use anyhow::Result;
use log::info;

use crate::config::InputConfig;

/// One reading of the joystick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoystickSample {
    pub x: u16,
    pub y: u16,
    pub pressed: bool,
}

/// Source of joystick readings, implemented by the ADC driver on the device
pub trait InputSampler: Send {
    fn sample(&mut self) -> Result<JoystickSample>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
    Released { held: Duration, long: bool },
    /// A short press that began within the double click window of the
    /// previous short release. Reported in place of its `Released`.
    DoubleClick { held: Duration },
}

/// Edge detector for the joystick push switch
pub struct ButtonTracker {
    long_press: Duration,
    double_click: Duration,
    pressed_at: Option<Instant>,
    last_click: Option<Instant>,
}

impl ButtonTracker {
    pub fn new(long_press: Duration, double_click: Duration) -> Self {
        Self {
            long_press,
            double_click,
            pressed_at: None,
            last_click: None,
        }
    }

    pub fn update(&mut self, pressed: bool, now: Instant) -> Option<ButtonEvent> {
        match (self.pressed_at, pressed) {
            (None, true) => {
                self.pressed_at = Some(now);
                info!("input: button pressed");
                Some(ButtonEvent::Pressed)
            }
            (Some(since), false) => {
                self.pressed_at = None;
                let held = now.saturating_duration_since(since);
                let long = held >= self.long_press;

                let follows_click = self
                    .last_click
                    .take()
                    .is_some_and(|last| since.saturating_duration_since(last) <= self.double_click);
                if !long && follows_click {
                    info!("input: double click");
                    return Some(ButtonEvent::DoubleClick { held });
                }
                if !long {
                    self.last_click = Some(now);
                }

                info!(
                    "input: button released after {} ms ({} press)",
                    held.as_millis(),
                    if long { "long" } else { "short" }
                );
                Some(ButtonEvent::Released { held, long })
            }
            _ => None,
        }
    }
}

impl From<&InputConfig> for ButtonTracker {
    fn from(config: &InputConfig) -> Self {
        Self::new(
            Duration::from_millis(config.long_press_ms),
            Duration::from_millis(config.double_click_ms),
        )
    }
}
