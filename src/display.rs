//! Automatic status rendering.
//!
//! Every tick the arbitrator either paints the pattern for the current
//! [`ConnectivityState`] or, while a manual override is active, leaves the pixel
//! alone.

use std::thread;
use std::time::Duration;

use log::{debug, info};
use rgb::RGB8;

use crate::indicator::Indicator;
use crate::state::{ConnectivityReader, ConnectivityState, OverrideCell, BLACK};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusPattern {
    Solid(RGB8),
    /// Alternates between the color and black on every tick
    Blink(RGB8),
}

pub fn pattern_for(state: ConnectivityState) -> StatusPattern {
    match state {
        ConnectivityState::Idle => StatusPattern::Solid(RGB8::new(20, 20, 20)),
        ConnectivityState::StationConnecting => StatusPattern::Solid(RGB8::new(50, 50, 0)),
        ConnectivityState::StationError => StatusPattern::Solid(RGB8::new(50, 0, 0)),
        ConnectivityState::StationAddressed => StatusPattern::Blink(RGB8::new(0, 50, 0)),
        ConnectivityState::InternetVerified => StatusPattern::Solid(RGB8::new(0, 50, 0)),
        ConnectivityState::AccessPointActive => StatusPattern::Blink(RGB8::new(0, 0, 50)),
        ConnectivityState::AccessPointConnected => StatusPattern::Solid(RGB8::new(0, 0, 50)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(RGB8),
    /// A manual override owns the pixel
    Suppressed,
}

pub struct DisplayArbitrator {
    state: ConnectivityReader,
    display_override: OverrideCell,
    indicator: Indicator,
    blink_on: bool,
    suppressed: bool,
}

impl DisplayArbitrator {
    pub fn new(state: ConnectivityReader, display_override: OverrideCell, indicator: Indicator) -> Self {
        Self {
            state,
            display_override,
            indicator,
            blink_on: false,
            suppressed: false,
        }
    }

    pub fn tick(&mut self) -> RenderOutcome {
        if self.display_override.is_active() {
            if !self.suppressed {
                debug!("display: manual override active, status rendering paused");
                self.suppressed = true;
            }
            return RenderOutcome::Suppressed;
        }
        if self.suppressed {
            debug!("display: override released, resuming status rendering");
            self.suppressed = false;
        }

        let (color, blink_on) = match pattern_for(self.state.get()) {
            StatusPattern::Solid(color) => (color, self.blink_on),
            StatusPattern::Blink(color) => {
                let blink_on = !self.blink_on;
                (if blink_on { color } else { BLACK }, blink_on)
            }
        };

        // A command may have taken the pixel since the check above
        let display_override = &self.display_override;
        if !self
            .indicator
            .show_unless(color, || display_override.is_active())
        {
            return RenderOutcome::Suppressed;
        }
        self.blink_on = blink_on;
        RenderOutcome::Rendered(color)
    }

    /// Render forever at `period`. Meant to own a dedicated thread.
    pub fn run(mut self, period: Duration) {
        info!("display: rendering every {:?}", period);
        loop {
            self.tick();
            thread::sleep(period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ManualControl;
    use crate::indicator::MemoryPixel;
    use crate::state::cell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn every_state_has_a_pattern() {
        for state in ConnectivityState::ALL {
            let blinks = matches!(pattern_for(state), StatusPattern::Blink(_));
            let expected = matches!(
                state,
                ConnectivityState::StationAddressed | ConnectivityState::AccessPointActive
            );
            assert_eq!(blinks, expected, "{}", state);
        }
        assert_eq!(
            pattern_for(ConnectivityState::StationError),
            StatusPattern::Solid(RGB8::new(50, 0, 0))
        );
    }

    #[test]
    fn blink_alternates_across_ticks() {
        let (mut writer, reader) = cell(ConnectivityState::Idle);
        let pixel = MemoryPixel::new();
        let mut display =
            DisplayArbitrator::new(reader, OverrideCell::new(), Indicator::new(pixel.clone()));

        assert_eq!(display.tick(), RenderOutcome::Rendered(RGB8::new(20, 20, 20)));

        writer.set(ConnectivityState::AccessPointActive);
        let blue = RGB8::new(0, 0, 50);
        assert_eq!(display.tick(), RenderOutcome::Rendered(blue));
        assert_eq!(display.tick(), RenderOutcome::Rendered(BLACK));
        assert_eq!(display.tick(), RenderOutcome::Rendered(blue));
        assert_eq!(pixel.writes(), 4);
    }

    #[test]
    fn override_suppresses_rendering() {
        let (mut writer, reader) = cell(ConnectivityState::StationConnecting);
        let pixel = MemoryPixel::new();
        let indicator = Indicator::new(pixel.clone());
        let display_override = OverrideCell::new();
        let mut display = DisplayArbitrator::new(reader, display_override.clone(), indicator.clone());

        display_override.activate(RGB8::new(1, 2, 3));
        indicator.show(RGB8::new(1, 2, 3));

        for state in ConnectivityState::ALL.iter().cycle().take(10) {
            writer.set(*state);
            assert_eq!(display.tick(), RenderOutcome::Suppressed);
        }
        assert_eq!(pixel.history(), vec![RGB8::new(1, 2, 3)]);

        display_override.deactivate();
        writer.set(ConnectivityState::InternetVerified);
        assert_eq!(display.tick(), RenderOutcome::Rendered(RGB8::new(0, 50, 0)));
    }

    #[test]
    fn manual_color_survives_a_concurrent_render() {
        let manual = RGB8::new(10, 20, 30);

        for _ in 0..500 {
            let (_writer, reader) = cell(ConnectivityState::Idle);
            let pixel = MemoryPixel::new();
            let indicator = Indicator::new(pixel.clone());
            let display_override = OverrideCell::new();
            let control = ManualControl::new(indicator.clone(), display_override.clone());
            let mut display = DisplayArbitrator::new(reader, display_override, indicator);

            let running = Arc::new(AtomicBool::new(true));
            let render = {
                let running = running.clone();
                thread::spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        display.tick();
                    }
                })
            };

            control.set_color("test", manual);
            running.store(false, Ordering::SeqCst);
            render.join().unwrap();

            assert!(control.is_active());
            assert_eq!(pixel.last(), Some(manual));
        }
    }
}
