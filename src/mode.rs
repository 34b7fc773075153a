//! Joystick driven mode selection.
//!
//! The controller is the only writer of [`SelectedMode`]. It looks at one
//! sample per poll and performs at most one transition, checking the access
//! point, station and wireless command conditions in that order.

use anyhow::Result;
use log::{error, info, warn};

use crate::config::{InputConfig, TeardownPolicy};
use crate::state::{ModeReader, ModeWriter, OverrideCell, SelectedMode};

/// Start and stop hooks for the subsystems each mode owns
pub trait ModeActions {
    fn start_access_point(&mut self) -> Result<()>;
    fn start_station(&mut self) -> Result<()>;
    /// Stop whichever network mode is running
    fn stop_network(&mut self) -> Result<()>;
    fn start_broker(&mut self) -> Result<()>;
    fn stop_broker(&mut self) -> Result<()>;
    fn start_wireless(&mut self) -> Result<()>;
    fn stop_wireless(&mut self) -> Result<()>;
}

/// Raw ADC thresholds. Comparisons are strict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub low: u16,
    pub high: u16,
}

impl From<&InputConfig> for Thresholds {
    fn from(config: &InputConfig) -> Self {
        Self {
            low: config.low_threshold,
            high: config.high_threshold,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&InputConfig::default())
    }
}

/// The mode a sample asks for, if it differs from `current`
pub fn decide(x: u16, y: u16, current: SelectedMode, thresholds: Thresholds) -> Option<SelectedMode> {
    if x < thresholds.low && current != SelectedMode::AccessPoint {
        Some(SelectedMode::AccessPoint)
    } else if x > thresholds.high && current != SelectedMode::Station {
        Some(SelectedMode::Station)
    } else if y > thresholds.high && current != SelectedMode::WirelessCommand {
        Some(SelectedMode::WirelessCommand)
    } else {
        None
    }
}

pub struct ModeSwitchController<A> {
    actions: A,
    mode: ModeWriter,
    display_override: OverrideCell,
    thresholds: Thresholds,
    policy: TeardownPolicy,
    network_active: bool,
    broker_active: bool,
    wireless_active: bool,
}

impl<A: ModeActions> ModeSwitchController<A> {
    pub fn new(
        actions: A,
        mode: ModeWriter,
        display_override: OverrideCell,
        thresholds: Thresholds,
        policy: TeardownPolicy,
    ) -> Self {
        Self {
            actions,
            mode,
            display_override,
            thresholds,
            policy,
            network_active: false,
            broker_active: false,
            wireless_active: false,
        }
    }

    pub fn mode(&self) -> SelectedMode {
        self.mode.get()
    }

    pub fn reader(&self) -> ModeReader {
        self.mode.reader()
    }

    pub fn actions(&self) -> &A {
        &self.actions
    }

    /// Switch modes if the sample calls for it. Returns the mode entered.
    pub fn poll_and_maybe_switch(&mut self, x: u16, y: u16) -> Option<SelectedMode> {
        let current = self.mode.get();
        let next = decide(x, y, current, self.thresholds)?;

        info!("mode: {} -> {} (x={}, y={})", current, next, x, y);
        self.leave(next);
        self.mode.set(next);
        self.enter(next);
        Some(next)
    }

    fn leave(&mut self, next: SelectedMode) {
        let stop_broker = self.broker_active && next != SelectedMode::Station;
        let stop_wireless = self.wireless_active && next != SelectedMode::WirelessCommand;
        // Network modes replace each other through the connectivity manager
        let stop_network = self.network_active && next == SelectedMode::WirelessCommand;

        match self.policy {
            TeardownPolicy::Exclusive => {
                if stop_broker {
                    log_failure("stop broker session", self.actions.stop_broker());
                    self.broker_active = false;
                }
                if stop_wireless {
                    log_failure("stop wireless service", self.actions.stop_wireless());
                    self.wireless_active = false;
                }
                if stop_network {
                    log_failure("stop network", self.actions.stop_network());
                    self.network_active = false;
                }
            }
            TeardownPolicy::Permissive => {
                if stop_broker {
                    warn!("mode: broker session left running into {}", next);
                }
                if stop_wireless {
                    warn!("mode: wireless service left running into {}", next);
                }
                if stop_network {
                    warn!("mode: network left running into {}", next);
                }
            }
        }
    }

    fn enter(&mut self, mode: SelectedMode) {
        match mode {
            SelectedMode::AccessPoint => {
                log_failure("start access point", self.actions.start_access_point());
                self.network_active = true;
            }
            SelectedMode::Station => {
                self.display_override.deactivate();
                log_failure("start station", self.actions.start_station());
                self.network_active = true;
                if !self.broker_active {
                    let started = self.actions.start_broker();
                    self.broker_active = started.is_ok();
                    log_failure("start broker session", started);
                }
            }
            SelectedMode::WirelessCommand => {
                if !self.wireless_active {
                    let started = self.actions.start_wireless();
                    self.wireless_active = started.is_ok();
                    log_failure("start wireless service", started);
                }
            }
            SelectedMode::None => {}
        }
    }
}

fn log_failure(what: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("mode: failed to {}: {:#}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::cell;
    use crate::testing::{Call, CallLog, RecordingActions};
    use rgb::RGB8;

    fn controller(policy: TeardownPolicy) -> (ModeSwitchController<RecordingActions>, CallLog, OverrideCell) {
        let log = CallLog::default();
        let (writer, _reader) = cell(SelectedMode::None);
        let display_override = OverrideCell::new();
        let controller = ModeSwitchController::new(
            RecordingActions::new(log.clone()),
            writer,
            display_override.clone(),
            Thresholds::default(),
            policy,
        );
        (controller, log, display_override)
    }

    #[test]
    fn thresholds_are_strict() {
        let t = Thresholds::default();
        assert_eq!(decide(1000, 2000, SelectedMode::None, t), None);
        assert_eq!(decide(3000, 3000, SelectedMode::None, t), None);
        assert_eq!(decide(999, 2000, SelectedMode::None, t), Some(SelectedMode::AccessPoint));
        assert_eq!(decide(3001, 2000, SelectedMode::None, t), Some(SelectedMode::Station));
        assert_eq!(decide(2000, 3001, SelectedMode::None, t), Some(SelectedMode::WirelessCommand));
    }

    #[test]
    fn first_matching_condition_wins() {
        let t = Thresholds::default();
        // x low and y high: access point is checked first
        assert_eq!(decide(0, 4095, SelectedMode::None, t), Some(SelectedMode::AccessPoint));
        // Already in access point, so the y condition gets its turn
        assert_eq!(
            decide(0, 4095, SelectedMode::AccessPoint, t),
            Some(SelectedMode::WirelessCommand)
        );
        assert_eq!(decide(4095, 4095, SelectedMode::Station, t), Some(SelectedMode::WirelessCommand));
        assert_eq!(decide(4095, 0, SelectedMode::Station, t), None);
    }

    #[test]
    fn one_transition_per_poll() {
        let (mut c, _log, _) = controller(TeardownPolicy::Exclusive);
        assert_eq!(c.poll_and_maybe_switch(0, 4095), Some(SelectedMode::AccessPoint));
        assert_eq!(c.mode(), SelectedMode::AccessPoint);
        assert_eq!(c.poll_and_maybe_switch(0, 4095), Some(SelectedMode::WirelessCommand));
        // Alternates while the stick is held in the corner
        assert_eq!(c.poll_and_maybe_switch(0, 4095), Some(SelectedMode::AccessPoint));
        assert_eq!(c.poll_and_maybe_switch(2048, 2048), None);
    }

    #[test]
    fn station_resets_override_and_starts_broker() {
        let (mut c, log, display_override) = controller(TeardownPolicy::Exclusive);
        display_override.activate(RGB8::new(9, 9, 9));

        c.poll_and_maybe_switch(4095, 2048);
        assert!(!display_override.is_active());
        assert_eq!(log.take(), vec![Call::EnterStation, Call::StartBroker]);
    }

    #[test]
    fn exclusive_policy_tears_down_previous_mode() {
        let (mut c, log, _) = controller(TeardownPolicy::Exclusive);
        c.poll_and_maybe_switch(4095, 2048);
        log.take();

        c.poll_and_maybe_switch(2048, 4095);
        assert_eq!(
            log.take(),
            vec![Call::StopBroker, Call::StopNetwork, Call::StartWireless]
        );

        c.poll_and_maybe_switch(0, 2048);
        assert_eq!(log.take(), vec![Call::StopWireless, Call::EnterAccessPoint]);
    }

    #[test]
    fn permissive_policy_keeps_sessions_without_duplicates() {
        let (mut c, log, _) = controller(TeardownPolicy::Permissive);
        c.poll_and_maybe_switch(2048, 4095);
        c.poll_and_maybe_switch(4095, 2048);
        c.poll_and_maybe_switch(0, 2048);
        c.poll_and_maybe_switch(4095, 2048);
        c.poll_and_maybe_switch(2048, 4095);

        assert_eq!(
            log.take(),
            vec![
                Call::StartWireless,
                Call::EnterStation,
                Call::StartBroker,
                Call::EnterAccessPoint,
                Call::EnterStation,
            ]
        );
        assert_eq!(c.mode(), SelectedMode::WirelessCommand);
    }

    #[test]
    fn failed_start_is_retried_on_next_entry() {
        let (mut c, log, _) = controller(TeardownPolicy::Exclusive);
        c.actions().fail_next_start();
        c.poll_and_maybe_switch(2048, 4095);
        assert_eq!(c.mode(), SelectedMode::WirelessCommand);

        c.poll_and_maybe_switch(0, 2048);
        c.poll_and_maybe_switch(2048, 4095);
        assert_eq!(
            log.take(),
            vec![
                Call::StartWireless,
                Call::EnterAccessPoint,
                Call::StopNetwork,
                Call::StartWireless,
            ]
        );
    }
}
