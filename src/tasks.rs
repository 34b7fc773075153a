//! Long-running loops and the event queue that feeds the connectivity owner.
//!
//! SDK callbacks never touch the connectivity state. They post an [`Event`]
//! through an [`EventSender`]; one thread owns the [`ConnectivityManager`] and
//! applies events in arrival order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::connectivity::{ConnectivityManager, ConnectivityRequest, NetServices, Radio, RadioEvent};
use crate::input::{ButtonTracker, InputSampler};
use crate::mode::{ModeActions, ModeSwitchController};
use crate::state::SelectedMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Radio(RadioEvent),
    Request(ConnectivityRequest),
    Shutdown,
}

/// Cloneable producer side of the event queue. Sends never block.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Returns false once the connectivity owner has gone away
    pub fn post(&self, event: Event) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("tasks: event queue closed, dropping {:?}", e.0);
                false
            }
        }
    }

    pub fn radio(&self, event: RadioEvent) -> bool {
        self.post(Event::Radio(event))
    }

    pub fn request(&self, request: ConnectivityRequest) -> bool {
        self.post(Event::Request(request))
    }
}

pub fn event_queue() -> (EventSender, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, rx)
}

/// Apply one event. Returns false when the loop should end.
pub fn dispatch<R: Radio, S: NetServices>(manager: &mut ConnectivityManager<R, S>, event: Event) -> bool {
    match event {
        Event::Radio(event) => manager.handle_event(event),
        Event::Request(request) => {
            if let Err(e) = manager.apply(request) {
                error!("tasks: {:?} request failed: {:#}", request, e);
            }
        }
        Event::Shutdown => {
            manager.stop();
            return false;
        }
    }
    true
}

/// Drain the queue until shutdown or until every sender is dropped
pub fn run_connectivity<R: Radio, S: NetServices>(
    mut manager: ConnectivityManager<R, S>,
    events: Receiver<Event>,
) {
    info!("tasks: connectivity loop started");
    while let Ok(event) = events.recv() {
        if !dispatch(&mut manager, event) {
            break;
        }
    }
    info!("tasks: connectivity loop finished in {}", manager.state());
}

/// Joystick polling: mode switching plus button edge logging
pub struct InputPoller<I, A> {
    sampler: I,
    controller: ModeSwitchController<A>,
    button: ButtonTracker,
    sample_failed: bool,
}

impl<I: InputSampler, A: ModeActions> InputPoller<I, A> {
    pub fn new(sampler: I, controller: ModeSwitchController<A>, button: ButtonTracker) -> Self {
        Self {
            sampler,
            controller,
            button,
            sample_failed: false,
        }
    }

    pub fn controller(&self) -> &ModeSwitchController<A> {
        &self.controller
    }

    pub fn poll(&mut self, now: Instant) -> Option<SelectedMode> {
        let sample = match self.sampler.sample() {
            Ok(sample) => {
                self.sample_failed = false;
                sample
            }
            Err(e) => {
                // Only report the first of a run of failures
                if !self.sample_failed {
                    error!("tasks: joystick read failed: {:#}", e);
                    self.sample_failed = true;
                }
                return None;
            }
        };

        self.button.update(sample.pressed, now);
        self.controller.poll_and_maybe_switch(sample.x, sample.y)
    }

    pub fn run(mut self, period: Duration) {
        info!("tasks: polling joystick every {:?}", period);
        loop {
            self.poll(Instant::now());
            thread::sleep(period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, NetworkConfig, TeardownPolicy};
    use crate::input::JoystickSample;
    use crate::mode::Thresholds;
    use crate::state::{cell, ConnectivityState, OverrideCell};
    use crate::testing::{CallLog, RecordingActions, RecordingRadio, RecordingServices};
    use std::collections::VecDeque;

    struct Script(VecDeque<anyhow::Result<JoystickSample>>);

    impl InputSampler for Script {
        fn sample(&mut self) -> anyhow::Result<JoystickSample> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Ok(JoystickSample { x: 2048, y: 2048, pressed: false }))
        }
    }

    #[test]
    fn connectivity_loop_applies_events_in_order() {
        let log = CallLog::default();
        let (writer, reader) = cell(ConnectivityState::Idle);
        let manager = ConnectivityManager::new(
            RecordingRadio::new(log.clone()),
            RecordingServices::new(log),
            writer,
            &NetworkConfig::default(),
        );
        let (events, rx) = event_queue();

        events.request(ConnectivityRequest::Station);
        events.radio(RadioEvent::StationStarted);
        events.radio(RadioEvent::AddressAssigned {
            ip: std::net::Ipv4Addr::new(10, 0, 0, 2),
        });
        events.radio(RadioEvent::ProbeSucceeded { check: 1 });
        drop(events);

        run_connectivity(manager, rx);
        assert_eq!(reader.get(), ConnectivityState::InternetVerified);
    }

    #[test]
    fn shutdown_stops_and_closes_the_queue() {
        let (writer, reader) = cell(ConnectivityState::Idle);
        let log = CallLog::default();
        let manager = ConnectivityManager::new(
            RecordingRadio::new(log.clone()),
            RecordingServices::new(log),
            writer,
            &NetworkConfig::default(),
        );
        let (events, rx) = event_queue();
        events.request(ConnectivityRequest::AccessPoint);
        events.radio(RadioEvent::AccessPointStarted);
        events.post(Event::Shutdown);

        let handle = thread::spawn(move || run_connectivity(manager, rx));
        handle.join().unwrap();

        assert_eq!(reader.get(), ConnectivityState::Idle);
        assert!(!events.radio(RadioEvent::AccessPointStarted));
    }

    #[test]
    fn poller_survives_sampler_errors() {
        let (writer, _) = cell(SelectedMode::None);
        let controller = ModeSwitchController::new(
            RecordingActions::new(CallLog::default()),
            writer,
            OverrideCell::new(),
            Thresholds::default(),
            TeardownPolicy::Exclusive,
        );
        let script = Script(VecDeque::from(vec![
            Err(anyhow::anyhow!("adc timeout")),
            Err(anyhow::anyhow!("adc timeout")),
            Ok(JoystickSample { x: 10, y: 2048, pressed: true }),
        ]));
        let mut poller = InputPoller::new(script, controller, ButtonTracker::from(&InputConfig::default()));

        let now = Instant::now();
        assert_eq!(poller.poll(now), None);
        assert_eq!(poller.poll(now), None);
        assert_eq!(poller.poll(now), Some(SelectedMode::AccessPoint));
        assert_eq!(poller.poll(now), None);
        assert_eq!(poller.controller().mode(), SelectedMode::AccessPoint);
    }
}
