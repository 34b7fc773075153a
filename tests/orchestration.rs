//! End-to-end behaviour of the orchestrator with recording collaborators.

use std::net::Ipv4Addr;
use std::sync::mpsc::Receiver;

use anyhow::Result;
use rgb::RGB8;

use status_orchestrator::prelude::*;
use status_orchestrator::testing::{CallLog, RecordingRadio, RecordingServices};

/// Mode actions that forward network requests into the event queue, the way
/// the firmware wires them
struct QueueActions {
    events: EventSender,
    broker_sessions: u32,
    wireless_sessions: u32,
}

impl ModeActions for QueueActions {
    fn start_access_point(&mut self) -> Result<()> {
        self.events.request(ConnectivityRequest::AccessPoint);
        Ok(())
    }

    fn start_station(&mut self) -> Result<()> {
        self.events.request(ConnectivityRequest::Station);
        Ok(())
    }

    fn stop_network(&mut self) -> Result<()> {
        self.events.request(ConnectivityRequest::Stop);
        Ok(())
    }

    fn start_broker(&mut self) -> Result<()> {
        self.broker_sessions += 1;
        Ok(())
    }

    fn stop_broker(&mut self) -> Result<()> {
        self.broker_sessions -= 1;
        Ok(())
    }

    fn start_wireless(&mut self) -> Result<()> {
        self.wireless_sessions += 1;
        Ok(())
    }

    fn stop_wireless(&mut self) -> Result<()> {
        self.wireless_sessions -= 1;
        Ok(())
    }
}

struct Rig {
    manager: ConnectivityManager<RecordingRadio, RecordingServices>,
    controller: ModeSwitchController<QueueActions>,
    display: DisplayArbitrator,
    broker: BrokerChannel,
    wireless: WirelessChannel,
    events: EventSender,
    queue: Receiver<Event>,
    pixel: MemoryPixel,
    display_override: OverrideCell,
}

impl Rig {
    fn new(policy: TeardownPolicy) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = Config::default();
        let log = CallLog::default();
        let (connectivity_writer, connectivity) = cell(ConnectivityState::Idle);
        let (mode_writer, _mode) = cell(SelectedMode::None);
        let display_override = OverrideCell::new();
        let pixel = MemoryPixel::new();
        let indicator = Indicator::new(pixel.clone());
        let control = ManualControl::new(indicator.clone(), display_override.clone());
        let (events, queue) = event_queue();

        Self {
            manager: ConnectivityManager::new(
                RecordingRadio::new(log.clone()),
                RecordingServices::new(log),
                connectivity_writer,
                &config.network,
            ),
            controller: ModeSwitchController::new(
                QueueActions {
                    events: events.clone(),
                    broker_sessions: 0,
                    wireless_sessions: 0,
                },
                mode_writer,
                display_override.clone(),
                Thresholds::from(&config.input),
                policy,
            ),
            display: DisplayArbitrator::new(connectivity, display_override.clone(), indicator),
            broker: BrokerChannel::new(control.clone(), &config.broker),
            wireless: WirelessChannel::new(control, &config.ble),
            events,
            queue,
            pixel,
            display_override,
        }
    }

    /// Apply everything queued so far on the connectivity owner
    fn settle(&mut self) {
        while let Ok(event) = self.queue.try_recv() {
            dispatch(&mut self.manager, event);
        }
    }

    fn radio(&mut self, event: RadioEvent) {
        self.events.radio(event);
        self.settle();
    }
}

#[test]
fn station_mode_reaches_internet_verified() {
    let mut rig = Rig::new(TeardownPolicy::Exclusive);

    assert_eq!(
        rig.controller.poll_and_maybe_switch(3001, 2048),
        Some(SelectedMode::Station)
    );
    rig.settle();
    assert_eq!(rig.manager.state(), ConnectivityState::StationConnecting);
    assert_eq!(rig.controller.actions().broker_sessions, 1);

    rig.radio(RadioEvent::StationStarted);
    rig.radio(RadioEvent::AddressAssigned {
        ip: Ipv4Addr::new(192, 168, 0, 7),
    });
    assert_eq!(
        rig.display.tick(),
        RenderOutcome::Rendered(RGB8::new(0, 50, 0))
    );
    assert_eq!(rig.display.tick(), RenderOutcome::Rendered(RGB8::new(0, 0, 0)));

    rig.radio(RadioEvent::ProbeSucceeded {
        check: rig.manager.current_check(),
    });
    assert_eq!(rig.manager.state(), ConnectivityState::InternetVerified);
    assert_eq!(
        rig.display.tick(),
        RenderOutcome::Rendered(RGB8::new(0, 50, 0))
    );
}

#[test]
fn sixth_disconnect_is_terminal_until_a_new_request() {
    let mut rig = Rig::new(TeardownPolicy::Exclusive);
    rig.controller.poll_and_maybe_switch(4095, 2048);
    rig.settle();
    rig.radio(RadioEvent::StationStarted);

    for _ in 0..5 {
        rig.radio(RadioEvent::StationDisconnected { reason: 201 });
        assert_eq!(rig.manager.state(), ConnectivityState::StationConnecting);
    }
    rig.radio(RadioEvent::StationDisconnected { reason: 201 });
    assert_eq!(rig.manager.state(), ConnectivityState::StationError);
    assert_eq!(rig.display.tick(), RenderOutcome::Rendered(RGB8::new(50, 0, 0)));

    // A late probe result cannot skip straight to verified
    rig.radio(RadioEvent::ProbeSucceeded {
        check: rig.manager.current_check(),
    });
    assert_eq!(rig.manager.state(), ConnectivityState::StationError);

    // Only a fresh station request recovers
    rig.controller.poll_and_maybe_switch(0, 2048);
    rig.controller.poll_and_maybe_switch(4095, 2048);
    rig.settle();
    assert_eq!(rig.manager.state(), ConnectivityState::StationConnecting);
    assert_eq!(rig.manager.retries(), 0);
}

#[test]
fn override_freezes_the_pixel_for_ten_ticks() {
    let mut rig = Rig::new(TeardownPolicy::Exclusive);
    rig.display.tick();

    rig.wireless.handle_write(0xBB01, &[10, 20, 30]).unwrap();
    assert_eq!(rig.wireless.handle_read(0xBB02), Ok(vec![1]));
    let writes = rig.pixel.writes();

    rig.controller.poll_and_maybe_switch(0, 2048);
    rig.settle();
    for i in 0..10 {
        match i {
            2 => rig.radio(RadioEvent::AccessPointStarted),
            5 => rig.radio(RadioEvent::StationAttached { mac: [1; 6] }),
            8 => rig.radio(RadioEvent::StationDetached { mac: [1; 6] }),
            _ => {}
        }
        assert_eq!(rig.display.tick(), RenderOutcome::Suppressed);
    }
    assert_eq!(rig.pixel.writes(), writes);
    assert_eq!(rig.pixel.last(), Some(RGB8::new(10, 20, 30)));
}

#[test]
fn broker_power_off_blacks_out_and_holds() {
    let mut rig = Rig::new(TeardownPolicy::Exclusive);
    rig.display.tick();

    assert_eq!(
        rig.broker.handle_message(None, br#"{"power": false}"#),
        MessageOutcome::Off
    );
    assert_eq!(rig.pixel.last(), Some(RGB8::new(0, 0, 0)));
    assert!(rig.display_override.is_active());
    assert_eq!(rig.display.tick(), RenderOutcome::Suppressed);
}

#[test]
fn entering_station_releases_the_override() {
    let mut rig = Rig::new(TeardownPolicy::Exclusive);
    rig.broker.handle_message(None, br#"{"color": [9, 9, 9]}"#);
    assert_eq!(rig.display.tick(), RenderOutcome::Suppressed);

    rig.controller.poll_and_maybe_switch(4095, 2048);
    rig.settle();
    assert!(!rig.display_override.is_active());
    assert_eq!(
        rig.display.tick(),
        RenderOutcome::Rendered(RGB8::new(50, 50, 0))
    );
}

#[test]
fn wireless_mode_stops_the_network_under_exclusive_policy() {
    let mut rig = Rig::new(TeardownPolicy::Exclusive);
    rig.controller.poll_and_maybe_switch(4095, 2048);
    rig.settle();
    rig.radio(RadioEvent::AddressAssigned {
        ip: Ipv4Addr::new(10, 1, 1, 1),
    });

    rig.controller.poll_and_maybe_switch(2048, 4095);
    rig.settle();
    assert_eq!(rig.manager.state(), ConnectivityState::Idle);
    assert_eq!(rig.controller.actions().broker_sessions, 0);
    assert_eq!(rig.controller.actions().wireless_sessions, 1);
}

#[test]
fn permissive_policy_leaves_the_network_up() {
    let mut rig = Rig::new(TeardownPolicy::Permissive);
    rig.controller.poll_and_maybe_switch(4095, 2048);
    rig.settle();
    rig.radio(RadioEvent::AddressAssigned {
        ip: Ipv4Addr::new(10, 1, 1, 1),
    });

    rig.controller.poll_and_maybe_switch(2048, 4095);
    rig.settle();
    assert_eq!(rig.manager.state(), ConnectivityState::StationAddressed);
    assert_eq!(rig.controller.actions().broker_sessions, 1);
    assert_eq!(rig.controller.actions().wireless_sessions, 1);
}

#[test]
fn boundary_readings_never_switch() {
    let mut rig = Rig::new(TeardownPolicy::Exclusive);
    for (x, y) in [(1000, 2048), (3000, 2048), (2048, 3000), (1000, 3000)] {
        assert_eq!(rig.controller.poll_and_maybe_switch(x, y), None);
    }
    assert_eq!(rig.controller.mode(), SelectedMode::None);
    rig.settle();
    assert_eq!(rig.manager.state(), ConnectivityState::Idle);
}
