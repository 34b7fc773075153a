//! Network lifecycle state machine.
//!
//! [`ConnectivityManager`] is the only writer of [`ConnectivityState`]. It is
//! owned by one thread which feeds it [`RadioEvent`]s posted from the radio and
//! IP callbacks, along with [`ConnectivityRequest`]s from the mode controller.
//! The radio and the dependent network services are reached through the
//! [`Radio`] and [`NetServices`] traits, so the machine runs the same on the
//! device and on the host.

mod reason;

use std::fmt;
use std::net::Ipv4Addr;

use anyhow::Result;
use log::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::state::{ConnectivityReader, ConnectivityState, ConnectivityWriter};

pub use reason::disconnect_reason_name;

/// Radio bring-up, implemented by the platform WiFi driver
pub trait Radio: Send {
    /// Configure station credentials and start the radio in station mode.
    /// Completion is reported with [`RadioEvent::StationStarted`].
    fn start_station(&mut self, credentials: &StationCredentials) -> Result<()>;
    /// Configure and start broadcasting the access point.
    /// Completion is reported with [`RadioEvent::AccessPointStarted`].
    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<()>;
    /// Issue one association attempt with the configured network
    fn connect(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Services that run on top of a working network
pub trait NetServices: Send {
    /// Start periodic time synchronisation. Fire-and-forget.
    fn start_time_sync(&mut self, server: &str) -> Result<()>;
    fn stop_time_sync(&mut self) -> Result<()>;
    /// Start one reachability probe of `count` echoes. The outcome is reported
    /// with [`RadioEvent::ProbeSucceeded`] and [`RadioEvent::ProbeFinished`],
    /// both tagged with `check`.
    fn start_probe(&mut self, target: Ipv4Addr, count: u32, check: u32) -> Result<()>;
    /// Start the local configuration web endpoint
    fn start_portal(&mut self) -> Result<()>;
    fn stop_portal(&mut self) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub password: String,
    pub max_connections: u8,
}

impl AccessPointSettings {
    /// An empty password means an open network
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

/// Radio and IP notifications, posted from SDK callbacks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    StationStarted,
    StationDisconnected { reason: u8 },
    AddressAssigned { ip: Ipv4Addr },
    /// One probe echo came back. `check` names the probe that sent it.
    ProbeSucceeded { check: u32 },
    ProbeFinished {
        check: u32,
        transmitted: u32,
        received: u32,
    },
    AccessPointStarted,
    StationAttached { mac: [u8; 6] },
    StationDetached { mac: [u8; 6] },
}

/// Mode changes asked of the connectivity owner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityRequest {
    Station,
    AccessPoint,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Session {
    None,
    Station,
    AccessPoint,
}

/// Whether `from -> to` is a legal transition.
///
/// Moving to `Idle` is always legal since every mode request begins with a stop.
pub fn is_allowed(from: ConnectivityState, to: ConnectivityState) -> bool {
    use ConnectivityState::*;

    match (from, to) {
        (_, Idle) => true,
        (Idle, StationConnecting) | (Idle, AccessPointActive) => true,
        (StationConnecting, StationConnecting)
        | (StationConnecting, StationAddressed)
        | (StationConnecting, StationError) => true,
        (StationAddressed, InternetVerified) => true,
        (AccessPointActive, AccessPointConnected) | (AccessPointConnected, AccessPointActive) => {
            true
        }
        _ => false,
    }
}

pub struct ConnectivityManager<R, S> {
    radio: R,
    services: S,
    state: ConnectivityWriter,
    station: StationCredentials,
    access_point: AccessPointSettings,
    max_retry: u32,
    probe_target: Ipv4Addr,
    probe_count: u32,
    /// Tag of the most recent probe; results for any other are stale
    check: u32,
    sntp_server: String,
    session: Session,
    retries: u32,
    radio_active: bool,
    time_sync_running: bool,
    portal_running: bool,
}

impl<R: Radio, S: NetServices> ConnectivityManager<R, S> {
    pub fn new(radio: R, services: S, state: ConnectivityWriter, config: &NetworkConfig) -> Self {
        Self {
            radio,
            services,
            state,
            station: StationCredentials {
                ssid: config.station_ssid.clone(),
                password: config.station_password.clone(),
            },
            access_point: AccessPointSettings {
                ssid: config.ap_ssid.clone(),
                password: config.ap_password.clone(),
                max_connections: config.ap_max_connections,
            },
            max_retry: config.max_retry,
            probe_target: config.probe_target,
            probe_count: config.probe_count,
            check: 0,
            sntp_server: config.sntp_server.clone(),
            session: Session::None,
            retries: 0,
            radio_active: false,
            time_sync_running: false,
            portal_running: false,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state.get()
    }

    pub fn reader(&self) -> ConnectivityReader {
        self.state.reader()
    }

    /// Association retries used in the current station session
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Tag of the most recently started probe, 0 before the first
    pub fn current_check(&self) -> u32 {
        self.check
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn apply(&mut self, request: ConnectivityRequest) -> Result<()> {
        match request {
            ConnectivityRequest::Station => self.request_station_mode(),
            ConnectivityRequest::AccessPoint => self.request_access_point_mode(),
            ConnectivityRequest::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    /// Tear down whatever is running and start associating with the configured
    /// network. On a radio error the machine is left `Idle`.
    pub fn request_station_mode(&mut self) -> Result<()> {
        self.stop();

        info!(
            "connectivity: starting station mode for '{}'",
            self.station.ssid
        );
        self.radio_active = true;
        self.radio.start_station(&self.station)?;

        self.session = Session::Station;
        self.retries = 0;
        self.transition(ConnectivityState::StationConnecting);
        Ok(())
    }

    /// Tear down whatever is running and start broadcasting the access point.
    /// The state moves once the radio reports the AP is up.
    pub fn request_access_point_mode(&mut self) -> Result<()> {
        self.stop();

        info!(
            "connectivity: starting access point '{}' ({}, max {} clients)",
            self.access_point.ssid,
            if self.access_point.is_open() {
                "open"
            } else {
                "WPA2"
            },
            self.access_point.max_connections
        );
        self.radio_active = true;
        self.radio.start_access_point(&self.access_point)?;

        self.session = Session::AccessPoint;
        Ok(())
    }

    /// Halt the radio and every dependent service. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.portal_running {
            if let Err(e) = self.services.stop_portal() {
                warn!("connectivity: failed to stop config portal: {:#}", e);
            }
            self.portal_running = false;
        }
        if self.time_sync_running {
            if let Err(e) = self.services.stop_time_sync() {
                warn!("connectivity: failed to stop time sync: {:#}", e);
            }
            self.time_sync_running = false;
        }
        if self.radio_active {
            info!("connectivity: stopping radio");
            if let Err(e) = self.radio.stop() {
                warn!("connectivity: failed to stop radio: {:#}", e);
            }
            self.radio_active = false;
        }

        self.session = Session::None;
        self.retries = 0;
        if self.state.get() != ConnectivityState::Idle {
            self.transition(ConnectivityState::Idle);
        }
    }

    pub fn handle_event(&mut self, event: RadioEvent) {
        let state = self.state.get();
        debug!("connectivity: {:?} in {}", event, state);

        match event {
            RadioEvent::StationStarted => {
                if self.session == Session::Station && state == ConnectivityState::StationConnecting
                {
                    self.attempt_connect();
                } else {
                    self.ignored(event, state);
                }
            }
            RadioEvent::StationDisconnected { reason } => {
                self.on_station_disconnected(reason, state)
            }
            RadioEvent::AddressAssigned { ip } => self.on_address_assigned(ip, state),
            RadioEvent::ProbeSucceeded { check } | RadioEvent::ProbeFinished { check, .. }
                if check != self.check =>
            {
                debug!(
                    "connectivity: dropping result of probe {}, current is {}",
                    check, self.check
                );
            }
            RadioEvent::ProbeSucceeded { .. } => match state {
                ConnectivityState::StationAddressed => {
                    info!("connectivity: internet reachable");
                    self.transition(ConnectivityState::InternetVerified);
                }
                // Later echoes of the same probe
                ConnectivityState::InternetVerified => {}
                _ => self.ignored(event, state),
            },
            RadioEvent::ProbeFinished {
                transmitted,
                received,
                ..
            } => {
                if received == 0 {
                    warn!(
                        "connectivity: probe of {} failed, {} sent, none answered",
                        self.probe_target, transmitted
                    );
                } else {
                    info!(
                        "connectivity: probe of {} finished, {}/{} answered",
                        self.probe_target, received, transmitted
                    );
                }
            }
            RadioEvent::AccessPointStarted => {
                if self.session == Session::AccessPoint && state == ConnectivityState::Idle {
                    self.transition(ConnectivityState::AccessPointActive);
                    self.start_portal();
                } else {
                    self.ignored(event, state);
                }
            }
            RadioEvent::StationAttached { mac } => {
                info!("connectivity: client {} joined the access point", Mac(mac));
                match state {
                    ConnectivityState::AccessPointActive => {
                        self.transition(ConnectivityState::AccessPointConnected);
                    }
                    ConnectivityState::AccessPointConnected => {}
                    _ => self.ignored(event, state),
                }
            }
            RadioEvent::StationDetached { mac } => {
                info!("connectivity: client {} left the access point", Mac(mac));
                match state {
                    ConnectivityState::AccessPointConnected => {
                        self.transition(ConnectivityState::AccessPointActive);
                    }
                    ConnectivityState::AccessPointActive => {}
                    _ => self.ignored(event, state),
                }
            }
        }
    }

    fn on_station_disconnected(&mut self, reason: u8, state: ConnectivityState) {
        match state {
            ConnectivityState::StationConnecting => {
                if self.retries < self.max_retry {
                    self.retries += 1;
                    info!(
                        "connectivity: disconnected ({} {}), retry {}/{}",
                        reason,
                        disconnect_reason_name(reason),
                        self.retries,
                        self.max_retry
                    );
                    self.attempt_connect();
                    self.transition(ConnectivityState::StationConnecting);
                } else {
                    error!(
                        "connectivity: connection failed after {} retries ({} {})",
                        self.max_retry,
                        reason,
                        disconnect_reason_name(reason)
                    );
                    self.transition(ConnectivityState::StationError);
                }
            }
            // Link dropped after addressing: retry within the same budget, the
            // state only moves again on a fresh address or a new mode request
            ConnectivityState::StationAddressed | ConnectivityState::InternetVerified => {
                warn!(
                    "connectivity: link lost while {} ({} {})",
                    state,
                    reason,
                    disconnect_reason_name(reason)
                );
                if self.retries < self.max_retry {
                    self.retries += 1;
                    self.attempt_connect();
                }
            }
            _ => debug!(
                "connectivity: disconnect ({} {}) ignored in {}",
                reason,
                disconnect_reason_name(reason),
                state
            ),
        }
    }

    fn on_address_assigned(&mut self, ip: Ipv4Addr, state: ConnectivityState) {
        match state {
            ConnectivityState::StationConnecting => {
                info!("connectivity: got address {}", ip);
                self.retries = 0;
                self.transition(ConnectivityState::StationAddressed);
                self.start_time_sync();
                self.start_probe();
            }
            ConnectivityState::StationAddressed | ConnectivityState::InternetVerified => {
                info!("connectivity: address renewed as {}", ip);
                self.retries = 0;
            }
            _ => self.ignored(RadioEvent::AddressAssigned { ip }, state),
        }
    }

    fn attempt_connect(&mut self) {
        if let Err(e) = self.radio.connect() {
            error!("connectivity: connect attempt failed: {:#}", e);
        }
    }

    fn start_time_sync(&mut self) {
        if self.time_sync_running {
            return;
        }
        match self.services.start_time_sync(&self.sntp_server) {
            Ok(()) => self.time_sync_running = true,
            Err(e) => warn!("connectivity: time sync unavailable: {:#}", e),
        }
    }

    fn start_probe(&mut self) {
        self.check = self.check.wrapping_add(1);
        info!(
            "connectivity: probe {} of {} with {} echoes",
            self.check, self.probe_target, self.probe_count
        );
        if let Err(e) = self
            .services
            .start_probe(self.probe_target, self.probe_count, self.check)
        {
            warn!("connectivity: could not start probe: {:#}", e);
        }
    }

    fn start_portal(&mut self) {
        match self.services.start_portal() {
            Ok(()) => self.portal_running = true,
            Err(e) => error!("connectivity: config portal failed to start: {:#}", e),
        }
    }

    fn transition(&mut self, to: ConnectivityState) -> bool {
        let from = self.state.get();
        if !is_allowed(from, to) {
            warn!("connectivity: refusing transition {} -> {}", from, to);
            return false;
        }
        if from != to {
            info!("connectivity: {} -> {}", from, to);
        }
        self.state.set(to);
        true
    }

    fn ignored(&self, event: RadioEvent, state: ConnectivityState) {
        warn!("connectivity: ignoring {:?} in {}", event, state);
    }
}

struct Mac([u8; 6]);

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}
