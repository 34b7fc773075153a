//! Recording collaborators for host tests.
//!
//! Every double appends to a shared [`CallLog`], so a test can assert on the
//! order calls were made across several collaborators.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use crate::commands::BrokerSession;
use crate::connectivity::{AccessPointSettings, NetServices, Radio, StationCredentials};
use crate::mode::ModeActions;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    // Radio
    StartStation(String),
    StartAccessPoint(String),
    Connect,
    StopRadio,
    // NetServices
    StartTimeSync(String),
    StopTimeSync,
    StartProbe(Ipv4Addr, u32, u32),
    StartPortal,
    StopPortal,
    // ModeActions
    EnterAccessPoint,
    EnterStation,
    StopNetwork,
    StartBroker,
    StopBroker,
    StartWireless,
    StopWireless,
    // BrokerSession
    Subscribe(String),
    Publish(String, Vec<u8>),
}

#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn push(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(
            &mut *self
                .calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|c| *c == call)
            .count()
    }
}

/// Makes the next `start_*` call fail once
#[derive(Default)]
struct FailOnce(AtomicBool);

impl FailOnce {
    fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<()> {
        if self.0.swap(false, Ordering::SeqCst) {
            bail!("{} failed", what);
        }
        Ok(())
    }
}

pub struct RecordingRadio {
    log: CallLog,
    fail: FailOnce,
}

impl RecordingRadio {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail: FailOnce::default(),
        }
    }

    pub fn fail_next_start(&self) {
        self.fail.arm();
    }
}

impl Radio for RecordingRadio {
    fn start_station(&mut self, credentials: &StationCredentials) -> Result<()> {
        self.fail.check("start_station")?;
        self.log.push(Call::StartStation(credentials.ssid.clone()));
        Ok(())
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<()> {
        self.fail.check("start_access_point")?;
        self.log.push(Call::StartAccessPoint(settings.ssid.clone()));
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        self.log.push(Call::Connect);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.log.push(Call::StopRadio);
        Ok(())
    }
}

pub struct RecordingServices {
    log: CallLog,
}

impl RecordingServices {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl NetServices for RecordingServices {
    fn start_time_sync(&mut self, server: &str) -> Result<()> {
        self.log.push(Call::StartTimeSync(server.to_string()));
        Ok(())
    }

    fn stop_time_sync(&mut self) -> Result<()> {
        self.log.push(Call::StopTimeSync);
        Ok(())
    }

    fn start_probe(&mut self, target: Ipv4Addr, count: u32, check: u32) -> Result<()> {
        self.log.push(Call::StartProbe(target, count, check));
        Ok(())
    }

    fn start_portal(&mut self) -> Result<()> {
        self.log.push(Call::StartPortal);
        Ok(())
    }

    fn stop_portal(&mut self) -> Result<()> {
        self.log.push(Call::StopPortal);
        Ok(())
    }
}

pub struct RecordingActions {
    log: CallLog,
    fail: FailOnce,
}

impl RecordingActions {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail: FailOnce::default(),
        }
    }

    pub fn fail_next_start(&self) {
        self.fail.arm();
    }

    fn start(&self, call: Call) -> Result<()> {
        self.log.push(call.clone());
        self.fail.check(&format!("{:?}", call))
    }
}

impl ModeActions for RecordingActions {
    fn start_access_point(&mut self) -> Result<()> {
        self.start(Call::EnterAccessPoint)
    }

    fn start_station(&mut self) -> Result<()> {
        self.start(Call::EnterStation)
    }

    fn stop_network(&mut self) -> Result<()> {
        self.log.push(Call::StopNetwork);
        Ok(())
    }

    fn start_broker(&mut self) -> Result<()> {
        self.start(Call::StartBroker)
    }

    fn stop_broker(&mut self) -> Result<()> {
        self.log.push(Call::StopBroker);
        Ok(())
    }

    fn start_wireless(&mut self) -> Result<()> {
        self.start(Call::StartWireless)
    }

    fn stop_wireless(&mut self) -> Result<()> {
        self.log.push(Call::StopWireless);
        Ok(())
    }
}

pub struct RecordingSession {
    log: CallLog,
}

impl RecordingSession {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl BrokerSession for RecordingSession {
    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.log.push(Call::Subscribe(topic.to_string()));
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.log.push(Call::Publish(topic.to_string(), payload.to_vec()));
        Ok(())
    }
}
