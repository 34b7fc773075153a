use std::sync::Arc;

use anyhow::{bail, Result};

use status_orchestrator::commands::BrokerChannel;
use status_orchestrator::config::BrokerConfig;
use status_orchestrator::connectivity::ConnectivityRequest;
use status_orchestrator::mode::ModeActions;
use status_orchestrator::EventSender;

use crate::ble::BleService;
use crate::diagnostics;
use crate::mqtt::BrokerHandle;

/// Mode switch side effects on the device.
///
/// Network changes are queued for the connectivity task, which owns the
/// radio. Broker and BLE sessions are started and stopped in place.
pub struct DeviceActions {
    events: EventSender,
    broker_channel: Arc<BrokerChannel>,
    broker_config: BrokerConfig,
    broker: Option<BrokerHandle>,
    ble: BleService,
}

impl DeviceActions {
    pub fn new(
        events: EventSender,
        broker_channel: Arc<BrokerChannel>,
        broker_config: BrokerConfig,
        ble: BleService,
    ) -> Self {
        Self {
            events,
            broker_channel,
            broker_config,
            broker: None,
            ble,
        }
    }

    fn request(&self, request: ConnectivityRequest) -> Result<()> {
        if !self.events.request(request) {
            bail!("connectivity task is not running");
        }
        Ok(())
    }
}

impl ModeActions for DeviceActions {
    fn start_access_point(&mut self) -> Result<()> {
        self.request(ConnectivityRequest::AccessPoint)
    }

    fn start_station(&mut self) -> Result<()> {
        self.request(ConnectivityRequest::Station)
    }

    fn stop_network(&mut self) -> Result<()> {
        self.request(ConnectivityRequest::Stop)
    }

    fn start_broker(&mut self) -> Result<()> {
        if let Some(previous) = self.broker.take() {
            previous.close();
        }
        self.broker = Some(BrokerHandle::start(
            &self.broker_config,
            self.broker_channel.clone(),
        )?);
        diagnostics::print_memory_summary("broker session");
        Ok(())
    }

    fn stop_broker(&mut self) -> Result<()> {
        if let Some(broker) = self.broker.take() {
            broker.close();
        }
        Ok(())
    }

    fn start_wireless(&mut self) -> Result<()> {
        self.ble.start()?;
        diagnostics::print_memory_summary("ble advertising");
        Ok(())
    }

    fn stop_wireless(&mut self) -> Result<()> {
        self.ble.stop()
    }
}
