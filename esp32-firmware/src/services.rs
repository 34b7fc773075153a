use std::net::Ipv4Addr;
use std::thread;

use anyhow::Result;
use embedded_svc::http::Method;
use embedded_svc::io::Write;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpServer};
use esp_idf_svc::ping::{Configuration as PingConfiguration, EspPing};
use esp_idf_svc::sntp::{EspSntp, OperatingMode, SntpConf};
use log::*;

use status_orchestrator::connectivity::{NetServices, RadioEvent};
use status_orchestrator::EventSender;

const PORTAL_PAGE: &str = "<h1>ESP32 Config</h1><p>Mode: AP/STA</p>";

/// SNTP, reachability probe and the access point's configuration page
pub struct EspNetServices {
    events: EventSender,
    sntp: Option<EspSntp<'static>>,
    portal: Option<EspHttpServer<'static>>,
}

impl EspNetServices {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            sntp: None,
            portal: None,
        }
    }
}

impl NetServices for EspNetServices {
    fn start_time_sync(&mut self, server: &str) -> Result<()> {
        // Only one SNTP client may exist
        self.sntp = None;

        let mut conf = SntpConf::default();
        conf.servers[0] = server;
        conf.operating_mode = OperatingMode::Poll;
        self.sntp = Some(EspSntp::new(&conf)?);

        info!("services::sntp: syncing with {}", server);
        Ok(())
    }

    fn stop_time_sync(&mut self) -> Result<()> {
        if self.sntp.take().is_some() {
            info!("services::sntp: stopped");
        }
        Ok(())
    }

    fn start_probe(&mut self, target: Ipv4Addr, count: u32, check: u32) -> Result<()> {
        let events = self.events.clone();

        thread::Builder::new()
            .name("probe".into())
            .stack_size(6 * 1024)
            .spawn(move || probe(target, count, check, events))?;
        Ok(())
    }

    fn start_portal(&mut self) -> Result<()> {
        let mut server = EspHttpServer::new(&HttpConfiguration::default())?;
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
            req.into_ok_response()?.write_all(PORTAL_PAGE.as_bytes())?;
            Ok(())
        })?;

        self.portal = Some(server);
        info!("services::http: portal listening on port 80");
        Ok(())
    }

    fn stop_portal(&mut self) -> Result<()> {
        if self.portal.take().is_some() {
            info!("services::http: portal stopped");
        }
        Ok(())
    }
}

/// One echo at a time so each reply can be reported as it arrives
fn probe(target: Ipv4Addr, count: u32, check: u32, events: EventSender) {
    let mut ping = EspPing::default();
    let conf = PingConfiguration {
        count: 1,
        ..Default::default()
    };

    let mut received = 0;
    for seq in 1..=count {
        match ping.ping(target, &conf) {
            Ok(summary) if summary.received > 0 => {
                received += 1;
                info!(
                    "services::ping: reply from {} seq={} time={}ms",
                    target,
                    seq,
                    summary.time.as_millis()
                );
                if !events.radio(RadioEvent::ProbeSucceeded { check }) {
                    return;
                }
            }
            Ok(_) => info!("services::ping: request to {} timed out, seq={}", target, seq),
            Err(e) => warn!("services::ping: echo to {} failed: {:?}", target, e),
        }
    }

    events.radio(RadioEvent::ProbeFinished {
        check,
        transmitted: count,
        received,
    });
}
