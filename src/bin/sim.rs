//! Host simulation of the status orchestrator.
//!
//! Radio, network services, joystick and pixel are simulated; everything else
//! is the real library code. A fixed script moves the joystick through station,
//! wireless command and access point modes while simulated peers send commands.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use common::protocol;
use status_orchestrator::prelude::*;

const SCRIPT_LENGTH: Duration = Duration::from_secs(20);

/// Joystick position from this many milliseconds into the run
const JOYSTICK_SCRIPT: &[(u64, u16, u16, bool)] = &[
    (0, 2048, 2048, false),
    (1_000, 4095, 2048, false),
    (1_500, 2048, 2048, false),
    (9_000, 2048, 4095, false),
    (9_500, 2048, 2048, false),
    (12_000, 0, 2048, false),
    (12_500, 2048, 2048, false),
    (17_000, 2048, 2048, true),
    (18_200, 2048, 2048, false),
];

/// Broker messages, delays relative to the previous one
const BROKER_SCRIPT: &[(u64, &[u8])] = &[
    (1_500, br#"{"color": [0, 0, 255]}"#),
    (2_000, br#"{"power": false}"#),
    (1_000, b"{\"color\": [1, 2"),
];

/// Command characteristic writes, delays relative to the previous one
const WIRELESS_SCRIPT: &[(u64, &[u8])] = &[(1_000, &[255, 128, 0]), (700, &[1, 2]), (700, &[0])];

/// Station connect attempts that fail before the network accepts us
const FAILED_CONNECTS: u32 = 2;

fn post_after(runtime: &Handle, events: &EventSender, delay: Duration, event: RadioEvent) {
    let events = events.clone();
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        events.radio(event);
    });
}

/// Logs only when the color changes
#[derive(Default)]
struct LoggingPixel {
    last: Option<rgb::RGB8>,
}

impl PixelSink for LoggingPixel {
    fn show(&mut self, color: rgb::RGB8) -> Result<()> {
        if self.last != Some(color) {
            info!("sim::pixel: RGB({}, {}, {})", color.r, color.g, color.b);
            self.last = Some(color);
        }
        Ok(())
    }
}

struct SimRadio {
    events: EventSender,
    runtime: Handle,
    failures_left: u32,
}

impl Radio for SimRadio {
    fn start_station(&mut self, credentials: &StationCredentials) -> Result<()> {
        info!("sim::radio: station mode, joining '{}'", credentials.ssid);
        self.failures_left = FAILED_CONNECTS;
        post_after(&self.runtime, &self.events, Duration::from_millis(100), RadioEvent::StationStarted);
        Ok(())
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<()> {
        info!("sim::radio: broadcasting '{}'", settings.ssid);
        let mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        post_after(&self.runtime, &self.events, Duration::from_millis(300), RadioEvent::AccessPointStarted);
        post_after(&self.runtime, &self.events, Duration::from_millis(1_300), RadioEvent::StationAttached { mac });
        post_after(&self.runtime, &self.events, Duration::from_millis(3_300), RadioEvent::StationDetached { mac });
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        let event = if self.failures_left > 0 {
            self.failures_left -= 1;
            RadioEvent::StationDisconnected { reason: 201 }
        } else {
            RadioEvent::AddressAssigned {
                ip: Ipv4Addr::new(192, 168, 1, 42),
            }
        };
        post_after(&self.runtime, &self.events, Duration::from_millis(400), event);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        info!("sim::radio: stopped");
        Ok(())
    }
}

struct SimServices {
    events: EventSender,
    runtime: Handle,
}

impl NetServices for SimServices {
    fn start_time_sync(&mut self, server: &str) -> Result<()> {
        info!("sim::sntp: syncing with {}", server);
        Ok(())
    }

    fn stop_time_sync(&mut self) -> Result<()> {
        info!("sim::sntp: stopped");
        Ok(())
    }

    fn start_probe(&mut self, target: Ipv4Addr, count: u32, check: u32) -> Result<()> {
        let events = self.events.clone();
        self.runtime.spawn(async move {
            for seq in 1..=count {
                tokio::time::sleep(Duration::from_millis(250)).await;
                info!("sim::ping: reply from {} seq={}", target, seq);
                events.radio(RadioEvent::ProbeSucceeded { check });
            }
            events.radio(RadioEvent::ProbeFinished {
                check,
                transmitted: count,
                received: count,
            });
        });
        Ok(())
    }

    fn start_portal(&mut self) -> Result<()> {
        info!("sim::http: serving GET / on 192.168.4.1:80");
        Ok(())
    }

    fn stop_portal(&mut self) -> Result<()> {
        info!("sim::http: stopped");
        Ok(())
    }
}

struct LoggingSession;

impl BrokerSession for LoggingSession {
    fn subscribe(&mut self, topic: &str) -> Result<()> {
        info!("sim::mqtt: SUBSCRIBE {}", topic);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        info!("sim::mqtt: PUBLISH {} {}", topic, String::from_utf8_lossy(payload));
        Ok(())
    }
}

struct SimActions {
    events: EventSender,
    runtime: Handle,
    broker: Arc<BrokerChannel>,
    wireless: Arc<WirelessChannel>,
    broker_task: Option<JoinHandle<()>>,
    wireless_task: Option<JoinHandle<()>>,
}

impl SimActions {
    fn request(&self, request: ConnectivityRequest) -> Result<()> {
        if !self.events.request(request) {
            anyhow::bail!("connectivity task is gone");
        }
        Ok(())
    }
}

impl ModeActions for SimActions {
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
        let broker = self.broker.clone();
        self.broker_task = Some(self.runtime.spawn(async move {
            let mut session = LoggingSession;
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            broker.handle_event(SessionEvent::Connected, &mut session);

            for (delay, payload) in BROKER_SCRIPT {
                tokio::time::sleep(Duration::from_millis(*delay)).await;
                let event = SessionEvent::Received {
                    topic: Some(broker.command_topic().to_string()),
                    data: payload.to_vec(),
                };
                broker.handle_event(event, &mut session);
            }
        }));
        Ok(())
    }

    fn stop_broker(&mut self) -> Result<()> {
        if let Some(task) = self.broker_task.take() {
            task.abort();
            info!("sim::mqtt: session closed");
        }
        Ok(())
    }

    fn start_wireless(&mut self) -> Result<()> {
        let wireless = self.wireless.clone();
        self.wireless_task = Some(self.runtime.spawn(async move {
            info!("sim::ble: advertising");
            for (delay, value) in WIRELESS_SCRIPT {
                tokio::time::sleep(Duration::from_millis(*delay)).await;
                match wireless.handle_write(protocol::LED_COMMAND_CHR_UUID, value) {
                    Ok(_) => info!("sim::ble: notify status {:?}", wireless.status_value()),
                    Err(e) => warn!("sim::ble: peer received {}", e),
                }
            }
            if let Ok(name) = wireless.handle_read(protocol::MANUFACTURER_NAME_CHR_UUID) {
                info!("sim::ble: peer read manufacturer '{}'", String::from_utf8_lossy(&name));
            }
        }));
        Ok(())
    }

    fn stop_wireless(&mut self) -> Result<()> {
        if let Some(task) = self.wireless_task.take() {
            task.abort();
            info!("sim::ble: advertising stopped");
        }
        Ok(())
    }
}

struct ScriptedJoystick {
    start: Instant,
}

impl InputSampler for ScriptedJoystick {
    fn sample(&mut self) -> Result<JoystickSample> {
        let elapsed = self.start.elapsed().as_millis() as u64;
        let (_, x, y, pressed) = JOYSTICK_SCRIPT
            .iter()
            .rev()
            .find(|(at, ..)| *at <= elapsed)
            .copied()
            .unwrap_or((0, 2048, 2048, false));
        Ok(JoystickSample { x, y, pressed })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("sim: no usable config.ron ({:#}), using defaults", e);
            Config::default()
        }),
    };

    let (connectivity_writer, connectivity) = cell(ConnectivityState::Idle);
    let (mode_writer, mode) = cell(SelectedMode::None);
    let display_override = OverrideCell::new();
    let indicator = Indicator::new(LoggingPixel::default());

    let control = ManualControl::new(indicator.clone(), display_override.clone());
    let broker = Arc::new(BrokerChannel::new(control.clone(), &config.broker));
    let wireless = Arc::new(WirelessChannel::new(control, &config.ble));

    let runtime = Handle::current();
    let (events, queue) = event_queue();

    let manager = ConnectivityManager::new(
        SimRadio {
            events: events.clone(),
            runtime: runtime.clone(),
            failures_left: 0,
        },
        SimServices {
            events: events.clone(),
            runtime: runtime.clone(),
        },
        connectivity_writer,
        &config.network,
    );
    let connectivity_task = tokio::task::spawn_blocking(move || run_connectivity(manager, queue));

    let mut display = DisplayArbitrator::new(connectivity.clone(), display_override.clone(), indicator);
    let render_period = config.display.render_period();
    let render_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(render_period);
        loop {
            interval.tick().await;
            display.tick();
        }
    });

    let controller = ModeSwitchController::new(
        SimActions {
            events: events.clone(),
            runtime,
            broker,
            wireless,
            broker_task: None,
            wireless_task: None,
        },
        mode_writer,
        display_override,
        Thresholds::from(&config.input),
        config.mode.teardown,
    );
    let mut poller = InputPoller::new(
        ScriptedJoystick {
            start: Instant::now(),
        },
        controller,
        ButtonTracker::from(&config.input),
    );
    let poll_period = config.input.poll_period();
    let poll_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_period);
        loop {
            interval.tick().await;
            poller.poll(Instant::now());
        }
    });

    tokio::time::sleep(SCRIPT_LENGTH).await;
    info!(
        "sim: script finished, mode {} / connectivity {}",
        mode.get(),
        connectivity.get()
    );

    poll_task.abort();
    render_task.abort();
    events.post(Event::Shutdown);
    connectivity_task.await?;
    Ok(())
}
