//! Broker session on top of the IDF MQTT client.
//!
//! Two threads per session. `mqtt-rx` drains the connection and copies each
//! event out; `mqtt-cmd` owns the client and runs the command channel. The
//! client is never called from the receive thread, since the IDF task waits
//! for that thread while it holds the client lock.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use embedded_svc::mqtt::client::{Details, EventPayload, QoS};
use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration};
use esp_idf_sys::EspError;
use log::*;

use status_orchestrator::commands::{BrokerChannel, BrokerSession, SessionEvent};
use status_orchestrator::config::BrokerConfig;

enum Message {
    Event(SessionEvent),
    Close,
}

/// A running broker session. Dropping it leaves the session running; call
/// [`BrokerHandle::close`].
pub struct BrokerHandle {
    tx: Sender<Message>,
}

impl BrokerHandle {
    pub fn start(config: &BrokerConfig, channel: Arc<BrokerChannel>) -> Result<Self> {
        let conf = MqttClientConfiguration {
            client_id: config.client_id.as_deref(),
            ..Default::default()
        };
        let (client, conn) = EspMqttClient::new(&config.uri, &conf)?;
        info!("mqtt: connecting to {}", config.uri);

        let (tx, rx) = mpsc::channel();

        let events = tx.clone();
        thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(6 * 1024)
            .spawn(move || receive(conn, events))?;

        thread::Builder::new()
            .name("mqtt-cmd".into())
            .stack_size(8 * 1024)
            .spawn(move || {
                let mut session = MqttSession { client };
                for message in rx {
                    match message {
                        Message::Event(event) => channel.handle_event(event, &mut session),
                        Message::Close => break,
                    }
                }
                // Dropping the client ends the connection and with it mqtt-rx
                info!("mqtt: session closed");
            })?;

        Ok(Self { tx })
    }

    pub fn close(self) {
        let _ = self.tx.send(Message::Close);
    }
}

struct MqttSession {
    client: EspMqttClient<'static>,
}

impl BrokerSession for MqttSession {
    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtMostOnce)?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client.enqueue(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }
}

fn receive(mut conn: EspMqttConnection, events: Sender<Message>) {
    loop {
        let event = match conn.next() {
            Ok(event) => session_event(event.payload()),
            Err(e) => {
                debug!("mqtt: connection ended: {:?}", e);
                break;
            }
        };

        if let Some(event) = event {
            if events.send(Message::Event(event)).is_err() {
                break;
            }
        }
    }
}

fn session_event(payload: EventPayload<'_, EspError>) -> Option<SessionEvent> {
    match payload {
        EventPayload::Connected(_) => Some(SessionEvent::Connected),
        EventPayload::Disconnected => Some(SessionEvent::Disconnected),
        EventPayload::Subscribed(id) => Some(SessionEvent::Subscribed(id)),
        EventPayload::Published(id) => Some(SessionEvent::Published(id)),
        EventPayload::Received {
            topic,
            data,
            details,
            ..
        } => {
            // Chunked payloads are larger than any command
            if !matches!(details, Details::Complete) {
                warn!("mqtt: dropping fragmented message ({} bytes)", data.len());
                return None;
            }
            Some(SessionEvent::Received {
                topic: topic.map(str::to_string),
                data: data.to_vec(),
            })
        }
        EventPayload::Error(e) => Some(SessionEvent::Error(format!("{:?}", e))),
        _ => None,
    }
}
