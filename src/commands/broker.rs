use anyhow::Result;
use log::{debug, info, warn};
use rgb::RGB8;

use common::LedCommand;

use super::ManualControl;
use crate::config::BrokerConfig;

const SOURCE: &str = "broker";

/// The parts of an MQTT client the command channel needs
pub trait BrokerSession {
    fn subscribe(&mut self, topic: &str) -> Result<()>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Connection events reported by the broker client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Subscribed(u32),
    Published(u32),
    Received { topic: Option<String>, data: Vec<u8> },
    Error(String),
}

/// What a command message did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Payload did not parse; nothing changed
    Rejected,
    /// Parsed, but carried no field this device acts on
    Unrecognized,
    Off,
    Color(RGB8),
    /// Override entered without a new color
    Held,
}

pub struct BrokerChannel {
    control: ManualControl,
    command_topic: String,
    status_topic: String,
    announcement: String,
}

impl BrokerChannel {
    pub fn new(control: ManualControl, config: &BrokerConfig) -> Self {
        Self {
            control,
            command_topic: config.command_topic.clone(),
            status_topic: config.status_topic.clone(),
            announcement: config.announcement.clone(),
        }
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Subscribe to commands and announce the device. Runs on every (re)connect.
    pub fn on_connected(&self, session: &mut impl BrokerSession) -> Result<()> {
        session.subscribe(&self.command_topic)?;
        info!("commands::broker: subscribed to '{}'", self.command_topic);

        session.publish(&self.status_topic, self.announcement.as_bytes())?;
        info!(
            "commands::broker: announced on '{}': {}",
            self.status_topic, self.announcement
        );
        Ok(())
    }

    pub fn handle_event(&self, event: SessionEvent, session: &mut impl BrokerSession) {
        match event {
            SessionEvent::Connected => {
                info!("commands::broker: connected");
                if let Err(e) = self.on_connected(session) {
                    warn!("commands::broker: session setup failed: {:#}", e);
                }
            }
            SessionEvent::Disconnected => info!("commands::broker: disconnected"),
            SessionEvent::Subscribed(id) => info!("commands::broker: subscribed, msg_id={}", id),
            SessionEvent::Published(id) => debug!("commands::broker: published, msg_id={}", id),
            SessionEvent::Received { topic, data } => {
                self.handle_message(topic.as_deref(), &data);
            }
            SessionEvent::Error(e) => warn!("commands::broker: client error: {}", e),
        }
    }

    /// Apply one command payload.
    ///
    /// `power: false` wins over any color. A color is applied only when it has
    /// exactly three components; otherwise the override is still entered and the
    /// pixel keeps its color.
    pub fn handle_message(&self, topic: Option<&str>, payload: &[u8]) -> MessageOutcome {
        info!(
            "commands::broker: message on '{}' ({} bytes)",
            topic.unwrap_or(&self.command_topic),
            payload.len()
        );

        let command = match LedCommand::from_json(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("commands::broker: discarding malformed payload: {}", e);
                return MessageOutcome::Rejected;
            }
        };

        if !command.is_recognized() {
            debug!("commands::broker: payload has no known fields");
            return MessageOutcome::Unrecognized;
        }

        if command.power == Some(false) {
            self.control.turn_off(SOURCE);
            return MessageOutcome::Off;
        }

        match command.rgb() {
            Some([r, g, b]) => {
                let color = RGB8::new(r, g, b);
                self.control.set_color(SOURCE, color);
                MessageOutcome::Color(color)
            }
            None => {
                if command.color.is_some() {
                    warn!("commands::broker: color needs exactly 3 components, ignoring it");
                }
                self.control.hold(SOURCE);
                MessageOutcome::Held
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::{Indicator, MemoryPixel};
    use crate::state::{OverrideCell, BLACK};
    use crate::testing::{Call, CallLog, RecordingSession};

    fn channel() -> (BrokerChannel, MemoryPixel, OverrideCell) {
        let pixel = MemoryPixel::new();
        let display_override = OverrideCell::new();
        let control = ManualControl::new(Indicator::new(pixel.clone()), display_override.clone());
        (
            BrokerChannel::new(control, &BrokerConfig::default()),
            pixel,
            display_override,
        )
    }

    #[test]
    fn connect_subscribes_then_announces() {
        let (channel, _, _) = channel();
        let log = CallLog::default();
        let mut session = RecordingSession::new(log.clone());

        channel.handle_event(SessionEvent::Connected, &mut session);
        assert_eq!(
            log.take(),
            vec![
                Call::Subscribe("esp-lection/cmd".to_string()),
                Call::Publish(
                    "esp-lection/status".to_string(),
                    b"Hello, I'm Ivan, and Esp32 connected".to_vec()
                ),
            ]
        );
    }

    #[test]
    fn power_off_writes_black_and_activates() {
        let (channel, pixel, display_override) = channel();
        let outcome = channel.handle_message(None, br#"{"power": false, "color": [1, 2, 3]}"#);

        assert_eq!(outcome, MessageOutcome::Off);
        assert_eq!(pixel.last(), Some(BLACK));
        assert!(display_override.is_active());
    }

    #[test]
    fn color_is_applied() {
        let (channel, pixel, display_override) = channel();
        let outcome = channel.handle_message(Some("esp-lection/cmd"), br#"{"color": [255, 0, 128]}"#);

        assert_eq!(outcome, MessageOutcome::Color(RGB8::new(255, 0, 128)));
        assert_eq!(pixel.last(), Some(RGB8::new(255, 0, 128)));
        assert_eq!(display_override.snapshot().color, RGB8::new(255, 0, 128));
    }

    #[test]
    fn malformed_payload_changes_nothing() {
        let (channel, pixel, display_override) = channel();
        let payloads: [&[u8]; 3] = [
            b"{not json",
            br#"{"power": "off"}"#,
            br#"{"color": [300, 0, 0]}"#,
        ];
        for payload in payloads {
            assert_eq!(channel.handle_message(None, payload), MessageOutcome::Rejected);
        }
        assert_eq!(pixel.writes(), 0);
        assert!(!display_override.is_active());
    }

    #[test]
    fn empty_object_changes_nothing() {
        let (channel, pixel, display_override) = channel();
        assert_eq!(
            channel.handle_message(None, br#"{"brightness": 3}"#),
            MessageOutcome::Unrecognized
        );
        assert_eq!(pixel.writes(), 0);
        assert!(!display_override.is_active());
    }

    #[test]
    fn short_color_holds_without_writing() {
        let (channel, pixel, display_override) = channel();
        assert_eq!(
            channel.handle_message(None, br#"{"power": true, "color": [1, 2]}"#),
            MessageOutcome::Held
        );
        assert_eq!(pixel.writes(), 0);
        assert!(display_override.is_active());
    }
}
