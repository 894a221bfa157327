/// Link and broker session supervision
///
/// Platform callbacks (Wi-Fi events, MQTT client events, timer expiry) are turned
/// into `ConnectionEvents` calls by the control loop. The supervisor owns the
/// connectivity state, arms the single-shot reconnect timers and triggers the
/// buffered telemetry flush on every new session.
use crate::command::{parse_command, Command};
use crate::telemetry::{PublishError, TelemetryBuffer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    LinkUp,
    SessionEstablished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectError(pub String);

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConnectError {}

/// Network link (Wi-Fi station on the device)
pub trait Link {
    /// Start connecting. Completion arrives later as `on_link_up`.
    fn connect(&mut self) -> Result<(), ConnectError>;

    fn local_ip(&self) -> Option<String>;
}

/// Broker session. All publishes are QoS 2 and retained.
pub trait Session {
    /// Start connecting. Completion arrives later as `on_session_established`.
    fn connect(&mut self) -> Result<(), ConnectError>;

    fn disconnect(&mut self);

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Single-shot reconnect timers; expiry comes back as `on_*_retry_due`
pub trait ReconnectTimers {
    fn arm_link_retry(&mut self);

    fn arm_session_retry(&mut self);

    fn cancel_session_retry(&mut self);
}

/// Transitions reported by the platform
pub trait ConnectionEvents {
    fn on_link_up(&mut self);

    fn on_link_lost(&mut self);

    fn on_session_established(&mut self);

    fn on_session_lost(&mut self);

    /// Inbound message; returns the decoded command when it arrived on the
    /// command topic
    fn on_message(&mut self, topic: &str, payload: &[u8]) -> Option<Command>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub counter: String,
    pub buffered: String,
    pub presence: String,
    pub command: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            counter: "test/counter/data".to_string(),
            buffered: "test/counter/dataBuffered".to_string(),
            presence: "device/status".to_string(),
            command: "test/counter/datasub".to_string(),
        }
    }
}

/// Retained "online" record published on every new session
pub fn birth_payload(device_id: &str, ip: &str) -> String {
    serde_json::json!({ "status": "online", "deviceId": device_id, "ip": ip }).to_string()
}

/// Last-will record registered with the broker when the client is created
pub fn last_will_payload(device_id: &str) -> String {
    serde_json::json!({ "status": "offline", "deviceId": device_id }).to_string()
}

pub struct ConnectivitySupervisor<L, S, T> {
    link: L,
    session: S,
    timers: T,
    buffer: Arc<TelemetryBuffer>,
    topics: Topics,
    device_id: String,
    telemetry_enabled: bool,
    state: ConnectivityState,
}

impl<L: Link, S: Session, T: ReconnectTimers> ConnectivitySupervisor<L, S, T> {
    pub fn new(
        link: L,
        session: S,
        timers: T,
        buffer: Arc<TelemetryBuffer>,
        topics: Topics,
        device_id: &str,
    ) -> Self {
        Self {
            link,
            session,
            timers,
            buffer,
            topics,
            device_id: device_id.to_string(),
            telemetry_enabled: true,
            state: ConnectivityState::Disconnected,
        }
    }

    /// Run without the broker session; only the link is supervised
    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = enabled;
        self
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn buffer(&self) -> &Arc<TelemetryBuffer> {
        &self.buffer
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn start(&mut self) {
        self.connect_link();
    }

    fn connect_link(&mut self) {
        log::info!("Connecting to Wi-Fi...");
        if let Err(e) = self.link.connect() {
            log::warn!("Wi-Fi connect failed: {}", e);
            self.timers.arm_link_retry();
        }
    }

    fn connect_session(&mut self) {
        if !self.telemetry_enabled {
            return;
        }
        log::info!("Connecting to MQTT...");
        if let Err(e) = self.session.connect() {
            log::warn!("MQTT connect failed: {}", e);
            self.timers.arm_session_retry();
        }
    }

    pub fn on_link_retry_due(&mut self) {
        if self.state == ConnectivityState::Disconnected {
            self.connect_link();
        }
    }

    pub fn on_session_retry_due(&mut self) {
        if self.state == ConnectivityState::LinkUp {
            self.connect_session();
        }
    }

    /// Publish one record to the counter topic, buffering it when there is no
    /// session or the publish fails
    pub fn publish_telemetry(&mut self, record: &str) {
        if !self.telemetry_enabled {
            return;
        }
        if self.state != ConnectivityState::SessionEstablished {
            self.buffer.append(record);
            log::info!("Data buffered due to no connection");
            return;
        }
        match self.session.publish(&self.topics.counter, record.as_bytes()) {
            Ok(()) => log::info!("Data published: {}", record),
            Err(e) => {
                log::warn!("Failed to publish data: {}", e);
                self.buffer.append(record);
            }
        }
    }

    fn flush_buffer(&mut self) {
        let session = &mut self.session;
        let topic = self.topics.buffered.as_str();
        if let Err(e) = self.buffer.flush(|blob| session.publish(topic, blob.as_bytes())) {
            log::warn!("Failed to send buffered data: {}", e);
        }
    }
}

impl<L: Link, S: Session, T: ReconnectTimers> ConnectionEvents for ConnectivitySupervisor<L, S, T> {
    fn on_link_up(&mut self) {
        if self.state != ConnectivityState::Disconnected {
            return;
        }
        log::info!(
            "WiFi connected, IP address: {}",
            self.link.local_ip().as_deref().unwrap_or("unknown")
        );
        self.state = ConnectivityState::LinkUp;
        self.connect_session();
    }

    fn on_link_lost(&mut self) {
        log::warn!("WiFi lost connection");
        if self.state == ConnectivityState::SessionEstablished {
            self.session.disconnect();
        }
        self.state = ConnectivityState::Disconnected;
        self.timers.cancel_session_retry();
        self.timers.arm_link_retry();
    }

    fn on_session_established(&mut self) {
        if self.state != ConnectivityState::LinkUp {
            // Duplicate, or a late event for a link that is already gone
            return;
        }
        log::info!("Connected to MQTT");
        self.state = ConnectivityState::SessionEstablished;

        if let Err(e) = self.session.subscribe(&self.topics.command) {
            log::warn!("Subscribe to {} failed: {}", self.topics.command, e);
        }

        let ip = self.link.local_ip().unwrap_or_default();
        let birth = birth_payload(&self.device_id, &ip);
        if let Err(e) = self.session.publish(&self.topics.presence, birth.as_bytes()) {
            log::warn!("Birth message not published: {}", e);
        }

        self.flush_buffer();
    }

    fn on_session_lost(&mut self) {
        match self.state {
            ConnectivityState::Disconnected => {}
            ConnectivityState::LinkUp | ConnectivityState::SessionEstablished => {
                log::warn!("Disconnected from MQTT");
                self.state = ConnectivityState::LinkUp;
                self.timers.arm_session_retry();
            }
        }
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) -> Option<Command> {
        log::info!("Message received on topic: {}", topic);
        if topic != self.topics.command {
            return None;
        }
        let command = parse_command(payload)?;
        match &command {
            Command::Off => log::info!("off"),
            Command::On => log::info!("on"),
            Command::Unknown(state) => log::warn!("Unknown state: {}", state),
        }
        Some(command)
    }
}
