pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::api::code_is_success;
use crate::error::EcoFlowError;
use crate::get_unix_ts_ms;
use crate::models::{short_sn, MqttCertificate, Snapshot};
use messages::{decode_push_message, message_id, prepare_mqtt_payload, Topics};

pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const UPDATE_CHANNEL_SIZE: usize = 32;

/// Push transport the coordinator talks to. Implemented by [`EcoFlowMqttClient`].
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Connect and subscribe; the receiver yields one snapshot fragment per telemetry message.
    async fn connect(&self) -> Result<mpsc::Receiver<Snapshot>, EcoFlowError>;

    async fn is_connected(&self) -> bool;

    /// Publish a command payload and wait for its acknowledgement.
    async fn publish_command(&self, payload: &Value) -> Result<Value, EcoFlowError>;

    async fn disconnect(&self);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MqttConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct MqttHealthStatus {
    pub status: MqttConnectionStatus,
    pub last_connected: Option<Instant>,
    pub last_message_sent: Option<Instant>,
    pub last_message_received: Option<Instant>,
    pub connection_attempts: u64,
}

impl MqttHealthStatus {
    pub fn new() -> Self {
        Self {
            status: MqttConnectionStatus::Disconnected,
            last_connected: None,
            last_message_sent: None,
            last_message_received: None,
            connection_attempts: 0,
        }
    }
}

impl Default for MqttHealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker address and login for one client
#[derive(Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: impl Into<String>) -> Self {
        MqttSettings {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            keep_alive: KEEP_ALIVE,
            connect_timeout: CONNECT_TIMEOUT,
            ack_timeout: ACK_TIMEOUT,
        }
    }

    /// Prefer the certificate login, fall back to user supplied credentials.
    pub fn from_certificate(
        cert: &MqttCertificate,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Option<Self> {
        if cert.is_complete() {
            let user = cert.certificate_account.clone().unwrap_or_default();
            let pass = cert.certificate_password.clone().unwrap_or_default();
            return Some(MqttSettings::new(cert.url.clone(), cert.port, user, pass));
        }

        match (username, password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some(MqttSettings::new(cert.url.clone(), cert.port, user, pass))
            }
            _ => None,
        }
    }
}

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// MQTT push client for a single device on the EcoFlow open-platform broker.
pub struct EcoFlowMqttClient {
    settings: MqttSettings,
    device_sn: String,
    topics: Topics,
    client: Mutex<Option<AsyncClient>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    health: Arc<RwLock<MqttHealthStatus>>,
    pending: PendingAcks,
}

impl EcoFlowMqttClient {
    pub fn new(settings: MqttSettings, device_sn: impl Into<String>) -> Self {
        let device_sn = device_sn.into();
        let topics = Topics::new(&settings.username, &device_sn);
        EcoFlowMqttClient {
            settings,
            device_sn,
            topics,
            client: Mutex::new(None),
            event_task: Mutex::new(None),
            health: Arc::new(RwLock::new(MqttHealthStatus::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub async fn health(&self) -> MqttHealthStatus {
        self.health.read().await.clone()
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("ecoflow2mqtt_{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, self.settings.host.clone(), self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_credentials(self.settings.username.clone(), self.settings.password.clone());
        options.set_clean_session(true);
        options.set_transport(Transport::tls_with_default_config());
        options
    }

    async fn set_status(&self, status: MqttConnectionStatus) {
        self.health.write().await.status = status;
    }
}

struct EventContext {
    client: AsyncClient,
    topics: Topics,
    device: String,
    health: Arc<RwLock<MqttHealthStatus>>,
    pending: PendingAcks,
    updates: mpsc::Sender<Snapshot>,
    connected: Option<oneshot::Sender<()>>,
}

async fn run_event_loop(mut eventloop: EventLoop, mut ctx: EventContext) {
    info!("MQTT eventloop started for ...{}", ctx.device);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected for ...{}, subscribing", ctx.device);
                {
                    let mut health = ctx.health.write().await;
                    health.status = MqttConnectionStatus::Connected;
                    health.last_connected = Some(Instant::now());
                }

                /* subscribing from inside the loop would block polling */
                let client = ctx.client.clone();
                let topics: Vec<String> = ctx.topics.subscriptions().iter().map(|t| t.to_string()).collect();
                tokio::spawn(async move {
                    for topic in topics {
                        if let Err(e) = client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                            error!("Subscribing to {topic} failed: {e}");
                        }
                    }
                });

                if let Some(connected) = ctx.connected.take() {
                    let _ = connected.send(());
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handle_publish(&ctx, &p.topic, &p.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Error in MQTT for ...{} {:?}, reconnecting", ctx.device, e);
                {
                    let mut health = ctx.health.write().await;
                    health.status = MqttConnectionStatus::Reconnecting;
                    health.connection_attempts += 1;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

async fn handle_publish(ctx: &EventContext, topic: &str, payload: &[u8]) {
    ctx.health.write().await.last_message_received = Some(Instant::now());

    if topic == ctx.topics.quota {
        match decode_push_message(payload) {
            Ok(snapshot) if snapshot.is_empty() => {
                debug!("Push message without telemetry for ...{}", ctx.device);
            }
            Ok(snapshot) => {
                debug!("Push update for ...{}: {} fields", ctx.device, snapshot.len());
                if ctx.updates.send(snapshot).await.is_err() {
                    debug!("No receiver for push updates of ...{}", ctx.device);
                }
            }
            Err(e) => warn!("Undecodable push message for ...{}: {e}", ctx.device),
        }
    } else if topic == ctx.topics.set_reply {
        let reply: Value = match serde_json::from_slice(payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Undecodable command reply for ...{}: {e}", ctx.device);
                return;
            }
        };
        let id = match message_id(&reply) {
            Some(id) => id,
            None => {
                debug!("Command reply without id for ...{}", ctx.device);
                return;
            }
        };
        match ctx.pending.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => debug!("Reply {id} for ...{} has no waiter", ctx.device),
        }
    } else if topic == ctx.topics.status {
        info!(
            "Device ...{} status: {}",
            ctx.device,
            String::from_utf8_lossy(payload)
        );
    } else {
        debug!("Message on unexpected topic {topic}");
    }
}

#[async_trait]
impl PushChannel for EcoFlowMqttClient {
    async fn connect(&self) -> Result<mpsc::Receiver<Snapshot>, EcoFlowError> {
        if self.event_task.lock().await.is_some() {
            self.disconnect().await;
        }

        info!(
            "MQTT connection starting for ...{} at {}:{}",
            short_sn(&self.device_sn),
            self.settings.host,
            self.settings.port
        );
        self.health.write().await.connection_attempts += 1;

        let (client, eventloop) = AsyncClient::new(self.options(), 10);
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_SIZE);
        let (connected_tx, connected_rx) = oneshot::channel();

        let ctx = EventContext {
            client: client.clone(),
            topics: self.topics.clone(),
            device: short_sn(&self.device_sn).to_string(),
            health: self.health.clone(),
            pending: self.pending.clone(),
            updates: updates_tx,
            connected: Some(connected_tx),
        };
        let task = tokio::spawn(run_event_loop(eventloop, ctx));

        match tokio::time::timeout(self.settings.connect_timeout, connected_rx).await {
            Ok(Ok(())) => {
                *self.client.lock().await = Some(client);
                *self.event_task.lock().await = Some(task);
                Ok(updates_rx)
            }
            _ => {
                task.abort();
                let message = format!(
                    "no connection to {}:{} within {}s",
                    self.settings.host,
                    self.settings.port,
                    self.settings.connect_timeout.as_secs()
                );
                self.set_status(MqttConnectionStatus::Error(message.clone())).await;
                Err(EcoFlowError::Mqtt(message))
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.health.read().await.status == MqttConnectionStatus::Connected
    }

    async fn publish_command(&self, payload: &Value) -> Result<Value, EcoFlowError> {
        if !self.is_connected().await {
            return Err(EcoFlowError::Mqtt("not connected".to_string()));
        }
        let client = match self.client.lock().await.clone() {
            Some(client) => client,
            None => return Err(EcoFlowError::Mqtt("not connected".to_string())),
        };

        let generated = get_unix_ts_ms();
        let prepared = prepare_mqtt_payload(payload, generated);
        let id = message_id(&prepared).unwrap_or(generated);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        let body = serde_json::to_vec(&prepared).map_err(|e| EcoFlowError::Mqtt(e.to_string()))?;
        if let Err(e) = client.publish(self.topics.set.clone(), QoS::AtLeastOnce, false, body).await {
            self.pending.lock().await.remove(&id);
            return Err(EcoFlowError::Mqtt(format!("publish failed: {e}")));
        }
        self.health.write().await.last_message_sent = Some(Instant::now());
        debug!("Command {id} published for ...{}", short_sn(&self.device_sn));

        match tokio::time::timeout(self.settings.ack_timeout, reply_rx).await {
            Ok(Ok(reply)) => {
                if code_is_success(reply.get("code")) {
                    Ok(reply)
                } else {
                    Err(EcoFlowError::Mqtt(format!("command {id} rejected: {reply}")))
                }
            }
            Ok(Err(_)) => Err(EcoFlowError::Mqtt(format!("reply channel for command {id} closed"))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(EcoFlowError::Mqtt(format!(
                    "no reply to command {id} within {}s",
                    self.settings.ack_timeout.as_secs()
                )))
            }
        }
    }

    async fn disconnect(&self) {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }
        self.pending.lock().await.clear();
        self.set_status(MqttConnectionStatus::Disconnected).await;
        info!("MQTT disconnected for ...{}", short_sn(&self.device_sn));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(account: Option<&str>, password: Option<&str>) -> MqttCertificate {
        MqttCertificate {
            url: "mqtt-e.ecoflow.com".to_string(),
            port: 8883,
            certificate_account: account.map(|s| s.to_string()),
            certificate_password: password.map(|s| s.to_string()),
            protocol: "mqtts".to_string(),
        }
    }

    #[test]
    fn test_settings_prefer_certificate() {
        let settings = MqttSettings::from_certificate(&cert(Some("open-abc"), Some("pw")), Some("user"), Some("pass")).unwrap();
        assert_eq!(settings.username, "open-abc");
        assert_eq!(settings.host, "mqtt-e.ecoflow.com");
        assert_eq!(settings.ack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_settings_fallback_to_user_credentials() {
        let settings = MqttSettings::from_certificate(&cert(None, None), Some("user"), Some("pass")).unwrap();
        assert_eq!(settings.username, "user");
        assert_eq!(settings.password, "pass");

        assert!(MqttSettings::from_certificate(&cert(None, None), Some("user"), Some("")).is_none());
        assert!(MqttSettings::from_certificate(&MqttCertificate::default(), None, None).is_none());
    }

    #[test]
    fn test_settings_debug_hides_password() {
        let settings = MqttSettings::new("host", 8883, "user", "secret-password");
        assert!(!format!("{settings:?}").contains("secret-password"));
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = EcoFlowMqttClient::new(MqttSettings::new("localhost", 8883, "open-abc", "pw"), "SN0001");
        assert!(!client.is_connected().await);
        assert_eq!(client.topics().quota, "/open/open-abc/SN0001/quota");
        assert!(matches!(
            client.publish_command(&serde_json::json!({"sn": "SN0001"})).await,
            Err(EcoFlowError::Mqtt(_))
        ));
        assert_eq!(client.health().await.status, MqttConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_reply_routes_to_waiter() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("t", "localhost", 1883), 10);
        let (updates, mut updates_rx) = mpsc::channel(4);
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let ctx = EventContext {
            client,
            topics: Topics::new("acc", "SN1"),
            device: "SN1".to_string(),
            health: Arc::new(RwLock::new(MqttHealthStatus::new())),
            pending: pending.clone(),
            updates,
            connected: None,
        };

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(42, tx);
        handle_publish(&ctx, "/open/acc/SN1/set_reply", br#"{"id": 42, "code": "0"}"#).await;
        let reply = rx.await.unwrap();
        assert_eq!(reply["id"], serde_json::json!(42));
        assert!(pending.lock().await.is_empty());

        handle_publish(&ctx, "/open/acc/SN1/quota", br#"{"params": {"bmsBattSoc": 55}}"#).await;
        let update = updates_rx.recv().await.unwrap();
        assert_eq!(update.get("bmsBattSoc"), Some(&serde_json::json!(55)));
        assert!(ctx.health.read().await.last_message_received.is_some());
    }
}
