pub mod snapshot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::api::QuotaApi;
use crate::devices::actions::{self, SelectAction};
use crate::devices::definitions::update_interval_select;
use crate::devices::{self, DeviceProfile, ExtraBatterySensor};
use crate::diagnostics::{BoundFifoList, DIAGNOSTIC_LOG_SIZE};
use crate::error::EcoFlowError;
use crate::models::{ConnectionMode, CoordinatorState, DeviceIdentity, DeviceInfo, Snapshot, DOMAIN};
use crate::mqtt::PushChannel;
use snapshot::SnapshotStore;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(15);
const WAKE_DELAY: Duration = Duration::from_millis(500);
const SETTLE_DELAY: Duration = Duration::from_secs(1);
const MAX_LOGGED_CHANGES: usize = 10;

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub update_interval: Duration,
    pub diagnostic_mode: bool,
    /// Pause after the wake-up call before the real quota request
    pub wake_delay: Duration,
    /// Pause between a successful write and the follow-up refresh
    pub settle_delay: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            diagnostic_mode: false,
            wake_delay: WAKE_DELAY,
            settle_delay: SETTLE_DELAY,
        }
    }
}

struct DiagnosticLogs {
    rest_requests: BoundFifoList<Value>,
    set_commands: BoundFifoList<Value>,
    set_replies: BoundFifoList<Value>,
}

impl DiagnosticLogs {
    fn new() -> Self {
        DiagnosticLogs {
            rest_requests: BoundFifoList::new(DIAGNOSTIC_LOG_SIZE),
            set_commands: BoundFifoList::new(DIAGNOSTIC_LOG_SIZE),
            set_replies: BoundFifoList::new(DIAGNOSTIC_LOG_SIZE),
        }
    }
}

/// Keeps one device snapshot current from REST polling and MQTT push, and routes commands.
pub struct HybridCoordinator {
    identity: DeviceIdentity,
    rest: Option<Arc<dyn QuotaApi>>,
    push: Option<Arc<dyn PushChannel>>,
    options: CoordinatorOptions,
    state: RwLock<CoordinatorState>,
    store: Mutex<SnapshotStore>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    interval_tx: watch::Sender<Duration>,
    last_update_success: AtomicBool,
    logged_rest_success: AtomicBool,
    refresh_notify: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    diagnostics: Option<Mutex<DiagnosticLogs>>,
}

impl std::fmt::Debug for HybridCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCoordinator")
            .field("identity", &self.identity)
            .field("has_rest", &self.rest.is_some())
            .field("has_push", &self.push.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl HybridCoordinator {
    pub fn new(
        identity: DeviceIdentity,
        rest: Option<Arc<dyn QuotaApi>>,
        push: Option<Arc<dyn PushChannel>>,
        options: CoordinatorOptions,
    ) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::new()));
        let (interval_tx, _) = watch::channel(options.update_interval);
        let diagnostics = if options.diagnostic_mode {
            Some(Mutex::new(DiagnosticLogs::new()))
        } else {
            None
        };

        Arc::new(HybridCoordinator {
            identity,
            rest,
            push,
            options,
            state: RwLock::new(CoordinatorState::Uninitialized),
            store: Mutex::new(SnapshotStore::new()),
            snapshot_tx,
            interval_tx,
            last_update_success: AtomicBool::new(false),
            logged_rest_success: AtomicBool::new(false),
            refresh_notify: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
            diagnostics,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_sn(&self) -> &str {
        &self.identity.sn
    }

    pub fn device_type(&self) -> &str {
        &self.identity.device_type
    }

    pub fn profile(&self) -> Option<&'static DeviceProfile> {
        devices::get_profile(&self.identity.device_type)
    }

    pub async fn state(&self) -> CoordinatorState {
        *self.state.read().await
    }

    pub async fn mode(&self) -> Option<ConnectionMode> {
        match *self.state.read().await {
            CoordinatorState::Running(mode) => Some(mode),
            _ => None,
        }
    }

    async fn ensure_not_shutdown(&self) -> Result<(), EcoFlowError> {
        if *self.state.read().await == CoordinatorState::Shutdown {
            return Err(EcoFlowError::Shutdown);
        }
        Ok(())
    }

    /// Decide the connection mode and connect MQTT when configured.
    ///
    /// A failed MQTT connection degrades to REST-only when a REST client exists,
    /// without one it fails setup.
    pub async fn setup(self: &Arc<Self>) -> Result<ConnectionMode, EcoFlowError> {
        match self.state().await {
            CoordinatorState::Running(mode) => return Ok(mode),
            CoordinatorState::Shutdown => return Err(EcoFlowError::Shutdown),
            CoordinatorState::Uninitialized => {}
        }

        if self.rest.is_none() && self.push.is_none() {
            error!("No data source for device ...{}", self.identity.short_sn());
            return Err(EcoFlowError::NoDataSource);
        }

        let mut mqtt_ok = false;
        if let Some(push) = &self.push {
            match push.connect().await {
                Ok(updates) => {
                    self.spawn_push_consumer(updates).await;
                    mqtt_ok = true;
                }
                Err(e) if self.rest.is_some() => {
                    warn!(
                        "MQTT connection failed for device ...{}, using REST-only mode: {e}",
                        self.identity.short_sn()
                    );
                }
                Err(e) => {
                    error!("MQTT connection failed for device ...{}: {e}", self.identity.short_sn());
                    return Err(e);
                }
            }
        }

        let mode = match (self.rest.is_some(), mqtt_ok) {
            (true, true) => ConnectionMode::Hybrid,
            (true, false) => ConnectionMode::RestOnly,
            _ => ConnectionMode::MqttOnly,
        };
        *self.state.write().await = CoordinatorState::Running(mode);
        info!(
            "Coordinator for device ...{} running in {} mode",
            self.identity.short_sn(),
            mode.to_string()
        );
        Ok(mode)
    }

    async fn spawn_push_consumer(self: &Arc<Self>, mut updates: mpsc::Receiver<Snapshot>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let coordinator = match weak.upgrade() {
                    Some(coordinator) => coordinator,
                    None => break,
                };
                coordinator.apply_push_update(update).await;
            }
            debug!("Push update stream ended");
        });
        self.tasks.lock().await.push(task);
    }

    /// Initial refresh during setup. Unlike scheduled polls its failure is returned.
    pub async fn first_refresh(&self) -> Result<Arc<Snapshot>, EcoFlowError> {
        match self.mode().await {
            Some(ConnectionMode::MqttOnly) => {
                self.last_update_success.store(true, Ordering::SeqCst);
                Ok(self.data())
            }
            Some(_) => self.refresh().await,
            None => Err(EcoFlowError::Shutdown),
        }
    }

    /// Wake the device, poll its full quota and replace the REST layer of the snapshot.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, EcoFlowError> {
        self.ensure_not_shutdown().await?;

        let rest = match &self.rest {
            Some(rest) => rest,
            None => {
                self.last_update_success.store(true, Ordering::SeqCst);
                return Ok(self.data());
            }
        };

        self.wake_device(rest.as_ref()).await;

        let data = match rest.get_device_quota(&self.identity.sn).await {
            Ok(data) => data,
            Err(e) => {
                error!("Error fetching data for ...{}: {e}", self.identity.short_sn());
                self.last_update_success.store(false, Ordering::SeqCst);
                return Err(EcoFlowError::UpdateFailed(Box::new(e)));
            }
        };

        self.log_rest_update(&data).await;

        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.lock().await.rest_requests.append(json!({
                "device_sn": self.identity.sn,
                "response": Value::Object(data.clone()),
            }));
        }

        let merged = {
            let mut store = self.store.lock().await;
            Arc::new(store.replace_rest(data).clone())
        };
        self.snapshot_tx.send_replace(merged.clone());
        self.last_update_success.store(true, Ordering::SeqCst);
        Ok(merged)
    }

    /* some devices ignore requests while asleep; any failure here is irrelevant */
    async fn wake_device(&self, rest: &dyn QuotaApi) {
        if let Err(e) = rest.get_device_quota(&self.identity.sn).await {
            debug!("Wake-up request for ...{} failed: {e}", self.identity.short_sn());
        }
        if !self.options.wake_delay.is_zero() {
            tokio::time::sleep(self.options.wake_delay).await;
        }
    }

    async fn log_rest_update(&self, data: &Snapshot) {
        if !self.logged_rest_success.swap(true, Ordering::SeqCst) {
            info!(
                "REST API connected for device ...{} (update interval: {}s)",
                self.identity.short_sn(),
                self.update_interval().as_secs()
            );
            return;
        }

        if !log::log_enabled!(log::Level::Debug) {
            return;
        }

        let store = self.store.lock().await;
        let previous = store.rest_fields();
        let mut changed: Vec<(&String, Option<&Value>, Option<&Value>)> = data
            .iter()
            .filter(|(key, value)| previous.get(*key) != Some(*value))
            .map(|(key, value)| (key, previous.get(key), Some(value)))
            .collect();
        changed.extend(
            previous
                .iter()
                .filter(|(key, _)| !data.contains_key(*key))
                .map(|(key, value)| (key, Some(value), None)),
        );

        debug!(
            "REST update for ...{}: received {} fields, {} changed",
            self.identity.short_sn(),
            data.len(),
            changed.len()
        );
        for (key, old, new) in changed.iter().take(MAX_LOGGED_CHANGES) {
            debug!("   {key}: {old:?} -> {new:?}");
        }
        if changed.len() > MAX_LOGGED_CHANGES {
            debug!("   ... and {} more", changed.len() - MAX_LOGGED_CHANGES);
        }
    }

    /// Merge one push fragment into the snapshot.
    pub async fn apply_push_update(&self, update: Snapshot) {
        if self.ensure_not_shutdown().await.is_err() {
            return;
        }
        let merged = {
            let mut store = self.store.lock().await;
            Arc::new(store.apply_push(update).clone())
        };
        self.snapshot_tx.send_replace(merged);
    }

    /// Start the poll timer. Does nothing without a REST client.
    pub async fn start_polling(self: &Arc<Self>) {
        if self.rest.is_none() {
            debug!("No REST client for ...{}, not polling", self.identity.short_sn());
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let notify = self.refresh_notify.clone();
        let mut interval_rx = self.interval_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                let interval = *interval_rx.borrow_and_update();
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {},
                    _ = notify.notified() => {},
                }

                let coordinator = match weak.upgrade() {
                    Some(coordinator) => coordinator,
                    None => break,
                };
                if coordinator.ensure_not_shutdown().await.is_err() {
                    break;
                }
                /* failures are logged and flagged by refresh itself */
                let _ = coordinator.refresh().await;
            }
        });
        self.tasks.lock().await.push(task);
    }

    /// Ask the poll timer for an immediate out-of-cycle refresh.
    pub fn request_refresh(&self) {
        self.refresh_notify.notify_one();
    }

    pub fn update_interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    pub fn set_update_interval(&self, seconds: u64) {
        info!(
            "Changing update interval from {} to {} seconds for ...{}",
            self.update_interval().as_secs(),
            seconds,
            self.identity.short_sn()
        );
        self.interval_tx.send_replace(Duration::from_secs(seconds));
        self.request_refresh();
    }

    /// Send a command payload, MQTT first when connected, REST once as fallback.
    pub async fn send_command(&self, payload: &Value) -> Result<(), EcoFlowError> {
        self.ensure_not_shutdown().await?;
        self.record_command(payload).await;

        let mut mqtt_error = None;
        if let Some(push) = &self.push {
            if push.is_connected().await {
                match push.publish_command(payload).await {
                    Ok(reply) => {
                        debug!("Command sent via MQTT for ...{}", self.identity.short_sn());
                        self.record_reply("mqtt", reply).await;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("MQTT command failed for ...{}: {e}", self.identity.short_sn());
                        mqtt_error = Some(e);
                    }
                }
            }
        }

        let rest = match &self.rest {
            Some(rest) => rest,
            None => {
                return Err(mqtt_error.unwrap_or_else(|| EcoFlowError::Mqtt("not connected".to_string())));
            }
        };

        debug!(
            "Sending command via REST API for ...{}: params={}",
            self.identity.short_sn(),
            payload.get("params").cloned().unwrap_or(Value::Null)
        );
        match rest.set_device_quota(payload).await {
            Ok(response) => {
                self.record_reply("rest", response).await;
                Ok(())
            }
            Err(rest_error) => match mqtt_error {
                Some(mqtt_error) => Err(EcoFlowError::CommandFailed {
                    mqtt: Box::new(mqtt_error),
                    rest: Box::new(rest_error),
                }),
                None => Err(rest_error),
            },
        }
    }

    /// `send_command`, then wait for the device to settle and trigger a refresh.
    pub async fn send_command_and_refresh(&self, payload: &Value) -> Result<(), EcoFlowError> {
        self.send_command(payload).await?;
        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }
        self.request_refresh();
        Ok(())
    }

    async fn record_command(&self, payload: &Value) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.lock().await.set_commands.append(payload.clone());
        }
    }

    async fn record_reply(&self, transport: &str, reply: Value) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics
                .lock()
                .await
                .set_replies
                .append(json!({"transport": transport, "reply": reply}));
        }
    }

    fn require_profile(&self) -> Result<&'static DeviceProfile, EcoFlowError> {
        self.profile().ok_or_else(|| {
            EcoFlowError::Config(format!("unsupported device type `{}`", self.identity.device_type))
        })
    }

    fn unknown_entity(&self, key: &str) -> EcoFlowError {
        EcoFlowError::UnknownEntity {
            device_type: self.identity.device_type.clone(),
            key: key.to_string(),
        }
    }

    pub async fn set_switch(&self, key: &str, on: bool) -> Result<(), EcoFlowError> {
        let profile = self.require_profile()?;
        let def = profile.switches.iter().find(|d| d.key == key).ok_or_else(|| self.unknown_entity(key))?;
        let payload = actions::switch_command(def, profile.command_format, &self.identity.sn, on)?;
        self.send_command_and_refresh(&payload).await
    }

    pub async fn set_number(&self, key: &str, value: f64) -> Result<(), EcoFlowError> {
        let profile = self.require_profile()?;
        let def = profile.numbers.iter().find(|d| d.key == key).ok_or_else(|| self.unknown_entity(key))?;
        let payload = actions::number_command(def, profile.command_format, &self.identity.sn, value)?;
        self.send_command_and_refresh(&payload).await
    }

    pub async fn select_option(&self, key: &str, option: &str) -> Result<(), EcoFlowError> {
        let local = update_interval_select();
        let profile = self.require_profile()?;
        let def = if key == local.key {
            &local
        } else {
            profile.selects.iter().find(|d| d.key == key).ok_or_else(|| self.unknown_entity(key))?
        };

        match actions::select_option(def, profile.command_format, &self.identity.sn, option)? {
            SelectAction::SetUpdateInterval(seconds) => {
                self.set_update_interval(seconds);
                Ok(())
            }
            SelectAction::Command(payload) => self.send_command_and_refresh(&payload).await,
        }
    }

    pub async fn press_button(&self, key: &str) -> Result<(), EcoFlowError> {
        let profile = self.require_profile()?;
        let def = profile.buttons.iter().find(|d| d.key == key).ok_or_else(|| self.unknown_entity(key))?;
        let payload = actions::button_command(def, profile.command_format, &self.identity.sn)?;
        self.send_command_and_refresh(&payload).await
    }

    /// Current merged snapshot
    pub fn data(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Binary sensors for the extra battery packs present in the current data
    pub fn extra_battery_sensors(&self) -> Vec<ExtraBatterySensor> {
        actions::extra_battery_sensors(&self.data())
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    pub async fn mqtt_connected(&self) -> bool {
        match &self.push {
            Some(push) => push.is_connected().await,
            None => false,
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        let display = devices::display_name(&self.identity.device_type);
        DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), self.identity.sn.clone())],
            name: format!("EcoFlow {display}"),
            manufacturer: "EcoFlow".to_string(),
            model: display,
            serial_number: self.identity.sn.clone(),
        }
    }

    /// `{rest_requests, set_commands, set_replies}` in diagnostic mode
    pub async fn diagnostic_logs(&self) -> Option<Value> {
        let diagnostics = self.diagnostics.as_ref()?;
        let logs = diagnostics.lock().await;
        Some(json!({
            "rest_requests": logs.rest_requests.to_json(),
            "set_commands": logs.set_commands.to_json(),
            "set_replies": logs.set_replies.to_json(),
        }))
    }

    /// Stop polling and disconnect MQTT. Calling it again does nothing.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state == CoordinatorState::Shutdown {
                return;
            }
            *state = CoordinatorState::Shutdown;
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        if let Some(push) = &self.push {
            push.disconnect().await;
        }
        info!("Coordinator for device ...{} shut down", self.identity.short_sn());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn snapshot(value: Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    #[derive(Default)]
    struct FakeRest {
        quota: StdMutex<Vec<Result<Snapshot, EcoFlowError>>>,
        quota_calls: AtomicUsize,
        fail_set: bool,
        sent: StdMutex<Vec<Value>>,
    }

    impl FakeRest {
        fn returning(data: Value) -> Self {
            let fake = FakeRest::default();
            fake.quota.lock().unwrap().push(Ok(snapshot(data)));
            fake
        }
    }

    #[async_trait]
    impl QuotaApi for FakeRest {
        async fn get_device_quota(&self, _device_sn: &str) -> Result<Snapshot, EcoFlowError> {
            self.quota_calls.fetch_add(1, Ordering::SeqCst);
            let queue = self.quota.lock().unwrap();
            match queue.last() {
                Some(Ok(data)) => Ok(data.clone()),
                Some(Err(_)) => Err(EcoFlowError::Connection("offline".to_string())),
                None => Ok(Snapshot::new()),
            }
        }

        async fn set_device_quota(&self, payload: &Value) -> Result<Value, EcoFlowError> {
            self.sent.lock().unwrap().push(payload.clone());
            if self.fail_set {
                return Err(EcoFlowError::Api {
                    code: "8521".to_string(),
                    message: "rejected".to_string(),
                });
            }
            Ok(json!({"code": "0"}))
        }
    }

    struct FakePush {
        connect_ok: bool,
        publish_ok: bool,
        connected: AtomicBool,
        published: StdMutex<Vec<Value>>,
        updates: StdMutex<Option<mpsc::Sender<Snapshot>>>,
        disconnects: AtomicUsize,
    }

    impl FakePush {
        fn new(connect_ok: bool, publish_ok: bool) -> Self {
            FakePush {
                connect_ok,
                publish_ok,
                connected: AtomicBool::new(false),
                published: StdMutex::new(Vec::new()),
                updates: StdMutex::new(None),
                disconnects: AtomicUsize::new(0),
            }
        }

        fn sender(&self) -> mpsc::Sender<Snapshot> {
            self.updates.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl PushChannel for FakePush {
        async fn connect(&self) -> Result<mpsc::Receiver<Snapshot>, EcoFlowError> {
            if !self.connect_ok {
                return Err(EcoFlowError::Mqtt("broker unreachable".to_string()));
            }
            let (tx, rx) = mpsc::channel(8);
            *self.updates.lock().unwrap() = Some(tx);
            self.connected.store(true, Ordering::SeqCst);
            Ok(rx)
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn publish_command(&self, payload: &Value) -> Result<Value, EcoFlowError> {
            self.published.lock().unwrap().push(payload.clone());
            if self.publish_ok {
                Ok(json!({"code": 0}))
            } else {
                Err(EcoFlowError::Mqtt("no reply".to_string()))
            }
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options() -> CoordinatorOptions {
        CoordinatorOptions {
            update_interval: Duration::from_secs(15),
            diagnostic_mode: true,
            wake_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
        }
    }

    fn coordinator(rest: Option<Arc<FakeRest>>, push: Option<Arc<FakePush>>) -> Arc<HybridCoordinator> {
        HybridCoordinator::new(
            DeviceIdentity::new("MR51ZAS2PG330026", "delta_pro_3"),
            rest.map(|r| r as Arc<dyn QuotaApi>),
            push.map(|p| p as Arc<dyn PushChannel>),
            options(),
        )
    }

    #[tokio::test]
    async fn test_setup_modes() {
        let hybrid = coordinator(Some(Arc::new(FakeRest::default())), Some(Arc::new(FakePush::new(true, true))));
        assert_eq!(hybrid.setup().await.unwrap(), ConnectionMode::Hybrid);
        assert!(hybrid.mqtt_connected().await);

        let degraded = coordinator(Some(Arc::new(FakeRest::default())), Some(Arc::new(FakePush::new(false, true))));
        assert_eq!(degraded.setup().await.unwrap(), ConnectionMode::RestOnly);
        assert!(!degraded.mqtt_connected().await);

        let mqtt_only = coordinator(None, Some(Arc::new(FakePush::new(true, true))));
        assert_eq!(mqtt_only.setup().await.unwrap(), ConnectionMode::MqttOnly);

        let failed = coordinator(None, Some(Arc::new(FakePush::new(false, true))));
        assert!(matches!(failed.setup().await, Err(EcoFlowError::Mqtt(_))));

        let nothing = coordinator(None, None);
        assert!(matches!(nothing.setup().await, Err(EcoFlowError::NoDataSource)));
        assert_eq!(nothing.state().await, CoordinatorState::Uninitialized);
    }

    #[tokio::test]
    async fn test_refresh_wakes_then_replaces_snapshot() {
        let rest = Arc::new(FakeRest::returning(json!({"bmsBattSoc": 80})));
        let c = coordinator(Some(rest.clone()), None);
        c.setup().await.unwrap();

        let data = c.first_refresh().await.unwrap();
        assert_eq!(data.get("bmsBattSoc"), Some(&json!(80)));
        assert_eq!(rest.quota_calls.load(Ordering::SeqCst), 2);
        assert!(c.last_update_success());
        assert_eq!(c.data().get("bmsBattSoc"), Some(&json!(80)));
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_snapshot() {
        let rest = Arc::new(FakeRest::returning(json!({"a": 1})));
        let c = coordinator(Some(rest.clone()), None);
        c.setup().await.unwrap();
        c.refresh().await.unwrap();

        rest.quota.lock().unwrap().push(Err(EcoFlowError::Connection("x".to_string())));
        let err = c.refresh().await.unwrap_err();
        assert!(matches!(err, EcoFlowError::UpdateFailed(_)));
        assert!(err.is_retryable());
        assert!(!c.last_update_success());
        assert_eq!(c.data().get("a"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_push_merges_over_rest() {
        let rest = Arc::new(FakeRest::returning(json!({"a": 1, "b": 2})));
        let push = Arc::new(FakePush::new(true, true));
        let c = coordinator(Some(rest), Some(push.clone()));
        c.setup().await.unwrap();
        c.refresh().await.unwrap();

        let mut rx = c.subscribe();
        push.sender().send(snapshot(json!({"b": 3}))).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(Value::Object(c.data().as_ref().clone()), json!({"a": 1, "b": 3}));
    }

    #[tokio::test]
    async fn test_mqtt_only_first_refresh_succeeds_empty() {
        let c = coordinator(None, Some(Arc::new(FakePush::new(true, true))));
        c.setup().await.unwrap();
        let data = c.first_refresh().await.unwrap();
        assert!(data.is_empty());
        assert!(c.last_update_success());
    }

    #[tokio::test]
    async fn test_command_prefers_mqtt() {
        let rest = Arc::new(FakeRest::default());
        let push = Arc::new(FakePush::new(true, true));
        let c = coordinator(Some(rest.clone()), Some(push.clone()));
        c.setup().await.unwrap();

        c.send_command(&json!({"sn": "X", "params": {"cfgBeepEn": true}})).await.unwrap();
        assert_eq!(push.published.lock().unwrap().len(), 1);
        assert!(rest.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_command_falls_back_to_rest_once() {
        let rest = Arc::new(FakeRest::default());
        let push = Arc::new(FakePush::new(true, false));
        let c = coordinator(Some(rest.clone()), Some(push.clone()));
        c.setup().await.unwrap();

        c.send_command(&json!({"sn": "X", "params": {}})).await.unwrap();
        assert_eq!(push.published.lock().unwrap().len(), 1);
        assert_eq!(rest.sent.lock().unwrap().len(), 1);

        let logs = c.diagnostic_logs().await.unwrap();
        assert_eq!(logs["set_commands"].as_array().unwrap().len(), 1);
        assert_eq!(logs["set_replies"][0]["data"]["transport"], json!("rest"));
    }

    #[tokio::test]
    async fn test_command_fails_when_both_fail() {
        let rest = Arc::new(FakeRest {
            fail_set: true,
            ..Default::default()
        });
        let push = Arc::new(FakePush::new(true, false));
        let c = coordinator(Some(rest.clone()), Some(push.clone()));
        c.setup().await.unwrap();

        let err = c.send_command(&json!({"sn": "X", "params": {}})).await.unwrap_err();
        assert!(matches!(err, EcoFlowError::CommandFailed { .. }));
        assert_eq!(push.published.lock().unwrap().len(), 1);
        assert_eq!(rest.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_command_rest_only_and_mqtt_only_errors() {
        let rest = Arc::new(FakeRest {
            fail_set: true,
            ..Default::default()
        });
        let c = coordinator(Some(rest.clone()), None);
        c.setup().await.unwrap();
        assert!(matches!(
            c.send_command(&json!({})).await,
            Err(EcoFlowError::Api { .. })
        ));

        let push = Arc::new(FakePush::new(true, false));
        let m = coordinator(None, Some(push));
        m.setup().await.unwrap();
        assert!(matches!(m.send_command(&json!({})).await, Err(EcoFlowError::Mqtt(_))));
    }

    #[tokio::test]
    async fn test_entity_helpers_build_profile_payloads() {
        let rest = Arc::new(FakeRest::default());
        let c = coordinator(Some(rest.clone()), None);
        c.setup().await.unwrap();

        c.set_switch("x_boost", true).await.unwrap();
        c.set_number("max_charge_level", 120.0).await.unwrap();
        c.select_option("ac_output_frequency", "60 Hz").await.unwrap();
        let sent = rest.sent.lock().unwrap().clone();
        assert_eq!(sent[0]["params"], json!({"cfgXboostEn": true}));
        assert_eq!(sent[0]["cmdId"], json!(17));
        assert_eq!(sent[1]["params"], json!({"cfgMaxChgSoc": 100}));
        assert_eq!(sent[2]["params"], json!({"cfgAcOutFreq": 60}));

        assert!(matches!(
            c.set_switch("warp_drive", true).await,
            Err(EcoFlowError::UnknownEntity { .. })
        ));
        assert!(matches!(
            c.select_option("ac_output_frequency", "55 Hz").await,
            Err(EcoFlowError::InvalidOption { .. })
        ));
        assert_eq!(rest.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_interval_select() {
        let c = coordinator(Some(Arc::new(FakeRest::default())), None);
        c.setup().await.unwrap();
        c.select_option("update_interval", "60 seconds (Slow)").await.unwrap();
        assert_eq!(c.update_interval(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_request_refresh_triggers_poll() {
        let rest = Arc::new(FakeRest::returning(json!({"a": 1})));
        let c = coordinator(Some(rest.clone()), None);
        c.setup().await.unwrap();
        c.start_polling().await;

        let mut rx = c.subscribe();
        c.request_refresh();
        tokio::time::timeout(Duration::from_secs(5), rx.changed()).await.unwrap().unwrap();
        assert_eq!(c.data().get("a"), Some(&json!(1)));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let push = Arc::new(FakePush::new(true, true));
        let c = coordinator(Some(Arc::new(FakeRest::default())), Some(push.clone()));
        c.setup().await.unwrap();
        c.start_polling().await;

        c.shutdown().await;
        c.shutdown().await;
        assert_eq!(c.state().await, CoordinatorState::Shutdown);
        assert_eq!(push.disconnects.load(Ordering::SeqCst), 1);
        assert!(matches!(c.refresh().await, Err(EcoFlowError::Shutdown)));
        assert!(matches!(c.send_command(&json!({})).await, Err(EcoFlowError::Shutdown)));
    }

    #[tokio::test]
    async fn test_debug_output() {
        let c = coordinator(Some(Arc::new(FakeRest::default())), None);
        let text = format!("{c:?}");
        assert!(text.contains("MR51ZAS2PG330026"));
        assert!(text.contains("has_rest: true"));
        assert!(text.contains("has_push: false"));
    }

    #[tokio::test]
    async fn test_extra_battery_sensors_follow_data() {
        let c = coordinator(None, None);
        assert!(c.extra_battery_sensors().is_empty());

        c.apply_push_update(json!({"slave1Soc": 100, "slave1Temp": 25}).as_object().cloned().unwrap())
            .await;
        let sensors = c.extra_battery_sensors();
        assert_eq!(sensors.len(), 4);
        assert_eq!(sensors[0].key, "extra_battery_1_connected");
        let full = sensors.iter().find(|s| s.key == "extra_battery_1_battery_full").unwrap();
        assert!(actions::extra_battery_is_on(full, &c.data()));
    }

    #[test]
    fn test_device_info() {
        let c = coordinator(None, None);
        let info = c.device_info();
        assert_eq!(info.name, "EcoFlow Delta Pro 3");
        assert_eq!(info.model, "Delta Pro 3");
        assert_eq!(info.identifiers, vec![("ecoflow_api".to_string(), "MR51ZAS2PG330026".to_string())]);
    }
}
