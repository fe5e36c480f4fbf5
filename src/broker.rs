//! Connection broker: session orchestration with native-to-remote fallback.
//!
//! The broker is the public face of the HAL. It owns the registry behind a
//! read/write lock, runs the connect algorithm (native first, remote
//! fallback second), routes data operations to the active session and
//! pushes typed [`HalEvent`]s to subscribers. Registry locks are never held
//! across transport I/O; the per-session mutex inside [`SharedDriver`] is
//! what serializes requests to one device.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::core::error::{HalError, Result};
use crate::core::traits::{
    ConnectAck, ConnectMethod, ConnectOutcome, DescriptorSnapshot, Driver, DriverDescriptor,
    HalEvent, HalEventHandler, HalEventReceiver, HalEventSender, ReadPayload,
    RemoteEndpointConfig, SharedDriver, WriteAck,
};
use crate::drivers::remote::RemoteDriver;
use crate::registry::{run_probe, DriverRegistry};

/// Bound applied to a single availability probe unless overridden.
pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(2);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Session orchestrator over a [`DriverRegistry`].
///
/// # Example
///
/// ```rust,no_run
/// use devhal::broker::ConnectionBroker;
/// use devhal::core::{DriverDescriptor, TransportKind};
/// use devhal::drivers::ModbusRtuDriver;
/// use serde_json::json;
///
/// # async fn run() -> devhal::Result<()> {
/// let broker = ConnectionBroker::new();
/// let descriptor = DriverDescriptor::new("meter", TransportKind::Native, "1.0.0");
/// broker
///     .register(descriptor, Some(Box::new(ModbusRtuDriver::new())))
///     .await?;
/// let outcome = broker
///     .connect("meter", &json!({ "port": "/dev/ttyUSB0", "slaveId": 5 }))
///     .await?;
/// println!("connected via {}", outcome.method);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBroker {
    registry: Arc<RwLock<DriverRegistry>>,
    events: HalEventSender,
    handler: Option<Arc<dyn HalEventHandler>>,
    detect_limit: Duration,
}

impl ConnectionBroker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: Arc::new(RwLock::new(DriverRegistry::new())),
            events,
            handler: None,
            detect_limit: DEFAULT_DETECT_TIMEOUT,
        }
    }

    /// Replace the bound applied to availability probes.
    #[must_use]
    pub fn with_detect_timeout(mut self, limit: Duration) -> Self {
        self.detect_limit = limit;
        self
    }

    /// Attach a push-style observer called for every event, in addition to
    /// the broadcast channel.
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn HalEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> HalEventReceiver {
        self.events.subscribe()
    }

    /// Shared handle to the underlying registry, for status tooling.
    pub fn registry(&self) -> Arc<RwLock<DriverRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Register a descriptor with its driver instance. Remote-only
    /// descriptors may pass `None`; the broker builds the session from the
    /// endpoint at connect time.
    pub async fn register(
        &self,
        descriptor: DriverDescriptor,
        driver: Option<Box<dyn Driver>>,
    ) -> Result<()> {
        let name = descriptor.name.clone();
        self.registry.write().await.register(descriptor, driver)?;
        self.emit(HalEvent::Registered { driver: name }).await;
        Ok(())
    }

    /// Probe availability, bounded by the broker's detect timeout.
    ///
    /// Never fails outward: unknown drivers and probe errors both read as
    /// unavailable. Emits [`HalEvent::AvailabilityChanged`] when the
    /// recorded value flips.
    pub async fn is_available(&self, name: &str) -> bool {
        let probe = match self.registry.read().await.probe(name) {
            Some(probe) => probe,
            None => return false,
        };
        let available = run_probe(probe, Some(self.detect_limit)).await;

        let changed = {
            let mut registry = self.registry.write().await;
            let changed = registry
                .get(name)
                .map(|entry| entry.state().available != available)
                .unwrap_or(false);
            registry.set_availability(name, available);
            changed
        };
        if changed {
            self.emit(HalEvent::AvailabilityChanged {
                driver: name.to_owned(),
                available,
            })
            .await;
        }
        available
    }

    /// Open a session.
    ///
    /// Native and hybrid descriptors try the native driver first. When the
    /// native attempt fails and the descriptor is hybrid, the remote
    /// fallback is tried next and a failure there reports both causes.
    /// Remote-only descriptors go straight to the endpoint; their native
    /// driver, if one was registered, is never touched.
    pub async fn connect(&self, name: &str, options: &Value) -> Result<ConnectOutcome> {
        let (kind, native, fallback) = {
            let registry = self.registry.read().await;
            let entry = registry.get(name)?;
            if entry.state().connected {
                return Err(HalError::AlreadyConnected(name.to_owned()));
            }
            (
                entry.descriptor().kind,
                entry.native_session(),
                entry.descriptor().fallback.clone(),
            )
        };

        if !kind.allows_native() {
            return self.connect_remote(name, options, fallback.as_ref(), None).await;
        }

        let session = native.ok_or_else(|| {
            HalError::InvalidDescriptor(format!("descriptor '{name}' has no driver instance"))
        })?;
        let native_err = {
            let mut driver = session.lock().await;
            match driver.connect(options).await {
                Ok(ack) => {
                    drop(driver);
                    self.registry
                        .write()
                        .await
                        .mark_connected(name, ConnectMethod::Native);
                    self.emit(HalEvent::Connected {
                        driver: name.to_owned(),
                        method: ConnectMethod::Native,
                    })
                    .await;
                    return Ok(ConnectOutcome {
                        method: ConnectMethod::Native,
                        warning: ack.warning,
                        data: ack.data,
                    });
                }
                Err(err) => err,
            }
        };

        if kind.allows_fallback() && fallback.is_some() {
            #[cfg(feature = "tracing-support")]
            tracing::warn!(
                driver = name,
                error = %native_err,
                "native connect failed, trying remote fallback"
            );
            return self
                .connect_remote(name, options, fallback.as_ref(), Some(native_err))
                .await;
        }

        self.fail_operation(name, "connect", &native_err).await;
        Err(native_err)
    }

    /// Second half of the connect algorithm: build the remote session from
    /// the endpoint config and open it. `native_err` carries the failed
    /// native attempt when this is a hybrid fallback.
    async fn connect_remote(
        &self,
        name: &str,
        options: &Value,
        fallback: Option<&RemoteEndpointConfig>,
        native_err: Option<HalError>,
    ) -> Result<ConnectOutcome> {
        match self.open_remote_session(name, options, fallback).await {
            Ok(ack) => {
                self.registry
                    .write()
                    .await
                    .mark_connected(name, ConnectMethod::Fallback);
                if let Some(err) = native_err {
                    self.emit(HalEvent::FallbackEngaged {
                        driver: name.to_owned(),
                        reason: err.to_string(),
                    })
                    .await;
                }
                self.emit(HalEvent::Connected {
                    driver: name.to_owned(),
                    method: ConnectMethod::Fallback,
                })
                .await;
                Ok(ConnectOutcome {
                    method: ConnectMethod::Fallback,
                    warning: ack.warning,
                    data: ack.data,
                })
            }
            Err(remote_err) => {
                let err = match native_err {
                    Some(native) => HalError::FallbackFailed {
                        native: Box::new(native),
                        remote: Box::new(remote_err),
                    },
                    None => remote_err,
                };
                self.fail_operation(name, "connect", &err).await;
                Err(err)
            }
        }
    }

    async fn open_remote_session(
        &self,
        name: &str,
        options: &Value,
        fallback: Option<&RemoteEndpointConfig>,
    ) -> Result<ConnectAck> {
        let config = fallback.ok_or_else(|| {
            HalError::config(format!("descriptor '{name}' has no fallback endpoint"))
        })?;
        let mut driver = RemoteDriver::new(config)?;
        let ack = driver.connect(options).await?;
        let session: Box<dyn Driver> = Box::new(driver);
        self.registry
            .write()
            .await
            .store_fallback_session(name, Arc::new(Mutex::new(session)));
        Ok(ack)
    }

    /// Tear down the active session.
    ///
    /// Idempotent. Transport teardown failures are recorded and swallowed;
    /// the descriptor always ends disconnected, because a half-closed
    /// handle is worse than a lost error.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let session = {
            let registry = self.registry.read().await;
            let entry = registry.get(name)?;
            if !entry.state().connected {
                return Ok(());
            }
            entry.active_session()
        };

        let mut teardown_err = None;
        if let Some(session) = session {
            let mut driver = session.lock().await;
            if let Err(err) = driver.disconnect().await {
                teardown_err = Some(err.to_string());
            }
        }

        {
            let mut registry = self.registry.write().await;
            if let Some(message) = teardown_err {
                registry.record_error(name, message);
            }
            registry.mark_disconnected(name);
        }
        self.emit(HalEvent::Disconnected {
            driver: name.to_owned(),
        })
        .await;
        Ok(())
    }

    /// Read from a connected driver, routed to the active session.
    pub async fn read(&self, name: &str, params: &Value) -> Result<ReadPayload> {
        let session = self.session_for(name, "read").await?;
        let result = {
            let mut driver = session.lock().await;
            driver.read(params).await
        };
        match result {
            Ok(payload) => {
                self.registry.write().await.record_read(name);
                Ok(payload)
            }
            Err(err) => {
                self.fail_operation(name, "read", &err).await;
                Err(err)
            }
        }
    }

    /// Write to a connected driver, routed to the active session.
    pub async fn write(&self, name: &str, params: &Value) -> Result<WriteAck> {
        let session = self.session_for(name, "write").await?;
        let result = {
            let mut driver = session.lock().await;
            driver.write(params).await
        };
        match result {
            Ok(ack) => {
                self.registry.write().await.record_write(name);
                Ok(ack)
            }
            Err(err) => {
                self.fail_operation(name, "write", &err).await;
                Err(err)
            }
        }
    }

    /// Registered driver names, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.registry.read().await.list()
    }

    /// Snapshot of one descriptor's public state.
    pub async fn status(&self, name: &str) -> Result<DescriptorSnapshot> {
        self.registry.read().await.snapshot(name)
    }

    /// Snapshots of every registered descriptor, sorted by name.
    pub async fn statuses(&self) -> Vec<DescriptorSnapshot> {
        self.registry.read().await.snapshots()
    }

    /// Disconnect every registered driver. Per-driver failures are
    /// swallowed so one wedged transport cannot block the rest.
    pub async fn shutdown(&self) {
        for name in self.list().await {
            let _ = self.disconnect(&name).await;
        }
    }

    /// Guard chain for data operations: the driver must exist, be
    /// connected and carry the matching capability flag. Returns the
    /// active session so the caller can lock it without the registry.
    async fn session_for(&self, name: &str, operation: &'static str) -> Result<SharedDriver> {
        let registry = self.registry.read().await;
        let entry = registry.get(name)?;
        if !entry.state().connected {
            return Err(HalError::NotConnected(name.to_owned()));
        }
        let capabilities = entry.descriptor().capabilities;
        let permitted = match operation {
            "read" => capabilities.read,
            "write" => capabilities.write,
            _ => false,
        };
        if !permitted {
            return Err(HalError::unsupported(name, operation));
        }
        entry
            .active_session()
            .ok_or_else(|| HalError::NotConnected(name.to_owned()))
    }

    async fn fail_operation(&self, name: &str, operation: &'static str, err: &HalError) {
        self.registry
            .write()
            .await
            .record_error(name, err.to_string());
        self.emit(HalEvent::OperationFailed {
            driver: name.to_owned(),
            operation,
            message: err.to_string(),
        })
        .await;
    }

    async fn emit(&self, event: HalEvent) {
        if let Some(handler) = &self.handler {
            handler.on_event(&event).await;
        }
        // No live subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for ConnectionBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::modbus_rtu::RtuFrame;
    use crate::core::traits::{ConnectionState, Diagnostics, DriverCapabilities, TransportKind};
    use crate::drivers::ModbusRtuDriver;
    use crate::transport::mock::MockSlave;
    use async_trait::async_trait;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SpyDriver {
        attempts: Arc<AtomicUsize>,
        fail_connect: bool,
        fail_disconnect: bool,
        state: ConnectionState,
    }

    impl SpyDriver {
        fn working(attempts: Arc<AtomicUsize>) -> Self {
            Self {
                attempts,
                fail_connect: false,
                fail_disconnect: false,
                state: ConnectionState::Disconnected,
            }
        }

        fn broken(attempts: Arc<AtomicUsize>) -> Self {
            Self {
                fail_connect: true,
                ..Self::working(attempts)
            }
        }
    }

    #[async_trait]
    impl Driver for SpyDriver {
        fn name(&self) -> &'static str {
            "spy"
        }

        fn connection_state(&self) -> ConnectionState {
            self.state
        }

        async fn diagnostics(&self) -> Diagnostics {
            Diagnostics {
                driver: "spy".into(),
                connection_state: self.state,
                read_count: 0,
                write_count: 0,
                error_count: 0,
                last_error: None,
                extra: Value::Null,
            }
        }

        async fn detect(&mut self) -> Result<bool> {
            Ok(true)
        }

        async fn connect(&mut self, _options: &Value) -> Result<ConnectAck> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(HalError::transport("native port missing"));
            }
            self.state = ConnectionState::Connected;
            Ok(ConnectAck::ok().with_data(json!({ "via": "native" })))
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.state = ConnectionState::Disconnected;
            if self.fail_disconnect {
                return Err(HalError::transport("port vanished mid-close"));
            }
            Ok(())
        }

        async fn read(&mut self, _params: &Value) -> Result<ReadPayload> {
            Ok(ReadPayload::Registers(vec![7]))
        }

        async fn write(&mut self, _params: &Value) -> Result<WriteAck> {
            Ok(WriteAck::Sent { bytes: 3 })
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hal")
    }

    fn echo_app() -> Router {
        Router::new().route(
            "/hal",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "status": "ok", "echo": body }))
            }),
        )
    }

    fn drain(rx: &mut HalEventReceiver) -> Vec<HalEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn hybrid(name: &str, url: &str) -> DriverDescriptor {
        DriverDescriptor::new(name, TransportKind::Hybrid, "1.0.0")
            .with_capabilities(DriverCapabilities::read_write())
            .with_fallback(RemoteEndpointConfig::new(url))
    }

    #[tokio::test]
    async fn native_connect_never_reaches_the_fallback() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let mut rx = broker.subscribe();
        broker
            .register(
                // Dead endpoint: the test fails loudly if it is ever dialed.
                hybrid("cam", "http://127.0.0.1:1/hal"),
                Some(Box::new(SpyDriver::working(Arc::clone(&attempts)))),
            )
            .await
            .unwrap();

        let outcome = broker.connect("cam", &json!({})).await.unwrap();
        assert_eq!(outcome.method, ConnectMethod::Native);
        assert_eq!(outcome.data, Some(json!({ "via": "native" })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let snapshot = broker.status("cam").await.unwrap();
        assert!(snapshot.connected);
        assert!(!snapshot.using_fallback);
        assert_eq!(snapshot.stats.connect_count, 1);
        assert_eq!(snapshot.stats.fallback_count, 0);

        let events = drain(&mut rx);
        assert!(events.contains(&HalEvent::Registered {
            driver: "cam".into()
        }));
        assert!(events.contains(&HalEvent::Connected {
            driver: "cam".into(),
            method: ConnectMethod::Native,
        }));
    }

    #[tokio::test]
    async fn hybrid_falls_back_when_native_fails() {
        let url = serve(echo_app()).await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let mut rx = broker.subscribe();
        broker
            .register(
                hybrid("cam", &url),
                Some(Box::new(SpyDriver::broken(Arc::clone(&attempts)))),
            )
            .await
            .unwrap();

        let outcome = broker.connect("cam", &json!({})).await.unwrap();
        assert_eq!(outcome.method, ConnectMethod::Fallback);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let snapshot = broker.status("cam").await.unwrap();
        assert!(snapshot.connected);
        assert!(snapshot.using_fallback);
        assert_eq!(snapshot.stats.fallback_count, 1);

        let events = drain(&mut rx);
        let engaged = events.iter().any(|event| {
            matches!(
                event,
                HalEvent::FallbackEngaged { driver, reason }
                    if driver == "cam" && reason.contains("native port missing")
            )
        });
        assert!(engaged, "expected FallbackEngaged, got {events:?}");

        // Data operations now route to the remote session.
        let payload = broker.read("cam", &json!({ "sensor": 1 })).await.unwrap();
        match payload {
            ReadPayload::Json(value) => {
                assert_eq!(value["echo"]["action"], json!("read"));
            }
            other => panic!("expected remote JSON payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dual_failure_reports_both_causes() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        broker
            .register(
                hybrid("cam", "http://127.0.0.1:1/hal"),
                Some(Box::new(SpyDriver::broken(attempts))),
            )
            .await
            .unwrap();

        let err = broker.connect("cam", &json!({})).await.unwrap_err();
        assert!(matches!(err, HalError::FallbackFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("native transport failed"));
        assert!(message.contains("remote fallback failed"));

        let snapshot = broker.status("cam").await.unwrap();
        assert!(!snapshot.connected);
        assert!(snapshot.last_error.is_some());
        assert_eq!(snapshot.stats.error_count, 1);
    }

    #[tokio::test]
    async fn remote_only_never_touches_the_native_driver() {
        let url = serve(echo_app()).await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let descriptor = DriverDescriptor::new("bridge", TransportKind::Remote, "1.0.0")
            .with_capabilities(DriverCapabilities::read_write())
            .with_fallback(RemoteEndpointConfig::new(&url));
        broker
            .register(
                descriptor,
                Some(Box::new(SpyDriver::working(Arc::clone(&attempts)))),
            )
            .await
            .unwrap();

        let outcome = broker.connect("bridge", &json!({})).await.unwrap();
        assert_eq!(outcome.method, ConnectMethod::Fallback);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert!(broker.status("bridge").await.unwrap().using_fallback);
    }

    #[tokio::test]
    async fn capability_flags_gate_operations_before_any_io() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let descriptor = DriverDescriptor::new("probe", TransportKind::Native, "1.0.0")
            .with_capabilities(DriverCapabilities::read_only());
        broker
            .register(descriptor, Some(Box::new(SpyDriver::working(attempts))))
            .await
            .unwrap();
        broker.connect("probe", &json!({})).await.unwrap();

        let payload = broker.read("probe", &json!({})).await.unwrap();
        assert_eq!(payload.as_registers(), Some(&[7u16][..]));

        let err = broker.write("probe", &json!({})).await.unwrap_err();
        assert!(matches!(err, HalError::UnsupportedOperation { .. }));

        let snapshot = broker.status("probe").await.unwrap();
        assert_eq!(snapshot.stats.read_count, 1);
        assert_eq!(snapshot.stats.write_count, 0);
    }

    #[tokio::test]
    async fn connect_twice_is_rejected_without_a_second_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let descriptor = DriverDescriptor::new("cam", TransportKind::Native, "1.0.0");
        broker
            .register(
                descriptor,
                Some(Box::new(SpyDriver::working(Arc::clone(&attempts)))),
            )
            .await
            .unwrap();

        broker.connect("cam", &json!({})).await.unwrap();
        let err = broker.connect("cam", &json!({})).await.unwrap_err();
        assert!(matches!(err, HalError::AlreadyConnected(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_force_resets_even_when_teardown_fails() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let descriptor = DriverDescriptor::new("cam", TransportKind::Native, "1.0.0");
        let driver = SpyDriver {
            fail_disconnect: true,
            ..SpyDriver::working(attempts)
        };
        broker
            .register(descriptor, Some(Box::new(driver)))
            .await
            .unwrap();
        broker.connect("cam", &json!({})).await.unwrap();

        broker.disconnect("cam").await.unwrap();
        let snapshot = broker.status("cam").await.unwrap();
        assert!(!snapshot.connected);
        assert!(!snapshot.using_fallback);
        assert!(snapshot
            .last_error
            .as_deref()
            .is_some_and(|message| message.contains("port vanished")));

        // Second call is a no-op.
        broker.disconnect("cam").await.unwrap();
        let err = broker.disconnect("ghost").await.unwrap_err();
        assert!(matches!(err, HalError::NotFound(_)));
    }

    #[tokio::test]
    async fn data_operations_require_a_connection() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let descriptor = DriverDescriptor::new("cam", TransportKind::Native, "1.0.0")
            .with_capabilities(DriverCapabilities::read_write());
        broker
            .register(descriptor, Some(Box::new(SpyDriver::working(attempts))))
            .await
            .unwrap();

        let err = broker.read("cam", &json!({})).await.unwrap_err();
        assert!(matches!(err, HalError::NotConnected(_)));
        let err = broker.write("cam", &json!({})).await.unwrap_err();
        assert!(matches!(err, HalError::NotConnected(_)));
        let err = broker.read("ghost", &json!({})).await.unwrap_err();
        assert!(matches!(err, HalError::NotFound(_)));
    }

    #[tokio::test]
    async fn availability_flips_are_announced_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new();
        let mut rx = broker.subscribe();
        broker
            .register(
                DriverDescriptor::new("cam", TransportKind::Native, "1.0.0"),
                Some(Box::new(SpyDriver::working(attempts))),
            )
            .await
            .unwrap();

        assert!(broker.is_available("cam").await);
        assert!(broker.is_available("cam").await);
        assert!(!broker.is_available("ghost").await);

        let flips = drain(&mut rx)
            .into_iter()
            .filter(|event| matches!(event, HalEvent::AvailabilityChanged { .. }))
            .count();
        assert_eq!(flips, 1);
    }

    #[tokio::test]
    async fn event_handler_sees_the_lifecycle() {
        struct Recorder {
            events: Mutex<Vec<HalEvent>>,
        }

        #[async_trait]
        impl HalEventHandler for Recorder {
            async fn on_event(&self, event: &HalEvent) {
                self.events.lock().await.push(event.clone());
            }
        }

        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        let attempts = Arc::new(AtomicUsize::new(0));
        let broker = ConnectionBroker::new().with_event_handler(Arc::clone(&recorder) as _);
        broker
            .register(
                DriverDescriptor::new("cam", TransportKind::Native, "1.0.0"),
                Some(Box::new(SpyDriver::working(attempts))),
            )
            .await
            .unwrap();
        broker.connect("cam", &json!({})).await.unwrap();
        broker.shutdown().await;

        let seen = recorder.events.lock().await;
        assert_eq!(
            *seen,
            vec![
                HalEvent::Registered {
                    driver: "cam".into()
                },
                HalEvent::Connected {
                    driver: "cam".into(),
                    method: ConnectMethod::Native,
                },
                HalEvent::Disconnected {
                    driver: "cam".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn modbus_session_end_to_end() {
        let response = RtuFrame::new(5, 0x03, vec![0x04, 0x00, 0x01, 0x00, 0x02]).encode();
        let driver = ModbusRtuDriver::new().with_channel(MockSlave::new().reply(response).spawn());

        let broker = ConnectionBroker::new();
        let descriptor = DriverDescriptor::new("meter", TransportKind::Native, "1.0.0")
            .with_capabilities(DriverCapabilities::read_write());
        broker
            .register(descriptor, Some(Box::new(driver)))
            .await
            .unwrap();

        let outcome = broker
            .connect("meter", &json!({ "baudRate": 9600, "slaveId": 5, "timeout": 500 }))
            .await
            .unwrap();
        assert_eq!(outcome.method, ConnectMethod::Native);

        let payload = broker
            .read("meter", &json!({ "address": 0, "quantity": 2 }))
            .await
            .unwrap();
        assert_eq!(payload.as_registers(), Some(&[1u16, 2][..]));

        let snapshot = broker.status("meter").await.unwrap();
        assert!(snapshot.connected);
        assert_eq!(snapshot.stats.read_count, 1);

        broker.disconnect("meter").await.unwrap();
        assert!(!broker.status("meter").await.unwrap().connected);
    }
}
