//! Driver registry: descriptor catalogue and lifecycle bookkeeping.
//!
//! The registry owns every registered descriptor together with its live
//! session handle, mutable connection state and counters. It performs no
//! transport I/O of its own beyond availability probing; establishing and
//! tearing down sessions is the broker's job, which is why the state
//! mutators are crate-private.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::core::error::{HalError, Result};
use crate::core::traits::{
    ConnectMethod, DescriptorSnapshot, Driver, DriverDescriptor, DriverStats,
    RemoteEndpointConfig, SharedDriver,
};
use crate::drivers::remote::RemoteDriver;

/// Mutable per-descriptor connection state.
#[derive(Debug, Clone, Default)]
pub struct DriverState {
    pub available: bool,
    pub connected: bool,
    /// True when the active session is the remote fallback.
    pub using_fallback: bool,
    pub last_error: Option<String>,
}

/// One registered driver: static descriptor, live sessions, state and
/// counters.
pub struct DriverEntry {
    descriptor: DriverDescriptor,
    driver: Option<SharedDriver>,
    fallback_session: Option<SharedDriver>,
    state: DriverState,
    stats: DriverStats,
}

impl std::fmt::Debug for DriverEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverEntry")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

impl DriverEntry {
    pub fn descriptor(&self) -> &DriverDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// The native driver session, when one was registered.
    pub fn native_session(&self) -> Option<SharedDriver> {
        self.driver.clone()
    }

    /// The session requests should route to right now: the fallback when
    /// engaged, the native driver otherwise.
    pub fn active_session(&self) -> Option<SharedDriver> {
        if self.state.using_fallback {
            self.fallback_session.clone()
        } else {
            self.driver.clone()
        }
    }

    /// Point-in-time view of the public fields.
    pub fn snapshot(&self) -> DescriptorSnapshot {
        DescriptorSnapshot {
            name: self.descriptor.name.clone(),
            kind: self.descriptor.kind,
            version: self.descriptor.version.clone(),
            capabilities: self.descriptor.capabilities,
            available: self.state.available,
            connected: self.state.connected,
            using_fallback: self.state.using_fallback,
            last_error: self.state.last_error.clone(),
            stats: self.stats.clone(),
            captured_at: Utc::now(),
        }
    }
}

/// How availability is established for one descriptor, resolved under a
/// short-lived registry borrow so the probe itself runs lock-free.
pub(crate) enum AvailabilityProbe {
    /// Ask the driver's `detect`, bounded by the optional time limit.
    Driver(SharedDriver),
    /// Remote-only descriptor: a usable endpoint config means available,
    /// no probe request is sent.
    Endpoint(Option<RemoteEndpointConfig>),
}

/// Run one availability probe. Never fails: probe errors and expired
/// limits both read as unavailable.
pub(crate) async fn run_probe(probe: AvailabilityProbe, limit: Option<Duration>) -> bool {
    match probe {
        AvailabilityProbe::Driver(session) => {
            let mut driver = session.lock().await;
            let result = match limit {
                Some(limit) => match timeout(limit, driver.detect()).await {
                    Ok(result) => result,
                    Err(_) => Ok(false),
                },
                None => driver.detect().await,
            };
            result.unwrap_or(false)
        }
        AvailabilityProbe::Endpoint(Some(config)) => RemoteDriver::new(&config).is_ok(),
        AvailabilityProbe::Endpoint(None) => false,
    }
}

/// Owned name-to-driver store.
///
/// # Example
///
/// ```rust
/// use devhal::core::{DriverDescriptor, TransportKind};
/// use devhal::drivers::ModbusRtuDriver;
/// use devhal::registry::DriverRegistry;
///
/// let mut registry = DriverRegistry::new();
/// let descriptor = DriverDescriptor::new("meter", TransportKind::Native, "1.0.0");
/// registry
///     .register(descriptor, Some(Box::new(ModbusRtuDriver::new())))
///     .unwrap();
/// assert_eq!(registry.list(), vec!["meter".to_string()]);
/// ```
pub struct DriverRegistry {
    entries: HashMap<String, DriverEntry>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a descriptor with its driver instance.
    ///
    /// A driver instance is required unless the descriptor is
    /// remote-only, in which case the broker builds the session from the
    /// endpoint at connect time. Re-registration overwrites (last wins);
    /// re-registering while connected drops the old session without a
    /// disconnect and is a caller error.
    pub fn register(
        &mut self,
        descriptor: DriverDescriptor,
        driver: Option<Box<dyn Driver>>,
    ) -> Result<()> {
        descriptor.validate()?;
        if driver.is_none() && descriptor.kind.allows_native() {
            return Err(HalError::InvalidDescriptor(format!(
                "descriptor '{}' is {} but no driver instance was provided",
                descriptor.name, descriptor.kind
            )));
        }
        let name = descriptor.name.clone();
        let entry = DriverEntry {
            descriptor,
            driver: driver.map(|driver| Arc::new(Mutex::new(driver))),
            fallback_session: None,
            state: DriverState::default(),
            stats: DriverStats::default(),
        };
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&DriverEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| HalError::NotFound(name.to_owned()))
    }

    /// Registered names, sorted for stable output.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot(&self, name: &str) -> Result<DescriptorSnapshot> {
        Ok(self.get(name)?.snapshot())
    }

    /// Snapshots of every entry, sorted by name.
    pub fn snapshots(&self) -> Vec<DescriptorSnapshot> {
        let mut all: Vec<DescriptorSnapshot> =
            self.entries.values().map(DriverEntry::snapshot).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Probe one driver's availability and record the result.
    ///
    /// Unknown names read as unavailable rather than failing.
    pub async fn detect_availability(&mut self, name: &str, limit: Option<Duration>) -> bool {
        let Some(probe) = self.probe(name) else {
            return false;
        };
        let available = run_probe(probe, limit).await;
        self.set_availability(name, available);
        available
    }

    pub(crate) fn probe(&self, name: &str) -> Option<AvailabilityProbe> {
        let entry = self.entries.get(name)?;
        Some(match &entry.driver {
            Some(session) => AvailabilityProbe::Driver(Arc::clone(session)),
            None => AvailabilityProbe::Endpoint(entry.descriptor.fallback.clone()),
        })
    }

    pub(crate) fn set_availability(&mut self, name: &str, available: bool) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.state.available = available;
        }
    }

    pub(crate) fn store_fallback_session(&mut self, name: &str, session: SharedDriver) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.fallback_session = Some(session);
        }
    }

    pub(crate) fn mark_connected(&mut self, name: &str, method: ConnectMethod) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.state.connected = true;
            entry.state.using_fallback = matches!(method, ConnectMethod::Fallback);
            entry.state.last_error = None;
            entry.stats.connect_count += 1;
            if matches!(method, ConnectMethod::Fallback) {
                entry.stats.fallback_count += 1;
            }
        }
    }

    /// Force-reset to disconnected, dropping any fallback session. Always
    /// succeeds so a wedged connected flag cannot outlive its transport.
    pub(crate) fn mark_disconnected(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.state.connected = false;
            entry.state.using_fallback = false;
            entry.fallback_session = None;
        }
    }

    pub(crate) fn record_error(&mut self, name: &str, message: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.state.last_error = Some(message.into());
            entry.stats.error_count += 1;
            entry.stats.last_error_at = Some(Utc::now());
        }
    }

    pub(crate) fn record_read(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.stats.read_count += 1;
        }
    }

    pub(crate) fn record_write(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.stats.write_count += 1;
        }
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
