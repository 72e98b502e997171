// ── Per-interface client and keep-alive state machine ──
//
// One `Client` per configured interface: owns the RPC proxy, the
// availability flag, and the ping-pong cache that tracks outstanding
// keep-alive probes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use tracing::{debug, warn};

use crate::config::InterfaceConfig;
use crate::error::CentralError;
use crate::events::{EventBroker, InterfaceEvent, InterfaceEventKind};
use crate::model::{DeviceDescription, ParamValue, ParameterDescription, ParamsetKey};
use crate::rpc::{ProgramData, RpcError, RpcProxy, SystemVariableData};

/// Timestamp layout inside probe tokens (`<interface_id>#<timestamp>`).
pub const PONG_TOKEN_TS_FORMAT: &str = "%d.%m.%Y %H:%M:%S%.6f";

/// Clamp to microsecond precision so a timestamp survives the
/// format/parse round trip through a probe token unchanged.
fn truncate_to_micros(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(ts.nanosecond() / 1_000 * 1_000).unwrap_or(ts)
}

// ── Ping-pong cache ──────────────────────────────────────────────────

/// Keep-alive state for one interface.
///
/// Every probe registers an outstanding timestamp. A matching response
/// removes it; a response nobody is waiting for only bumps the unknown
/// counter (protocol desync is observational, never an error). Once the
/// pending count exceeds the configured threshold, every further probe
/// re-fires a degradation event carrying the current count.
#[derive(Debug)]
pub struct PingPongCache {
    interface_id: String,
    mismatch_count: usize,
    ttl: Duration,
    pending: Mutex<Vec<NaiveDateTime>>,
    unknown_count: AtomicUsize,
    events: Arc<EventBroker>,
}

impl PingPongCache {
    pub(crate) fn new(
        interface_id: impl Into<String>,
        mismatch_count: usize,
        ttl: Duration,
        events: Arc<EventBroker>,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            mismatch_count,
            ttl,
            pending: Mutex::new(Vec::new()),
            unknown_count: AtomicUsize::new(0),
            events,
        }
    }

    /// Probes sent without a matching response yet.
    pub fn pending_pong_count(&self) -> usize {
        self.pending.lock().expect("pending pong lock").len()
    }

    /// Responses received that matched no outstanding probe.
    pub fn unknown_pong_count(&self) -> usize {
        self.unknown_count.load(Ordering::SeqCst)
    }

    /// Outstanding probe timestamps, oldest first.
    pub fn pending_pong_timestamps(&self) -> Vec<NaiveDateTime> {
        self.pending.lock().expect("pending pong lock").clone()
    }

    /// Register a probe that was just sent.
    pub(crate) fn handle_send_ping(&self, ts: NaiveDateTime) {
        let count = {
            let mut pending = self.pending.lock().expect("pending pong lock");
            let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
            pending.retain(|sent| ts - *sent <= ttl);
            pending.push(ts);
            pending.len()
        };
        if count > self.mismatch_count {
            warn!(
                interface_id = %self.interface_id,
                pending = count,
                "pending probe responses exceed mismatch threshold"
            );
            self.events.fire_interface_event(&InterfaceEvent {
                interface_id: self.interface_id.clone(),
                kind: InterfaceEventKind::PendingPong {
                    pong_mismatch_count: count,
                },
            });
        }
    }

    /// Process a probe response token.
    pub(crate) fn handle_received_pong(&self, token: &str) {
        if let Some(ts) = self.parse_token(token) {
            let mut pending = self.pending.lock().expect("pending pong lock");
            if let Some(pos) = pending.iter().position(|sent| *sent == ts) {
                pending.remove(pos);
                return;
            }
        }
        self.unknown_count.fetch_add(1, Ordering::SeqCst);
        debug!(interface_id = %self.interface_id, token, "unmatched probe response");
    }

    fn parse_token(&self, token: &str) -> Option<NaiveDateTime> {
        let (interface_id, ts) = token.split_once('#')?;
        if interface_id != self.interface_id {
            return None;
        }
        NaiveDateTime::parse_from_str(ts, PONG_TOKEN_TS_FORMAT).ok()
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Live connection handle for one interface.
pub struct Client {
    interface_id: String,
    config: InterfaceConfig,
    proxy: Arc<dyn RpcProxy>,
    available: AtomicBool,
    last_event: RwLock<Option<DateTime<Utc>>>,
    ping_pong: PingPongCache,
}

impl Client {
    pub(crate) fn new(
        interface_id: impl Into<String>,
        config: InterfaceConfig,
        proxy: Arc<dyn RpcProxy>,
        mismatch_count: usize,
        mismatch_ttl: Duration,
        events: Arc<EventBroker>,
    ) -> Self {
        let interface_id = interface_id.into();
        let ping_pong =
            PingPongCache::new(interface_id.clone(), mismatch_count, mismatch_ttl, events);
        Self {
            interface_id,
            config,
            proxy,
            available: AtomicBool::new(false),
            last_event: RwLock::new(None),
            ping_pong,
        }
    }

    pub fn interface_id(&self) -> &str {
        &self.interface_id
    }

    pub fn interface_name(&self) -> &str {
        &self.config.name
    }

    pub fn ping_pong_cache(&self) -> &PingPongCache {
        &self.ping_pong
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn last_event(&self) -> Option<DateTime<Utc>> {
        *self.last_event.read().expect("last event lock")
    }

    pub(crate) fn mark_event(&self, at: DateTime<Utc>) {
        *self.last_event.write().expect("last event lock") = Some(at);
    }

    fn rpc_err(&self, err: RpcError) -> CentralError {
        match err {
            RpcError::Timeout { timeout_secs } => CentralError::Timeout { timeout_secs },
            RpcError::Unreachable { reason } => CentralError::Connectivity {
                interface_id: self.interface_id.clone(),
                reason,
            },
            other => CentralError::Rpc {
                message: other.to_string(),
            },
        }
    }

    /// Verify reachability within the init budget. Called once at startup.
    pub(crate) async fn connect(&self, init_timeout: Duration) -> Result<(), CentralError> {
        let handshake = tokio::time::timeout(init_timeout, self.proxy.ping(&self.interface_id));
        match handshake.await {
            Ok(Ok(())) => {
                self.set_available(true);
                debug!(interface_id = %self.interface_id, "interface handshake complete");
                Ok(())
            }
            Ok(Err(err)) => {
                self.set_available(false);
                Err(CentralError::Connectivity {
                    interface_id: self.interface_id.clone(),
                    reason: err.to_string(),
                })
            }
            Err(_elapsed) => {
                self.set_available(false);
                Err(CentralError::Connectivity {
                    interface_id: self.interface_id.clone(),
                    reason: format!("no handshake within {}s", init_timeout.as_secs()),
                })
            }
        }
    }

    /// Send a keep-alive probe and return current liveness.
    ///
    /// With `handle_ping_pong` the probe timestamp is registered as
    /// outstanding, to be cleared by the matching `PONG` push event.
    pub async fn probe(&self, handle_ping_pong: bool) -> bool {
        let ts = truncate_to_micros(Utc::now().naive_utc());
        let caller_id = if handle_ping_pong {
            format!("{}#{}", self.interface_id, ts.format(PONG_TOKEN_TS_FORMAT))
        } else {
            self.interface_id.clone()
        };

        match self.proxy.ping(&caller_id).await {
            Ok(()) => {
                if handle_ping_pong {
                    self.ping_pong.handle_send_ping(ts);
                }
                self.set_available(true);
                true
            }
            Err(err) => {
                debug!(interface_id = %self.interface_id, %err, "keep-alive probe failed");
                self.set_available(false);
                false
            }
        }
    }

    pub(crate) fn handle_received_pong(&self, token: &str) {
        self.ping_pong.handle_received_pong(token);
    }

    // ── Pass-through operations ──────────────────────────────────────

    pub async fn set_value(
        &self,
        channel_address: &str,
        paramset_key: ParamsetKey,
        parameter: &str,
        value: ParamValue,
    ) -> Result<(), CentralError> {
        self.proxy
            .set_value(channel_address, paramset_key, parameter, value)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    pub async fn put_paramset(
        &self,
        address: &str,
        paramset_key: ParamsetKey,
        values: HashMap<String, ParamValue>,
    ) -> Result<(), CentralError> {
        self.proxy
            .put_paramset(address, paramset_key, values)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    pub async fn get_value(
        &self,
        channel_address: &str,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> Result<ParamValue, CentralError> {
        self.proxy
            .get_value(channel_address, paramset_key, parameter)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    pub async fn execute_program(&self, pid: &str) -> Result<bool, CentralError> {
        self.proxy.execute_program(pid).await.map_err(|e| self.rpc_err(e))
    }

    pub async fn get_all_programs(
        &self,
        include_internal: bool,
    ) -> Result<Vec<ProgramData>, CentralError> {
        self.proxy
            .get_all_programs(include_internal)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    pub async fn get_all_system_variables(
        &self,
        include_internal: bool,
    ) -> Result<Vec<SystemVariableData>, CentralError> {
        self.proxy
            .get_all_system_variables(include_internal)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    pub async fn get_system_variable(&self, name: &str) -> Result<ParamValue, CentralError> {
        self.proxy
            .get_system_variable(name)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    pub async fn set_system_variable(
        &self,
        name: &str,
        value: ParamValue,
    ) -> Result<(), CentralError> {
        self.proxy
            .set_system_variable(name, value)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    pub async fn set_install_mode(
        &self,
        on: bool,
        duration_secs: u32,
        mode: u32,
        device_address: Option<&str>,
    ) -> Result<(), CentralError> {
        self.proxy
            .set_install_mode(on, duration_secs, mode, device_address)
            .await
            .map_err(|e| self.rpc_err(e))
    }

    // ── Discovery ────────────────────────────────────────────────────

    pub(crate) async fn fetch_device_descriptions(
        &self,
    ) -> Result<Vec<DeviceDescription>, CentralError> {
        self.proxy.list_devices().await.map_err(|e| self.rpc_err(e))
    }

    pub(crate) async fn fetch_paramset_description(
        &self,
        channel_address: &str,
        paramset_key: ParamsetKey,
    ) -> Result<HashMap<String, ParameterDescription>, CentralError> {
        self.proxy
            .get_paramset_description(channel_address, paramset_key)
            .await
            .map_err(|e| self.rpc_err(e))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("interface_id", &self.interface_id)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    const IFACE: &str = "CentralTest-BidCos-RF";

    fn cache_with_counter(mismatch_count: usize) -> (PingPongCache, Arc<AtomicUsize>, Arc<Mutex<Vec<usize>>>) {
        let events = Arc::new(EventBroker::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let counts = Arc::new(Mutex::new(Vec::new()));
        {
            let fired = Arc::clone(&fired);
            let counts = Arc::clone(&counts);
            events.register_interface_event_callback(move |event| {
                if let InterfaceEventKind::PendingPong { pong_mismatch_count } = event.kind {
                    fired.fetch_add(1, Ordering::SeqCst);
                    counts.lock().expect("counts lock").push(pong_mismatch_count);
                }
            });
        }
        let cache = PingPongCache::new(IFACE, mismatch_count, Duration::from_secs(300), events);
        (cache, fired, counts)
    }

    fn ts(micros_offset: i64) -> NaiveDateTime {
        truncate_to_micros(Utc::now().naive_utc()) + chrono::Duration::microseconds(micros_offset)
    }

    fn token_for(ts: NaiveDateTime) -> String {
        format!("{IFACE}#{}", ts.format(PONG_TOKEN_TS_FORMAT))
    }

    #[test]
    fn pending_count_tracks_unanswered_probes() {
        let (cache, _, _) = cache_with_counter(15);
        for i in 0..5 {
            cache.handle_send_ping(ts(i));
        }
        assert_eq!(cache.pending_pong_count(), 5);
        assert_eq!(cache.unknown_pong_count(), 0);
    }

    #[test]
    fn matching_pong_removes_exactly_one_entry() {
        let (cache, _, _) = cache_with_counter(15);
        let first = ts(0);
        let second = ts(1);
        cache.handle_send_ping(first);
        cache.handle_send_ping(second);

        cache.handle_received_pong(&token_for(first));
        assert_eq!(cache.pending_pong_count(), 1);
        assert_eq!(cache.unknown_pong_count(), 0);
        assert_eq!(cache.pending_pong_timestamps(), vec![second]);
    }

    #[test]
    fn unmatched_pong_only_bumps_unknown_counter() {
        let (cache, _, _) = cache_with_counter(15);
        cache.handle_send_ping(ts(0));

        cache.handle_received_pong(&token_for(ts(999)));
        assert_eq!(cache.pending_pong_count(), 1);
        assert_eq!(cache.unknown_pong_count(), 1);

        // Garbled tokens and foreign interface ids also count as unknown.
        cache.handle_received_pong("not-a-token");
        cache.handle_received_pong(&format!("other-interface#{}", ts(0).format(PONG_TOKEN_TS_FORMAT)));
        assert_eq!(cache.unknown_pong_count(), 3);
        assert_eq!(cache.pending_pong_count(), 1);
    }

    #[test]
    fn threshold_excess_fires_once_per_probe() {
        let (cache, fired, counts) = cache_with_counter(3);
        for i in 0..4 {
            cache.handle_send_ping(ts(i));
        }
        // Exactly one event after threshold + 1 probes, carrying the count.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*counts.lock().expect("counts lock"), vec![4]);

        // Repeated excess re-fires once per probe.
        cache.handle_send_ping(ts(10));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(*counts.lock().expect("counts lock"), vec![4, 5]);
    }

    #[test]
    fn stale_pending_probes_are_dropped_after_ttl() {
        let events = Arc::new(EventBroker::new());
        let cache = PingPongCache::new(IFACE, 15, Duration::from_secs(300), events);

        let old = ts(0) - chrono::Duration::seconds(301);
        cache.handle_send_ping(old);
        assert_eq!(cache.pending_pong_count(), 1);

        cache.handle_send_ping(ts(0));
        assert_eq!(cache.pending_pong_count(), 1);
        assert_eq!(cache.pending_pong_timestamps().first().map(|t| *t < old), Some(false));
    }

    #[test]
    fn token_round_trips_through_format() {
        let stamp = truncate_to_micros(Utc::now().naive_utc());
        let rendered = stamp.format(PONG_TOKEN_TS_FORMAT).to_string();
        let parsed = NaiveDateTime::parse_from_str(&rendered, PONG_TOKEN_TS_FORMAT)
            .expect("token timestamp parses");
        assert_eq!(parsed, stamp);
    }

    /// Answers pings, rejects everything else.
    struct PingOnlyProxy;

    fn not_implemented<T>() -> Result<T, RpcError> {
        Err(RpcError::Protocol {
            message: "not implemented".into(),
        })
    }

    #[async_trait::async_trait]
    impl RpcProxy for PingOnlyProxy {
        async fn ping(&self, _caller_id: &str) -> Result<(), RpcError> {
            Ok(())
        }

        async fn set_value(
            &self,
            _channel_address: &str,
            _paramset_key: ParamsetKey,
            _parameter: &str,
            _value: ParamValue,
        ) -> Result<(), RpcError> {
            not_implemented()
        }

        async fn put_paramset(
            &self,
            _address: &str,
            _paramset_key: ParamsetKey,
            _values: HashMap<String, ParamValue>,
        ) -> Result<(), RpcError> {
            not_implemented()
        }

        async fn get_value(
            &self,
            _channel_address: &str,
            _paramset_key: ParamsetKey,
            _parameter: &str,
        ) -> Result<ParamValue, RpcError> {
            not_implemented()
        }

        async fn get_paramset(
            &self,
            _address: &str,
            _paramset_key: ParamsetKey,
        ) -> Result<HashMap<String, ParamValue>, RpcError> {
            not_implemented()
        }

        async fn list_devices(&self) -> Result<Vec<DeviceDescription>, RpcError> {
            not_implemented()
        }

        async fn get_paramset_description(
            &self,
            _channel_address: &str,
            _paramset_key: ParamsetKey,
        ) -> Result<HashMap<String, ParameterDescription>, RpcError> {
            not_implemented()
        }

        async fn get_all_programs(
            &self,
            _include_internal: bool,
        ) -> Result<Vec<ProgramData>, RpcError> {
            not_implemented()
        }

        async fn execute_program(&self, _pid: &str) -> Result<bool, RpcError> {
            not_implemented()
        }

        async fn get_all_system_variables(
            &self,
            _include_internal: bool,
        ) -> Result<Vec<SystemVariableData>, RpcError> {
            not_implemented()
        }

        async fn get_system_variable(&self, _name: &str) -> Result<ParamValue, RpcError> {
            not_implemented()
        }

        async fn set_system_variable(
            &self,
            _name: &str,
            _value: ParamValue,
        ) -> Result<(), RpcError> {
            not_implemented()
        }

        async fn set_install_mode(
            &self,
            _on: bool,
            _duration_secs: u32,
            _mode: u32,
            _device_address: Option<&str>,
        ) -> Result<(), RpcError> {
            not_implemented()
        }
    }

    fn ping_only_client() -> Client {
        Client::new(
            IFACE,
            InterfaceConfig::new("BidCos-RF", 2001),
            Arc::new(PingOnlyProxy),
            15,
            Duration::from_secs(300),
            Arc::new(EventBroker::new()),
        )
    }

    #[tokio::test]
    async fn plain_probe_skips_ping_pong_bookkeeping() {
        let client = ping_only_client();

        assert!(client.probe(false).await);
        assert!(client.is_available());
        assert_eq!(client.ping_pong_cache().pending_pong_count(), 0);
        assert_eq!(client.ping_pong_cache().unknown_pong_count(), 0);

        // The tracked variant registers an outstanding probe.
        assert!(client.probe(true).await);
        assert_eq!(client.ping_pong_cache().pending_pong_count(), 1);
    }
}
