use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep, timeout};
use uuid::Uuid;

use voltsync_api::message::{CommandEnvelope, ResponseEnvelope};

use crate::errors::{CommandError, TransportError};
use crate::services::transport::UdpMultiplexer;

/// Per-attempt wait for a device to answer.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Default transmission budget for routine commands.
pub const DEFAULT_ATTEMPTS: u32 = 3;

const ID_PREFIX: &str = "voltsync";

/// Backoff schedule between retransmissions: `base_delay * 2^attempt`,
/// capped, plus a little jitter so a fleet of pollers that timed out
/// together does not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(10))
            .min(self.max_delay);

        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return exponential;
        }

        exponential + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Rolling per-device command statistics. The diagnostics exporter consumes
/// these verbatim; the polling service embeds them into snapshots.
#[derive(Debug, Clone, Default)]
pub struct CommandStats {
    pub total_attempts: u64,
    pub total_success: u64,
    pub total_timeouts: u64,
    pub last_latency: Option<Duration>,
    pub last_attempt: Option<OffsetDateTime>,
    pub last_success: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

/// Turns "send this method to this device" into one awaitable outcome over
/// the shared transport. Any number of `execute` calls may be in flight
/// concurrently; each holds a distinct correlation id for its whole
/// lifetime, so one response resolves at most one command.
pub struct CommandService {
    transport: Arc<UdpMultiplexer>,
    pending: Arc<Mutex<HashSet<String>>>,
    stats: Arc<Mutex<HashMap<SocketAddr, CommandStats>>>,
    retry: RetryPolicy,
}

impl CommandService {
    pub fn new(transport: Arc<UdpMultiplexer>) -> Self {
        Self::with_retry(transport, RetryPolicy::default())
    }

    pub fn with_retry(transport: Arc<UdpMultiplexer>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(HashSet::new())),
            stats: Arc::new(Mutex::new(HashMap::new())),
            retry,
        }
    }

    pub fn transport(&self) -> &Arc<UdpMultiplexer> {
        &self.transport
    }

    /// Statistics snapshot for one device address.
    pub fn stats_for(&self, device: SocketAddr) -> CommandStats {
        self.stats.lock().get(&device).cloned().unwrap_or_default()
    }

    /// Send `method` to `device` and wait for the correlated response.
    ///
    /// Each timed-out attempt retransmits the *same* correlation id after a
    /// backoff, so a late reply to an earlier transmission still resolves
    /// the command. A reply carrying an `error` payload fails immediately;
    /// a reply missing both `result` and `error` counts as a failed attempt
    /// and is retried. With `max_attempts = N` and a silent device, exactly
    /// N datagrams leave the socket before `Timeout` is returned.
    pub async fn execute(
        &self,
        device: SocketAddr,
        method: &str,
        params: Option<Value>,
        per_attempt_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Value, CommandError> {
        let pending_id = self.mint_id();
        let envelope = CommandEnvelope::new(pending_id.id.clone(), method, params);
        let payload = envelope.to_bytes()?;

        let correlation_id = envelope.id.clone();
        let host = device.ip();
        let (_listener, mut rx) = self.transport.register_listener(Some(Box::new(
            move |value, addr| {
                addr.ip() == host
                    && ResponseEnvelope::peek_id(value) == Some(correlation_id.as_str())
            },
        )));

        let mut malformed: Option<String> = None;

        for attempt in 0..max_attempts {
            self.record_attempt(device);
            self.transport.send(&payload, device).await?;
            let started = Instant::now();

            match timeout(per_attempt_timeout, rx.recv()).await {
                Ok(Some((value, _addr))) => match interpret(value) {
                    Interpretation::Result(result) => {
                        self.record_success(device, started.elapsed());
                        return Ok(result);
                    }
                    Interpretation::Rejected(reason) => {
                        self.record_error(device, &reason);
                        return Err(CommandError::DeviceRejected {
                            method: method.to_string(),
                            reason,
                        });
                    }
                    Interpretation::Malformed(reason) => {
                        self.record_error(device, &reason);
                        tracing::warn!(%device, method, "Malformed response: {reason}");
                        malformed = Some(reason);
                    }
                },
                Ok(None) => return Err(TransportError::Closed.into()),
                Err(_) => {
                    self.record_timeout(device, method);
                    tracing::debug!(
                        %device,
                        method,
                        attempt = attempt + 1,
                        max_attempts,
                        "Command attempt timed out"
                    );
                }
            }

            if attempt + 1 < max_attempts {
                sleep(self.retry.delay_for(attempt)).await;
            }
        }

        match malformed {
            Some(reason) => Err(CommandError::MalformedResponse {
                method: method.to_string(),
                reason,
            }),
            None => Err(CommandError::Timeout {
                method: method.to_string(),
                attempts: max_attempts,
            }),
        }
    }

    /// Mint a correlation id distinct from every currently pending one. The
    /// returned guard keeps the id reserved until the exchange finishes.
    fn mint_id(&self) -> PendingId {
        let mut pending = self.pending.lock();
        loop {
            let uuid = Uuid::new_v4().simple().to_string();
            let candidate = format!("{ID_PREFIX}-{}", &uuid[..8]);
            if pending.insert(candidate.clone()) {
                return PendingId {
                    id: candidate,
                    pending: self.pending.clone(),
                };
            }
        }
    }

    fn record_attempt(&self, device: SocketAddr) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(device).or_default();
        entry.total_attempts += 1;
        entry.last_attempt = Some(OffsetDateTime::now_utc());
    }

    fn record_success(&self, device: SocketAddr, latency: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(device).or_default();
        entry.total_success += 1;
        entry.last_latency = Some(latency);
        entry.last_success = Some(OffsetDateTime::now_utc());
    }

    fn record_timeout(&self, device: SocketAddr, method: &str) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(device).or_default();
        entry.total_timeouts += 1;
        entry.last_error = Some(format!("timeout waiting for {method}"));
    }

    fn record_error(&self, device: SocketAddr, reason: &str) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(device).or_default();
        entry.last_error = Some(reason.to_string());
    }
}

/// Reserved correlation id; released when the exchange completes on any
/// path, so the id becomes reusable only once nothing is pending under it.
struct PendingId {
    id: String,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl Drop for PendingId {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

enum Interpretation {
    Result(Value),
    Rejected(String),
    Malformed(String),
}

fn interpret(value: Value) -> Interpretation {
    let response: ResponseEnvelope = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(err) => return Interpretation::Malformed(err.to_string()),
    };

    if let Some(error) = response.error {
        return Interpretation::Rejected(error.to_string());
    }

    match response.result {
        Some(result) => Interpretation::Result(result),
        None => Interpretation::Malformed("response carries neither result nor error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    async fn service() -> CommandService {
        let mux = UdpMultiplexer::bind_with(
            "127.0.0.1:0".parse().unwrap(),
            30000,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        )
        .await
        .unwrap();
        CommandService::new(mux)
    }

    #[tokio::test]
    async fn pending_ids_are_pairwise_distinct() {
        let service = service().await;

        let ids: Vec<PendingId> = (0..128).map(|_| service.mint_id()).collect();
        let unique: HashSet<&str> = ids.iter().map(|pending| pending.id.as_str()).collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(service.pending.lock().len(), ids.len());

        drop(ids);
        assert!(service.pending.lock().is_empty());
    }

    #[test]
    fn rejected_response_is_an_immediate_failure() {
        let rejected = interpret(serde_json::json!({
            "id": "voltsync-00000000",
            "error": { "code": -32601, "message": "Method not found" }
        }));
        assert!(matches!(rejected, Interpretation::Rejected(_)));

        let malformed = interpret(serde_json::json!({ "id": "voltsync-00000000" }));
        assert!(matches!(malformed, Interpretation::Malformed(_)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(450),
            max_jitter: Duration::ZERO,
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(450));
        assert_eq!(policy.delay_for(30), Duration::from_millis(450));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(50),
        };

        for _ in 0..64 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
