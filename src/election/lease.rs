use super::{publish, ElectionError, LeaderElector, Leadership};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A named, time-limited leadership claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    /// Node holding the lease. Empty once released.
    pub holder: String,
    /// Incremented every time the lease changes hands or lapses.
    pub epoch: u64,
    /// Unix timestamp in milliseconds.
    pub expires_at_ms: i64,
}

impl Lease {
    pub fn is_held_at(&self, now_ms: i64) -> bool {
        !self.holder.is_empty() && self.expires_at_ms > now_ms
    }
}

/// Shared storage for leases. Implementations must make `try_acquire`
/// atomic with respect to every other node using the same store.
pub trait LeaseStore: Send + Sync {
    /// Acquire `name` for `holder` if it is free or expired, or extend it if
    /// `holder` already holds it. Returns the lease when `holder` holds it
    /// after the call, `None` when another node does.
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now_ms: i64,
    ) -> Result<Option<Lease>>;

    /// Give up `name` if held by `holder`. Returns true if it was released.
    fn release(&self, name: &str, holder: &str) -> Result<bool>;

    fn current(&self, name: &str) -> Result<Option<Lease>>;
}

/// Acquisition rule shared by the store implementations.
///
/// Given the stored lease (if any) returns the lease to write back, or
/// `None` if `holder` can't have it. Renewing a live lease keeps its
/// epoch; taking over a free or expired one bumps it.
pub(crate) fn next_lease(
    existing: Option<&Lease>,
    name: &str,
    holder: &str,
    ttl: Duration,
    now_ms: i64,
) -> Option<Lease> {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at_ms = now_ms.saturating_add(ttl_ms);

    match existing {
        None => Some(Lease {
            name: name.to_string(),
            holder: holder.to_string(),
            epoch: 1,
            expires_at_ms,
        }),
        Some(lease) if lease.is_held_at(now_ms) => {
            if lease.holder == holder {
                Some(Lease {
                    expires_at_ms,
                    ..lease.clone()
                })
            } else {
                None
            }
        }
        Some(lease) => Some(Lease {
            name: name.to_string(),
            holder: holder.to_string(),
            epoch: lease.epoch + 1,
            expires_at_ms,
        }),
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct LeaseElectorConfig {
    pub lease_name: String,
    /// How long a claim stays valid without renewal.
    pub ttl: Duration,
    /// How often the holder renews, and followers retry.
    pub renew_interval: Duration,
}

impl Default for LeaseElectorConfig {
    fn default() -> Self {
        Self {
            lease_name: "cluster-leader".to_string(),
            ttl: Duration::from_secs(15),
            renew_interval: Duration::from_secs(5),
        }
    }
}

struct LeaseShared {
    node_id: String,
    store: Arc<dyn LeaseStore>,
    config: LeaseElectorConfig,
    tx: watch::Sender<Leadership>,
}

impl LeaseShared {
    async fn attempt(&self) -> Result<Option<Lease>, ElectionError> {
        let store = Arc::clone(&self.store);
        let name = self.config.lease_name.clone();
        let holder = self.node_id.clone();
        let ttl = self.config.ttl;

        tokio::task::spawn_blocking(move || store.try_acquire(&name, &holder, ttl, now_ms()))
            .await
            .map_err(|e| ElectionError::Store(format!("lease attempt panicked: {}", e)))?
            .map_err(|e| ElectionError::Store(format!("{:#}", e)))
    }

    fn apply(&self, lease: Option<&Lease>) {
        let last_epoch = self.tx.borrow().epoch;
        let next = match lease {
            Some(lease) => Leadership::leader(lease.epoch),
            None => Leadership::follower(last_epoch),
        };
        if publish(&self.tx, next) {
            if next.is_leader {
                info!(
                    "Node {} acquired lease '{}' (epoch {})",
                    self.node_id, self.config.lease_name, next.epoch
                );
            } else {
                info!(
                    "Node {} no longer holds lease '{}'",
                    self.node_id, self.config.lease_name
                );
            }
        }
    }

    fn step_down(&self) {
        let last_epoch = self.tx.borrow().epoch;
        if publish(&self.tx, Leadership::follower(last_epoch)) {
            warn!(
                "Node {} stepping down: lease '{}' could not be renewed in time",
                self.node_id, self.config.lease_name
            );
        }
    }

    /// Renewal wait with up to 10% jitter so followers don't retry in lockstep.
    ///
    /// The jitter stays under half the slack between `renew_interval` and
    /// `ttl`, so a healthy holder renews well before its claim deadline.
    fn next_wait(&self) -> Duration {
        let base = self.config.renew_interval;
        let slack = self.config.ttl.saturating_sub(base);
        let jitter_ms = (base.as_millis() / 10).min(slack.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Point at which a holder whose last successful attempt started at
    /// `attempt_started` stops leading.
    ///
    /// Measured from before the store call that set the lease and kept a
    /// quarter of the renewal slack ahead of the expiry, so the holder is
    /// gone before any other node can see the lease as free.
    fn claim_deadline(&self, attempt_started: Instant) -> Instant {
        let slack = self.config.ttl.saturating_sub(self.config.renew_interval);
        attempt_started + self.config.ttl - slack / 4
    }

    /// Resolves at `deadline`; never for followers, who have none.
    async fn lapse(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn renew_loop(self: Arc<Self>, token: CancellationToken, mut deadline: Option<Instant>) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = Self::lapse(deadline) => {
                    deadline = None;
                    self.step_down();
                    continue;
                }
                _ = tokio::time::sleep(self.next_wait()) => {}
            }

            let attempt_started = Instant::now();
            // A store call that outlives the claim must not keep us leading
            let attempt = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = Self::lapse(deadline) => {
                    deadline = None;
                    self.step_down();
                    continue;
                }
                attempt = self.attempt() => attempt,
            };

            match attempt {
                Ok(lease) => {
                    // A claim that came back too late to act on is not leadership
                    let claim = lease.map(|l| (self.claim_deadline(attempt_started), l));
                    let claim = claim.filter(|(d, _)| *d > Instant::now());
                    deadline = claim.as_ref().map(|(d, _)| *d);
                    self.apply(claim.as_ref().map(|(_, l)| l));
                }
                Err(e) => {
                    warn!(
                        "Lease attempt for '{}' by {} failed: {}",
                        self.config.lease_name, self.node_id, e
                    );
                    // Give up before the claim can lapse while we still act on it
                    if let Some(d) = deadline {
                        if Instant::now() + self.config.renew_interval >= d {
                            deadline = None;
                            self.step_down();
                        }
                    }
                }
            }
        }
        debug!("Lease renewal loop for {} stopped", self.node_id);
    }
}

struct RenewalLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Leader election over a shared `LeaseStore`.
///
/// The holder renews every `renew_interval`; followers retry at the same
/// pace and take over once the lease expires. A holder that can't reach the
/// store steps down before its claim would lapse.
pub struct LeaseElector {
    shared: Arc<LeaseShared>,
    renewal: Mutex<Option<RenewalLoop>>,
}

impl LeaseElector {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn LeaseStore>,
        config: LeaseElectorConfig,
    ) -> Self {
        let (tx, _rx) = watch::channel(Leadership::default());
        Self {
            shared: Arc::new(LeaseShared {
                node_id: node_id.into(),
                store,
                config,
                tx,
            }),
            renewal: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LeaseElectorConfig {
        &self.shared.config
    }

    fn take_renewal(&self) -> Option<RenewalLoop> {
        crate::schedule::lock(&self.renewal).take()
    }
}

#[async_trait]
impl LeaderElector for LeaseElector {
    fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    async fn start(&self) -> Result<(), ElectionError> {
        if crate::schedule::lock(&self.renewal).is_some() {
            return Err(ElectionError::AlreadyStarted);
        }

        // First attempt in-line so an unreachable store fails the start
        let attempt_started = Instant::now();
        let lease = self
            .shared
            .attempt()
            .await
            .map_err(|e| ElectionError::Unreachable(e.to_string()))?;
        let deadline = lease
            .as_ref()
            .map(|_| self.shared.claim_deadline(attempt_started));
        self.shared.apply(lease.as_ref());

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).renew_loop(token.clone(), deadline));

        let mut renewal = crate::schedule::lock(&self.renewal);
        if renewal.is_some() {
            // Lost a race with a concurrent start
            token.cancel();
            return Err(ElectionError::AlreadyStarted);
        }
        *renewal = Some(RenewalLoop { token, handle });
        Ok(())
    }

    async fn stop(&self) -> Result<(), ElectionError> {
        let Some(renewal) = self.take_renewal() else {
            return Ok(());
        };
        renewal.token.cancel();
        let _ = renewal.handle.await;

        let was_leader = self.shared.tx.borrow().is_leader;
        let last_epoch = self.shared.tx.borrow().epoch;
        publish(&self.shared.tx, Leadership::follower(last_epoch));

        if !was_leader {
            return Ok(());
        }

        let store = Arc::clone(&self.shared.store);
        let name = self.shared.config.lease_name.clone();
        let holder = self.shared.node_id.clone();
        let released = tokio::task::spawn_blocking(move || store.release(&name, &holder))
            .await
            .map_err(|e| ElectionError::Store(format!("lease release panicked: {}", e)))?
            .map_err(|e| ElectionError::Unreachable(format!("{:#}", e)))?;

        if released {
            info!(
                "Node {} released lease '{}'",
                self.shared.node_id, self.shared.config.lease_name
            );
        }
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Leadership> {
        self.shared.tx.subscribe()
    }
}
