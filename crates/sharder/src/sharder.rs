//! Claim loop and shard supervision

use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use shardline_core::{ClaimIdContext, ShardId, ShardIdentity};
use shardline_gateway::{
    GatewayCommand, IdentifyGate, Shard, ShardConfig, ShardDeps, ShardEvent, ShardHandle,
    Transport,
};
use shardline_ports::{ClaimStore, Store};
use shardline_ratelimit::RateLimiter;
use shardline_rest::CapacityProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use uuid::Uuid;

use crate::error::SharderError;
use crate::gate::ConcurrencyGate;

/// Runtime settings for a [`Sharder`]
#[derive(Debug, Clone, PartialEq)]
pub struct SharderConfig {
    /// Total shards; asked from the capacity source when `None`
    pub shard_count: Option<u32>,
    /// Concurrent handshakes; asked from the capacity source when `None`
    pub max_concurrency: Option<u32>,
    /// Overrides the shard config's gateway URL. When `None` and capacity is
    /// discovered, the discovered URL is used.
    pub gateway_url: Option<String>,
    /// Window of each identify bucket
    pub identify_window: Duration,
    /// Pause after a claim attempt that found nothing
    pub claim_backoff: Duration,
    /// Interval between claim refreshes
    pub claim_heartbeat: Duration,
    /// Interval between presence refreshes while backing off. Keep it under
    /// the store's presence TTL or peers stop counting this process.
    pub presence_refresh: Duration,
    pub event_capacity: usize,
}

impl Default for SharderConfig {
    fn default() -> Self {
        Self {
            shard_count: None,
            max_concurrency: None,
            gateway_url: None,
            identify_window: Duration::from_secs(5),
            claim_backoff: Duration::from_secs(120),
            claim_heartbeat: Duration::from_secs(60),
            presence_refresh: Duration::from_secs(30),
            event_capacity: 1024,
        }
    }
}

impl SharderConfig {
    pub fn with_shard_count(mut self, count: u32) -> Self {
        self.shard_count = Some(count);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_claim_backoff(mut self, backoff: Duration) -> Self {
        self.claim_backoff = backoff;
        self
    }

    pub fn with_claim_heartbeat(mut self, interval: Duration) -> Self {
        self.claim_heartbeat = interval;
        self
    }

    pub fn with_presence_refresh(mut self, interval: Duration) -> Self {
        self.presence_refresh = interval;
        self
    }

    pub fn with_identify_window(mut self, window: Duration) -> Self {
        self.identify_window = window;
        self
    }
}

/// Runs one shard per claimed id until shut down
pub struct Sharder {
    id: String,
    claims: Arc<dyn ClaimStore>,
    limiter: RateLimiter,
    transport: Arc<dyn Transport>,
    shard_config: ShardConfig,
    config: SharderConfig,
    capacity: Option<Arc<dyn CapacityProvider>>,
}

impl Sharder {
    pub fn new<S>(
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        shard_config: ShardConfig,
        config: SharderConfig,
    ) -> Self
    where
        S: Store + 'static,
    {
        let claims: Arc<dyn ClaimStore> = store.clone();
        Self {
            id: Uuid::new_v4().to_string(),
            claims,
            limiter: RateLimiter::new(store),
            transport,
            shard_config,
            config,
            capacity: None,
        }
    }

    /// Where the shard count and concurrency come from when not configured
    pub fn with_capacity_provider(mut self, provider: Arc<dyn CapacityProvider>) -> Self {
        self.capacity = Some(provider);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolve capacity and start claiming
    pub async fn start(mut self) -> Result<SharderHandle, SharderError> {
        let (total, max_concurrency) = self.resolve_capacity().await?;
        if let Some(url) = self.config.gateway_url.take() {
            self.shard_config.gateway_url = url;
        }

        let span = info_span!("sharder", id = %self.id);
        span.in_scope(|| info!(total, max_concurrency, "Sharder starting"));

        let gate: Arc<dyn IdentifyGate> = Arc::new(ConcurrencyGate::new(
            self.limiter.clone(),
            max_concurrency,
            self.config.identify_window,
        ));
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            id: self.id,
            total,
            claims: self.claims,
            deps: ShardDeps {
                transport: self.transport,
                limiter: self.limiter,
                gate,
                events,
            },
            shard_config: Arc::new(self.shard_config),
            config: self.config,
            shards: DashMap::new(),
            keepers: Mutex::new(Vec::new()),
        });

        let claim_task = tokio::spawn(
            claim_loop(inner.clone(), shutdown_rx).instrument(span),
        );

        Ok(SharderHandle {
            inner,
            shutdown: shutdown_tx,
            claim_task: Mutex::new(Some(claim_task)),
        })
    }

    async fn resolve_capacity(&mut self) -> Result<(u32, u32), SharderError> {
        let (total, max_concurrency) = match (self.config.shard_count, self.config.max_concurrency) {
            (Some(total), Some(max_concurrency)) => (total, max_concurrency),
            (shard_count, max_concurrency) => {
                let provider = self.capacity.as_ref().ok_or(SharderError::MissingShardCount)?;
                let capacity = provider.gateway_capacity().await?;
                let limit = &capacity.session_start_limit;
                info!(
                    shards = capacity.shards,
                    max_concurrency = limit.max_concurrency,
                    remaining = limit.remaining,
                    "Discovered gateway capacity"
                );
                if limit.remaining == 0 {
                    warn!(
                        reset_after_ms = limit.reset_after,
                        "Session start budget exhausted; identifies fail until it resets"
                    );
                }
                if self.config.gateway_url.is_none() {
                    self.config.gateway_url = Some(capacity.url.clone());
                }
                (
                    shard_count.unwrap_or(capacity.shards),
                    max_concurrency.unwrap_or(limit.max_concurrency),
                )
            }
        };

        if total == 0 {
            return Err(SharderError::InvalidCapacity("shard count is 0".into()));
        }
        if max_concurrency == 0 {
            return Err(SharderError::InvalidCapacity("max concurrency is 0".into()));
        }
        Ok((total, max_concurrency))
    }
}

struct Inner {
    id: String,
    total: u32,
    claims: Arc<dyn ClaimStore>,
    deps: ShardDeps,
    shard_config: Arc<ShardConfig>,
    config: SharderConfig,
    shards: DashMap<ShardId, ShardHandle>,
    /// Claim refresh tasks
    keepers: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn start_shard(self: &Arc<Self>, shard_id: ShardId, shutdown: watch::Receiver<bool>) {
        let identity = ShardIdentity::new(shard_id, self.total);
        let shard = Shard::spawn(identity, self.shard_config.clone(), self.deps.clone());
        info!(shard_id, "Claimed shard");
        self.shards.insert(shard_id, shard.clone());

        let keeper = tokio::spawn(
            keep_claim(self.clone(), shard, shutdown).in_current_span(),
        );
        let mut keepers = self.keepers.lock();
        keepers.retain(|task| !task.is_finished());
        keepers.push(keeper);
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closing| *closing).await;
}

async fn claim_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let ctx = ClaimIdContext::new(inner.id.clone(), inner.shards.len() as u32, inner.total);
        match inner.claims.claim_id(&ctx).await {
            Ok(Some(shard_id)) => {
                inner.start_shard(shard_id, shutdown.clone());
                // Let peers and the new shard run before claiming again
                tokio::task::yield_now().await;
                continue;
            }
            Ok(None) => debug!(owned = ctx.owned_count, "No shard available"),
            Err(e) => warn!(error = %e, "Claim attempt failed"),
        }

        if !back_off(&inner, &mut shutdown).await {
            break;
        }
    }
    debug!("Claim loop stopped");
}

/// Wait out the claim backoff, keeping this process's presence live so peers
/// leave room for it. Returns `false` on shutdown.
async fn back_off(inner: &Inner, shutdown: &mut watch::Receiver<bool>) -> bool {
    let retry_at = Instant::now() + inner.config.claim_backoff;
    let refresh = inner.config.presence_refresh.max(Duration::from_millis(1));
    loop {
        let now = Instant::now();
        if now >= retry_at {
            return true;
        }
        let wake = (now + refresh).min(retry_at);
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = shutdown_requested(shutdown) => return false,
        }
        if wake >= retry_at {
            return true;
        }
        match inner.claims.touch_presence(&inner.id).await {
            Ok(()) => trace!("Presence refreshed"),
            Err(e) => warn!(error = %e, "Presence refresh failed"),
        }
    }
}

/// Refresh one shard's claim until shutdown or until the claim is lost
async fn keep_claim(inner: Arc<Inner>, shard: ShardHandle, mut shutdown: watch::Receiver<bool>) {
    let shard_id = shard.identity().id;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(inner.config.claim_heartbeat) => {}
            // Shutdown closes and releases every shard itself
            _ = shutdown_requested(&mut shutdown) => return,
        }

        match inner.claims.heartbeat(&inner.id, shard_id, shard.latency()).await {
            Ok(true) => trace!(shard_id, "Claim refreshed"),
            Ok(false) => {
                warn!(shard_id, "Claim lost to another process; closing shard");
                break;
            }
            // The claim outlives one missed refresh
            Err(e) => warn!(shard_id, error = %e, "Claim refresh failed"),
        }
    }

    inner.shards.remove(&shard_id);
    shard.close().await;
    info!(shard_id, "Shard released");
}

/// Handle to a running [`Sharder`]
pub struct SharderHandle {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    claim_task: Mutex<Option<JoinHandle<()>>>,
}

impl SharderHandle {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn total_shards(&self) -> u32 {
        self.inner.total
    }

    /// Events from every shard this process runs
    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.inner.deps.events.subscribe()
    }

    /// Ids this process runs, ascending
    pub fn owned_shards(&self) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = self.inner.shards.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn shard(&self, shard_id: ShardId) -> Option<ShardHandle> {
        self.inner.shards.get(&shard_id).map(|e| e.value().clone())
    }

    /// Send a command through one of this process's shards
    pub async fn send(&self, shard_id: ShardId, command: GatewayCommand) -> Result<(), SharderError> {
        let shard = self.shard(shard_id).ok_or(SharderError::UnknownShard(shard_id))?;
        shard.send(command).await?;
        Ok(())
    }

    /// Whether every shard, across all processes, is claimed
    pub async fn all_claimed(&self) -> Result<bool, SharderError> {
        Ok(self.inner.claims.all_claimed(self.inner.total).await?)
    }

    /// Stop claiming, close every shard and release its claim
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let claim_task = self.claim_task.lock().take();
        if let Some(task) = claim_task {
            let _ = task.await;
        }
        let keepers: Vec<_> = self.inner.keepers.lock().drain(..).collect();
        join_all(keepers).await;

        let shards: Vec<ShardHandle> = self.owned_shards()
            .into_iter()
            .filter_map(|id| self.inner.shards.remove(&id).map(|(_, shard)| shard))
            .collect();
        join_all(shards.iter().map(|shard| self.release(shard))).await;
        info!(sharder = %self.inner.id, "Sharder stopped");
    }

    async fn release(&self, shard: &ShardHandle) {
        let shard_id = shard.identity().id;
        shard.close().await;
        if let Err(e) = self.inner.claims.release(&self.inner.id, shard_id).await {
            warn!(shard_id, error = %e, "Failed to release claim");
        }
    }
}

impl Drop for SharderHandle {
    fn drop(&mut self) {
        // Stops claiming and refreshing; claims then lapse by TTL
        self.shutdown.send_replace(true);
    }
}
