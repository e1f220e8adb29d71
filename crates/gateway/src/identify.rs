use async_trait::async_trait;
use shardline_core::ShardIdentity;

/// Paces handshakes (identify and resume) across the shards of a process
#[async_trait]
pub trait IdentifyGate: Send + Sync {
    /// Suspend until `shard` may send its handshake
    async fn wait_turn(&self, shard: ShardIdentity);
}

/// Lets every handshake through immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct Ungated;

#[async_trait]
impl IdentifyGate for Ungated {
    async fn wait_turn(&self, _shard: ShardIdentity) {}
}
