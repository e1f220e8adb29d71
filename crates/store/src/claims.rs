//! Claim bookkeeping shared by both backends.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shardline_core::{ShardClaim, ShardId, SharderPresence, Timestamp};
use std::collections::HashSet;
use std::time::Duration;

/// `at + ttl`, saturating at the far future
pub(crate) fn expiry(at: Timestamp, ttl: Duration) -> Timestamp {
    ChronoDuration::from_std(ttl)
        .ok()
        .and_then(|ttl| at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn claim_is_live(claim: &ShardClaim, now: Timestamp, ttl: Duration) -> bool {
    now < expiry(claim.refreshed_at, ttl)
}

pub(crate) fn presence_is_live(presence: &SharderPresence, now: Timestamp, ttl: Duration) -> bool {
    now < expiry(presence.seen_at, ttl)
}

/// Distinct sharders holding a claim or a presence record, plus the caller
pub(crate) fn live_sharders<'a>(
    caller: &'a str,
    claims: impl IntoIterator<Item = &'a ShardClaim>,
    presences: impl IntoIterator<Item = &'a SharderPresence>,
) -> u32 {
    let mut ids: HashSet<&str> = HashSet::new();
    ids.insert(caller);
    ids.extend(claims.into_iter().map(|c| c.sharder_id.as_str()));
    ids.extend(presences.into_iter().map(|p| p.sharder_id.as_str()));
    u32::try_from(ids.len()).unwrap_or(u32::MAX)
}

/// Ids in `[0, total)` without a live claim, lowest first
pub(crate) fn free_ids(claimed: &HashSet<ShardId>, total: u32) -> impl Iterator<Item = ShardId> + '_ {
    (0..total).filter(move |id| !claimed.contains(id))
}
