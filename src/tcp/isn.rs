//! Initial sequence number generation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use super::connection::Tcp4Tuple;
use super::wrap32::Wrap32;

/// Picks a fresh ISN for a new connection by hashing the 4-tuple
/// together with the current time, the way real stacks avoid handing
/// out sequence numbers a stale connection on the same 4-tuple might
/// still be waiting on.
///
/// TODO: this does not persist a per-tuple counter across restarts, so
/// a process crash-and-restart within one clock tick could in theory
/// reissue an ISN a lingering remote peer still remembers.
pub fn generate_isn(quad: &Tcp4Tuple) -> Wrap32 {
    let mut hasher = DefaultHasher::new();
    quad.hash(&mut hasher);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_nanos().hash(&mut hasher);
    Wrap32::new(hasher.finish() as u32)
}
