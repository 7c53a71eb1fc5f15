//! Per-session exclusivity between chunk writes, finalize and sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Claim {
    /// Chunk writes in flight.
    writers: usize,
    /// A finalize (or sweep) owns the session.
    finalizing: bool,
}

#[derive(Default)]
struct Inner {
    claims: Mutex<HashMap<String, Claim>>,
    /// Signalled whenever a write finishes.
    write_done: Notify,
}

/// Tracks which sessions are being written to and which are being finalized.
///
/// Any number of chunk writes may run against a session at once, but never
/// while a [`FinalizeGuard`] is held for it. The claims are released when
/// the guards drop, on every exit path.
#[derive(Clone, Default)]
pub struct FinalizeGate {
    inner: Arc<Inner>,
}

impl FinalizeGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn claims(&self) -> MutexGuard<'_, HashMap<String, Claim>> {
        self.inner
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims `session_id` for a finalize, waiting out chunk writes already
    /// in flight. Returns `None` if another finalize holds it.
    ///
    /// New writes are refused from the moment of the call.
    pub async fn acquire(&self, session_id: &str) -> Option<FinalizeGuard> {
        {
            let mut claims = self.claims();
            let claim = claims.entry(session_id.to_string()).or_default();
            if claim.finalizing {
                return None;
            }
            claim.finalizing = true;
        }
        let guard = FinalizeGuard {
            inner: Arc::clone(&self.inner),
            session_id: session_id.to_string(),
        };

        loop {
            let write_done = self.inner.write_done.notified();
            if self.writers(session_id) == 0 {
                return Some(guard);
            }
            write_done.await;
        }
    }

    /// Claims `session_id` only if nothing else touches it right now.
    pub fn try_acquire(&self, session_id: &str) -> Option<FinalizeGuard> {
        let mut claims = self.claims();
        if claims.contains_key(session_id) {
            return None;
        }
        claims.insert(
            session_id.to_string(),
            Claim {
                writers: 0,
                finalizing: true,
            },
        );
        Some(FinalizeGuard {
            inner: Arc::clone(&self.inner),
            session_id: session_id.to_string(),
        })
    }

    /// Registers a chunk write, or returns `None` while a finalize owns the session.
    pub fn begin_write(&self, session_id: &str) -> Option<WriteGuard> {
        let mut claims = self.claims();
        let claim = claims.entry(session_id.to_string()).or_default();
        if claim.finalizing {
            return None;
        }
        claim.writers += 1;
        Some(WriteGuard {
            inner: Arc::clone(&self.inner),
            session_id: session_id.to_string(),
        })
    }

    /// Whether a finalize currently owns `session_id`.
    pub fn contains(&self, session_id: &str) -> bool {
        self.claims()
            .get(session_id)
            .is_some_and(|claim| claim.finalizing)
    }

    fn writers(&self, session_id: &str) -> usize {
        self.claims().get(session_id).map_or(0, |claim| claim.writers)
    }
}

fn release(inner: &Inner, session_id: &str, update: impl FnOnce(&mut Claim)) {
    let mut claims = inner
        .claims
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(claim) = claims.get_mut(session_id) {
        update(claim);
        if claim.writers == 0 && !claim.finalizing {
            claims.remove(session_id);
        }
    }
}

/// Releases a finalize claim on drop.
pub struct FinalizeGuard {
    inner: Arc<Inner>,
    session_id: String,
}

impl FinalizeGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        release(&self.inner, &self.session_id, |claim| claim.finalizing = false);
    }
}

/// Marks one chunk write in flight until dropped.
pub struct WriteGuard {
    inner: Arc<Inner>,
    session_id: String,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        release(&self.inner, &self.session_id, |claim| {
            claim.writers = claim.writers.saturating_sub(1);
        });
        self.inner.write_done.notify_waiters();
    }
}
