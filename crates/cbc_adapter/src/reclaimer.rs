// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide release of native cipher handles.
//!
//! Every handle created through an adapter is parked in the reclaimer's
//! pending registry together with the engine that owns it. The adapter keeps
//! only a [`ReclaimGuard`]. Dropping the guard posts the record id to a queue
//! served by one background thread, which removes the record and releases the
//! handle. Removal happens under the registry lock before release, so each
//! record is released at most once no matter how notifications arrive.

use std::collections::HashMap;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::OnceLock;
use std::thread;

use parking_lot::Mutex;

use super::*;

/// Key of a [`ReclamationRecord`] in the pending registry.
pub(crate) type RecordId = u64;

/// An owned native handle waiting to be released.
struct ReclamationRecord {
    handle: CipherHandle,
    engine: Arc<dyn NativeCryptoEngine>,
}

/// Background releaser of native cipher handles.
#[derive(Default)]
pub struct ResourceReclaimer {
    pending: Mutex<HashMap<RecordId, ReclamationRecord>>,
    /// Set exactly once, when the background thread is started.
    queue: OnceLock<mpsc::Sender<RecordId>>,
    next_id: AtomicU64,
    starts: AtomicUsize,
}

static RECLAIMER: LazyLock<ResourceReclaimer> = LazyLock::new(ResourceReclaimer::default);

impl ResourceReclaimer {
    /// The process-wide reclaimer used by every adapter.
    pub fn global() -> &'static ResourceReclaimer {
        &RECLAIMER
    }

    /// Number of handles registered and not yet released.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether the background thread has been started.
    pub fn is_running(&self) -> bool {
        self.queue.get().is_some()
    }

    /// How many times a background thread was spawned. Never more than one.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Takes ownership of `handle` and returns the guard that schedules its
    /// release when dropped.
    ///
    /// Starts the background thread on first use.
    pub(crate) fn register(
        &'static self,
        handle: CipherHandle,
        engine: Arc<dyn NativeCryptoEngine>,
    ) -> ReclaimGuard {
        self.ensure_started();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle_ref = handle.handle_ref();
        self.pending
            .lock()
            .insert(id, ReclamationRecord { handle, engine });
        tracing::debug!(handle = %handle_ref, record = id, "queued cipher context");

        ReclaimGuard {
            id,
            reclaimer: self,
        }
    }

    /// Starts the background thread unless it is already running.
    ///
    /// Concurrent callers block until the one doing the start has finished.
    pub(crate) fn ensure_started(&'static self) {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::channel();
            self.starts.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name("cipher-reclaimer".into())
                .spawn(move || self.run(rx));
            if let Err(err) = spawned {
                // With no receiver every enqueue fails and guards reclaim inline.
                tracing::warn!(%err, "failed to start cipher reclaimer thread");
            }
            tx
        });
    }

    fn run(&self, queue: mpsc::Receiver<RecordId>) {
        tracing::debug!("cipher reclaimer started");
        while let Ok(id) = queue.recv() {
            self.reclaim(id);
        }
        // The sender lives in a static, so this is only reached at teardown.
        tracing::warn!("cipher reclaimer queue closed");
    }

    /// Posts `id` to the background thread, or reclaims inline if the thread
    /// is unavailable.
    fn enqueue(&self, id: RecordId) {
        let sent = self
            .queue
            .get()
            .is_some_and(|queue| queue.send(id).is_ok());
        if !sent {
            self.reclaim(id);
        }
    }

    /// Removes record `id` and releases its handle.
    pub(crate) fn reclaim(&self, id: RecordId) {
        let record = self.pending.lock().remove(&id);
        let Some(record) = record else {
            tracing::debug!(record = id, "cipher context already reclaimed");
            return;
        };

        let handle_ref = record.handle.handle_ref();
        match record.engine.release(record.handle) {
            Ok(()) => {
                tracing::debug!(handle = %handle_ref, record = id, "released cipher context")
            }
            Err(err) => {
                tracing::warn!(handle = %handle_ref, record = id, %err, "failed to release cipher context")
            }
        }
    }
}

/// The adapter's stake in a [`ReclamationRecord`].
///
/// Dropping the guard schedules release on the background thread;
/// [`ReclaimGuard::release_now`] releases on the calling thread instead.
pub(crate) struct ReclaimGuard {
    pub(crate) id: RecordId,
    reclaimer: &'static ResourceReclaimer,
}

impl ReclaimGuard {
    pub(crate) fn release_now(self) {
        let guard = ManuallyDrop::new(self);
        guard.reclaimer.reclaim(guard.id);
    }
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        self.reclaimer.enqueue(self.id);
    }
}

impl fmt::Debug for ReclaimGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclaimGuard").field("id", &self.id).finish()
    }
}
