// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wait/notify registry keyed by model and an auxiliary key.
//!
//! Two kinds of waiters are supported. A suspended stream registers itself without blocking and is handed back to
//! the notifier so that it can be recovered on whatever worker thread delivered the notification. A thread may also
//! block until it is notified or until the key is cleared, in which case it observes [WakeReason::Canceled].
//!
//! Notifications that arrive while nobody waits are counted on their key. Clearing a key drops its entry together
//! with the count, so a signal left over from an earlier cycle is never consumed by a later waiter. An entry lives
//! only while it holds a waiter or a pending notification.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        ErrorCode,
        Fail,
    },
    ModelId,
    StreamId,
};
use ::parking_lot::{
    Condvar,
    Mutex,
    MutexGuard,
};
use ::slab::Slab;
use ::std::{
    collections::{
        hash_map::Entry,
        HashMap,
        VecDeque,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// What a waiter is waiting for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WaitKind {
    QueueNotEmpty,
    QueueNotFull,
    PrepareMemory,
    Generic,
}

/// Wait key: the owning model plus an auxiliary key whose meaning depends on [WaitKind] (a queue id for queue waits).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct WaitKey {
    pub model_id: ModelId,
    pub kind: WaitKind,
    pub aux: u32,
}

/// Outcome of a non-blocking wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitStatus {
    /// A notification was already buffered and has been consumed. The caller proceeds.
    Ready,
    /// The caller has been registered and must suspend until it is handed back by [EventWaitManager::notify].
    Registered,
}

/// Why a blocked waiter woke up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WakeReason {
    Notified,
    Canceled,
}

#[derive(Default)]
struct WaitEntry {
    /// Notifications delivered while nobody waited.
    pending: u64,
    stream_waiter: Option<StreamId>,
    /// Slots of blocked threads, in arrival order.
    blocked: VecDeque<usize>,
}

struct BlockedWaiter {
    reason: Option<WakeReason>,
}

#[derive(Default)]
struct WaitTable {
    entries: HashMap<WaitKey, WaitEntry>,
    blocked: Slab<BlockedWaiter>,
}

/// Event Wait Manager
#[derive(Default)]
pub struct EventWaitManager {
    table: Mutex<WaitTable>,
    cond: Condvar,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WaitKey {
    pub fn new(model_id: ModelId, kind: WaitKind, aux: u32) -> Self {
        Self { model_id, kind, aux }
    }
}

impl WaitEntry {
    fn consume_notification(&mut self) -> bool {
        if self.pending == 0 {
            return false;
        }
        self.pending -= 1;
        true
    }

    fn is_idle(&self) -> bool {
        self.pending == 0 && self.stream_waiter.is_none() && self.blocked.is_empty()
    }
}

impl EventWaitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `stream` as waiting on `key` unless a notification is already buffered, in which case that
    /// notification is consumed and [WaitStatus::Ready] is returned.
    pub fn wait_event(&self, key: WaitKey, stream: StreamId) -> WaitStatus {
        let mut table: MutexGuard<WaitTable> = self.table.lock();
        let entry: &mut WaitEntry = table.entries.entry(key).or_default();
        if entry.consume_notification() {
            Self::release_if_idle(&mut table.entries, &key);
            trace!("wait_event(): already notified (key={:?})", key);
            return WaitStatus::Ready;
        }
        if let Some(previous) = entry.stream_waiter.replace(stream) {
            if previous != stream {
                warn!(
                    "wait_event(): replacing stream waiter (key={:?}, previous={}, stream={})",
                    key, previous, stream
                );
            }
        }
        trace!("wait_event(): registered (key={:?}, stream={})", key, stream);
        WaitStatus::Registered
    }

    /// Blocks the calling thread until `key` is notified, cleared, or `timeout` elapses.
    pub fn wait_blocking(&self, key: WaitKey, timeout: Duration) -> Result<WakeReason, Fail> {
        let deadline: Instant = Instant::now() + timeout;
        let mut table: MutexGuard<WaitTable> = self.table.lock();
        let slot: usize = {
            let entry: &mut WaitEntry = table.entries.entry(key).or_default();
            if entry.consume_notification() {
                Self::release_if_idle(&mut table.entries, &key);
                return Ok(WakeReason::Notified);
            }
            let slot: usize = table.blocked.insert(BlockedWaiter { reason: None });
            table.entries.entry(key).or_default().blocked.push_back(slot);
            slot
        };

        loop {
            if let Some(reason) = table.blocked[slot].reason {
                table.blocked.remove(slot);
                return Ok(reason);
            }
            if self.cond.wait_until(&mut table, deadline).timed_out() {
                if let Some(reason) = table.blocked[slot].reason {
                    table.blocked.remove(slot);
                    return Ok(reason);
                }
                table.blocked.remove(slot);
                if let Some(entry) = table.entries.get_mut(&key) {
                    entry.blocked.retain(|s| *s != slot);
                }
                Self::release_if_idle(&mut table.entries, &key);
                let cause: String = format!("wait timed out (key={:?}, timeout={:?})", key, timeout);
                warn!("wait_blocking(): {}", cause);
                return Err(Fail::new(ErrorCode::Timeout, &cause));
            }
        }
    }

    /// Delivers a notification for `key`. A blocked thread is woken first; otherwise a registered stream is returned so
    /// that the caller can recover it; otherwise the notification is buffered. A notification without a waiter is not
    /// an error.
    pub fn notify(&self, key: WaitKey) -> Option<StreamId> {
        let mut table: MutexGuard<WaitTable> = self.table.lock();
        let WaitTable { entries, blocked } = &mut *table;
        let entry: &mut WaitEntry = entries.entry(key).or_default();
        if let Some(slot) = entry.blocked.pop_front() {
            if let Some(waiter) = blocked.get_mut(slot) {
                waiter.reason = Some(WakeReason::Notified);
            }
            Self::release_if_idle(entries, &key);
            self.cond.notify_all();
            trace!("notify(): woke blocked waiter (key={:?})", key);
            return None;
        }
        if let Some(stream) = entry.stream_waiter.take() {
            Self::release_if_idle(entries, &key);
            trace!("notify(): handing back stream (key={:?}, stream={})", key, stream);
            return Some(stream);
        }
        entry.pending = entry.pending.saturating_add(1);
        trace!("notify(): buffered (key={:?}, pending={})", key, entry.pending);
        None
    }

    /// Cancels every waiter on `keys` and drops their buffered notifications.
    pub fn clear_batch(&self, keys: &[WaitKey]) {
        let mut table: MutexGuard<WaitTable> = self.table.lock();
        let WaitTable { entries, blocked } = &mut *table;
        for key in keys {
            if let Some(mut entry) = entries.remove(key) {
                Self::cancel_entry(&mut entry, blocked);
                debug!("clear_batch(): cleared (key={:?})", key);
            }
        }
        self.cond.notify_all();
    }

    /// Cancels every waiter registered under `model_id`, whatever its kind or auxiliary key, and drops the entries.
    pub fn clear_model(&self, model_id: ModelId) {
        let mut table: MutexGuard<WaitTable> = self.table.lock();
        let WaitTable { entries, blocked } = &mut *table;
        entries.retain(|key, entry| {
            if key.model_id != model_id {
                return true;
            }
            Self::cancel_entry(entry, blocked);
            false
        });
        self.cond.notify_all();
        debug!("clear_model(): cleared (model_id={})", model_id);
    }

    /// Returns the number of buffered notifications for `key`.
    pub fn pending(&self, key: &WaitKey) -> u64 {
        let table: MutexGuard<WaitTable> = self.table.lock();
        table.entries.get(key).map_or(0, |entry| entry.pending)
    }

    /// Number of keys that hold a waiter or a buffered notification.
    pub fn key_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    fn cancel_entry(entry: &mut WaitEntry, blocked: &mut Slab<BlockedWaiter>) {
        entry.pending = 0;
        entry.stream_waiter = None;
        while let Some(slot) = entry.blocked.pop_front() {
            if let Some(waiter) = blocked.get_mut(slot) {
                waiter.reason = Some(WakeReason::Canceled);
            }
        }
    }

    fn release_if_idle(entries: &mut HashMap<WaitKey, WaitEntry>, key: &WaitKey) {
        if let Entry::Occupied(entry) = entries.entry(*key) {
            if entry.get().is_idle() {
                entry.remove();
            }
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
