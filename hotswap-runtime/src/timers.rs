//! Named one-shot and periodic timers that outlive module reloads.
//!
//! Every timer lives in a slot of a generation-tagged arena. Callers address
//! timers by a caller-chosen [`TimerName`]; the registry maps each name to a
//! [`TimerHandle`] (`index` + `generation`). A handle from a cancelled or
//! replaced timer never aliases the record that later reuses its slot.
//!
//! Reloading a module never touches its timers: the spawned task keeps the
//! closure it was created with until someone calls [`TimerRegistry::cancel`].
//! [`TimerRegistry::export_state`] / [`TimerRegistry::import_state`] move the
//! bookkeeping (including abort handles) to another registry without re-arming
//! anything; [`Reloadable::backup`] produces serialized [`TimerSnapshot`]s a new
//! generation can [`TimerRegistry::rearm`] from.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use hotswap_core::{BackupState, Reloadable, TimerKind, TimerName};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest period an interval may have; a zero period would spin.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Longest delay a task actually sleeps for. Longer delays are still recorded
/// as given.
pub const MAX_SLEEP: Duration = Duration::from_secs(86_400 * 365 * 30);

pub type TimerCallback = Arc<dyn Fn(&[Value]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

/// Serializable description of one timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub name: TimerName,
    pub kind: Option<TimerKind>,
    pub delay_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
    pub args: Vec<Value>,
    /// Whether a task is currently backing the record.
    pub armed: bool,
}

/// Bookkeeping moved between registries by `export_state` / `import_state`.
pub struct TimerTable {
    records: Vec<TimerRecord>,
}

impl TimerTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct TimerRecord {
    name: TimerName,
    task: Option<AbortHandle>,
    set_at: Instant,
    delay: Option<Duration>,
    args: Vec<Value>,
    kind: Option<TimerKind>,
    placement: PlacementCell,
}

/// Which registry slot currently holds a record. Shared with the timeout task
/// so a fired timeout releases its record even after `import_state` moved it.
#[derive(Default)]
struct Placement {
    arena: Weak<Mutex<Arena>>,
    handle: Option<TimerHandle>,
    fired: bool,
}

type PlacementCell = Arc<Mutex<Placement>>;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl TimerRecord {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.delay
            .map(|delay| delay.saturating_sub(now.saturating_duration_since(self.set_at)))
    }

    fn snapshot(&self, now: Instant) -> TimerSnapshot {
        TimerSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            delay_ms: self.delay.map(millis),
            remaining_ms: self.remaining(now).map(millis),
            args: self.args.clone(),
            armed: self.task.is_some(),
        }
    }

    fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

struct Slot {
    generation: u32,
    record: Option<TimerRecord>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: HashMap<TimerName, TimerHandle>,
}

impl Arena {
    fn insert(&mut self, record: TimerRecord) -> TimerHandle {
        let name = record.name.clone();
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(record);
                TimerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                TimerHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.names.insert(name, handle);
        handle
    }

    fn get(&self, handle: TimerHandle) -> Option<&TimerRecord> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    fn get_mut(&mut self, handle: TimerHandle) -> Option<&mut TimerRecord> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_mut())
    }

    fn lookup(&self, name: &TimerName) -> Option<&TimerRecord> {
        self.names.get(name).and_then(|handle| self.get(*handle))
    }

    fn remove(&mut self, handle: TimerHandle) -> Option<TimerRecord> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        if self.names.get(&record.name) == Some(&handle) {
            self.names.remove(&record.name);
        }
        Some(record)
    }

    fn remove_by_name(&mut self, name: &TimerName) -> Option<TimerRecord> {
        let handle = *self.names.get(name)?;
        self.remove(handle)
    }

    fn records(&self) -> impl Iterator<Item = &TimerRecord> {
        self.slots.iter().filter_map(|slot| slot.record.as_ref())
    }
}

/// Registry of named timers. Cheap to clone; clones share one arena.
///
/// Scheduling spawns onto the current tokio runtime and panics outside one.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    arena: Arc<Mutex<Arena>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore bookkeeping from a [`Reloadable::backup`] payload.
    ///
    /// Records come back detached: nothing fires until [`Self::rearm`].
    /// Timeouts keep their remaining time as the new delay.
    pub fn from_backup(backup: Option<&BackupState>) -> Self {
        let registry = Self::new();
        let Some(backup) = backup else {
            return registry;
        };
        let snapshots: Vec<TimerSnapshot> = match backup.decode() {
            Ok(snapshots) => snapshots,
            Err(err) => {
                tracing::warn!(error = %err, "timer backup unreadable, starting empty");
                return registry;
            }
        };

        let now = Instant::now();
        let mut arena = registry.arena.lock();
        for snapshot in snapshots {
            let delay = match snapshot.kind {
                Some(TimerKind::Interval) => snapshot.delay_ms,
                _ => snapshot.remaining_ms.or(snapshot.delay_ms),
            };
            registry.place(
                &mut arena,
                TimerRecord {
                    name: snapshot.name,
                    task: None,
                    set_at: now,
                    delay: delay.map(Duration::from_millis),
                    args: snapshot.args,
                    kind: snapshot.kind,
                    placement: PlacementCell::default(),
                },
            );
        }
        drop(arena);
        registry
    }

    /// Schedule `callback(args)` under `name`.
    ///
    /// Returns `None` without touching anything if `name` is taken and `force`
    /// is false. With `force`, the existing timer is cancelled and replaced.
    pub fn schedule(
        &self,
        name: impl Into<TimerName>,
        kind: TimerKind,
        delay: Duration,
        args: Vec<Value>,
        callback: TimerCallback,
        force: bool,
    ) -> Option<TimerHandle> {
        let name = name.into();
        let mut arena = self.arena.lock();

        if arena.names.contains_key(&name) {
            if !force {
                tracing::debug!(timer = %name, "timer already scheduled, ignoring");
                return None;
            }
            if let Some(old) = arena.remove_by_name(&name) {
                old.abort();
                tracing::debug!(timer = %name, "replacing existing timer");
            }
        }

        let set_at = Instant::now();
        let placement = PlacementCell::default();
        let handle = self.place(
            &mut arena,
            TimerRecord {
                name: name.clone(),
                task: None,
                set_at,
                delay: Some(delay),
                args: args.clone(),
                kind: Some(kind),
                placement: placement.clone(),
            },
        );

        // The arena stays locked until the abort handle is stored, so a
        // zero-delay timeout cannot release its slot before it exists.
        let task = match kind {
            TimerKind::Timeout => {
                let deadline = set_at + delay.min(MAX_SLEEP);
                tokio::spawn(run_timeout(placement, deadline, args, callback))
            }
            TimerKind::Interval => {
                let period = delay.clamp(MIN_INTERVAL, MAX_SLEEP);
                tokio::spawn(run_interval(set_at + period, period, args, callback))
            }
        };
        if let Some(record) = arena.get_mut(handle) {
            record.task = Some(task.abort_handle());
        }

        tracing::debug!(timer = %name, kind = %kind, delay_ms = millis(delay), "timer scheduled");
        Some(handle)
    }

    pub fn set_timeout<F>(
        &self,
        name: impl Into<TimerName>,
        delay: Duration,
        args: Vec<Value>,
        callback: F,
    ) -> Option<TimerHandle>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.schedule(name, TimerKind::Timeout, delay, args, Arc::new(callback), false)
    }

    pub fn set_interval<F>(
        &self,
        name: impl Into<TimerName>,
        period: Duration,
        args: Vec<Value>,
        callback: F,
    ) -> Option<TimerHandle>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.schedule(name, TimerKind::Interval, period, args, Arc::new(callback), false)
    }

    /// Register a task created outside the registry so it can be cancelled by
    /// name. No delay is recorded; `kind` may be unknown.
    pub fn track_external(
        &self,
        name: impl Into<TimerName>,
        task: AbortHandle,
        kind: Option<TimerKind>,
    ) -> Option<TimerHandle> {
        let name = name.into();
        let mut arena = self.arena.lock();
        if arena.names.contains_key(&name) {
            return None;
        }
        Some(self.place(
            &mut arena,
            TimerRecord {
                name,
                task: Some(task),
                set_at: Instant::now(),
                delay: None,
                args: Vec::new(),
                kind,
                placement: PlacementCell::default(),
            },
        ))
    }

    /// Cancel the timer named `name`. Returns whether a record existed.
    pub fn cancel(&self, name: impl Into<TimerName>) -> bool {
        let name = name.into();
        let Some(record) = self.arena.lock().remove_by_name(&name) else {
            return false;
        };
        record.abort();
        match record.kind {
            Some(kind) => tracing::debug!(timer = %name, kind = %kind, "timer cancelled"),
            None => tracing::debug!(timer = %name, "timer of unknown kind cancelled"),
        }
        true
    }

    pub fn cancel_handle(&self, handle: TimerHandle) -> bool {
        let Some(record) = self.arena.lock().remove(handle) else {
            return false;
        };
        record.abort();
        true
    }

    /// Re-arm a detached record (from [`Self::from_backup`] or an import whose
    /// task has gone) with a callback from the current generation.
    pub fn rearm(&self, name: impl Into<TimerName>, callback: TimerCallback) -> Option<TimerHandle> {
        let name = name.into();
        let (kind, delay, args) = {
            let arena = self.arena.lock();
            let record = arena.lookup(&name)?;
            if record.task.is_some() {
                return None;
            }
            (record.kind?, record.remaining(Instant::now())?, record.args.clone())
        };
        self.schedule(name, kind, delay, args, callback, true)
    }

    /// `delay - (now - set_at)`, saturating at zero. `None` for unknown names
    /// and for records created without a delay.
    pub fn remaining_time(&self, name: impl Into<TimerName>) -> Option<Duration> {
        let name = name.into();
        self.arena.lock().lookup(&name)?.remaining(Instant::now())
    }

    pub fn contains(&self, name: impl Into<TimerName>) -> bool {
        self.arena.lock().names.contains_key(&name.into())
    }

    pub fn handle_of(&self, name: impl Into<TimerName>) -> Option<TimerHandle> {
        self.arena.lock().names.get(&name.into()).copied()
    }

    pub fn is_live(&self, handle: TimerHandle) -> bool {
        self.arena.lock().get(handle).is_some()
    }

    pub fn get(&self, handle: TimerHandle) -> Option<TimerSnapshot> {
        let now = Instant::now();
        self.arena.lock().get(handle).map(|record| record.snapshot(now))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<TimerName> {
        let mut names: Vec<TimerName> = self.arena.lock().names.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.arena.lock().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots sorted by name.
    pub fn snapshot(&self) -> Vec<TimerSnapshot> {
        let now = Instant::now();
        let arena = self.arena.lock();
        let mut snapshots: Vec<TimerSnapshot> =
            arena.records().map(|record| record.snapshot(now)).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Move every record out of this registry. Tasks keep running.
    pub fn export_state(&self) -> TimerTable {
        let mut arena = self.arena.lock();
        let handles: Vec<TimerHandle> = arena.names.values().copied().collect();
        let records = handles
            .into_iter()
            .filter_map(|handle| arena.remove(handle))
            .inspect(|record| record.placement.lock().handle = None)
            .collect();
        TimerTable { records }
    }

    /// Adopt records exported from another registry. Nothing is re-armed.
    ///
    /// A name already present here wins; the incoming duplicate is cancelled.
    /// Timeouts that fired while in transit are dropped.
    pub fn import_state(&self, table: TimerTable) {
        let mut arena = self.arena.lock();
        for record in table.records {
            if record.placement.lock().fired {
                tracing::debug!(timer = %record.name, "imported timeout already fired, dropping it");
                continue;
            }
            if arena.names.contains_key(&record.name) {
                tracing::warn!(timer = %record.name, "imported timer collides with existing name, cancelling it");
                record.abort();
                continue;
            }
            self.place(&mut arena, record);
        }
    }

    /// Insert `record` into this registry's arena and point its placement here.
    fn place(&self, arena: &mut Arena, record: TimerRecord) -> TimerHandle {
        let placement = record.placement.clone();
        let handle = arena.insert(record);
        let mut placement = placement.lock();
        placement.arena = Arc::downgrade(&self.arena);
        placement.handle = Some(handle);
        handle
    }
}

impl Reloadable for TimerRegistry {
    fn backup(&self) -> Option<BackupState> {
        BackupState::encode(&self.snapshot()).ok()
    }
}

async fn run_timeout(
    placement: PlacementCell,
    deadline: Instant,
    args: Vec<Value>,
    callback: TimerCallback,
) {
    tokio::time::sleep_until(deadline).await;
    // The placement lock is released before the arena is taken; `place` and
    // `import_state` lock in the opposite order.
    let (arena, handle) = {
        let mut placement = placement.lock();
        placement.fired = true;
        (placement.arena.clone(), placement.handle.take())
    };
    // Release before invoking so the callback may reuse its own name.
    if let (Some(arena), Some(handle)) = (arena.upgrade(), handle) {
        arena.lock().remove(handle);
    }
    callback(&args);
}

async fn run_interval(start: Instant, period: Duration, args: Vec<Value>, callback: TimerCallback) {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        callback(&args);
    }
}
