mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod txn;

pub use error::EngineError;
pub use store::{BookingStore, StoreTransaction, with_transaction};
pub use txn::EngineTransaction;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{
    Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot,
};
use tracing::{error, info, warn};

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::time::now_ms;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

const WAL_CHANNEL_CAPACITY: usize = 4096;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    /// All events of one commit. They land in the same fsync.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Blocks for one append, drains whatever else is already
/// queued, then pays for a single fsync.
///
/// After a failed flush the writer refuses every later append: the failed
/// batch may be partly on disk, and acknowledging writes that were
/// conflict-checked against state without it could persist an overlap.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut poisoned: Option<String> = None;
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_control(&mut wal, other, poisoned.as_deref());
                continue;
            }
        };
        let mut batch = vec![first];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { events, response } => batch.push((events, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        match &poisoned {
            Some(reason) => reject_batch(batch, reason),
            None => {
                if let Err(e) = flush_batch(&mut wal, batch) {
                    error!("WAL flush failed, refusing further writes: {e}");
                    poisoned = Some(e.to_string());
                }
            }
        }
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd, poisoned.as_deref());
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: Vec<PendingAppend>) -> io::Result<()> {
    let events: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(events as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (events, _) in &batch {
        if let Err(e) = wal.append_buffered(events) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so buffered bytes don't leak into
    // a later batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, response) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
    result
}

fn reject_batch(batch: Vec<PendingAppend>, reason: &str) {
    for (_, response) in batch {
        let _ = response.send(Err(io::Error::other(format!("WAL unavailable: {reason}"))));
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand, poisoned: Option<&str>) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = match poisoned {
                Some(reason) => Err(io::Error::other(format!("WAL unavailable: {reason}"))),
                None => wal.compact(&events),
            };
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => reject_batch(
            vec![(events, response)],
            "append routed to control path",
        ),
    }
}

// ── Engine ───────────────────────────────────────────────

/// WAL-backed room and booking store.
///
/// Lock order, always: commit gate (shared) → room catalog → room lock.
/// Compaction is the only holder of the commit gate in exclusive mode.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    rooms: DashMap<RoomId, SharedRoomState>,
    room_names: DashMap<String, RoomId>,
    /// Reverse lookup: booking id → room id.
    booking_index: DashMap<BookingId, RoomId>,
    wal_tx: mpsc::Sender<WalCommand>,
    commit_gate: Arc<RwLock<()>>,
    /// Serializes room creation and deletion so name uniqueness holds.
    catalog: Arc<Mutex<()>>,
    next_room_id: AtomicI64,
    next_booking_id: AtomicI64,
    last_created_at: AtomicI64,
}

/// Everything a commit keeps locked until its events are durable and applied.
struct CommitLocks {
    gate: OwnedRwLockReadGuard<()>,
    catalog: Option<OwnedMutexGuard<()>>,
    room: Option<OwnedRwLockWriteGuard<RoomState>>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            inner: Arc::new(EngineInner {
                rooms: DashMap::new(),
                room_names: DashMap::new(),
                booking_index: DashMap::new(),
                wal_tx,
                commit_gate: Arc::new(RwLock::new(())),
                catalog: Arc::new(Mutex::new(())),
                next_room_id: AtomicI64::new(1),
                next_booking_id: AtomicI64::new(1),
                last_created_at: AtomicI64::new(0),
            }),
        };

        // Sole owner of every lock here, so try_write never contends. Never
        // use blocking_write: this may run inside an async context.
        for event in &events {
            match event.room_id() {
                None => engine.apply_event(None, event),
                Some(room_id) => {
                    let Some(shared) = engine.shared_room(room_id) else {
                        warn!(%room_id, ?event, "WAL references unknown room, skipping");
                        continue;
                    };
                    let mut guard = shared
                        .try_write()
                        .map_err(|_| io::Error::other("replay: room lock contended"))?;
                    engine.apply_event(Some(&mut *guard), event);
                }
            }
        }

        info!(
            path = %wal_path.display(),
            events = events.len(),
            rooms = engine.inner.rooms.len(),
            bookings = engine.inner.booking_index.len(),
            "engine opened"
        );
        Ok(engine)
    }

    pub(crate) fn shared_room(&self, id: RoomId) -> Option<SharedRoomState> {
        self.inner.rooms.get(&id).map(|e| e.value().clone())
    }

    pub(crate) fn room_of(&self, booking_id: BookingId) -> Option<RoomId> {
        self.inner.booking_index.get(&booking_id).map(|e| *e.value())
    }

    async fn gate(&self) -> OwnedRwLockReadGuard<()> {
        self.inner.commit_gate.clone().read_owned().await
    }

    async fn lock_catalog(&self) -> OwnedMutexGuard<()> {
        self.inner.catalog.clone().lock_owned().await
    }

    /// Write-lock a live room. A room deleted while we queued for the lock
    /// reads as not found.
    async fn lock_room(&self, id: RoomId) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let shared = self.shared_room(id).ok_or(EngineError::RoomNotFound(id))?;
        let guard = shared.write_owned().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(id));
        }
        Ok(guard)
    }

    fn allocate_room_id(&self) -> RoomId {
        RoomId(self.inner.next_room_id.fetch_add(1, Ordering::SeqCst))
    }

    fn allocate_booking_id(&self) -> BookingId {
        BookingId(self.inner.next_booking_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Wall clock, clamped so creation stamps never go backwards.
    fn stamp_created_at(&self) -> Ms {
        let now = now_ms();
        let prev = self.inner.last_created_at.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }

    fn checkpoint(&self) -> Event {
        Event::Checkpoint {
            next_room_id: self.inner.next_room_id.load(Ordering::SeqCst),
            next_booking_id: self.inner.next_booking_id.load(Ordering::SeqCst),
            last_created_at: self.inner.last_created_at.load(Ordering::SeqCst),
        }
    }

    /// Send events to the group-commit writer and wait for the fsync.
    async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Make `events` durable, then apply them, with `locks` held throughout.
    ///
    /// Runs on its own task: once started, a commit finishes even if the
    /// caller's future is dropped, so memory never lags the log.
    async fn commit(&self, locks: CommitLocks, events: Vec<Event>) -> Result<(), EngineError> {
        if events.is_empty() {
            return Ok(());
        }
        let engine = self.clone();
        tokio::spawn(async move {
            let CommitLocks {
                gate,
                catalog,
                mut room,
            } = locks;
            engine.wal_append(events.clone()).await?;
            for event in &events {
                engine.apply_event(room.as_deref_mut(), event);
            }
            drop(room);
            drop(catalog);
            drop(gate);
            Ok::<_, EngineError>(())
        })
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    /// Apply an event to in-memory state. Room-scoped events need the room
    /// passed in, already locked by the caller.
    fn apply_event(&self, room: Option<&mut RoomState>, event: &Event) {
        let inner = &self.inner;
        match (event, room) {
            (Event::RoomCreated { id, name }, _) => {
                let rs = RoomState::new(Room {
                    id: *id,
                    name: name.clone(),
                });
                inner.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                inner.room_names.insert(name.clone(), *id);
                inner.next_room_id.fetch_max(id.0 + 1, Ordering::SeqCst);
            }
            (Event::RoomDeleted { id }, Some(rs)) => {
                for booking in rs.bookings.drain(..) {
                    inner.booking_index.remove(&booking.id);
                }
                rs.deleted = true;
                inner.room_names.remove(&rs.room.name);
                inner.rooms.remove(id);
            }
            (
                Event::BookingConfirmed {
                    id,
                    room_id,
                    span,
                    created_at,
                },
                Some(rs),
            ) => {
                rs.insert_booking(Booking {
                    id: *id,
                    room_id: *room_id,
                    start_time: span.start,
                    end_time: span.end,
                    created_at: *created_at,
                });
                inner.booking_index.insert(*id, *room_id);
                inner.next_booking_id.fetch_max(id.0 + 1, Ordering::SeqCst);
                inner.last_created_at.fetch_max(*created_at, Ordering::SeqCst);
            }
            (Event::BookingCancelled { id, .. }, Some(rs)) => {
                rs.remove_booking(*id);
                inner.booking_index.remove(id);
            }
            (
                Event::Checkpoint {
                    next_room_id,
                    next_booking_id,
                    last_created_at,
                },
                _,
            ) => {
                inner.next_room_id.fetch_max(*next_room_id, Ordering::SeqCst);
                inner.next_booking_id.fetch_max(*next_booking_id, Ordering::SeqCst);
                inner.last_created_at.fetch_max(*last_created_at, Ordering::SeqCst);
            }
            (event, None) => {
                error!(?event, "room event applied without its room lock, skipping");
            }
        }
    }
}
