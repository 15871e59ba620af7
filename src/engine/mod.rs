mod availability;
mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;

pub use availability::{covers_span, merge_touching, open_spans, resolve_day};
pub use error::EngineError;
pub use pricing::{quote, validate_rule, Quote};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::{LOCK_ACQUIRE_RETRIES, LOCK_TIMEOUT_MS};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub spaces: DashMap<Ulid, SharedSpaceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (booking/rule) id → space id
    pub(super) entity_to_space: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a SpaceState (no locking — caller holds the lock).
fn apply_to_space(ss: &mut SpaceState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ScheduleReplaced { schedule, .. } => {
            ss.schedule = schedule.clone();
        }
        Event::ExceptionSet { date, exception, .. } => {
            ss.exceptions.insert(*date, exception.clone());
        }
        Event::ExceptionCleared { date, .. } => {
            ss.exceptions.remove(date);
        }
        Event::RuleAdded {
            id,
            space_id,
            kind,
            factor,
            active,
        } => {
            ss.rules.push(PriceRule {
                id: *id,
                kind: kind.clone(),
                factor: *factor,
                active: *active,
            });
            entity_map.insert(*id, *space_id);
        }
        Event::RuleUpdated {
            id, kind, factor, active, ..
        } => {
            // Updated in place — evaluation order stays creation order.
            if let Some(rule) = ss.rules.iter_mut().find(|r| r.id == *id) {
                rule.kind = kind.clone();
                rule.factor = *factor;
                rule.active = *active;
            }
        }
        Event::RuleRemoved { id, .. } => {
            ss.rules.retain(|r| r.id != *id);
            entity_map.remove(id);
        }
        Event::BasePriceChanged { base_price, .. } => {
            ss.base_price = *base_price;
        }
        Event::BookingRequested { booking } => {
            entity_map.insert(booking.id, booking.space_id);
            ss.insert_booking(booking.clone());
        }
        Event::BookingConfirmed { id, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.status = BookingStatus::Confirmed;
            }
        }
        Event::BookingRejected { id, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.status = BookingStatus::Rejected;
            }
        }
        Event::BookingCanceled { id, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.status = BookingStatus::Canceled;
            }
        }
        Event::CheckedIn { id, at, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.checked_in_at = Some(*at);
            }
        }
        Event::CheckedOut { id, at, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.checked_out_at = Some(*at);
            }
        }
        Event::BookingCompleted { id, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.status = BookingStatus::Completed;
            }
        }
        // SpaceRegistered/Removed are handled at the DashMap level, not here
        Event::SpaceRegistered { .. } | Event::SpaceRemoved { .. } => {}
    }
}

/// Acquire a space's write lock within the bounded wait, retrying the
/// acquisition itself (never the business checks behind it). Exhaustion
/// surfaces `ConcurrencyTimeout` with no partial state.
pub(super) async fn acquire_write(
    space: &SharedSpaceState,
) -> Result<OwnedRwLockWriteGuard<SpaceState>, EngineError> {
    for attempt in 1..=LOCK_ACQUIRE_RETRIES {
        match tokio::time::timeout(
            Duration::from_millis(LOCK_TIMEOUT_MS),
            space.clone().write_owned(),
        )
        .await
        {
            Ok(guard) => return Ok(guard),
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                tracing::debug!("exclusivity acquisition attempt {attempt} timed out");
            }
        }
    }
    Err(EngineError::ConcurrencyTimeout)
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            spaces: DashMap::new(),
            wal_tx,
            notify,
            entity_to_space: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::SpaceRegistered {
                    id,
                    owner_id,
                    name,
                    base_price,
                    schedule,
                } => {
                    let ss = SpaceState::new(*id, *owner_id, name.clone(), *base_price, schedule.clone());
                    engine.spaces.insert(*id, Arc::new(RwLock::new(ss)));
                }
                Event::SpaceRemoved { id } => {
                    engine.spaces.remove(id);
                }
                other => {
                    if let Some(space_id) = event_space_id(other)
                        && let Some(entry) = engine.spaces.get(&space_id)
                    {
                        let ss_arc = entry.clone();
                        let mut guard = ss_arc.try_write().expect("replay: uncontended write");
                        apply_to_space(&mut guard, other, &engine.entity_to_space);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_space(&self, id: &Ulid) -> Option<SharedSpaceState> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    pub fn space_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_space.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        space_id: Ulid,
        ss: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_space(ss, event, &self.entity_to_space);
        self.notify.send(space_id, event);
        Ok(())
    }

    /// Lookup booking → space, get space, acquire write lock within bounds.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<SpaceState>), EngineError> {
        let space_id = self
            .space_for_entity(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let guard = acquire_write(&ss).await?;
        Ok((space_id, guard))
    }
}

/// Extract the space_id from an event (for non-Register/Remove events).
fn event_space_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ScheduleReplaced { space_id, .. }
        | Event::ExceptionSet { space_id, .. }
        | Event::ExceptionCleared { space_id, .. }
        | Event::RuleAdded { space_id, .. }
        | Event::RuleUpdated { space_id, .. }
        | Event::RuleRemoved { space_id, .. }
        | Event::BasePriceChanged { space_id, .. }
        | Event::BookingConfirmed { space_id, .. }
        | Event::BookingRejected { space_id, .. }
        | Event::BookingCanceled { space_id, .. }
        | Event::CheckedIn { space_id, .. }
        | Event::CheckedOut { space_id, .. }
        | Event::BookingCompleted { space_id, .. } => Some(*space_id),
        Event::BookingRequested { booking } => Some(booking.space_id),
        Event::SpaceRegistered { .. } | Event::SpaceRemoved { .. } => None,
    }
}
