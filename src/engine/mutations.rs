use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use rand::Rng;
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::covers_span;
use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::pricing;
use super::{acquire_write, Engine, EngineError, WalCommand};

impl Engine {
    // ── Owner-side ingestion ─────────────────────────────────
    //
    // Schedule, exceptions, rules and base price are owned by the
    // resource-management collaborator; these operations feed them in.
    // The booking core only ever reads them.

    pub async fn register_space(
        &self,
        owner_id: Ulid,
        name: Option<String>,
        base_price: Cents,
        schedule: WeekSchedule,
    ) -> Result<Ulid, EngineError> {
        if self.spaces.len() >= MAX_SPACES {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("space name too long"));
        }
        if base_price <= 0 || base_price > MAX_BASE_PRICE {
            return Err(EngineError::LimitExceeded("base price out of range"));
        }
        schedule.validate().map_err(EngineError::InvalidInterval)?;

        let id = Ulid::new();
        let event = Event::SpaceRegistered {
            id,
            owner_id,
            name: name.clone(),
            base_price,
            schedule: schedule.clone(),
        };
        self.wal_append(&event).await?;
        let ss = SpaceState::new(id, owner_id, name, base_price, schedule);
        self.spaces.insert(id, Arc::new(RwLock::new(ss)));
        metrics::gauge!(crate::observability::SPACES_ACTIVE).increment(1.0);
        self.notify.send(id, &event);
        Ok(id)
    }

    /// A space with live bookings cannot disappear under its requesters.
    pub async fn remove_space(&self, id: Ulid) -> Result<(), EngineError> {
        let ss = self.get_space(&id).ok_or(EngineError::NotFound(id))?;
        let guard = acquire_write(&ss).await?;
        if guard.bookings.iter().any(|b| b.is_live()) {
            return Err(EngineError::HasLiveBookings(id));
        }
        drop(guard);

        let event = Event::SpaceRemoved { id };
        self.wal_append(&event).await?;
        self.spaces.remove(&id);
        metrics::gauge!(crate::observability::SPACES_ACTIVE).decrement(1.0);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    pub async fn replace_schedule(
        &self,
        space_id: Ulid,
        schedule: WeekSchedule,
    ) -> Result<(), EngineError> {
        schedule.validate().map_err(EngineError::InvalidInterval)?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        let event = Event::ScheduleReplaced { space_id, schedule };
        self.persist_and_apply(space_id, &mut guard, &event).await
    }

    pub async fn set_exception(
        &self,
        space_id: Ulid,
        date: NaiveDate,
        exception: DayException,
    ) -> Result<(), EngineError> {
        if let DayException::Open(ref ranges) = exception {
            validate_ranges(ranges).map_err(EngineError::InvalidInterval)?;
        }
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        if !guard.exceptions.contains_key(&date)
            && guard.exceptions.len() >= MAX_EXCEPTIONS_PER_SPACE
        {
            return Err(EngineError::LimitExceeded("too many exceptions on space"));
        }
        let event = Event::ExceptionSet { space_id, date, exception };
        self.persist_and_apply(space_id, &mut guard, &event).await
    }

    pub async fn clear_exception(
        &self,
        space_id: Ulid,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        if !guard.exceptions.contains_key(&date) {
            return Err(EngineError::NotFound(space_id));
        }
        let event = Event::ExceptionCleared { space_id, date };
        self.persist_and_apply(space_id, &mut guard, &event).await
    }

    pub async fn add_rule(
        &self,
        space_id: Ulid,
        kind: RuleKind,
        factor: f64,
    ) -> Result<Ulid, EngineError> {
        let id = Ulid::new();
        let candidate = PriceRule { id, kind: kind.clone(), factor, active: true };
        pricing::validate_rule(&candidate)?;

        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        if guard.rules.len() >= MAX_RULES_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many rules on space"));
        }
        let event = Event::RuleAdded { id, space_id, kind, factor, active: true };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        Ok(id)
    }

    pub async fn update_rule(
        &self,
        id: Ulid,
        kind: RuleKind,
        factor: f64,
        active: bool,
    ) -> Result<Ulid, EngineError> {
        let candidate = PriceRule { id, kind: kind.clone(), factor, active };
        pricing::validate_rule(&candidate)?;

        let space_id = self
            .space_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        if guard.rule(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::RuleUpdated { id, space_id, kind, factor, active };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        Ok(space_id)
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let space_id = self
            .space_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        let event = Event::RuleRemoved { id, space_id };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        Ok(space_id)
    }

    pub async fn set_base_price(
        &self,
        space_id: Ulid,
        base_price: Cents,
    ) -> Result<(), EngineError> {
        if base_price <= 0 || base_price > MAX_BASE_PRICE {
            return Err(EngineError::LimitExceeded("base price out of range"));
        }
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        let event = Event::BasePriceChanged { space_id, base_price };
        self.persist_and_apply(space_id, &mut guard, &event).await
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Admit a booking request. The availability check, the overlap
    /// re-check and the insert run as one atomic unit under the space's
    /// write lock, so two concurrent requests can never both observe
    /// "no conflict". Every failure path leaves no partial state; success
    /// leaves exactly one pending booking with its frozen breakdown.
    pub async fn request_booking(
        &self,
        space_id: Ulid,
        requester_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        let started = std::time::Instant::now();
        let result = self.admit(space_id, requester_id, span).await;

        let status = match &result {
            Ok(_) => "admitted",
            Err(EngineError::Conflict(_)) => "conflict",
            Err(EngineError::NotAvailable(_)) => "not_available",
            Err(EngineError::InvalidInterval(_)) => "invalid",
            Err(EngineError::ConcurrencyTimeout) => "timeout",
            Err(_) => "error",
        };
        metrics::counter!(crate::observability::BOOKINGS_REQUESTED_TOTAL, "status" => status)
            .increment(1);
        metrics::histogram!(crate::observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn admit(
        &self,
        space_id: Ulid,
        requester_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        let now = now_ms();
        validate_span(&span)?;
        if span.start <= now {
            return Err(EngineError::InvalidInterval("start must be in the future"));
        }

        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = acquire_write(&ss).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many bookings on space"));
        }

        covers_span(&guard.schedule, &guard.exceptions, &span)?;
        check_no_conflict(&guard, &span)?;

        let quote = pricing::quote(guard.base_price, &guard.rules, &span)?;
        let booking = Booking {
            id: Ulid::new(),
            space_id,
            requester_id,
            span,
            status: BookingStatus::Pending,
            total_price: quote.total,
            breakdown: quote.breakdown,
            access_code: rand::thread_rng().gen_range(ACCESS_CODE_MIN..=ACCESS_CODE_MAX),
            checked_in_at: None,
            checked_out_at: None,
            created_at: now,
        };

        let event = Event::BookingRequested { booking: booking.clone() };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        info!("booking {} admitted on space {space_id}", booking.id);
        Ok(booking)
    }

    /// Owner accepts a pending booking. Authorization is the auth
    /// collaborator's problem; state legality is ours.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                op: "confirm",
            });
        }
        let event = Event::BookingConfirmed { id, space_id };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        Ok(space_id)
    }

    pub async fn reject_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                op: "reject",
            });
        }
        let event = Event::BookingRejected { id, space_id };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        Ok(space_id)
    }

    /// Requester-side cancellation, allowed until the cancellation window
    /// closes before start.
    pub async fn cancel_booking(&self, id: Ulid, now: Ms) -> Result<Ulid, EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.is_live() {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                op: "cancel",
            });
        }
        let deadline = booking.span.start - CANCELLATION_WINDOW_MS;
        if now >= deadline {
            return Err(EngineError::TooLateToCancel { deadline });
        }
        let event = Event::BookingCanceled { id, space_id };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        info!("booking {id} canceled on space {space_id}");
        Ok(space_id)
    }

    pub async fn check_in(&self, id: Ulid, now: Ms) -> Result<(), EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                op: "check in",
            });
        }
        if !booking.span.contains_instant(now) {
            return Err(EngineError::InvalidInterval("now outside booking interval"));
        }
        let event = Event::CheckedIn { id, space_id, at: now };
        self.persist_and_apply(space_id, &mut guard, &event).await
    }

    pub async fn check_out(&self, id: Ulid, now: Ms) -> Result<(), EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                op: "check out",
            });
        }
        if !booking.span.contains_instant(now) {
            return Err(EngineError::InvalidInterval("now outside booking interval"));
        }
        let event = Event::CheckedOut { id, space_id, at: now };
        self.persist_and_apply(space_id, &mut guard, &event).await
    }

    /// Close out a confirmed booking once its interval has passed and the
    /// requester checked out. The reaper uses `force` for bookings that
    /// never checked out.
    pub async fn complete_booking(&self, id: Ulid, now: Ms, force: bool) -> Result<Ulid, EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                op: "complete",
            });
        }
        if now < booking.span.end {
            return Err(EngineError::InvalidInterval("booking has not ended"));
        }
        if booking.checked_out_at.is_none() && !force {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                op: "complete without check-out",
            });
        }
        let event = Event::BookingCompleted { id, space_id };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        Ok(space_id)
    }

    // ── Sweep support ────────────────────────────────────────

    /// Confirmed bookings whose interval has fully passed.
    pub fn collect_overdue(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut overdue = Vec::new();
        for entry in self.spaces.iter() {
            let ss = entry.value().clone();
            if let Ok(guard) = ss.try_read() {
                for b in &guard.bookings {
                    if b.status == BookingStatus::Confirmed && b.span.end <= now {
                        overdue.push((b.id, guard.id));
                    }
                }
            }
        }
        overdue
    }

    /// Pending bookings the owner never answered within the deadline.
    pub fn collect_stale_pending(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut stale = Vec::new();
        for entry in self.spaces.iter() {
            let ss = entry.value().clone();
            if let Ok(guard) = ss.try_read() {
                for b in &guard.bookings {
                    if b.status == BookingStatus::Pending
                        && b.created_at + CONFIRMATION_DEADLINE_MS <= now
                    {
                        stale.push((b.id, guard.id));
                    }
                }
            }
        }
        stale
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Booking history survives verbatim —
    /// each `BookingRequested` carries the frozen booking, and a status
    /// event restores its terminal state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let mut visited = HashSet::new();

        let space_ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        for id in space_ids {
            if !visited.insert(id) {
                continue;
            }
            let entry = match self.spaces.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let ss = entry.value().clone();
            let guard = ss.try_read().expect("compact: uncontended read");

            events.push(Event::SpaceRegistered {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                base_price: guard.base_price,
                schedule: guard.schedule.clone(),
            });
            for (date, exception) in &guard.exceptions {
                events.push(Event::ExceptionSet {
                    space_id: guard.id,
                    date: *date,
                    exception: exception.clone(),
                });
            }
            for rule in &guard.rules {
                events.push(Event::RuleAdded {
                    id: rule.id,
                    space_id: guard.id,
                    kind: rule.kind.clone(),
                    factor: rule.factor,
                    active: rule.active,
                });
            }
            for booking in &guard.bookings {
                // Rebuild each booking exactly as stored; requested state
                // plus check-in/out marks are all inside the snapshot.
                events.push(Event::BookingRequested {
                    booking: Booking {
                        status: BookingStatus::Pending,
                        ..booking.clone()
                    },
                });
                let mark = match booking.status {
                    BookingStatus::Pending => None,
                    BookingStatus::Confirmed => {
                        Some(Event::BookingConfirmed { id: booking.id, space_id: guard.id })
                    }
                    BookingStatus::Rejected => {
                        Some(Event::BookingRejected { id: booking.id, space_id: guard.id })
                    }
                    BookingStatus::Canceled => {
                        Some(Event::BookingCanceled { id: booking.id, space_id: guard.id })
                    }
                    BookingStatus::Completed => {
                        Some(Event::BookingCompleted { id: booking.id, space_id: guard.id })
                    }
                };
                events.extend(mark);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
