use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;

use super::availability::{open_spans, resolve_day};
use super::conflict::validate_span;
use super::pricing::{self, Quote};
use super::{Engine, EngineError};

impl Engine {
    /// Concrete open spans for an inclusive date range. Display semantics:
    /// open hours only — existing bookings are the scheduler's concern,
    /// not the calendar's.
    pub async fn open_intervals(
        &self,
        space_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        if from > to {
            return Err(EngineError::InvalidInterval("date range reversed"));
        }
        if (to - from).num_days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let ss = match self.get_space(&space_id) {
            Some(ss) => ss,
            None => return Ok(vec![]),
        };
        let guard = ss.read().await;
        Ok(open_spans(&guard.schedule, &guard.exceptions, from, to))
    }

    /// One date's resolved open hours, exception override included.
    pub async fn day_hours(
        &self,
        space_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TimeRange>, EngineError> {
        let ss = match self.get_space(&space_id) {
            Some(ss) => ss,
            None => return Ok(vec![]),
        };
        let guard = ss.read().await;
        Ok(resolve_day(&guard.schedule, &guard.exceptions, date).to_vec())
    }

    /// Side-effect-free price preview against the space's live rules.
    /// Nothing is persisted; the binding snapshot happens only inside
    /// `request_booking`.
    pub async fn quote_booking(&self, space_id: Ulid, span: Span) -> Result<Quote, EngineError> {
        validate_span(&span)?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let guard = ss.read().await;
        pricing::quote(guard.base_price, &guard.rules, &span)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let space_id = self
            .space_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let guard = ss.read().await;
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn bookings_for_space(&self, space_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let ss = match self.get_space(&space_id) {
            Some(ss) => ss,
            None => return Ok(vec![]),
        };
        let guard = ss.read().await;
        Ok(guard.bookings.clone())
    }

    /// All of one requester's bookings across every space.
    pub fn bookings_for_requester(&self, requester_id: Ulid) -> Vec<Booking> {
        let mut found = Vec::new();
        for entry in self.spaces.iter() {
            let ss = entry.value().clone();
            if let Ok(guard) = ss.try_read() {
                found.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| b.requester_id == requester_id)
                        .cloned(),
                );
            }
        }
        found
    }

    pub fn list_spaces(&self) -> Vec<SpaceInfo> {
        self.spaces
            .iter()
            .map(|entry| {
                let ss = entry.value().clone();
                let guard = ss.try_read().expect("list_spaces: uncontended read");
                SpaceInfo {
                    id: guard.id,
                    owner_id: guard.owner_id,
                    name: guard.name.clone(),
                    base_price: guard.base_price,
                }
            })
            .collect()
    }

    pub async fn get_rules(&self, space_id: Ulid) -> Result<Vec<PriceRule>, EngineError> {
        let ss = match self.get_space(&space_id) {
            Some(ss) => ss,
            None => return Ok(vec![]),
        };
        let guard = ss.read().await;
        Ok(guard.rules.clone())
    }
}
