use std::sync::Arc;

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_interval};
use super::pricing::{booking_cost, rental_cost};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_resource(
        &self,
        id: Ulid,
        name: Option<String>,
        kind: ResourceKind,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("resource name too long"));
            }
        match &kind {
            ResourceKind::Venue { hourly_rate } => {
                if hourly_rate.is_sign_negative() {
                    return Err(EngineError::Validation("hourly rate must not be negative"));
                }
            }
            ResourceKind::RentalPool {
                daily_rate,
                weekly_rate,
                capacity,
            } => {
                if daily_rate.is_sign_negative() || weekly_rate.is_sign_negative() {
                    return Err(EngineError::Validation("rental rate must not be negative"));
                }
                if *capacity == 0 {
                    return Err(EngineError::Validation("rental capacity must be at least 1"));
                }
                if *capacity > MAX_RENTAL_CAPACITY {
                    return Err(EngineError::LimitExceeded("rental capacity too large"));
                }
            }
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceRegistered {
            id,
            name: name.clone(),
            kind: kind.clone(),
        };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, name, kind);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Retire a resource: new bookings and rentals are rejected, history stays
    /// queryable. Retiring twice is an error.
    pub async fn retire_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let mut guard = rs.write().await;
        if !guard.active {
            return Err(EngineError::Validation("resource is already retired"));
        }
        let event = Event::ResourceRetired { id };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Book a venue slot. Conflict check and insert happen under one write
    /// lock, so two racing requests for overlapping slots serialize and the
    /// loser sees the winner's booking.
    pub async fn create_booking(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<BookingRecord, EngineError> {
        let interval = validate_interval(start, end)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let mut guard = rs.write().await;
        if !guard.active {
            // retired resources are invisible to new allocations
            return Err(EngineError::ResourceNotFound(resource_id));
        }
        let hourly_rate = match &guard.kind {
            ResourceKind::Venue { hourly_rate } => *hourly_rate,
            ResourceKind::RentalPool { .. } => {
                return Err(EngineError::NotBookable(resource_id));
            }
        };
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        check_no_conflict(&guard, date, &interval)?;

        let total_cost = booking_cost(hourly_rate, &interval);
        let event = Event::BookingConfirmed {
            id,
            resource_id,
            requester_id,
            date,
            interval,
            total_cost,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(BookingRecord {
            id,
            resource_id,
            requester_id,
            date,
            interval,
            total_cost,
            status: BookingStatus::Confirmed,
        })
    }

    /// Cancel a confirmed booking. Cancellation is terminal: a second cancel
    /// (or cancelling an unknown id) is NotFound.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_allocation_write(&id).await?;
        match guard.booking_mut(id) {
            Some(b) if b.is_confirmed() => {}
            _ => return Err(EngineError::NotFound(id)),
        }
        let event = Event::BookingCancelled { id, resource_id };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Take one unit from a rental pool. Availability check and decrement are
    /// one atomic step under the resource write lock, so the pool count never
    /// goes negative however many requests race.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_rental(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        start_date: NaiveDate,
        duration_days: u32,
        billing: BillingKind,
        deposit_amount: Decimal,
    ) -> Result<RentalRecord, EngineError> {
        if duration_days == 0 {
            return Err(EngineError::Validation("rental duration must be at least 1 day"));
        }
        if duration_days > MAX_RENTAL_DURATION_DAYS {
            return Err(EngineError::LimitExceeded("rental duration too long"));
        }
        if deposit_amount.is_sign_negative() {
            return Err(EngineError::Validation("deposit must not be negative"));
        }
        let end_date = start_date
            .checked_add_days(Days::new(duration_days as u64))
            .ok_or(EngineError::Validation("rental end date out of range"))?;

        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let mut guard = rs.write().await;
        if !guard.active {
            // retired resources are invisible to new allocations
            return Err(EngineError::ResourceNotFound(resource_id));
        }
        let (daily_rate, weekly_rate) = match &guard.kind {
            ResourceKind::RentalPool {
                daily_rate,
                weekly_rate,
                ..
            } => (*daily_rate, *weekly_rate),
            ResourceKind::Venue { .. } => {
                return Err(EngineError::NotRentable(resource_id));
            }
        };
        if guard.rentals.len() >= MAX_RENTALS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many rentals on resource"));
        }
        if guard.available_for_rent == 0 {
            return Err(EngineError::OutOfStock(resource_id));
        }

        let total_amount = rental_cost(daily_rate, weekly_rate, duration_days, billing);
        let event = Event::RentalOpened {
            id,
            resource_id,
            requester_id,
            start_date,
            end_date,
            duration_days,
            billing,
            total_amount,
            deposit_amount,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(RentalRecord {
            id,
            resource_id,
            requester_id,
            start_date,
            end_date,
            duration_days,
            billing,
            total_amount,
            deposit_amount,
            status: RentalStatus::Active,
        })
    }

    /// Return a rental unit to the pool. Like cancellation, terminal: a
    /// second return is NotFound.
    pub async fn return_rental(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_allocation_write(&id).await?;
        match guard.rental_mut(id) {
            Some(r) if r.is_active() => {}
            _ => return Err(EngineError::NotFound(id)),
        }
        let event = Event::RentalReturned { id, resource_id };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state. Cancelled bookings and completed rentals are
    /// re-emitted as open/close pairs so the audit history survives.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in resource_ids {
            let rs = match self.state.get(&id) {
                Some(e) => e.value().clone(),
                None => continue,
            };
            let guard = rs.read().await;

            events.push(Event::ResourceRegistered {
                id: guard.id,
                name: guard.name.clone(),
                kind: guard.kind.clone(),
            });

            for b in &guard.bookings {
                events.push(Event::BookingConfirmed {
                    id: b.id,
                    resource_id: guard.id,
                    requester_id: b.requester_id,
                    date: b.date,
                    interval: b.interval,
                    total_cost: b.total_cost,
                });
                if b.status == BookingStatus::Cancelled {
                    events.push(Event::BookingCancelled {
                        id: b.id,
                        resource_id: guard.id,
                    });
                }
            }

            for r in &guard.rentals {
                events.push(Event::RentalOpened {
                    id: r.id,
                    resource_id: guard.id,
                    requester_id: r.requester_id,
                    start_date: r.start_date,
                    end_date: r.end_date,
                    duration_days: r.duration_days,
                    billing: r.billing,
                    total_amount: r.total_amount,
                    deposit_amount: r.deposit_amount,
                });
                if r.status == RentalStatus::Completed {
                    events.push(Event::RentalReturned {
                        id: r.id,
                        resource_id: guard.id,
                    });
                }
            }

            if !guard.active {
                events.push(Event::ResourceRetired { id: guard.id });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
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
