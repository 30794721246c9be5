use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedResourceState};

impl Engine {
    /// Confirmed slots on `(resource, date)`, sorted by start time. Callers
    /// turn this into a "what's taken" view; free time is its complement.
    pub async fn booked_slots(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .bookings_on(date)
            .iter()
            .filter(|b| b.is_confirmed())
            .map(|b| SlotInfo {
                start: b.interval.start,
                end: b.interval.end,
            })
            .collect())
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        // snapshot the Arcs first; awaiting while iterating the map would pin
        // its shard locks
        let resources: Vec<SharedResourceState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(resources.len());
        for rs in resources {
            let guard = rs.read().await;
            out.push(ResourceInfo {
                id: guard.id,
                name: guard.name.clone(),
                kind: guard.kind.clone(),
                active: guard.active,
                available_for_rent: guard.available_for_rent,
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_resource_info(&self, resource_id: Ulid) -> Option<ResourceInfo> {
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        Some(ResourceInfo {
            id: guard.id,
            name: guard.name.clone(),
            kind: guard.kind.clone(),
            active: guard.active,
            available_for_rent: guard.available_for_rent,
        })
    }

    /// Every booking a requester holds, any resource, any status. Newest day
    /// first, latest start first within a day.
    pub async fn bookings_for_requester(&self, requester_id: Ulid) -> Vec<BookingRecord> {
        let mut out = Vec::new();
        let resources: Vec<SharedResourceState> = self.state.iter().map(|e| e.value().clone()).collect();
        for rs in resources {
            let guard = rs.read().await;
            for b in guard.bookings.iter().filter(|b| b.requester_id == requester_id) {
                out.push(BookingRecord {
                    id: b.id,
                    resource_id: guard.id,
                    requester_id: b.requester_id,
                    date: b.date,
                    interval: b.interval,
                    total_cost: b.total_cost,
                    status: b.status,
                });
            }
        }
        out.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(b.interval.start.cmp(&a.interval.start))
        });
        out
    }

    /// Every rental a requester holds, newest first (ULIDs sort by creation
    /// time).
    pub async fn rentals_for_requester(&self, requester_id: Ulid) -> Vec<RentalRecord> {
        let mut out = Vec::new();
        let resources: Vec<SharedResourceState> = self.state.iter().map(|e| e.value().clone()).collect();
        for rs in resources {
            let guard = rs.read().await;
            for r in guard.rentals.iter().filter(|r| r.requester_id == requester_id) {
                out.push(RentalRecord {
                    id: r.id,
                    resource_id: guard.id,
                    requester_id: r.requester_id,
                    start_date: r.start_date,
                    end_date: r.end_date,
                    duration_days: r.duration_days,
                    billing: r.billing,
                    total_amount: r.total_amount,
                    deposit_amount: r.deposit_amount,
                    status: r.status,
                });
            }
        }
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out
    }
}
