mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;

pub use error::EngineError;
pub use pricing::{booking_cost, rental_cost};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

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
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
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

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: allocation (booking/rental) id → resource id
    pub(super) allocation_to_resource: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a ResourceState (no locking — caller holds the lock).
///
/// This is the only place that mutates bookings, rentals and the pool
/// counter, so replay reconstructs identical state from the event stream.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, allocation_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingConfirmed {
            id,
            resource_id,
            requester_id,
            date,
            interval,
            total_cost,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                requester_id: *requester_id,
                date: *date,
                interval: *interval,
                total_cost: *total_cost,
                status: BookingStatus::Confirmed,
            });
            allocation_map.insert(*id, *resource_id);
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = BookingStatus::Cancelled;
            }
        }
        Event::RentalOpened {
            id,
            resource_id,
            requester_id,
            start_date,
            end_date,
            duration_days,
            billing,
            total_amount,
            deposit_amount,
        } => {
            rs.rentals.push(Rental {
                id: *id,
                requester_id: *requester_id,
                start_date: *start_date,
                end_date: *end_date,
                duration_days: *duration_days,
                billing: *billing,
                total_amount: *total_amount,
                deposit_amount: *deposit_amount,
                status: RentalStatus::Active,
            });
            rs.available_for_rent = rs.available_for_rent.saturating_sub(1);
            allocation_map.insert(*id, *resource_id);
        }
        Event::RentalReturned { id, .. } => {
            let mut returned = false;
            if let Some(rental) = rs.rental_mut(*id)
                && rental.status == RentalStatus::Active
            {
                rental.status = RentalStatus::Completed;
                returned = true;
            }
            if returned {
                rs.available_for_rent += 1;
            }
        }
        Event::ResourceRetired { .. } => {
            rs.active = false;
        }
        // ResourceRegistered is handled at the DashMap level, not here
        Event::ResourceRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            allocation_to_resource: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::ResourceRegistered { id, name, kind } => {
                    let rs = ResourceState::new(*id, name.clone(), kind.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    let resource_id = event_resource_id(other);
                    if let Some(resource_id) = resource_id
                        && let Some(entry) = engine.state.get(&resource_id) {
                            let rs_arc = entry.clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_resource(&mut guard, other, &engine.allocation_to_resource);
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
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_allocation(&self, allocation_id: &Ulid) -> Option<Ulid> {
        self.allocation_to_resource.get(allocation_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: Ulid,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.allocation_to_resource);
        self.notify.send(resource_id, event);
        Ok(())
    }

    /// Lookup allocation → resource, get resource, acquire write lock.
    pub(super) async fn resolve_allocation_write(
        &self,
        allocation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .get_resource_for_allocation(allocation_id)
            .ok_or(EngineError::NotFound(*allocation_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }
}

/// Extract the resource_id from an event (for non-Register events).
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingConfirmed { resource_id, .. }
        | Event::BookingCancelled { resource_id, .. }
        | Event::RentalOpened { resource_id, .. }
        | Event::RentalReturned { resource_id, .. } => Some(*resource_id),
        Event::ResourceRetired { id } => Some(*id),
        Event::ResourceRegistered { .. } => None,
    }
}
