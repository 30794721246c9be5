use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Seconds since midnight. The only time-of-day type.
///
/// Inputs arrive in loose forms (`9:5:0`, `09:05`, `09:05:00`) and are
/// normalized here, once, before any comparison or storage. Display always
/// emits zero-padded `HH:MM:SS` — this is a contract with the callers, not
/// cosmetic formatting: un-normalized strings compare wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub fn from_hms(hour: u32, minute: u32, second: u32) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        Some(Self(hour * 3600 + minute * 60 + second))
    }

    /// Parse `H:M`, `H:M:S`, `HH:MM` or `HH:MM:SS`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(':');
        let hour: u32 = parts.next()?.trim().parse().ok()?;
        let minute: u32 = parts.next()?.trim().parse().ok()?;
        let second: u32 = match parts.next() {
            Some(p) => p.trim().parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Self::from_hms(hour, minute, second)
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.0 / 3600,
            (self.0 % 3600) / 60,
            self.0 % 60
        )
    }
}

/// Half-open interval `[start, end)` within a single calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Interval {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Interval start must be before end");
        Self { start, end }
    }

    pub fn duration_secs(&self) -> u32 {
        self.end.seconds() - self.start.seconds()
    }

    /// Half-open overlap: back-to-back slots sharing a boundary do not touch.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// How a rental is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingKind {
    Daily,
    Weekly,
}

impl BillingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingKind::Daily => "daily",
            BillingKind::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RentalStatus {
    Active,
    Completed,
}

impl RentalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RentalStatus::Active => "active",
            RentalStatus::Completed => "completed",
        }
    }
}

/// What a resource is and how it prices.
///
/// A venue is time-sliced: exclusive half-open slots billed hourly. A rental
/// pool is count-limited: `capacity` interchangeable units billed daily or
/// weekly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Venue {
        // Decimal as string: bincode cannot decode the default self-describing
        // form, and these pass through the WAL
        #[serde(with = "rust_decimal::serde::str")]
        hourly_rate: Decimal,
    },
    RentalPool {
        #[serde(with = "rust_decimal::serde::str")]
        daily_rate: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        weekly_rate: Decimal,
        capacity: u32,
    },
}

impl ResourceKind {
    pub fn is_venue(&self) -> bool {
        matches!(self, ResourceKind::Venue { .. })
    }

    pub fn is_rental_pool(&self) -> bool {
        matches!(self, ResourceKind::RentalPool { .. })
    }

    pub fn capacity(&self) -> u32 {
        match self {
            ResourceKind::Venue { .. } => 0,
            ResourceKind::RentalPool { capacity, .. } => *capacity,
        }
    }
}

/// A confirmed-or-cancelled time slot on a venue. Never deleted — cancellation
/// flips the status and frees the interval for future conflict checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub date: NaiveDate,
    pub interval: Interval,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_cost: Decimal,
    pub status: BookingStatus,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

/// One unit of a rental pool held by a requester. Holds exactly one unit of
/// capacity while `Active`; completion returns the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rental {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: u32,
    pub billing: BillingKind,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub deposit_amount: Decimal,
    pub status: RentalStatus,
}

impl Rental {
    pub fn is_active(&self) -> bool {
        self.status == RentalStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: Option<String>,
    pub kind: ResourceKind,
    /// Retired resources reject new bookings/rentals but keep history.
    pub active: bool,
    /// All bookings ever made, sorted by `(date, interval.start)`.
    pub bookings: Vec<Booking>,
    /// All rentals ever opened, in creation order.
    pub rentals: Vec<Rental>,
    /// Units currently in the pool. Mutated only by event application under
    /// the resource write lock; invariant: active rentals + this == capacity.
    pub available_for_rent: u32,
}

impl ResourceState {
    pub fn new(id: Ulid, name: Option<String>, kind: ResourceKind) -> Self {
        let available_for_rent = kind.capacity();
        Self {
            id,
            name,
            kind,
            active: true,
            bookings: Vec::new(),
            rentals: Vec::new(),
            available_for_rent,
        }
    }

    /// Insert a booking maintaining `(date, start)` sort order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.interval.start);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.date, b.interval.start))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// All bookings (any status) on `date`, as a contiguous slice of the
    /// sorted vector. Binary search skips every other date.
    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn rental_mut(&mut self, id: Ulid) -> Option<&mut Rental> {
        self.rentals.iter_mut().find(|r| r.id == id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: Ulid,
        name: Option<String>,
        kind: ResourceKind,
    },
    ResourceRetired {
        id: Ulid,
    },
    BookingConfirmed {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        date: NaiveDate,
        interval: Interval,
        #[serde(with = "rust_decimal::serde::str")]
        total_cost: Decimal,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
    RentalOpened {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        duration_days: u32,
        billing: BillingKind,
        #[serde(with = "rust_decimal::serde::str")]
        total_amount: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        deposit_amount: Decimal,
    },
    RentalReturned {
        id: Ulid,
        resource_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub kind: ResourceKind,
    pub active: bool,
    pub available_for_rent: u32,
}

/// A booked slot, as returned by availability queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub date: NaiveDate,
    pub interval: Interval,
    pub total_cost: Decimal,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalRecord {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: u32,
    pub billing: BillingKind,
    pub total_amount: Decimal,
    pub deposit_amount: Decimal,
    pub status: RentalStatus,
}
