use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Resource unknown or retired. Retired resources are invisible to new
    /// bookings and rentals.
    ResourceNotFound(Ulid),
    AlreadyExists(Ulid),
    /// Resource exists but is not a time-sliced venue.
    NotBookable(Ulid),
    /// Resource exists but is not a count-limited rental pool.
    NotRentable(Ulid),
    InvalidInterval {
        start: String,
        end: String,
    },
    /// Candidate interval overlaps the given confirmed booking.
    SlotUnavailable(Ulid),
    /// No units left in the rental pool.
    OutOfStock(Ulid),
    /// Booking/rental id unknown, or already in a terminal status.
    NotFound(Ulid),
    LimitExceeded(&'static str),
    Validation(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NotBookable(id) => {
                write!(f, "resource {id} is not bookable by time slot")
            }
            EngineError::NotRentable(id) => write!(f, "resource {id} is not available for rent"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: [{start}, {end})")
            }
            EngineError::SlotUnavailable(id) => {
                write!(f, "time slot already booked (conflicts with {id})")
            }
            EngineError::OutOfStock(id) => write!(f, "no units available for rent: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
