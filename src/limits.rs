//! Hard limits. All of these exist to bound memory and WAL growth per tenant,
//! not to express business rules.

pub const MAX_RESOURCES_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 500_000;
pub const MAX_RENTALS_PER_RESOURCE: usize = 500_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_RENTAL_DURATION_DAYS: u32 = 365;
pub const MAX_RENTAL_CAPACITY: u32 = 100_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;
pub const MAX_TENANTS: usize = 1024;
