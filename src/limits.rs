/// Longest accepted contact name, email or book title, in bytes.
pub const MAX_FIELD_LEN: usize = 256;

/// Most reservations a single book's waitlist may hold.
pub const MAX_WAITLIST_LEN: usize = 10_000;

/// Longest predicted-return-date sequence the engine will index.
pub const MAX_DATE_SEQUENCE_LEN: usize = 100_000;
