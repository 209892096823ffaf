//! Per-book reservation waitlists for a library.
//!
//! When no copy of a book is on the shelf, customers join its waitlist. The
//! [`engine::Engine`] keeps each waitlist's positions contiguous, derives
//! expected availability dates from predicted loan returns, and hands out
//! claim deadlines to the customers at the front when copies free up.

pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod oracle;
pub mod reaper;
pub mod service;
pub mod store;
pub mod wal;
