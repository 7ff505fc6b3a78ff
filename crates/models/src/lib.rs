//! Domain model for event registrations.
//!
//! A registration is one attendee's signup record; the whole collection is
//! stored as a single JSON array, so every type here round-trips through
//! `serde_json` with camelCase field names.

pub mod errors;
pub mod flags;
pub mod registration;

pub use registration::{Registration, RegistrationInput};
