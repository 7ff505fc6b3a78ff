//! Service layer: registration storage across tiers, registration CRUD and payments.
//! - `storage`: local file, Edge Config and Blob tiers behind one facade.
//! - `registration`: whole-collection CRUD over the facade.
//! - `payments`: Stripe Checkout sessions and webhook verification.

pub mod errors;
pub mod observability;
pub mod runtime;
pub mod storage;
pub mod registration;
pub mod payments;
#[cfg(test)]
pub mod test_support;
