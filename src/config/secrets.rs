//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the database URL.

pub use secrecy::{ExposeSecret, SecretString};
