//! Secret handling.
//!
//! Re-exports the secrecy types the binary needs to hand the database
//! URL to the pool without printing it.

pub use secrecy::{ExposeSecret, SecretString};
