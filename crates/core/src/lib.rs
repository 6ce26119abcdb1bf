//! Nomlog Core - session and credential registry
//!
//! This crate provides:
//! - Access tokens and their SHA-256 hashes
//! - Argon2id password hashing
//! - User and session domain types
//! - Persistent store trait (plus an in-memory store)
//! - The registry: login, token checks, revocation, user cache
//! - Error types

pub mod error;
pub mod password;
pub mod registry;
pub mod store;
pub mod token;
pub mod types;

// Re-export common types
pub use error::{CoreError, Result};
pub use registry::{Registry, RegistryConfig};
pub use store::{MemoryStore, PersistentStore, StoreError, StoreResult};
pub use token::{AccessToken, AccessTokenHash};
pub use types::{IssuedToken, Session, StoredSession, User, UserId};
