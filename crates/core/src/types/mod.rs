//! Domain types for users and sessions

mod session;
mod user;

pub use session::{IssuedToken, Session, StoredSession};
pub use user::{User, UserId};
