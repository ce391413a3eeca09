pub mod cookies;
pub mod manager;

pub use manager::{IssuedSession, SessionManager, ValidatedSession};
