//! Session state and delegated persistence.

mod persistence;
mod state;

pub use persistence::{MemoryPersistence, Persistence, SessionSnapshot};
pub use state::{LearningContext, SessionId, SessionState};
