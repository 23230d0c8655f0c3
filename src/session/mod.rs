//! Session persistence: the durable record, the store collaborator and the
//! debounced writer the coach drives from discrete transitions.

pub mod persistence;
pub mod record;
pub mod store;

pub use persistence::{PendingWrite, SessionPersistence};
pub use record::{EventType, LiveCoachEvent, SessionRecord, SessionToken, SessionUpdate};
pub use store::{JsonSessionStore, MemorySessionStore, SessionStore, StoreError};
