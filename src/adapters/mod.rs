//! Adapters for the side-effect ports: storage, identity, mail and push.

pub mod identity;
pub mod messaging;
pub mod storage;

pub use identity::LocalIdentityProvider;
pub use messaging::{LogMailer, LogPushDispatcher};
pub use storage::{LocalFileStorage, MemoryFileStorage};
