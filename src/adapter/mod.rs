//! The adapter itself: process-wide core, per-namespace facades, and the
//! pieces between them.

pub(crate) mod channel;
pub mod local;
pub mod namespace;
pub(crate) mod query;
pub mod service;
pub(crate) mod subscription;
pub(crate) mod types;

pub use local::{LocalAdapter, LocalEmitter, MembershipIndex};
pub use namespace::NamespaceAdapter;
pub use service::RedisAdapter;
