//! # Redis Room Adapter
//!
//! A distributed room/namespace broadcast adapter over Redis Pub/Sub. A
//! realtime socket server usually runs as a fleet of nodes, each holding a
//! disjoint set of live connections; this crate lets any node emit to a
//! room or a namespace and have the message reach exactly the right
//! clients across the whole fleet, and answers fleet-wide membership
//! queries.
//!
//! ## Core Features
//!
//! - **Fleet broadcast**: publish once, deliver on every node that has
//!   matching clients, with echo suppression so the publisher never
//!   re-processes its own frames.
//! - **Reference-counted subscriptions**: at most one bus subscription per
//!   channel, tied to local room occupancy.
//! - **Fleet membership queries**: scatter/gather over the bus with a
//!   deadline scaled to the fleet size.
//! - **Pluggable local delivery**: implement the `LocalEmitter` trait to
//!   connect the adapter to your socket layer.
//!
//! ## Getting Started
//!
//! Build a [`RedisAdapter`](adapter::RedisAdapter) from an
//! [`AdapterConfig`](config::AdapterConfig), then call `of(namespace,
//! emitter)` to obtain the per-namespace facade your socket server drives.
//!
//! ---

pub mod adapter;
pub mod config;
pub mod error;
pub mod protocol;

/// Public prelude for convenience.
///
/// This allows users to import the most common types with a single `use`
/// statement: `use redis_room_adapter::prelude::*;`
pub mod prelude {
    pub use crate::adapter::{
        LocalAdapter, LocalEmitter, MembershipIndex, NamespaceAdapter, RedisAdapter,
    };
    pub use crate::config::AdapterConfig;
    pub use crate::error::{AdapterError, AdapterResult};
    pub use crate::protocol::{BroadcastOptions, Packet, Room, Sid};
}
