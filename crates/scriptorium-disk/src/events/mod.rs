//! Event fabric.
//!
//! A local [`EventBus`] per disk instance, and a [`RemoteHub`] of named
//! channels that carries serialized events between instances sharing a
//! disk id. Mutations emit in a fixed order: reindex, local, remote.

mod local;
mod remote;

pub use local::{matches_pattern, Delivered, EventBus, EventSubscription, Handler, Unsubscribe};
pub use remote::{
    decode_remote, encode_remote, RemoteEnvelope, RemoteError, RemoteHub, RemoteSubscription,
};
