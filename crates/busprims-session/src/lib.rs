//! Node, publisher, subscriber and service sessions.
//!
//! A [`Node`] owns a redundant link and a dispatcher thread that routes each
//! accepted transfer to the session registered for its port. Sessions filter
//! stale or repeated transfer-IDs per remote node; the typed wrappers in
//! [`presentation`] add schema encoding on top.

#[cfg(feature = "async")]
mod asynchronous;
pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod presentation;
pub mod publisher;
pub mod server;
pub mod subscriber;
pub mod tracker;

pub use client::ServiceClient;
pub use config::NodeConfig;
pub use error::{Result, SessionError};
pub use node::Node;
pub use presentation::{TypedClient, TypedPublisher, TypedServer, TypedSubscriber};
pub use publisher::Publisher;
pub use server::ServiceServer;
pub use subscriber::Subscriber;
pub use tracker::TransferIdTracker;
