//! Offline-first request interception, caching and background sync.
//!
//! Outgoing calls are routed through [`Runtime`]: reads are served from
//! versioned namespaces by one of five strategies, writes that cannot reach
//! the server are queued and replayed later, and the host hears about it all
//! through [`Notification`]s.

pub mod cache;
pub mod clients;
pub mod commands;
pub mod config;
pub mod context;
pub mod control;
pub mod db;
pub mod error;
pub mod event;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod notify;
pub mod pending;
pub mod router;
pub mod runtime;
pub mod sync;

pub use config::Config;
pub use context::Context;
pub use control::{ControlMessage, ControlReply};
pub use error::FetchError;
pub use http::{Request, Response};
pub use network::{ReqwestTransport, Transport};
pub use notify::{Notification, NotificationKind};
pub use runtime::{Runtime, RuntimeHandle};
