//! A self-contained real-time chat relay: TCP accept loop, HTTP static
//! file responder, RFC 6455 WebSocket upgrade and frame codec, and a
//! single-threaded poll-driven event loop that turns all of it into one
//! ordered stream of [`Event`]s for an application layer to consume.

pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod static_files;

pub use config::Config;
pub use error::{Error, Result};
pub use event::Event;
pub use server::Server;
