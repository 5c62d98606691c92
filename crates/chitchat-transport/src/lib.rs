//! Chitchat Transport Layer
//!
//! A TCP server that splits each connection's byte stream into frames on a
//! delimiter byte and hands every frame to a user-supplied handler.
//! The transport layer handles:
//! - Listener lifecycle (listen, accept, cut)
//! - Per-connection dispatch with cascading cancellation
//! - A registry of live connections for targeted shutdown
//! - Diversion of all asynchronous errors into one error stream
//!
//! The transport is decoupled from application logic via the `FrameHandler` trait.

pub mod config;
mod connection;
pub mod context;
pub mod diversion;
pub mod error;
pub mod handler;
mod reader;
pub mod registry;
pub mod server;

pub use config::{Deadlines, ServerConfig};
pub use context::FrameContext;
pub use diversion::{ErrorEvent, ErrorStream};
pub use error::{HandlerError, HandlerResult, ServerError};
pub use handler::FrameHandler;
pub use registry::{ConnectionId, ConnectionRegistry};
pub use server::{Server, ServerBuilder};
