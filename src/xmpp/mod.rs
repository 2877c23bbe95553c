//! Core stream infrastructure for the chat server.
//!
//! # Architecture
//!
//! - [`Framer`]: turns arbitrary text chunks into complete markup fragments
//! - [`Element`]: owned tree of a parsed fragment
//! - [`Connector`]: opens the transport ([`TlsConnector`] in production)
//!
//! The social client in [`crate::social`] drives these over one connection.

pub mod config;
pub mod connector;
pub mod element;
pub mod error;
pub mod framer;

pub use config::Config;
pub use connector::{BoxedTransport, Connector, TcpConnector, TlsConnector, Transport};
pub use element::Element;
pub use error::StreamError;
pub use framer::{Framer, Overflow};
