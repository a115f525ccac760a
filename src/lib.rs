//! # socksd
//!
//! A SOCKS5 proxy server that authenticates every client with a
//! username/password pair, establishes TCP CONNECT tunnels, and relays
//! bytes bidirectionally until either side closes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Acceptor                          │
//! │   owns the listening socket, one task per connection     │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Handshake State Machine                │
//! │   Greeting → Authenticate → Request → Dial → Established │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Relay                           │
//! │   two copy tasks over pooled buffers, first finisher     │
//! │   tears both transports down                             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions draw fixed-size buffers from a shared [`pool::BufferPool`] and
//! are tracked by an atomic in-flight counter on
//! [`server::ServerMetrics`], reported periodically by a background task.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod pool;
pub mod proxy;
pub mod server;

pub use error::{Error, Result};
