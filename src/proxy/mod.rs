//! SOCKS5 protocol core.
//!
//! [`handshake`] drives one session through greeting, authentication, and
//! the CONNECT request. [`relay`] runs the bidirectional copy once the
//! tunnel is established.

pub mod handshake;
pub mod relay;

pub use handshake::{ConnectRequest, Established, Handshake, TargetAddr};
