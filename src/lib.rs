//! rookery — a channel-based chat service.
//!
//! One central server arbitrates accounts, channels, and role-checked
//! commands for terminal clients. Each client holds two TCP connections: a
//! control connection carrying commands and their replies, and a data
//! connection carrying sign-in exchanges, menu selections, chat traffic, and
//! lifecycle signals. Both sides run the same seven-state session machine
//! and keep it in agreement over the wire.

pub mod client;
pub mod codec;
pub mod server;
pub mod state;
pub mod wire;
