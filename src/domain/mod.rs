//! Domain types and the ports the application layer depends on.

pub mod connection;
pub mod event;
pub mod ports;
