//! Application layer containing the connection lifecycle and event routing.
//!
//! The supervisor opens the command and subscription connections, the
//! `DualChannelManager` holds them, the `EventRouter` moves messages from one to
//! the other through a handler, and the `ShutdownCoordinator` unwinds it all.
//! `EventBridge` in [`engine`] ties them into the running service.

pub mod channels;
pub mod engine;
pub mod payment;
pub mod router;
pub mod shutdown;
pub mod supervisor;
