//! Plotterd daemon internals.
//!
//! The daemon wires four subsystems around one serial link: the
//! controller transport, the job manager, the event bus, and the
//! WebSocket server that fans events out to clients.

#![forbid(unsafe_code)]

pub mod events;
pub mod jobs;
pub mod poller;
pub mod server;
pub mod sim;
pub mod transport;
