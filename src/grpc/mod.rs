//! gRPC transport for the message bus.
//!
//! - [`BrokerServer`] hosts a [`MemoryBus`](crate::bus::MemoryBus) behind the
//!   `BusService` defined in `proto/bus.proto`
//! - [`RemoteBus`] implements [`MessageBus`](crate::bus::MessageBus) against a
//!   running broker, so agents in separate processes share topics

pub mod bus_service;
pub mod client;
pub mod server;

pub use bus_service::BrokerService;
pub use client::RemoteBus;
pub use server::BrokerServer;
