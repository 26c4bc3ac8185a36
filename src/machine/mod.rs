//! Machine agent: bids on jobs it can run and executes the ones it wins.
//!
//! # States
//!
//! ```text
//!            CfP (supported type) -> Proposal
//!           ┌──────┐
//!           ▼      │
//!         Idle ────┘
//!           │  Accept (addressed here)
//!           ▼
//!         Busy ── hold eta_s ── Done ──► Idle
//! ```
//!
//! CfPs received while busy and Accepts received while busy are ignored.
//! The busy check-and-set happens under one lock, so two racing Accepts
//! cannot both start an execution.

pub mod agent;
pub mod executor;
pub mod state;

pub use agent::{MachineAgent, MachineHandle};
pub use executor::JobExecutor;
pub use state::{AcceptDecision, MachineState, MachineStatus};
