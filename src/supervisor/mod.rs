//! Supervisor (auctioneer) side of the protocol.
//!
//! Each round walks through:
//!
//! ```text
//! CollectingBids ─► SelectingWinner ─► Accepting ─► [AwaitingDone] ─► RoundComplete
//!        │
//!        └─ no proposals ─► NoWinner
//! ```
//!
//! Bid collection ends at the deadline, once enough distinct machines have
//! bid, or after a quiet period without new bids ([`BidWindow`]). The winner
//! is the fastest bid unless the lookahead guard prefers the runner-up
//! ([`select_winner`]).

pub mod auctioneer;
pub mod book;
pub mod outcome;
pub mod selection;
pub mod window;

pub use auctioneer::Supervisor;
pub use book::{ProposalDisposition, RoundBook};
pub use outcome::{Completion, RoundOutcome, RoundResult};
pub use selection::{rank, select_winner, Selection};
pub use window::{BidWindow, StopReason};
