//! Coordination between satellites sharing a room
//!
//! When several satellites hear the same wake word, only one should answer.

mod arbiter;

pub use arbiter::{ArbiterResult, Claim, PACKET_SIZE, WakeArbiter, select_winner};
