//! Domain layer for the spin saga core.
//!
//! This crate provides the records the sagas read and write:
//! - Money, Currency and Balance value objects
//! - Session and Game identity
//! - Round and Spin entities with their invariants
//! - The real/bonus split rules for wagers and wins

pub mod error;
pub mod money;
pub mod round;
pub mod rules;
pub mod session;
pub mod spin;

pub use error::DomainError;
pub use money::{Balance, Currency, Money};
pub use round::Round;
pub use rules::{WagerSplit, split_wager, split_win};
pub use session::{Game, Session};
pub use spin::{Spin, SpinType};
