//! Shared identifier types for the spin saga core.

mod types;

pub use types::{GameId, PlayerId, RoundId, SagaId, SessionId, SpinId};
