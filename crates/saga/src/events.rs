//! Integration events published by the spin sagas.

use chrono::{DateTime, Utc};
use common::{PlayerId, RoundId, SagaId, SessionId, SpinId};
use domain::{Money, Round, Session, Spin, SpinType};
use serde::{Deserialize, Serialize};

/// Events published after a spin saga completes its ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SpinEvent {
    /// A bet was recorded.
    Placed(SpinEventData),

    /// A win was recorded.
    Settled(SpinEventData),

    /// A bet was refunded.
    RolledBack(SpinEventData),

    /// A round was closed.
    Ended(RoundEndedData),
}

impl SpinEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            SpinEvent::Placed(_) => "SpinPlaced",
            SpinEvent::Settled(_) => "SpinSettled",
            SpinEvent::RolledBack(_) => "SpinRolledBack",
            SpinEvent::Ended(_) => "RoundEnded",
        }
    }

    pub fn saga_id(&self) -> SagaId {
        match self {
            SpinEvent::Placed(d) | SpinEvent::Settled(d) | SpinEvent::RolledBack(d) => d.saga_id,
            SpinEvent::Ended(d) => d.saga_id,
        }
    }

    pub fn round_id(&self) -> RoundId {
        match self {
            SpinEvent::Placed(d) | SpinEvent::Settled(d) | SpinEvent::RolledBack(d) => d.round_id,
            SpinEvent::Ended(d) => d.round_id,
        }
    }
}

/// Data for spin events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinEventData {
    pub saga_id: SagaId,
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub round_id: RoundId,
    pub ext_round_id: String,
    pub spin_id: SpinId,
    pub spin_type: SpinType,
    pub transaction_id: String,
    pub amount: Money,
    pub real_amount: Money,
    pub bonus_amount: Money,
    pub free_spin_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl SpinEventData {
    pub fn new(saga_id: SagaId, session: &Session, ext_round_id: &str, spin: &Spin) -> Self {
        Self {
            saga_id,
            session_id: session.id,
            player_id: session.player_id,
            round_id: spin.round_id,
            ext_round_id: ext_round_id.to_string(),
            spin_id: spin.id,
            spin_type: spin.spin_type,
            transaction_id: spin.transaction_id.clone(),
            amount: spin.amount,
            real_amount: spin.real_amount,
            bonus_amount: spin.bonus_amount,
            free_spin_id: spin.free_spin_id.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// Data for the RoundEnded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEndedData {
    pub saga_id: SagaId,
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub round_id: RoundId,
    pub ext_round_id: String,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RoundEndedData {
    pub fn new(saga_id: SagaId, session: &Session, round: &Round) -> Self {
        Self {
            saga_id,
            session_id: session.id,
            player_id: session.player_id,
            round_id: round.id,
            ext_round_id: round.ext_round_id.clone(),
            finished_at: round.finished_at,
        }
    }
}
