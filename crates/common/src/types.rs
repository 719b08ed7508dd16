use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic saga ids.
const SAGA_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_29c4_5b8e_4d0a_9c37_e2f1_08b5_d473);

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of one saga execution.
    ///
    /// Doubles as the idempotency key sent to the wallet, so a retried request
    /// must carry the same saga id as the original attempt.
    SagaId
);

uuid_id!(
    /// Identifier of a player (wallet owner).
    PlayerId
);

uuid_id!(
    /// Identifier of a game-launch session.
    SessionId
);

uuid_id!(
    /// Identifier of a game in the catalog.
    GameId
);

uuid_id!(
    /// Internal identifier of a round row.
    RoundId
);

uuid_id!(
    /// Internal identifier of a spin row.
    SpinId
);

impl SagaId {
    /// Derives the saga id for an external transaction within a session.
    ///
    /// The same `(saga_kind, session_id, external_tx_id)` triple always maps to
    /// the same id, which lets the wallet deduplicate a replayed request.
    /// External ids are only unique per aggregator, so the session is part of
    /// the key.
    pub fn for_transaction(saga_kind: &str, session_id: SessionId, external_tx_id: &str) -> Self {
        let name = format!("{saga_kind}:{}:{external_tx_id}", session_id.0);
        Self(Uuid::new_v5(&SAGA_NAMESPACE, name.as_bytes()))
    }

    /// Returns the idempotency key used for wallet calls of this saga.
    pub fn transaction_key(&self) -> String {
        self.0.to_string()
    }

    /// Returns a derived idempotency key for a compensating wallet call.
    pub fn compensation_key(&self) -> String {
        format!("{}:compensation", self.0)
    }
}
