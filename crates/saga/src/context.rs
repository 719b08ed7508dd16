//! Per-execution saga context.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{Result, SagaError};

/// Identity of one saga execution plus an open key/value bag.
///
/// The bag carries ad hoc flags between steps of the same saga, such as
/// "wallet debit issued". Values known when the saga is designed belong on
/// the typed context that embeds this one.
#[derive(Debug, Clone)]
pub struct SagaContext {
    saga_id: SagaId,
    correlation_id: String,
    started_at: DateTime<Utc>,
    data: HashMap<String, Value>,
}

impl SagaContext {
    /// Creates a context. `correlation_id` is the external transaction id.
    pub fn new(saga_id: SagaId, correlation_id: impl Into<String>) -> Self {
        Self {
            saga_id,
            correlation_id: correlation_id.into(),
            started_at: Utc::now(),
            data: HashMap::new(),
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Stores a value under `key`, replacing any previous value.
    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        self.data.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Reads the value under `key`, if present.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(SagaError::from)
    }

    /// Reads the value under `key`, failing with `IllegalState` if it is absent.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| SagaError::IllegalState(format!("missing context value '{key}'")))
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Sets a boolean flag.
    pub fn set_flag(&mut self, key: impl Into<String>) {
        self.data.insert(key.into(), Value::Bool(true));
    }

    /// Returns true if the flag under `key` is set.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.data.get(key), Some(Value::Bool(true)))
    }
}

/// A typed saga context.
///
/// Concrete sagas embed a [`SagaContext`] in their own context struct and
/// expose it through this trait so the orchestrator can reach the identity.
pub trait SagaData: Send + 'static {
    fn saga(&self) -> &SagaContext;
    fn saga_mut(&mut self) -> &mut SagaContext;
}

impl SagaData for SagaContext {
    fn saga(&self) -> &SagaContext {
        self
    }

    fn saga_mut(&mut self) -> &mut SagaContext {
        self
    }
}

/// Returns the value of a typed context field, or `IllegalState` if unset.
pub fn required<'a, T>(value: &'a Option<T>, name: &str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| SagaError::IllegalState(format!("{name} not resolved")))
}
