//! In-memory audit trail of saga executions.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::observer::{SagaObserver, StepRef, StepStatus};
use crate::state::SagaState;

/// Records kept by default before the oldest are evicted.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// A transition folded into a [`SagaAuditRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuditEvent {
    Started {
        saga: String,
    },
    Step {
        step: String,
        name: String,
        status: StepStatus,
    },
    Finished {
        state: SagaState,
    },
}

/// What happened during the latest execution of a saga id.
///
/// Saga ids are derived from the external transaction, so a retried request
/// runs under the same id. Each start resets the per-run fields and bumps
/// `attempts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaAuditRecord {
    pub saga_id: Option<SagaId>,
    pub saga: String,
    pub attempts: u32,
    pub state: SagaState,
    pub completed_steps: Vec<String>,
    pub failed_step: Option<String>,
    pub compensated_steps: Vec<String>,
    pub failed_compensations: Vec<String>,
    /// Display names of the steps seen, by step id.
    pub step_names: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SagaAuditRecord {
    /// Folds one transition into the record.
    pub fn apply(&mut self, event: AuditEvent) {
        match event {
            AuditEvent::Started { saga } => {
                self.saga = saga;
                self.attempts += 1;
                self.state = SagaState::Running;
                self.completed_steps.clear();
                self.failed_step = None;
                self.compensated_steps.clear();
                self.failed_compensations.clear();
            }
            AuditEvent::Step { step, name, status } => {
                if name != step {
                    self.step_names.insert(step.clone(), name);
                }
                match status {
                    StepStatus::Executing => {}
                    StepStatus::Completed => self.completed_steps.push(step),
                    StepStatus::Failed => {
                        self.failed_step = Some(step);
                        self.state = SagaState::Compensating;
                    }
                    StepStatus::Compensated => self.compensated_steps.push(step),
                    StepStatus::CompensationFailed => self.failed_compensations.push(step),
                }
            }
            AuditEvent::Finished { state } => {
                self.state = state;
            }
        }
        self.updated_at = Some(Utc::now());
    }

    /// True when compensation left external state that needs manual repair.
    pub fn needs_reconciliation(&self) -> bool {
        !self.failed_compensations.is_empty() || self.state == SagaState::Failed
    }
}

#[derive(Debug, Default)]
struct AuditState {
    records: HashMap<SagaId, SagaAuditRecord>,
    /// Saga ids in first-seen order, for eviction.
    order: VecDeque<SagaId>,
}

/// Observer that keeps one [`SagaAuditRecord`] per saga id.
///
/// Holds at most `capacity` records; the saga id seen longest ago is evicted
/// first.
#[derive(Debug, Clone)]
pub struct InMemoryAuditLog {
    state: Arc<Mutex<AuditState>>,
    capacity: usize,
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Returns the record of a saga, if it was observed.
    pub fn record(&self, saga_id: SagaId) -> Option<SagaAuditRecord> {
        self.lock().records.get(&saga_id).cloned()
    }

    /// Returns all records that need manual reconciliation.
    pub fn needing_reconciliation(&self) -> Vec<SagaAuditRecord> {
        self.lock()
            .records
            .values()
            .filter(|r| r.needs_reconciliation())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    fn apply(&self, saga_id: SagaId, event: AuditEvent) {
        let mut state = self.lock();
        if !state.records.contains_key(&saga_id) {
            while state.records.len() >= self.capacity {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.records.remove(&oldest);
            }
            state.order.push_back(saga_id);
        }
        let record = state.records.entry(saga_id).or_insert_with(|| SagaAuditRecord {
            saga_id: Some(saga_id),
            ..SagaAuditRecord::default()
        });
        record.apply(event);
    }

    fn lock(&self) -> MutexGuard<'_, AuditState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SagaObserver for InMemoryAuditLog {
    fn on_saga_started(&self, saga_id: SagaId, saga: &str) {
        self.apply(
            saga_id,
            AuditEvent::Started {
                saga: saga.to_string(),
            },
        );
    }

    fn on_step(&self, saga_id: SagaId, _saga: &str, step: StepRef<'_>, status: StepStatus) {
        self.apply(
            saga_id,
            AuditEvent::Step {
                step: step.id.to_string(),
                name: step.name.to_string(),
                status,
            },
        );
    }

    fn on_saga_finished(&self, saga_id: SagaId, _saga: &str, state: SagaState) {
        self.apply(saga_id, AuditEvent::Finished { state });
    }
}
