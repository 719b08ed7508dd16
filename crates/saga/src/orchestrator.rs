//! Generic saga orchestrator.
//!
//! Runs an ordered list of steps against a context. Each step runs under a
//! retry policy; when a step fails for good, every completed step that
//! requires compensation is compensated in reverse order. Compensation runs
//! on a spawned task that owns the context, so dropping the caller's future
//! (timeout, client disconnect) cannot interrupt a rollback in progress.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use common::SagaId;
use futures_util::FutureExt;

use crate::context::SagaData;
use crate::error::{Result, SagaError};
use crate::observer::{SagaObserver, StepRef, StepStatus};
use crate::retry::RetryPolicy;
use crate::state::SagaState;
use crate::step::SagaStep;
use crate::tasks::panic_message;

type SharedStep<C> = Arc<dyn SagaStep<C>>;
type Observers = Arc<[Arc<dyn SagaObserver>]>;

/// A named, ordered list of steps with a default retry policy.
pub struct SagaDefinition<C: SagaData> {
    name: &'static str,
    steps: Vec<SharedStep<C>>,
    retry_policy: RetryPolicy,
}

impl<C: SagaData> SagaDefinition<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Sets the policy used by steps that do not override it.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn steps(&self) -> &[SharedStep<C>] {
        &self.steps
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step_id()).collect()
    }

    pub fn default_retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Checks that the definition has steps and no duplicate step ids.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(SagaError::IllegalState(format!(
                "saga '{}' has no steps",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id()) {
                return Err(SagaError::IllegalState(format!(
                    "saga '{}' declares step '{}' twice",
                    self.name,
                    step.step_id()
                )));
            }
        }
        Ok(())
    }
}

/// A compensation that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    pub step: String,
    pub reason: String,
}

/// Outcome of one saga execution.
#[derive(Debug)]
pub struct SagaExecution<C> {
    pub saga_id: SagaId,
    pub saga: &'static str,
    pub state: SagaState,
    /// The context after the run. Lost only if the compensation task died.
    pub context: Option<C>,
    pub completed_steps: Vec<String>,
    pub compensated_steps: Vec<String>,
    pub compensation_failures: Vec<CompensationFailure>,
    /// The first terminal step failure.
    pub error: Option<SagaError>,
    /// A fault of the orchestration itself.
    pub fault: Option<SagaError>,
}

impl<C> SagaExecution<C> {
    pub fn is_completed(&self) -> bool {
        self.state == SagaState::Completed
    }

    /// Returns the context on success, otherwise the first terminal error.
    pub fn into_result(self) -> Result<C> {
        if let Some(error) = self.error.or(self.fault) {
            return Err(error);
        }
        self.context.ok_or_else(|| {
            SagaError::IllegalState(format!("saga '{}' finished without a context", self.saga))
        })
    }

    /// Moves to `next`, or to `Failed` with a fault when the lifecycle forbids it.
    fn advance(&mut self, next: SagaState) {
        if self.state.can_transition_to(next) {
            self.state = next;
            return;
        }
        tracing::error!(from = %self.state, to = %next, "illegal saga state transition");
        let fault = SagaError::IllegalState(format!(
            "saga '{}' cannot move from {} to {next}",
            self.saga, self.state
        ));
        self.fault.get_or_insert(fault);
        self.state = SagaState::Failed;
    }
}

struct CompensationOutcome<C> {
    context: C,
    compensated: Vec<String>,
    failures: Vec<CompensationFailure>,
}

/// Executes saga definitions and reports transitions to observers.
#[derive(Clone)]
pub struct SagaOrchestrator {
    observers: Observers,
}

impl Default for SagaOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaOrchestrator {
    pub fn new() -> Self {
        Self {
            observers: Arc::from(Vec::new()),
        }
    }

    /// Registers an observer for step and saga transitions.
    pub fn with_observer(self, observer: Arc<dyn SagaObserver>) -> Self {
        let mut observers: Vec<_> = self.observers.iter().cloned().collect();
        observers.push(observer);
        Self {
            observers: Arc::from(observers),
        }
    }

    /// Runs `definition` against `context`.
    #[tracing::instrument(
        skip_all,
        fields(saga = definition.name(), saga_id = %context.saga().saga_id())
    )]
    pub async fn execute<C: SagaData>(
        &self,
        definition: &SagaDefinition<C>,
        mut context: C,
    ) -> SagaExecution<C> {
        let saga = definition.name();
        let saga_id = context.saga().saga_id();
        let started = Instant::now();
        metrics::counter!("saga_executions_total", "saga" => saga).increment(1);

        let mut execution = SagaExecution {
            saga_id,
            saga,
            state: SagaState::Pending,
            context: None,
            completed_steps: Vec::new(),
            compensated_steps: Vec::new(),
            compensation_failures: Vec::new(),
            error: None,
            fault: None,
        };

        if let Err(e) = definition.validate() {
            tracing::error!(error = %e, "invalid saga definition");
            execution.fault = Some(e);
            execution.advance(SagaState::Failed);
            execution.context = Some(context);
            return self.finish(execution, started);
        }

        execution.advance(SagaState::Running);
        for observer in self.observers.iter() {
            observer.on_saga_started(saga_id, saga);
        }
        tracing::info!("saga started");

        let mut completed: Vec<SharedStep<C>> = Vec::new();
        for step in definition.steps() {
            let policy = step
                .retry_policy()
                .unwrap_or_else(|| definition.default_retry_policy().clone());

            self.notify_step(saga_id, saga, step.step_ref(), StepStatus::Executing);
            match self.run_step(saga, step.as_ref(), &policy, &mut context).await {
                Ok(()) => {
                    self.notify_step(saga_id, saga, step.step_ref(), StepStatus::Completed);
                    execution.completed_steps.push(step.step_id().to_string());
                    completed.push(step.clone());
                }
                Err(error) => {
                    self.notify_step(saga_id, saga, step.step_ref(), StepStatus::Failed);
                    tracing::warn!(
                        step = step.step_id(),
                        step_name = step.step_name(),
                        error = %error,
                        "saga step failed, compensating"
                    );
                    execution.error = Some(error);
                    execution.advance(SagaState::Compensating);
                    return self
                        .compensate(execution, completed, context, started)
                        .await;
                }
            }
        }

        execution.advance(SagaState::Completed);
        execution.context = Some(context);
        self.finish(execution, started)
    }

    /// Runs one step until it succeeds or its policy gives up.
    async fn run_step<C: SagaData>(
        &self,
        saga: &'static str,
        step: &dyn SagaStep<C>,
        policy: &RetryPolicy,
        context: &mut C,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            let result = AssertUnwindSafe(step.execute(context))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(SagaError::StepPanicked {
                        step: step.step_id().to_string(),
                        message: panic_message(&panic),
                    })
                });

            let error = match result {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            if !policy.should_retry(&error, attempt) {
                return Err(error);
            }

            let delay = policy.delay_for(attempt);
            metrics::counter!(
                "saga_step_retries_total",
                "saga" => saga,
                "step" => step.step_id().to_string()
            )
            .increment(1);
            tracing::warn!(
                step = step.step_id(),
                step_name = step.step_name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying saga step"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Compensates `completed` in reverse order on a task the caller cannot cancel.
    async fn compensate<C: SagaData>(
        &self,
        mut execution: SagaExecution<C>,
        completed: Vec<SharedStep<C>>,
        context: C,
        started: Instant,
    ) -> SagaExecution<C> {
        let saga = execution.saga;
        let saga_id = execution.saga_id;
        let observers = self.observers.clone();

        let handle = tokio::spawn(run_compensations(
            saga, saga_id, completed, context, observers,
        ));

        match handle.await {
            Ok(outcome) => {
                execution.advance(SagaState::Compensated);
                execution.context = Some(outcome.context);
                execution.compensated_steps = outcome.compensated;
                execution.compensation_failures = outcome.failures;
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "compensation task did not complete");
                execution.fault = Some(SagaError::CompensationTask(join_error.to_string()));
                execution.advance(SagaState::Failed);
            }
        }

        self.finish(execution, started)
    }

    fn finish<C>(&self, mut execution: SagaExecution<C>, started: Instant) -> SagaExecution<C> {
        if !execution.state.is_terminal() {
            execution.advance(SagaState::Failed);
        }
        let saga = execution.saga;
        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds", "saga" => saga).record(duration);

        match execution.state {
            SagaState::Completed => {
                metrics::counter!("saga_completed_total", "saga" => saga).increment(1);
                tracing::info!(duration, "saga completed");
            }
            SagaState::Compensated => {
                metrics::counter!("saga_compensated_total", "saga" => saga).increment(1);
                tracing::warn!(
                    duration,
                    compensated = execution.compensated_steps.len(),
                    compensation_failures = execution.compensation_failures.len(),
                    "saga compensated"
                );
            }
            _ => {
                metrics::counter!("saga_failed_total", "saga" => saga).increment(1);
                tracing::error!(duration, "saga failed");
            }
        }

        for observer in self.observers.iter() {
            observer.on_saga_finished(execution.saga_id, saga, execution.state);
        }
        execution
    }

    fn notify_step(&self, saga_id: SagaId, saga: &str, step: StepRef<'_>, status: StepStatus) {
        for observer in self.observers.iter() {
            observer.on_step(saga_id, saga, step, status);
        }
    }
}

async fn run_compensations<C: SagaData>(
    saga: &'static str,
    saga_id: SagaId,
    completed: Vec<SharedStep<C>>,
    mut context: C,
    observers: Observers,
) -> CompensationOutcome<C> {
    let mut compensated = Vec::new();
    let mut failures = Vec::new();

    for step in completed.iter().rev() {
        if !step.requires_compensation() {
            continue;
        }
        let step_id = step.step_id();

        let result = AssertUnwindSafe(step.compensate(&mut context))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(SagaError::StepPanicked {
                    step: step_id.to_string(),
                    message: panic_message(&panic),
                })
            });

        let status = match result {
            Ok(()) => {
                tracing::info!(saga, %saga_id, step = step_id, "step compensated");
                compensated.push(step_id.to_string());
                StepStatus::Compensated
            }
            Err(error) => {
                metrics::counter!(
                    "saga_compensation_failures_total",
                    "saga" => saga,
                    "step" => step_id.to_string()
                )
                .increment(1);
                tracing::error!(
                    saga,
                    %saga_id,
                    step = step_id,
                    step_name = step.step_name(),
                    error = %error,
                    "compensation failed, continuing"
                );
                failures.push(CompensationFailure {
                    step: step_id.to_string(),
                    reason: error.to_string(),
                });
                StepStatus::CompensationFailed
            }
        };

        for observer in observers.iter() {
            observer.on_step(saga_id, saga, step.step_ref(), status);
        }
    }

    CompensationOutcome {
        context,
        compensated,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::context::SagaContext;
    use crate::step::StepKind;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recording {
        id: String,
        kind: StepKind,
        journal: Journal,
        fail_with: Option<fn() -> SagaError>,
        failures_before_success: u32,
        attempts: Arc<AtomicU32>,
        compensation_fails: bool,
        compensation_delay: Option<Duration>,
        panics: bool,
    }

    impl Recording {
        fn new(id: &str, journal: &Journal) -> Self {
            Self {
                id: id.to_string(),
                kind: StepKind::Transactional,
                journal: journal.clone(),
                fail_with: None,
                failures_before_success: 0,
                attempts: Arc::new(AtomicU32::new(0)),
                compensation_fails: false,
                compensation_delay: None,
                panics: false,
            }
        }

        fn validation(mut self) -> Self {
            self.kind = StepKind::Validation;
            self
        }

        fn failing(mut self, error: fn() -> SagaError) -> Self {
            self.fail_with = Some(error);
            self
        }

        fn flaky(mut self, failures: u32) -> Self {
            self.failures_before_success = failures;
            self
        }
    }

    #[async_trait]
    impl SagaStep<SagaContext> for Recording {
        fn step_id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> StepKind {
            self.kind
        }

        async fn execute(&self, ctx: &mut SagaContext) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.journal.lock().unwrap().push(format!("exec:{}", self.id));
            if self.panics {
                panic!("step {} exploded", self.id);
            }
            if let Some(error) = self.fail_with {
                return Err(error());
            }
            if attempt <= self.failures_before_success {
                return Err(SagaError::Unavailable("flaky".into()));
            }
            ctx.set_flag(format!("done.{}", self.id));
            Ok(())
        }

        async fn compensate(&self, _ctx: &mut SagaContext) -> Result<()> {
            if let Some(delay) = self.compensation_delay {
                tokio::time::sleep(delay).await;
            }
            self.journal.lock().unwrap().push(format!("comp:{}", self.id));
            if self.compensation_fails {
                return Err(SagaError::Wallet("refund rejected".into()));
            }
            Ok(())
        }
    }

    fn context() -> SagaContext {
        SagaContext::new(SagaId::new(), "tx-1")
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_completes_all_steps_in_order() {
        let j = journal();
        let definition = SagaDefinition::new("Test")
            .step(Recording::new("a", &j))
            .step(Recording::new("b", &j))
            .step(Recording::new("c", &j));

        let execution = SagaOrchestrator::new().execute(&definition, context()).await;

        assert_eq!(execution.state, SagaState::Completed);
        assert_eq!(execution.completed_steps, vec!["a", "b", "c"]);
        assert_eq!(entries(&j), vec!["exec:a", "exec:b", "exec:c"]);
        let ctx = execution.into_result().unwrap();
        assert!(ctx.flag("done.c"));
    }

    #[tokio::test]
    async fn test_compensates_completed_steps_in_reverse_once() {
        let j = journal();
        let definition = SagaDefinition::new("Test")
            .retry_policy(fast())
            .step(Recording::new("a", &j))
            .step(Recording::new("b", &j).validation())
            .step(Recording::new("c", &j))
            .step(Recording::new("d", &j).failing(|| SagaError::RoundFinished("r".into())))
            .step(Recording::new("e", &j));

        let execution = SagaOrchestrator::new().execute(&definition, context()).await;

        assert_eq!(execution.state, SagaState::Compensated);
        assert_eq!(
            entries(&j),
            vec!["exec:a", "exec:b", "exec:c", "exec:d", "comp:c", "comp:a"]
        );
        assert_eq!(execution.compensated_steps, vec!["c", "a"]);
        assert!(matches!(
            execution.into_result(),
            Err(SagaError::RoundFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_compensation_does_not_stop_the_chain() {
        let j = journal();
        let mut middle = Recording::new("b", &j);
        middle.compensation_fails = true;

        let definition = SagaDefinition::new("Test")
            .step(Recording::new("a", &j))
            .step(middle)
            .step(Recording::new("c", &j).failing(|| SagaError::GameUnavailable("g".into())));

        let execution = SagaOrchestrator::new().execute(&definition, context()).await;

        assert_eq!(execution.state, SagaState::Compensated);
        assert_eq!(entries(&j)[3..], ["comp:b", "comp:a"]);
        assert_eq!(execution.compensated_steps, vec!["a"]);
        assert_eq!(execution.compensation_failures.len(), 1);
        assert_eq!(execution.compensation_failures[0].step, "b");
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let j = journal();
        let flaky = Recording::new("a", &j).flaky(2);
        let attempts = flaky.attempts.clone();
        let definition = SagaDefinition::new("Test").retry_policy(fast()).step(flaky);

        let execution = SagaOrchestrator::new().execute(&definition, context()).await;

        assert!(execution.is_completed());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let j = journal();
        let flaky = Recording::new("a", &j).flaky(5);
        let attempts = flaky.attempts.clone();
        let definition = SagaDefinition::new("Test").retry_policy(fast()).step(flaky);

        let execution = SagaOrchestrator::new().execute(&definition, context()).await;

        assert_eq!(execution.state, SagaState::Compensated);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(execution.error, Some(SagaError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let j = journal();
        let step = Recording::new("a", &j).failing(|| SagaError::BetLimitExceeded {
            amount: domain::Money::from_minor(10),
            limit: domain::Money::from_minor(5),
        });
        let attempts = step.attempts.clone();
        let definition = SagaDefinition::new("Test").retry_policy(fast()).step(step);

        SagaOrchestrator::new().execute(&definition, context()).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_step_becomes_failure_and_triggers_compensation() {
        let j = journal();
        let mut exploding = Recording::new("b", &j);
        exploding.panics = true;

        let definition = SagaDefinition::new("Test")
            .step(Recording::new("a", &j))
            .step(exploding);

        let execution = SagaOrchestrator::new().execute(&definition, context()).await;

        assert_eq!(execution.state, SagaState::Compensated);
        assert_eq!(execution.compensated_steps, vec!["a"]);
        match execution.error {
            Some(SagaError::StepPanicked { step, message }) => {
                assert_eq!(step, "b");
                assert!(message.contains("exploded"));
            }
            other => panic!("expected StepPanicked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compensation_survives_caller_cancellation() {
        let j = journal();
        let mut slow = Recording::new("a", &j);
        slow.compensation_delay = Some(Duration::from_millis(50));

        let definition = SagaDefinition::new("Test")
            .step(slow)
            .step(Recording::new("b", &j).failing(|| SagaError::RoundFinished("r".into())));
        let orchestrator = SagaOrchestrator::new();

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            orchestrator.execute(&definition, context()),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(!entries(&j).contains(&"comp:a".to_string()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(entries(&j).contains(&"comp:a".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_invalid_definitions() {
        let j = journal();
        let empty: SagaDefinition<SagaContext> = SagaDefinition::new("Empty");
        let execution = SagaOrchestrator::new().execute(&empty, context()).await;
        assert_eq!(execution.state, SagaState::Failed);
        assert!(matches!(execution.fault, Some(SagaError::IllegalState(_))));

        let duplicated = SagaDefinition::new("Dup")
            .step(Recording::new("a", &j))
            .step(Recording::new("a", &j));
        assert!(duplicated.validate().is_err());
        let execution = SagaOrchestrator::new().execute(&duplicated, context()).await;
        assert_eq!(execution.state, SagaState::Failed);
        assert!(entries(&j).is_empty());
    }

    #[tokio::test]
    async fn test_observers_see_every_transition() {
        let j = journal();
        let audit = InMemoryAuditLog::new();
        let orchestrator = SagaOrchestrator::new().with_observer(Arc::new(audit.clone()));
        let definition = SagaDefinition::new("Test")
            .step(Recording::new("a", &j))
            .step(Recording::new("b", &j).failing(|| SagaError::RoundFinished("r".into())));

        let ctx = context();
        let saga_id = ctx.saga_id();
        orchestrator.execute(&definition, ctx).await;

        let record = audit.record(saga_id).unwrap();
        assert_eq!(record.saga, "Test");
        assert_eq!(record.state, SagaState::Compensated);
        assert_eq!(record.completed_steps, vec!["a"]);
        assert_eq!(record.failed_step.as_deref(), Some("b"));
        assert_eq!(record.compensated_steps, vec!["a"]);
    }

    #[tokio::test]
    async fn test_step_policy_overrides_saga_policy() {
        struct FailFast(Arc<AtomicU32>);

        #[async_trait]
        impl SagaStep<SagaContext> for FailFast {
            fn step_id(&self) -> &str {
                "fail_fast"
            }
            fn kind(&self) -> StepKind {
                StepKind::Validation
            }
            fn retry_policy(&self) -> Option<RetryPolicy> {
                Some(RetryPolicy::no_retry())
            }
            async fn execute(&self, _ctx: &mut SagaContext) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(SagaError::Timeout("balance".into()))
            }
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let definition = SagaDefinition::new("Test")
            .retry_policy(fast())
            .step(FailFast(attempts.clone()));

        SagaOrchestrator::new().execute(&definition, context()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_illegal_transition_fails_the_execution() {
        let mut execution: SagaExecution<SagaContext> = SagaExecution {
            saga_id: SagaId::new(),
            saga: "Test",
            state: SagaState::Pending,
            context: None,
            completed_steps: Vec::new(),
            compensated_steps: Vec::new(),
            compensation_failures: Vec::new(),
            error: None,
            fault: None,
        };

        execution.advance(SagaState::Running);
        assert_eq!(execution.state, SagaState::Running);

        execution.advance(SagaState::Compensated);
        assert_eq!(execution.state, SagaState::Failed);
        assert!(matches!(execution.fault, Some(SagaError::IllegalState(_))));

        execution.advance(SagaState::Completed);
        assert_eq!(execution.state, SagaState::Failed);
    }
}
