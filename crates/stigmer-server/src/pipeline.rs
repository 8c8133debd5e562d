//! Request pipeline
//!
//! Every write operation is an ordered chain of steps over a typed request
//! context. Steps run strictly sequentially; the first failure
//! short-circuits the chain, and effects of earlier steps are not rolled
//! back unless a step registered a compensator (in practice only Persist
//! does, so StartWorkflow failures can flip a just-persisted execution to
//! FAILED).

use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use stigmer_core::{Resource, StigmerError, StigmerResult};

use crate::transport::DEFAULT_DEADLINE;

/// Pipeline failure: the failing step plus the underlying error
#[derive(Debug)]
pub struct PipelineError {
    pub step: &'static str,
    pub error: StigmerError,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} failed: {}", self.step, self.error)
    }
}

impl std::error::Error for PipelineError {}

impl From<PipelineError> for StigmerError {
    fn from(e: PipelineError) -> Self {
        e.error
    }
}

type Compensation = Box<dyn FnOnce() + Send>;

/// Typed request context carried through one pipeline invocation
pub struct RequestContext<R: Resource> {
    /// The caller's input, normalized in place by early steps
    pub input: R,

    /// What will be persisted; built by BuildNewState
    pub new_state: Option<R>,

    /// Loaded by LoadExisting / LoadForApply
    pub existing: Option<R>,

    /// Set by LoadForApply: create branch vs update branch
    pub should_create: bool,

    /// Ambient deadline, read before every step
    pub deadline: Instant,

    /// Arbitrary typed extension slots written by earlier steps and read by
    /// later ones (e.g. the loaded parent)
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,

    compensations: Vec<Compensation>,
}

impl<R: Resource> RequestContext<R> {
    pub fn new(input: R) -> Self {
        Self::with_deadline(input, Instant::now() + DEFAULT_DEADLINE)
    }

    pub fn with_deadline(input: R, deadline: Instant) -> Self {
        Self {
            input,
            new_state: None,
            existing: None,
            should_create: true,
            deadline,
            extensions: HashMap::new(),
            compensations: Vec::new(),
        }
    }

    /// The resource as it will be persisted: new state when built, input
    /// otherwise.
    pub fn effective(&self) -> &R {
        self.new_state.as_ref().unwrap_or(&self.input)
    }

    pub fn effective_mut(&mut self) -> &mut R {
        self.new_state.as_mut().unwrap_or(&mut self.input)
    }

    pub fn insert_ext<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get_ext<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Register an undo action for this step's effect. Compensations run in
    /// reverse order when a later step fails.
    pub fn push_compensation(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    fn compensate(&mut self) {
        while let Some(compensation) = self.compensations.pop() {
            compensation();
        }
    }
}

/// One step of a pipeline
#[async_trait]
pub trait Step<R: Resource>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()>;
}

/// Ordered step chain for one operation on one resource kind
pub struct Pipeline<R: Resource> {
    name: String,
    steps: Vec<Arc<dyn Step<R>>>,
}

impl<R: Resource> Pipeline<R> {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Arc<dyn Step<R>>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in execution order; the ordering invariants are asserted
    /// against this.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &mut RequestContext<R>) -> Result<(), PipelineError> {
        for step in &self.steps {
            // The ambient deadline is read before each step touches I/O.
            if ctx.deadline.saturating_duration_since(Instant::now()).is_zero() {
                ctx.compensate();
                return Err(PipelineError {
                    step: step.name(),
                    error: StigmerError::DeadlineExceeded(format!(
                        "pipeline {} out of budget before {}",
                        self.name,
                        step.name()
                    )),
                });
            }

            if let Err(error) = step.execute(ctx).await {
                tracing::debug!(
                    pipeline = %self.name,
                    step = step.name(),
                    %error,
                    "pipeline short-circuit"
                );
                ctx.compensate();
                return Err(PipelineError {
                    step: step.name(),
                    error,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stigmer_core::Skill;

    struct RecordingStep {
        name: &'static str,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        fail: bool,
        compensation_hits: Option<Arc<AtomicUsize>>,
    }

    #[async_trait]
    impl Step<Skill> for RecordingStep {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, ctx: &mut RequestContext<Skill>) -> StigmerResult<()> {
            self.order.lock().unwrap().push(self.name);
            if let Some(hits) = &self.compensation_hits {
                let hits = hits.clone();
                ctx.push_compensation(Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }));
            }
            if self.fail {
                return Err(StigmerError::invalid("boom"));
            }
            Ok(())
        }
    }

    fn step(
        name: &'static str,
        order: &Arc<std::sync::Mutex<Vec<&'static str>>>,
        fail: bool,
        hits: Option<Arc<AtomicUsize>>,
    ) -> Arc<dyn Step<Skill>> {
        Arc::new(RecordingStep {
            name,
            order: order.clone(),
            fail,
            compensation_hits: hits,
        })
    }

    #[tokio::test]
    async fn steps_run_strictly_sequentially_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::named("test")
            .step(step("one", &order, false, None))
            .step(step("two", &order, false, None))
            .step(step("three", &order, false, None));

        let mut ctx = RequestContext::new(Skill::named("s"));
        pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(pipeline.step_names(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn failure_short_circuits_and_runs_compensations() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::named("test")
            .step(step("persist", &order, false, Some(hits.clone())))
            .step(step("start", &order, true, None))
            .step(step("never", &order, false, None));

        let mut ctx = RequestContext::new(Skill::named("s"));
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.step, "start");
        assert_eq!(*order.lock().unwrap(), vec!["persist", "start"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_deadline_fails_before_the_next_step() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::named("test").step(step("one", &order, false, None));

        let mut ctx = RequestContext::with_deadline(
            Skill::named("s"),
            Instant::now() - std::time::Duration::from_millis(1),
        );
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err.error, StigmerError::DeadlineExceeded(_)));
        assert!(order.lock().unwrap().is_empty());
    }

    #[test]
    fn extensions_are_typed_slots() {
        #[derive(Debug, PartialEq)]
        struct Loaded(u32);

        let mut ctx = RequestContext::new(Skill::named("s"));
        assert!(ctx.get_ext::<Loaded>().is_none());
        ctx.insert_ext(Loaded(9));
        assert_eq!(ctx.get_ext::<Loaded>(), Some(&Loaded(9)));
    }
}
