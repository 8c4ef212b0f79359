#![deny(warnings)]

//! Simulation driver for the reinvestment engine.
//!
//! Validates a configuration once, then repeatedly applies the `sim-core`
//! step function, pushing each [`PeriodOutcome`] to an [`OutcomeSink`]
//! until a period meets the target. Paced runs live on a tokio task and are
//! controlled through a [`RunHandle`]; [`Driver`] keeps at most one of them
//! alive. [`run_to_completion`] is the unpaced, synchronous equivalent.

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{PeriodOutcome, SchemeError, SimulationParameters, SimulationState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay between periods when none is configured.
pub const DEFAULT_PACING: Duration = Duration::from_millis(500);

/// Receives the outcome stream of a run, in period order.
pub trait OutcomeSink {
    /// Called once per period, as soon as it is computed.
    fn on_outcome(&mut self, outcome: &PeriodOutcome);

    /// Called after the last outcome of a run that ended normally.
    fn on_finish(&mut self, _summary: &RunSummary) {}
}

impl<S: OutcomeSink + ?Sized> OutcomeSink for Box<S> {
    fn on_outcome(&mut self, outcome: &PeriodOutcome) {
        (**self).on_outcome(outcome)
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        (**self).on_finish(summary)
    }
}

impl<S: OutcomeSink + ?Sized> OutcomeSink for &mut S {
    fn on_outcome(&mut self, outcome: &PeriodOutcome) {
        (**self).on_outcome(outcome)
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        (**self).on_finish(summary)
    }
}

/// Adapts a closure into a sink that only observes outcomes.
pub struct CallbackSink<F>(pub F);

impl<F: FnMut(&PeriodOutcome)> OutcomeSink for CallbackSink<F> {
    fn on_outcome(&mut self, outcome: &PeriodOutcome) {
        (self.0)(outcome)
    }
}

/// Fans the stream out to several sinks, in insertion order.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn OutcomeSink + Send>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: OutcomeSink + Send + 'static>(&mut self, sink: S) -> &mut Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl OutcomeSink for SinkSet {
    fn on_outcome(&mut self, outcome: &PeriodOutcome) {
        for sink in &mut self.sinks {
            sink.on_outcome(outcome);
        }
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        for sink in &mut self.sinks {
            sink.on_finish(summary);
        }
    }
}

/// Driver settings that do not affect the simulated numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Delay between consecutive periods.
    pub pacing: Duration,
    /// Optional ceiling on the number of periods. `None` runs until the target.
    pub max_periods: Option<u32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            pacing: DEFAULT_PACING,
            max_periods: None,
        }
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// A period's net profit met the target.
    TargetReached,
    /// The configured period ceiling was hit first.
    PeriodLimitReached,
}

/// Final report of a run that was not cancelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub periods: u32,
    pub status: RunStatus,
    pub final_state: SimulationState,
    /// Minimum viable capital computed when the run was validated.
    pub min_viable_capital: Decimal,
}

/// A validated run advanced one period at a time.
pub struct Simulation<R> {
    params: SimulationParameters,
    state: SimulationState,
    rng: R,
    max_periods: Option<u32>,
    min_viable_capital: Decimal,
}

impl<R: Rng> Simulation<R> {
    /// Validate `params` and set up the initial state.
    pub fn new(
        params: SimulationParameters,
        rng: R,
        max_periods: Option<u32>,
    ) -> Result<Self, SchemeError> {
        let min_viable_capital = match sim_core::validate(&params) {
            Ok(min) => min,
            Err(e) => {
                warn!(error = %e, "simulation rejected");
                return Err(e);
            }
        };
        let state = SimulationState::initial(&params);
        Ok(Self {
            params,
            state,
            rng,
            max_periods,
            min_viable_capital,
        })
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn min_viable_capital(&self) -> Decimal {
        self.min_viable_capital
    }

    /// Compute the next period and replace the state with its result.
    pub fn next_period(&mut self) -> PeriodOutcome {
        let (next, outcome) = sim_core::step(self.state, &self.params, &mut self.rng);
        self.state = next;
        debug!(
            period = outcome.period_index,
            units = outcome.units_held,
            extras = outcome.extra_units_purchased,
            net = %outcome.net_profit,
            "period complete"
        );
        outcome
    }

    /// `Some` once no further period should be computed.
    pub fn status(&self) -> Option<RunStatus> {
        if self.state.terminated {
            return Some(RunStatus::TargetReached);
        }
        match self.max_periods {
            Some(max) if self.state.period_index >= max => Some(RunStatus::PeriodLimitReached),
            _ => None,
        }
    }

    fn summary(&self, status: RunStatus) -> RunSummary {
        RunSummary {
            periods: self.state.period_index,
            status,
            final_state: self.state,
            min_viable_capital: self.min_viable_capital,
        }
    }
}

/// Run without pacing until the target or `max_periods` is reached.
///
/// With no ceiling, a configuration that never meets its target loops forever.
pub fn run_to_completion<R: Rng, S: OutcomeSink>(
    params: SimulationParameters,
    rng: R,
    max_periods: Option<u32>,
    mut sink: S,
) -> Result<RunSummary, SchemeError> {
    let mut sim = Simulation::new(params, rng, max_periods)?;
    loop {
        let outcome = sim.next_period();
        sink.on_outcome(&outcome);
        if let Some(status) = sim.status() {
            let summary = sim.summary(status);
            sink.on_finish(&summary);
            return Ok(summary);
        }
    }
}

/// Cancellation flag shared by a handle and its task.
///
/// The task holds the lock while delivering to its sink, so setting the flag
/// waits for any delivery in flight.
type CancelGate = Arc<Mutex<bool>>;

fn lock_gate(gate: &Mutex<bool>) -> MutexGuard<'_, bool> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a paced run. Dropping it cancels the run.
pub struct RunHandle {
    task: Option<JoinHandle<Option<RunSummary>>>,
    cancelled: CancelGate,
    min_viable_capital: Decimal,
}

impl RunHandle {
    /// Stop scheduling periods. No outcome is delivered after this returns,
    /// whichever runtime flavour drives the task.
    ///
    /// Blocks until a delivery in flight completes, so it must not be called
    /// from inside the run's own sink.
    pub fn cancel(&self) {
        let first = !std::mem::replace(&mut *lock_gate(&self.cancelled), true);
        if first {
            warn!("run cancelled");
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_gate(&self.cancelled)
    }

    /// Whether the run task has stopped, normally or not.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    pub fn min_viable_capital(&self) -> Decimal {
        self.min_viable_capital
    }

    /// Wait for the run to end. `None` if it was cancelled.
    pub async fn wait(mut self) -> Option<RunSummary> {
        let task = self.task.take()?;
        match task.await {
            Ok(summary) => summary,
            Err(e) if e.is_cancelled() => None,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            *lock_gate(&self.cancelled) = true;
            task.abort();
        }
    }
}

/// Validate and start a paced run on the current tokio runtime.
///
/// The first period is computed as soon as the task is polled; each later
/// one follows `options.pacing` after its predecessor. Validation failures
/// are returned here and no task is spawned. Must be called from within a
/// tokio runtime.
pub fn run<R, S>(
    params: SimulationParameters,
    rng: R,
    sink: S,
    options: RunOptions,
) -> Result<RunHandle, SchemeError>
where
    R: Rng + Send + 'static,
    S: OutcomeSink + Send + 'static,
{
    let sim = Simulation::new(params, rng, options.max_periods)?;
    let min_viable_capital = sim.min_viable_capital();
    info!(
        %min_viable_capital,
        pacing_ms = options.pacing.as_millis() as u64,
        max_periods = ?options.max_periods,
        "run started"
    );
    let cancelled = CancelGate::default();
    let task = tokio::spawn(drive(sim, sink, options.pacing, cancelled.clone()));
    Ok(RunHandle {
        task: Some(task),
        cancelled,
        min_viable_capital,
    })
}

async fn drive<R: Rng, S: OutcomeSink>(
    mut sim: Simulation<R>,
    mut sink: S,
    pacing: Duration,
    cancelled: CancelGate,
) -> Option<RunSummary> {
    loop {
        let outcome = sim.next_period();
        {
            let gate = lock_gate(&cancelled);
            if *gate {
                // Nobody listens any more; a cancelled run has no summary.
                debug!(period = outcome.period_index, "outcome dropped after cancel");
                return None;
            }
            sink.on_outcome(&outcome);
            if let Some(status) = sim.status() {
                let summary = sim.summary(status);
                info!(periods = summary.periods, ?status, "run finished");
                sink.on_finish(&summary);
                return Some(summary);
            }
        }
        tokio::time::sleep(pacing).await;
    }
}

/// Owns the single live run. Starting a new run cancels the previous one.
#[derive(Default)]
pub struct Driver {
    active: Option<RunHandle>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any run in progress, then validate and start a fresh one.
    ///
    /// The previous run is cancelled even if the new configuration is rejected.
    pub fn start<R, S>(
        &mut self,
        params: SimulationParameters,
        rng: R,
        sink: S,
        options: RunOptions,
    ) -> Result<&RunHandle, SchemeError>
    where
        R: Rng + Send + 'static,
        S: OutcomeSink + Send + 'static,
    {
        self.cancel();
        let handle = run(params, rng, sink, options)?;
        Ok(self.active.insert(handle))
    }

    /// Cancel and forget the live run, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.cancel();
        }
    }

    pub fn active(&self) -> Option<&RunHandle> {
        self.active.as_ref()
    }

    /// Release the live run so the caller can wait on it.
    pub fn take(&mut self) -> Option<RunHandle> {
        self.active.take()
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().map_or(false, |h| !h.is_finished())
    }
}
