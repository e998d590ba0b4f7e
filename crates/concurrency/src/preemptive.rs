//! Thread-per-transaction interleaving
//!
//! Each started transaction runs on its own named OS thread and steps
//! through its script without waiting for the caller, except at checkpoints:
//! there the thread parks on a gate until the scenario resumes it. This is
//! the discipline for scenarios where one transaction blocks on another's
//! lock, since a blocked statement only stalls its own thread.
//!
//! Coordination state per worker is a `parking_lot` mutex and condvar. The
//! scheduler never holds a gate lock while a statement runs.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use isolab_core::{CancelHandle, HarnessError, HarnessResult};

use crate::cooperative::{CheckpointWait, ResumeToken};
use crate::transaction::{ScriptedTransaction, StepOutcome, TransactionFailure, TransactionOutcome};

/// How long a dropped scheduler lets running statements finish before it
/// cancels them
pub const DEFAULT_DROP_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Running,
    Parked(String),
    Settled,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::Parked(_) => "parked",
            Phase::Settled => "settled",
        }
    }
}

#[derive(Debug)]
struct GateState {
    phase: Phase,
    resume: bool,
    released: bool,
    failure: Option<TransactionFailure>,
}

/// Park/resume handshake between one worker and the scenario
#[derive(Debug)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                phase: Phase::Running,
                resume: false,
                released: false,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Worker side: block at `checkpoint` until resumed or released
    fn park(&self, checkpoint: &str) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        state.phase = Phase::Parked(checkpoint.to_string());
        self.changed.notify_all();
        while !state.resume && !state.released {
            self.changed.wait(&mut state);
        }
        state.resume = false;
        if state.phase != Phase::Running {
            state.phase = Phase::Running;
            self.changed.notify_all();
        }
    }

    /// Scenario side: let a parked worker continue
    ///
    /// The phase flips to running here, under the lock, so a wait issued
    /// right after never sees the checkpoint the worker is leaving.
    fn resume(&self) -> Result<(), Phase> {
        let mut state = self.state.lock();
        if !matches!(state.phase, Phase::Parked(_)) {
            return Err(state.phase.clone());
        }
        state.resume = true;
        state.phase = Phase::Running;
        self.changed.notify_all();
        Ok(())
    }

    /// Let the worker run to the end, passing every further checkpoint
    fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        self.changed.notify_all();
    }

    fn record_failure(&self, failure: TransactionFailure) {
        self.state.lock().failure = Some(failure);
    }

    fn failure(&self) -> Option<TransactionFailure> {
        self.state.lock().failure.clone()
    }

    fn settle(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Settled;
        self.changed.notify_all();
    }

    fn phase(&self) -> Phase {
        self.state.lock().phase.clone()
    }

    /// Wait until the worker is no longer running, or the deadline passes
    fn wait_stopped(&self, deadline: Instant) -> Option<Phase> {
        let mut state = self.state.lock();
        while state.phase == Phase::Running {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return match state.phase {
                    Phase::Running => None,
                    ref phase => Some(phase.clone()),
                };
            }
        }
        Some(state.phase.clone())
    }

    /// Wait until the worker settles, or the deadline passes
    fn wait_settled(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        while state.phase != Phase::Settled {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.phase == Phase::Settled;
            }
        }
        true
    }
}

/// Marks the gate settled however the worker exits, panics included
struct SettleOnDrop(Arc<Gate>);

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        self.0.settle();
    }
}

type WorkerResult = HarnessResult<TransactionOutcome>;

struct Worker {
    token: ResumeToken,
    label: String,
    gate: Arc<Gate>,
    cancel: Option<Arc<dyn CancelHandle>>,
    handle: Option<JoinHandle<WorkerResult>>,
    result: Option<WorkerResult>,
}

impl Worker {
    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let result = handle.join().unwrap_or_else(|_| {
                Err(HarnessError::WorkerPanicked {
                    transaction: self.label.clone(),
                })
            });
            self.result = Some(result);
        }
    }

    fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            if let Err(e) = cancel.cancel() {
                warn!(target: "isolab::sched", label = %self.label, error = %e, "Cancel failed");
            }
        }
    }
}

/// Thread-per-transaction scheduler
pub struct PreemptiveScheduler {
    workers: Vec<Worker>,
    drop_grace: Duration,
}

impl Default for PreemptiveScheduler {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            drop_grace: DEFAULT_DROP_GRACE,
        }
    }
}

impl PreemptiveScheduler {
    /// Empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long dropping the scheduler waits before cancelling
    /// statements still in flight
    ///
    /// `await_all` is the normal way to finish; the grace only applies when
    /// a scenario bails out early and the scheduler is dropped.
    pub fn with_drop_grace(mut self, grace: Duration) -> Self {
        self.drop_grace = grace;
        self
    }

    /// Spawn a thread that runs `txn` until its first checkpoint or the end
    ///
    /// Threads start in call order.
    pub fn start(&mut self, txn: ScriptedTransaction) -> HarnessResult<ResumeToken> {
        let token = ResumeToken::new(self.workers.len(), txn.id());
        let label = txn.label().to_string();
        let gate = Arc::new(Gate::new());
        let cancel = txn.cancel_handle();

        let worker_gate = Arc::clone(&gate);
        let handle = thread::Builder::new()
            .name(format!("isolab-{}", label))
            .spawn(move || run_worker(txn, worker_gate))
            .map_err(|e| {
                HarnessError::invalid_state(
                    format!("transaction {}", label),
                    "not-started",
                    format!("spawn a worker thread for ({})", e),
                )
            })?;

        debug!(target: "isolab::sched", label = %label, "Worker started");
        self.workers.push(Worker {
            token,
            label,
            gate,
            cancel,
            handle: Some(handle),
            result: None,
        });
        Ok(token)
    }

    fn worker(&self, token: ResumeToken) -> HarnessResult<&Worker> {
        match self.workers.get(token.index()) {
            Some(w) if w.token == token => Ok(w),
            _ => Err(HarnessError::invalid_state(
                format!("token for {}", token.transaction()),
                "unregistered",
                "use",
            )),
        }
    }

    fn worker_mut(&mut self, token: ResumeToken) -> HarnessResult<&mut Worker> {
        match self.workers.get_mut(token.index()) {
            Some(w) if w.token == token => Ok(w),
            _ => Err(HarnessError::invalid_state(
                format!("token for {}", token.transaction()),
                "unregistered",
                "use",
            )),
        }
    }

    /// Let a parked transaction continue past its checkpoint
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the transaction is not parked.
    pub fn resume(&self, token: ResumeToken) -> HarnessResult<()> {
        let worker = self.worker(token)?;
        worker.gate.resume().map_err(|phase| {
            HarnessError::invalid_state(format!("transaction {}", worker.label), phase.name(), "resume")
        })?;
        debug!(target: "isolab::sched", label = %worker.label, "Resumed");
        Ok(())
    }

    /// Block until the transaction parks at `checkpoint`
    ///
    /// A captured database failure on the way comes back as
    /// [`CheckpointWait::Failed`]; the worker has then settled and must not
    /// be resumed.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerTimeout` when `timeout` elapses, and a script error
    /// if the transaction parks elsewhere, commits or rolls back first.
    pub fn await_checkpoint(
        &self,
        token: ResumeToken,
        checkpoint: &str,
        timeout: Duration,
    ) -> HarnessResult<CheckpointWait> {
        let worker = self.worker(token)?;
        match worker.gate.wait_stopped(Instant::now() + timeout) {
            Some(Phase::Parked(name)) if name == checkpoint => Ok(CheckpointWait::Reached),
            Some(Phase::Parked(name)) => Err(HarnessError::script(
                &worker.label,
                format!("parked at {} while waiting for {}", name, checkpoint),
            )),
            Some(_) => match worker.gate.failure() {
                Some(failure) => {
                    debug!(
                        target: "isolab::sched",
                        label = %worker.label,
                        checkpoint,
                        failure = %failure,
                        "Failed before checkpoint"
                    );
                    Ok(CheckpointWait::Failed(failure))
                }
                None => Err(HarnessError::script(
                    &worker.label,
                    format!("finished before reaching {}", checkpoint),
                )),
            },
            None => Err(HarnessError::SchedulerTimeout {
                waiting_for: format!("{} to reach checkpoint {}", worker.label, checkpoint),
                timeout,
            }),
        }
    }

    /// Block until the transaction finishes and return its outcome
    ///
    /// # Errors
    ///
    /// Returns `SchedulerTimeout` when `timeout` elapses, or the fatal error
    /// the worker stopped with.
    pub fn await_settled(
        &mut self,
        token: ResumeToken,
        timeout: Duration,
    ) -> HarnessResult<TransactionOutcome> {
        let worker = self.worker_mut(token)?;
        if !worker.gate.wait_settled(Instant::now() + timeout) {
            return Err(HarnessError::SchedulerTimeout {
                waiting_for: format!("{} to settle", worker.label),
                timeout,
            });
        }
        worker.join();
        match &worker.result {
            Some(result) => result.clone(),
            None => Err(HarnessError::invalid_state(
                format!("transaction {}", worker.label),
                "settled",
                "collect the outcome of",
            )),
        }
    }

    /// True once the transaction has finished
    pub fn is_settled(&self, token: ResumeToken) -> bool {
        self.worker(token)
            .map(|w| w.gate.phase() == Phase::Settled)
            .unwrap_or(false)
    }

    /// Checkpoint the transaction is parked at, if any
    pub fn parked_at(&self, token: ResumeToken) -> Option<String> {
        match self.worker(token).ok()?.gate.phase() {
            Phase::Parked(name) => Some(name),
            _ => None,
        }
    }

    /// Release every worker, cancel stragglers, join all threads
    ///
    /// Parked workers are released and skip any later checkpoints. Workers
    /// still running after `timeout` get their in-flight statement cancelled,
    /// which fails them with `StatementTimeout`; a worker that started a new
    /// statement in between is cancelled once more after another `timeout`.
    /// Outcomes come back in start order.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error raised on a worker thread, after every
    /// thread has been joined.
    pub fn await_all(&mut self, timeout: Duration) -> HarnessResult<Vec<TransactionOutcome>> {
        self.shutdown(timeout);

        let mut outcomes = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            match &worker.result {
                Some(Ok(outcome)) => outcomes.push(outcome.clone()),
                Some(Err(e)) => return Err(e.clone()),
                None => {
                    return Err(HarnessError::invalid_state(
                        format!("transaction {}", worker.label),
                        worker.gate.phase().name(),
                        "collect the outcome of",
                    ))
                }
            }
        }
        Ok(outcomes)
    }

    fn shutdown(&mut self, timeout: Duration) {
        for worker in &self.workers {
            worker.gate.release();
        }

        let deadline = Instant::now() + timeout;
        let stragglers: Vec<usize> = (0..self.workers.len())
            .filter(|&i| !self.workers[i].gate.wait_settled(deadline))
            .collect();

        for &i in &stragglers {
            let worker = &self.workers[i];
            warn!(
                target: "isolab::sched",
                label = %worker.label,
                timeout_ms = timeout.as_millis() as u64,
                "Worker did not settle in time; cancelling its statement"
            );
            worker.cancel();
        }
        for &i in &stragglers {
            let worker = &self.workers[i];
            if !worker.gate.wait_settled(Instant::now() + timeout) {
                warn!(target: "isolab::sched", label = %worker.label, "Cancelling again");
                worker.cancel();
            }
        }

        for worker in &mut self.workers {
            worker.join();
        }
    }
}

impl Drop for PreemptiveScheduler {
    fn drop(&mut self) {
        if self.workers.iter().any(|w| w.handle.is_some()) {
            self.shutdown(self.drop_grace);
        }
    }
}

impl std::fmt::Debug for PreemptiveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for worker in &self.workers {
            list.entry(&(&worker.label, worker.gate.phase().name()));
        }
        list.finish()
    }
}

fn run_worker(mut txn: ScriptedTransaction, gate: Arc<Gate>) -> WorkerResult {
    let _settle = SettleOnDrop(Arc::clone(&gate));
    loop {
        match txn.step()? {
            StepOutcome::Continued => {}
            StepOutcome::Suspended { checkpoint } => {
                debug!(target: "isolab::sched", label = txn.label(), checkpoint = %checkpoint, "Parked");
                gate.park(&checkpoint);
            }
            StepOutcome::Failed(failure) => {
                gate.record_failure(failure);
                break;
            }
            _ => break,
        }
    }
    txn.outcome().ok_or_else(|| {
        HarnessError::invalid_state(
            format!("transaction {}", txn.label()),
            txn.state().name(),
            "report the outcome of",
        )
    })
}
