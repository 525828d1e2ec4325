// src/engine/runtime.rs

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::dag::{ScheduledTask, TaskState, TerminalOutcome};
use crate::errors::{Result, TaskError};
use crate::exec::{AttemptReport, ExecutorBackend, Job, TaskContext, UnitOfWork};
use crate::locks::client::LockRequest;
use crate::locks::{LockClient, RequestId};
use crate::types::TaskId;

use super::core::CoreRuntime;
use super::handle::{ManagerRequest, TaskSubmission};
use super::{AttemptOutcome, CoreCommand, CoreEvent, CoreStep, TaskEvent};

type TaskReply<T> = oneshot::Sender<std::result::Result<T, TaskError>>;

/// A lock request the core has not answered yet.
struct PendingLock {
    owner: TaskId,
    resource: String,
    /// The owner already held the resource when it asked.
    held_before: bool,
    reply: oneshot::Sender<std::result::Result<(), TaskError>>,
}

/// Drives the core in response to ticks, attempt reports and caller
/// requests, and delegates execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. It keeps what the core deliberately does not: the
/// units of work, produced values, waiting callers and cancellation tokens.
pub struct Runtime<T, E: ExecutorBackend<T>> {
    core: CoreRuntime,
    executor: E,
    requests_rx: mpsc::Receiver<ManagerRequest<T>>,
    lock_rx: mpsc::Receiver<LockRequest>,
    reports_rx: mpsc::Receiver<AttemptReport<T>>,
    lock_client: LockClient,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,

    /// Units of work of live tasks.
    work: HashMap<TaskId, UnitOfWork<T>>,
    /// Cancellation tokens of in-flight attempts.
    tokens: HashMap<TaskId, CancellationToken>,
    /// Value of a successful attempt, held while the core decides what the
    /// report means.
    staged: HashMap<TaskId, T>,
    /// Values of completed tasks, kept until forgotten.
    results: HashMap<TaskId, T>,
    awaiters: HashMap<TaskId, Vec<TaskReply<T>>>,
    pending_locks: HashMap<RequestId, PendingLock>,
}

impl<T, E: ExecutorBackend<T>> fmt::Debug for Runtime<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("in_flight", &self.tokens.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static, E: ExecutorBackend<T>> Runtime<T, E> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        core: CoreRuntime,
        executor: E,
        requests_rx: mpsc::Receiver<ManagerRequest<T>>,
        lock_rx: mpsc::Receiver<LockRequest>,
        reports_rx: mpsc::Receiver<AttemptReport<T>>,
        lock_client: LockClient,
        events: broadcast::Sender<TaskEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            core,
            executor,
            requests_rx,
            lock_rx,
            reports_rx,
            lock_client,
            events,
            shutdown,
            work: HashMap::new(),
            tokens: HashMap::new(),
            staged: HashMap::new(),
            results: HashMap::new(),
            awaiters: HashMap::new(),
            pending_locks: HashMap::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Runs the scheduler tick and the (slower) deadlock tick.
    /// - Feeds attempt reports into the core.
    /// - Answers caller and lock requests.
    /// - Executes the commands returned by the core.
    pub async fn run(mut self) -> Result<()> {
        info!(
            workers = self.core.pool().size(),
            policy = %self.core.config().policy,
            "swarmsched runtime started"
        );

        let mut tick = interval(self.core.config().tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadlock_tick = interval(self.core.config().deadlock_interval());
        deadlock_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested; stopping runtime");
                    self.core.step(CoreEvent::ShutdownRequested)
                }
                request = self.requests_rx.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        info!("all manager handles dropped; stopping runtime");
                        CoreStep::stop()
                    }
                },
                Some(request) = self.lock_rx.recv() => self.handle_lock_request(request),
                Some(report) = self.reports_rx.recv() => self.handle_report(report),
                _ = tick.tick() => self.core.step(CoreEvent::Tick { now: Instant::now() }),
                _ = deadlock_tick.tick() => self.core.step(CoreEvent::DeadlockTick { now: Instant::now() }),
            };

            let keep_running = step.keep_running;
            self.execute(step).await?;

            if !keep_running {
                break;
            }
        }

        self.drain_on_exit();
        info!("runtime exiting");
        Ok(())
    }

    fn handle_request(&mut self, request: ManagerRequest<T>) -> CoreStep {
        match request {
            ManagerRequest::Submit { tasks, reply } => {
                let (result, step) = self.submit(tasks);
                let _ = reply.send(result);
                step
            }
            ManagerRequest::WaitFor { id, reply } => {
                self.wait_for(id, reply);
                CoreStep::new()
            }
            ManagerRequest::Cancel { id, reply } => {
                let (cancelled, step) = self.core.cancel(&id, Instant::now());
                let _ = reply.send(cancelled);
                step
            }
            ManagerRequest::Stats { reply } => {
                let _ = reply.send(self.core.stats(Instant::now()));
                CoreStep::new()
            }
            ManagerRequest::Forget { id, reply } => {
                let forgotten = self.core.forget(&id);
                if forgotten {
                    self.results.remove(&id);
                }
                let _ = reply.send(forgotten);
                CoreStep::new()
            }
        }
    }

    fn submit(&mut self, tasks: Vec<TaskSubmission<T>>) -> (std::result::Result<Vec<TaskId>, TaskError>, CoreStep) {
        let mut batch = Vec::with_capacity(tasks.len());
        let mut work = Vec::with_capacity(tasks.len());
        for submission in tasks {
            batch.push((submission.id.clone(), submission.options));
            work.push((submission.id, submission.work));
        }
        let ids: Vec<TaskId> = work.iter().map(|(id, _)| id.clone()).collect();

        match self.core.submit_batch(batch, Instant::now()) {
            Ok(step) => {
                self.work.extend(work);
                debug!(?ids, "tasks accepted");
                (Ok(ids), step)
            }
            Err(err) => {
                warn!(?ids, error = %err, "submission rejected");
                (Err(err), CoreStep::new())
            }
        }
    }

    fn wait_for(&mut self, id: TaskId, reply: TaskReply<T>) {
        if let Some(value) = self.results.get(&id) {
            let _ = reply.send(Ok(value.clone()));
            return;
        }

        match self.core.registry().terminal(&id).map(|r| &r.outcome) {
            Some(TerminalOutcome::Failed(err)) => {
                let _ = reply.send(Err(err.clone()));
            }
            Some(TerminalOutcome::Completed) => {
                warn!(task = %id, "completed task has no stored result");
                let _ = reply.send(Err(TaskError::UnknownTask(id)));
            }
            None => match self.core.state_of(&id) {
                Some(TaskState::Waiting | TaskState::Queued | TaskState::Running) => {
                    self.awaiters.entry(id).or_default().push(reply);
                }
                _ => {
                    let _ = reply.send(Err(TaskError::UnknownTask(id)));
                }
            },
        }
    }

    fn handle_lock_request(&mut self, request: LockRequest) -> CoreStep {
        let now = Instant::now();
        match request {
            LockRequest::Acquire {
                owner,
                resource,
                mode,
                timeout,
                reply,
            } => {
                let held_before = self.core.locks().holds(&owner, &resource);
                let (request_id, step) = self.core.acquire(&owner, &resource, mode, timeout, now);
                self.pending_locks.insert(
                    request_id,
                    PendingLock {
                        owner,
                        resource,
                        held_before,
                        reply,
                    },
                );
                step
            }
            LockRequest::Release {
                owner,
                resource,
                reply,
            } => {
                let (released, step) = self.core.release(&owner, &resource, now);
                let _ = reply.send(released);
                step
            }
            LockRequest::ReleaseAll { owner, reply } => {
                let (released, step) = self.core.release_all(&owner, now);
                let _ = reply.send(released);
                step
            }
        }
    }

    fn handle_report(&mut self, report: AttemptReport<T>) -> CoreStep {
        let AttemptReport {
            task,
            attempt,
            result,
            elapsed,
        } = report;

        self.tokens.remove(&task);

        let outcome = match result {
            Ok(value) => {
                self.staged.insert(task.clone(), value);
                AttemptOutcome::Success
            }
            Err(err) => AttemptOutcome::Failed(err),
        };

        let step = self.core.step(CoreEvent::AttemptFinished {
            task: task.clone(),
            attempt,
            outcome,
            elapsed,
            now: Instant::now(),
        });

        // Resolve commands (executed next) take the staged value; a stale or
        // cancelled attempt's value is dropped here.
        let staged = self.staged.remove(&task);
        if let Some(value) = staged {
            let completed = step.commands.iter().any(|c| {
                matches!(c, CoreCommand::Resolve { task: t, outcome: TerminalOutcome::Completed } if *t == task)
            });
            if completed {
                self.results.insert(task, value);
            } else {
                trace!(task = %task, "discarding value of an attempt that did not complete the task");
            }
        }

        step
    }

    /// Execute the commands of one core step, in order. Commands produced
    /// while executing (releasing an abandoned grant) run after them.
    async fn execute(&mut self, step: CoreStep) -> Result<()> {
        let mut queue: VecDeque<CoreCommand> = step.commands.into();
        while let Some(command) = queue.pop_front() {
            match command {
                CoreCommand::Dispatch(task) => self.dispatch(task).await?,
                CoreCommand::SignalCancel(task) => {
                    if let Some(token) = self.tokens.get(&task) {
                        debug!(task = %task, "signalling cancellation to running attempt");
                        token.cancel();
                    }
                }
                CoreCommand::Resolve { task, outcome } => self.resolve(task, outcome),
                CoreCommand::LockReply { request, result } => {
                    if let Some(follow_up) = self.answer_lock(request, result) {
                        queue.extend(follow_up.commands);
                    }
                }
                CoreCommand::Notify(event) => self.publish(event),
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, task: ScheduledTask) -> Result<()> {
        let Some(work) = self.work.get(&task.id).cloned() else {
            // Every accepted task has its work registered, so this is a bug.
            warn!(task = %task.id, "dispatched task has no unit of work");
            return Ok(());
        };

        let token = self.shutdown.child_token();
        self.tokens.insert(task.id.clone(), token.clone());
        let ctx = TaskContext::new(task.id.clone(), task.attempt, token, self.lock_client.clone());

        self.publish(TaskEvent::Dispatched {
            task: task.id.clone(),
            attempt: task.attempt,
            worker: task.worker_id,
        });

        self.executor.spawn_attempt(Job { task, work, ctx }).await
    }

    /// Send a lock result to its requester. A grant nobody is waiting for any
    /// more is released again; the returned step re-evaluates the waiters.
    fn answer_lock(&mut self, request: RequestId, result: std::result::Result<(), TaskError>) -> Option<CoreStep> {
        let pending = self.pending_locks.remove(&request)?;
        let granted = result.is_ok();
        if pending.reply.send(result).is_ok() || !granted || pending.held_before {
            return None;
        }

        debug!(
            owner = %pending.owner,
            resource = %pending.resource,
            "lock granted after its requester gave up; releasing"
        );
        let (_, step) = self.core.release(&pending.owner, &pending.resource, Instant::now());
        Some(step)
    }

    fn resolve(&mut self, task: TaskId, outcome: TerminalOutcome) {
        self.work.remove(&task);
        let waiters = self.awaiters.remove(&task).unwrap_or_default();

        match outcome {
            TerminalOutcome::Completed => {
                match self.results.get(&task) {
                    Some(value) => {
                        for waiter in waiters {
                            let _ = waiter.send(Ok(value.clone()));
                        }
                    }
                    None => warn!(task = %task, "completed without a stored value"),
                }
                self.publish(TaskEvent::Completed { task });
            }
            TerminalOutcome::Failed(error) => {
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                self.publish(TaskEvent::Failed { task, error });
            }
        }
    }

    fn publish(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Answer everyone still waiting and trip all attempt tokens.
    fn drain_on_exit(&mut self) {
        for token in self.tokens.values() {
            token.cancel();
        }
        for (_, waiters) in self.awaiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(TaskError::ManagerShutdown));
            }
        }
        for (_, pending) in self.pending_locks.drain() {
            let _ = pending.reply.send(Err(TaskError::ManagerShutdown));
        }
        debug!(results = self.results.len(), "runtime state drained");
    }
}
