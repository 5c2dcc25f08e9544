//! Deferred work advanced by the host loop.
//!
//! A handler that cannot finish inside one call hands a [`DeferredTask`] to
//! [`ExecutionContext::defer`]. The task is queued on the [`TaskScheduler`],
//! stepped once per tick, and completes the context when it returns
//! [`Step::Done`].

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use bevy::log::{debug, error, info};
use crossbeam_channel::{Receiver, Sender};

use crate::context::{Completion, ExecutionContext};
use crate::error::{panic_message, BridgeError};

pub const DEFAULT_STEPS_PER_TICK: usize = 10;

pub enum Step {
    /// Not finished; step again next tick.
    Yield,
    Done(Completion),
}

impl Step {
    pub fn done(result: impl Into<Completion>) -> Self {
        Step::Done(result.into())
    }
}

pub struct StepContext<'a> {
    pub ctx: &'a ExecutionContext,
    pub tick: u64,
    progress: &'a mut dyn ProgressIndicator,
}

impl StepContext<'_> {
    /// Reports progress to the host. A cancel request from the indicator trips
    /// the context's cancel token; the task sees it on its next turn.
    pub fn progress(&mut self, title: &str, info: &str, fraction: f32) {
        if self.progress.show(title, info, fraction.clamp(0.0, 1.0)) {
            self.ctx.cancel_token().cancel();
        }
    }
}

pub trait DeferredTask: Send + 'static {
    fn step(&mut self, cx: &mut StepContext<'_>) -> Step;

    /// Called instead of `step` once the cancel token is tripped. Tasks that
    /// made progress can return a partial result here.
    fn cancel(&mut self, _cx: &mut StepContext<'_>) -> Completion {
        BridgeError::cancelled("Operation cancelled.").into()
    }
}

struct FnTask<F>(F);

impl<F> DeferredTask for FnTask<F>
where
    F: FnMut(&mut StepContext<'_>) -> Step + Send + 'static,
{
    fn step(&mut self, cx: &mut StepContext<'_>) -> Step {
        (self.0)(cx)
    }
}

pub fn from_fn<F>(f: F) -> impl DeferredTask
where
    F: FnMut(&mut StepContext<'_>) -> Step + Send + 'static,
{
    FnTask(f)
}

/// Host-side progress display with a cancel affordance.
pub trait ProgressIndicator: Send {
    /// Returns `true` when the user asked to cancel.
    fn show(&mut self, title: &str, info: &str, fraction: f32) -> bool;
    fn clear(&mut self) {}
}

pub struct NoProgress;

impl ProgressIndicator for NoProgress {
    fn show(&mut self, _title: &str, _info: &str, _fraction: f32) -> bool {
        false
    }
}

/// Logs progress in ten-percent steps. Never requests cancellation.
#[derive(Default)]
pub struct LogProgress {
    last: Option<(String, u32)>,
}

impl ProgressIndicator for LogProgress {
    fn show(&mut self, title: &str, info: &str, fraction: f32) -> bool {
        let bucket = (fraction * 10.0).floor() as u32;
        let changed = match &self.last {
            Some((t, b)) => t != title || *b != bucket,
            None => true,
        };
        if changed {
            info!("[Switchboard progress] {title}: {info} ({:.0}%)", fraction * 100.0);
            self.last = Some((title.to_string(), bucket));
        }
        false
    }

    fn clear(&mut self) {
        self.last = None;
    }
}

pub struct ScheduledTask {
    pub ctx: ExecutionContext,
    pub task: Box<dyn DeferredTask>,
}

/// Handle contexts use to queue deferred work on the scheduler.
#[derive(Clone, Default)]
pub struct Spawner {
    tx: Option<Sender<ScheduledTask>>,
}

impl Spawner {
    pub fn channel() -> (Spawner, Receiver<ScheduledTask>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Spawner { tx: Some(tx) }, rx)
    }

    pub fn detached() -> Self {
        Spawner { tx: None }
    }

    pub(crate) fn spawn(&self, ctx: ExecutionContext, task: Box<dyn DeferredTask>) -> Result<(), BridgeError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| BridgeError::execution("No scheduler is attached; cannot defer work."))?;
        tx.send(ScheduledTask { ctx, task })
            .map_err(|_| BridgeError::execution("Scheduler has shut down."))
    }
}

/// Round-robin queue of deferred tasks. Each task is stepped at most once per
/// tick and at most `steps_per_tick` steps run per tick overall.
pub struct TaskScheduler {
    queue: VecDeque<ScheduledTask>,
    receiver: Receiver<ScheduledTask>,
    steps_per_tick: usize,
    tick: u64,
    progress: Box<dyn ProgressIndicator>,
}

impl TaskScheduler {
    pub fn new(receiver: Receiver<ScheduledTask>, steps_per_tick: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            receiver,
            steps_per_tick: steps_per_tick.max(1),
            tick: 0,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressIndicator>) -> Self {
        self.progress = progress;
        self
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Advances queued tasks; returns how many steps ran.
    pub fn tick(&mut self) -> usize {
        self.tick += 1;
        self.queue.extend(self.receiver.try_iter());
        if self.queue.is_empty() {
            return 0;
        }

        let budget = self.steps_per_tick.min(self.queue.len());
        let mut steps = 0;
        for _ in 0..budget {
            let Some(mut scheduled) = self.queue.pop_front() else {
                break;
            };
            let ctx = scheduled.ctx.clone();
            if ctx.is_completed() {
                debug!("[Switchboard scheduler] Dropping task whose context already completed");
                continue;
            }

            let mut cx = StepContext {
                ctx: &ctx,
                tick: self.tick,
                progress: self.progress.as_mut(),
            };
            let cancelled = ctx.is_cancelled();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if cancelled {
                    Step::Done(scheduled.task.cancel(&mut cx))
                } else {
                    scheduled.task.step(&mut cx)
                }
            }));
            steps += 1;

            match outcome {
                Ok(Step::Yield) => self.queue.push_back(scheduled),
                Ok(Step::Done(result)) => {
                    ctx.complete(result);
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    error!("[Switchboard scheduler] Deferred task panicked: {msg}");
                    ctx.fail(BridgeError::execution(format!("Deferred task panicked: {msg}")));
                }
            }
        }

        if self.queue.is_empty() {
            self.progress.clear();
        }
        steps
    }
}
