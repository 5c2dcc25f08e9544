use super::*;

use std::time::{Duration, Instant};

const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Dispatcher plus the deferred-task queue it feeds. The scheduler is only
/// ever locked by `tick_deferred_tasks`.
#[derive(Resource)]
pub struct BridgeRuntime {
    pub dispatcher: Dispatcher,
    pub(super) scheduler: Mutex<TaskScheduler>,
}

/// Drains requests that arrived since the last frame and starts them.
pub(super) fn process_bridge_commands(channels: Res<BridgeChannels>, runtime: Res<BridgeRuntime>) {
    while let Ok(cmd) = channels.receiver.try_recv() {
        match cmd {
            BridgeCommand::Call(req, reply) => {
                let func = req.func.clone();
                runtime.dispatcher.call(req).on_complete(move |resp| {
                    if reply.send(resp.clone()).is_err() {
                        debug!("[Switchboard API] Caller for '{func}' went away before the result");
                    }
                });
            }
            BridgeCommand::Batch(req, reply) => {
                runtime.dispatcher.batch(req, move |resp| {
                    let _ = reply.send(resp);
                });
            }
            BridgeCommand::Async(req, reply) => {
                let _ = reply.send(runtime.dispatcher.handle_async(req));
            }
        }
    }
}

pub(super) fn tick_deferred_tasks(runtime: Res<BridgeRuntime>) {
    crate::context::lock(&runtime.scheduler).tick();
}

pub(super) fn reap_pending_tasks(runtime: Res<BridgeRuntime>, mut last: Local<Option<Instant>>) {
    let now = Instant::now();
    if last.is_some_and(|t| now.duration_since(t) < REAP_INTERVAL) {
        return;
    }
    *last = Some(now);
    let reaped = runtime.dispatcher.pending().reap_expired(now);
    if reaped > 0 {
        info!("[Switchboard pending] Reaped {reaped} unpolled result(s)");
    }
}
