//! Sequential batch execution.
//!
//! Entries run strictly one after another: entry N+1 is invoked only once
//! entry N's context has completed. Synchronous completions are consumed in a
//! loop; a deferred entry resumes the batch from its completion callback.

use std::sync::Arc;

use bevy::log::{error, info};
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::envelope::{BatchMode, BatchResponse, Response};
use crate::error::BridgeError;

/// Starts one call and hands back its context (completed or not).
pub trait Invoker: Send + Sync + 'static {
    fn invoke(&self, func: &str, args: Map<String, Value>) -> ExecutionContext;
}

type Done = Box<dyn FnOnce(BatchResponse) + Send>;

/// Validates one wire entry. Missing `args` means an empty object.
fn parse_entry(index: usize, entry: &Value) -> Result<(String, Map<String, Value>), BridgeError> {
    let n = index + 1;
    let obj = entry
        .as_object()
        .ok_or_else(|| BridgeError::validation(format!("Call {n} must be an object.")))?;
    let func = obj
        .get("func")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| {
            BridgeError::validation(format!("Call {n} has an invalid or empty 'func' field."))
        })?;
    let args = match obj.get("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args.clone(),
        Some(_) => {
            return Err(BridgeError::validation(format!(
                "Call {n}: 'args' must be an object."
            )))
        }
    };
    Ok((func.to_string(), args))
}

struct BatchRun {
    entries: Vec<Value>,
    mode: BatchMode,
    next: usize,
    results: Vec<Option<Response>>,
    errors: Vec<Option<String>>,
    successful: usize,
    failed: usize,
    aborted: Option<String>,
    invoker: Arc<dyn Invoker>,
    done: Done,
}

impl BatchRun {
    fn advance(mut self: Box<Self>) {
        loop {
            if self.aborted.is_some() || self.next >= self.entries.len() {
                self.finish();
                return;
            }

            let index = self.next;
            let ctx = match parse_entry(index, &self.entries[index]) {
                Ok((func, args)) => self.invoker.invoke(&func, args),
                Err(err) => {
                    self.record(index, err.into());
                    continue;
                }
            };

            if let Some(resp) = ctx.response() {
                self.record(index, resp);
                continue;
            }

            ctx.on_complete(move |resp| {
                self.record(index, resp.clone());
                self.advance();
            });
            return;
        }
    }

    fn record(&mut self, index: usize, resp: Response) {
        self.next = index + 1;
        if resp.success {
            self.successful += 1;
            self.results[index] = Some(resp);
            return;
        }

        self.failed += 1;
        let cause = resp.error_text().unwrap_or("unknown error").to_string();
        match self.mode {
            BatchMode::Abort => {
                let msg = format!("Call {} failed: {cause}", index + 1);
                error!("[Switchboard batch] {msg}; aborting");
                self.aborted = Some(msg);
            }
            BatchMode::Tolerant => {
                self.errors[index] = Some(cause);
                self.results[index] = Some(resp);
            }
        }
    }

    fn finish(self: Box<Self>) {
        let this = *self;
        let total = this.entries.len();
        info!(
            "[Switchboard batch] Finished: {}/{} successful, {} failed",
            this.successful, total, this.failed
        );
        let response = match this.mode {
            BatchMode::Abort => BatchResponse {
                success: this.aborted.is_none(),
                results: this.results,
                total_calls: total,
                successful_calls: this.successful,
                failed_calls: this.failed,
                error: this.aborted,
                errors: None,
            },
            BatchMode::Tolerant => BatchResponse {
                success: this.failed == 0,
                results: this.results,
                total_calls: total,
                successful_calls: this.successful,
                failed_calls: this.failed,
                error: None,
                errors: Some(this.errors),
            },
        };
        (this.done)(response);
    }
}

/// Runs `entries` in order and reports through `done` once the last entry
/// (or the aborting one) has completed. `done` runs synchronously when every
/// entry completes synchronously.
pub fn run_batch(
    entries: Vec<Value>,
    mode: BatchMode,
    invoker: Arc<dyn Invoker>,
    done: impl FnOnce(BatchResponse) + Send + 'static,
) {
    let len = entries.len();
    info!("[Switchboard batch] Starting {len} call(s) in {mode:?} mode");
    Box::new(BatchRun {
        entries,
        mode,
        next: 0,
        results: vec![None; len],
        errors: vec![None; len],
        successful: 0,
        failed: 0,
        aborted: None,
        invoker,
        done: Box::new(done),
    })
    .advance();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::{from_fn, Spawner, Step, TaskScheduler};
    use serde_json::json;
    use std::sync::{Mutex, PoisonError};

    /// Test invoker: `ok`, `fail`, and `slow` (completes after one tick).
    struct Script {
        spawner: Spawner,
        calls: Mutex<Vec<String>>,
    }

    impl Invoker for Script {
        fn invoke(&self, func: &str, args: Map<String, Value>) -> ExecutionContext {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(func.to_string());
            let ctx = ExecutionContext::with_spawner(args, self.spawner.clone());
            match func {
                "ok" => {
                    ctx.complete(Response::success("ok"));
                }
                "slow" => ctx.defer(from_fn(|_| Step::done(Response::success("slow")))),
                _ => {
                    ctx.complete(Response::error(format!("{func} blew up")));
                }
            }
            ctx
        }
    }

    fn script() -> (Arc<Script>, TaskScheduler) {
        let (spawner, rx) = Spawner::channel();
        (
            Arc::new(Script {
                spawner,
                calls: Mutex::new(Vec::new()),
            }),
            TaskScheduler::new(rx, 10),
        )
    }

    fn run(entries: Value, mode: BatchMode, invoker: Arc<Script>) -> Arc<Mutex<Option<BatchResponse>>> {
        let out = Arc::new(Mutex::new(None));
        let sink = out.clone();
        let entries = entries.as_array().cloned().expect("array");
        run_batch(entries, mode, invoker, move |resp| {
            *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(resp);
        });
        out
    }

    fn take(out: &Arc<Mutex<Option<BatchResponse>>>) -> BatchResponse {
        out.lock().expect("lock").take().expect("batch finished")
    }

    #[test]
    fn abort_mode_stops_at_first_failure() {
        let (invoker, _) = script();
        let out = run(
            json!([{ "func": "ok" }, { "func": "fail" }, { "func": "ok" }]),
            BatchMode::Abort,
            invoker.clone(),
        );
        let resp = take(&out);
        assert!(!resp.success);
        assert_eq!(resp.total_calls, 3);
        assert_eq!(resp.successful_calls, 1);
        assert_eq!(resp.failed_calls, 1);
        assert!(resp.results[0].is_some());
        assert!(resp.results[1].is_none());
        assert!(resp.results[2].is_none());
        assert_eq!(resp.error.as_deref(), Some("Call 2 failed: fail blew up"));
        assert_eq!(*invoker.calls.lock().expect("lock"), vec!["ok", "fail"]);
    }

    #[test]
    fn tolerant_mode_runs_everything() {
        let (invoker, _) = script();
        let out = run(
            json!([{ "func": "ok" }, { "func": "fail" }, 42, { "func": "ok", "args": [1] }]),
            BatchMode::Tolerant,
            invoker.clone(),
        );
        let resp = take(&out);
        assert!(!resp.success);
        assert_eq!(resp.successful_calls, 1);
        assert_eq!(resp.failed_calls, 3);
        assert!(resp.results.iter().all(Option::is_some));
        let errors = resp.errors.expect("errors");
        assert_eq!(errors[0], None);
        assert_eq!(errors[1].as_deref(), Some("fail blew up"));
        assert_eq!(errors[2].as_deref(), Some("Call 3 must be an object."));
        assert_eq!(errors[3].as_deref(), Some("Call 4: 'args' must be an object."));
        assert_eq!(*invoker.calls.lock().expect("lock"), vec!["ok", "fail"]);
    }

    #[test]
    fn malformed_entry_aborts_without_invoking() {
        let (invoker, _) = script();
        let out = run(json!([{ "func": "  " }, { "func": "ok" }]), BatchMode::Abort, invoker.clone());
        let resp = take(&out);
        assert_eq!(resp.successful_calls, 0);
        assert_eq!(
            resp.error.as_deref(),
            Some("Call 1 failed: Call 1 has an invalid or empty 'func' field.")
        );
        assert!(invoker.calls.lock().expect("lock").is_empty());
    }

    #[test]
    fn deferred_entry_holds_back_the_next_one() {
        let (invoker, mut sched) = script();
        let out = run(
            json!([{ "func": "slow" }, { "func": "ok" }]),
            BatchMode::Abort,
            invoker.clone(),
        );
        assert!(out.lock().expect("lock").is_none());
        assert_eq!(*invoker.calls.lock().expect("lock"), vec!["slow"]);

        sched.tick();
        let resp = take(&out);
        assert!(resp.success);
        assert_eq!(resp.successful_calls, 2);
        assert_eq!(resp.results[0].as_ref().expect("first").message, "slow");
        assert_eq!(*invoker.calls.lock().expect("lock"), vec!["slow", "ok"]);
    }

    #[test]
    fn empty_batch_succeeds() {
        let (invoker, _) = script();
        let resp = take(&run(json!([]), BatchMode::Tolerant, invoker));
        assert!(resp.success);
        assert_eq!(resp.total_calls, 0);
        assert_eq!(resp.errors, Some(vec![]));
    }

    #[test]
    fn long_synchronous_batch_does_not_recurse() {
        let (invoker, _) = script();
        let entries = Value::Array(vec![json!({ "func": "ok" }); 20_000]);
        let resp = take(&run(entries, BatchMode::Abort, invoker));
        assert_eq!(resp.successful_calls, 20_000);
    }
}
