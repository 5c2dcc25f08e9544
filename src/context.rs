use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bevy::log::{error, warn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::deferred::{DeferredTask, Spawner};
use crate::envelope::Response;
use crate::error::{panic_message, BridgeError};

/// Non-serializable value carried between dispatch phases.
pub type SideObject = Arc<dyn Any + Send + Sync>;

/// Side-channel slot the two-phase base writes the resolved target into.
pub const RESOLVED_TARGET: &str = "_resolved_target";

type Callback = Box<dyn FnOnce(&Completion) + Send>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a context completed with. Target-resolution contexts finish with
/// `Target`, everything else with `Response`.
#[derive(Clone)]
pub enum Completion {
    Response(Response),
    Target(Option<SideObject>),
}

impl Completion {
    pub fn to_response(&self) -> Response {
        match self {
            Completion::Response(resp) => resp.clone(),
            Completion::Target(Some(_)) => Response::success("Target resolved"),
            Completion::Target(None) => BridgeError::not_found("Target could not be located").into(),
        }
    }
}

impl From<Response> for Completion {
    fn from(resp: Response) -> Self {
        Completion::Response(resp)
    }
}

impl From<BridgeError> for Completion {
    fn from(err: BridgeError) -> Self {
        Completion::Response(err.into())
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Response(resp) => f.debug_tuple("Response").field(resp).finish(),
            Completion::Target(Some(_)) => f.write_str("Target(Some(..))"),
            Completion::Target(None) => f.write_str("Target(None)"),
        }
    }
}

/// Cooperative cancel flag. Checked by the scheduler once per tick.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct CompletionState {
    result: Option<Completion>,
    callbacks: Vec<Callback>,
}

struct ContextInner {
    args: Map<String, Value>,
    side: Mutex<HashMap<String, SideObject>>,
    state: Mutex<CompletionState>,
    cancel: CancelToken,
    spawner: Spawner,
}

/// Per-invocation carrier of arguments, side-channel and completion state.
///
/// Cloning yields another handle to the same invocation, so a deferred task
/// can hold the context across as many ticks as it needs. Use
/// [`ExecutionContext::duplicate`] for an independent copy.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// A context with no scheduler attached; deferring on it fails the call.
    pub fn new(args: Map<String, Value>) -> Self {
        Self::with_spawner(args, Spawner::detached())
    }

    pub fn with_spawner(args: Map<String, Value>, spawner: Spawner) -> Self {
        Self::build(args, HashMap::new(), CancelToken::default(), spawner)
    }

    fn build(
        args: Map<String, Value>,
        side: HashMap<String, SideObject>,
        cancel: CancelToken,
        spawner: Spawner,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                args,
                side: Mutex::new(side),
                state: Mutex::new(CompletionState::default()),
                cancel,
                spawner,
            }),
        }
    }

    /// Fresh, incomplete context with copies of the arguments and side-channel.
    /// The cancel token is shared: cancelling either one cancels both.
    pub fn duplicate(&self) -> Self {
        let side = lock(&self.inner.side).clone();
        Self::build(
            self.inner.args.clone(),
            side,
            self.inner.cancel.clone(),
            self.inner.spawner.clone(),
        )
    }

    pub fn ptr_eq(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Arguments ────────────────────────────────────────────────────

    pub fn args(&self) -> &Map<String, Value> {
        &self.inner.args
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.inner.args.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.arg(key).and_then(Value::as_str)
    }

    /// Typed read; `None` when absent, null or of the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.arg(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, BridgeError> {
        let value = self.arg(key).ok_or_else(|| {
            BridgeError::validation(format!("Required parameter '{key}' is missing."))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            BridgeError::validation(format!("Parameter '{key}' is malformed: {e}"))
        })
    }

    // ── Side-channel ─────────────────────────────────────────────────

    pub fn set_side(&self, key: impl Into<String>, value: SideObject) {
        lock(&self.inner.side).insert(key.into(), value);
    }

    pub fn side<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let obj = lock(&self.inner.side).get(key).cloned()?;
        obj.downcast::<T>().ok()
    }

    pub fn take_side<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let obj = lock(&self.inner.side).remove(key)?;
        obj.downcast::<T>().ok()
    }

    /// The target stored by the two-phase base, read by action leaves.
    pub fn target<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.side(RESOLVED_TARGET)
    }

    // ── Completion ───────────────────────────────────────────────────

    /// Completes the invocation. Only the first call has any effect; later
    /// calls log a warning and return `false`.
    pub fn complete(&self, result: impl Into<Completion>) -> bool {
        let result = result.into();
        let callbacks = {
            let mut state = lock(&self.inner.state);
            if state.result.is_some() {
                drop(state);
                warn!("[Switchboard context] Ignoring second completion: {:?}", result);
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.callbacks)
        };
        for cb in callbacks {
            run_callback(cb, &result);
        }
        true
    }

    pub fn fail(&self, err: BridgeError) -> bool {
        self.complete(err)
    }

    /// Completes a target-resolution context with the located value.
    pub fn resolve(&self, target: Option<SideObject>) -> bool {
        self.complete(Completion::Target(target))
    }

    /// Runs `cb` immediately if already completed, otherwise on completion.
    pub fn on_completion(&self, cb: impl FnOnce(&Completion) + Send + 'static) {
        let done = {
            let mut state = lock(&self.inner.state);
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.callbacks.push(Box::new(cb));
                    return;
                }
            }
        };
        run_callback(Box::new(cb), &done);
    }

    pub fn on_complete(&self, cb: impl FnOnce(&Response) + Send + 'static) {
        self.on_completion(move |c| cb(&c.to_response()));
    }

    pub fn is_completed(&self) -> bool {
        lock(&self.inner.state).result.is_some()
    }

    pub fn completion(&self) -> Option<Completion> {
        lock(&self.inner.state).result.clone()
    }

    pub fn response(&self) -> Option<Response> {
        self.completion().map(|c| c.to_response())
    }

    // ── Cancellation & deferral ──────────────────────────────────────

    pub fn cancel_token(&self) -> &CancelToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Hands `task` to the host scheduler; it will complete this context.
    pub fn defer(&self, task: impl DeferredTask) {
        if let Err(err) = self.inner.spawner.spawn(self.clone(), Box::new(task)) {
            self.fail(err);
        }
    }
}

fn run_callback(cb: Callback, result: &Completion) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| cb(result))) {
        error!(
            "[Switchboard context] Completion callback panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("args", &self.inner.args)
            .field("completed", &self.is_completed())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn ctx(v: Value) -> ExecutionContext {
        ExecutionContext::new(v.as_object().cloned().expect("object"))
    }

    #[test]
    fn completion_fires_exactly_once() {
        let c = ctx(json!({}));
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        c.on_complete(move |resp| {
            assert!(resp.success);
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert!(c.complete(Response::success("first")));
        assert!(!c.complete(Response::error("second")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(c.response().expect("result").message, "first");
    }

    #[test]
    fn late_callback_runs_immediately() {
        let c = ctx(json!({}));
        c.complete(Response::success("done"));
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        c.on_complete(move |resp| *lock(&s) = Some(resp.message.clone()));
        assert_eq!(lock(&seen).as_deref(), Some("done"));
    }

    #[test]
    fn callback_may_reenter_context() {
        let c = ctx(json!({}));
        let inner = c.clone();
        let nested = Arc::new(AtomicBool::new(false));
        let n = nested.clone();
        c.on_complete(move |_| {
            let n = n.clone();
            inner.on_complete(move |_| n.store(true, Ordering::SeqCst));
        });
        c.complete(Response::success("ok"));
        assert!(nested.load(Ordering::SeqCst));
    }

    #[test]
    fn typed_reads_fall_back() {
        let c = ctx(json!({ "frames": 12, "name": "cube", "flag": null }));
        assert_eq!(c.get::<u32>("frames"), Some(12));
        assert_eq!(c.get_or::<u32>("missing", 7), 7);
        assert_eq!(c.get_or::<bool>("flag", true), true);
        assert_eq!(c.get_str("name"), Some("cube"));
        assert!(c.get::<u32>("name").is_none());
        assert_eq!(
            c.require::<String>("path").expect_err("missing").to_string(),
            "Required parameter 'path' is missing."
        );
    }

    #[test]
    fn duplicate_is_independent() {
        let c = ctx(json!({ "path": "a/b" }));
        c.set_side("marker", Arc::new(5u32));
        let dup = c.duplicate();
        assert!(!dup.ptr_eq(&c));
        assert_eq!(dup.get_str("path"), Some("a/b"));
        assert_eq!(dup.side::<u32>("marker").as_deref(), Some(&5));

        dup.complete(Response::success("dup done"));
        assert!(!c.is_completed());
    }

    #[test]
    fn duplicate_shares_cancellation() {
        let c = ctx(json!({}));
        let dup = c.duplicate();
        c.cancel_token().cancel();
        assert!(dup.is_cancelled());
    }

    #[test]
    fn side_channel_take_consumes() {
        let c = ctx(json!({}));
        c.set_side(RESOLVED_TARGET, Arc::new("node".to_string()));
        assert_eq!(c.target::<String>().as_deref().map(String::as_str), Some("node"));
        assert!(c.side::<u32>(RESOLVED_TARGET).is_none());
        assert!(c.take_side::<String>(RESOLVED_TARGET).is_some());
        assert!(c.side::<String>(RESOLVED_TARGET).is_none());
    }

    #[test]
    fn defer_without_scheduler_fails_the_call() {
        struct Never;
        impl DeferredTask for Never {
            fn step(&mut self, _cx: &mut crate::deferred::StepContext<'_>) -> crate::deferred::Step {
                crate::deferred::Step::Yield
            }
        }
        let c = ctx(json!({}));
        c.defer(Never);
        let resp = c.response().expect("completed");
        assert!(!resp.success);
        assert_eq!(resp.data.expect("data")["kind"], json!("execution"));
    }

    #[test]
    fn panicking_callback_does_not_escape() {
        let c = ctx(json!({}));
        c.on_complete(|_| panic!("boom"));
        assert!(c.complete(Response::success("ok")));
        assert!(c.is_completed());
    }
}
