use std::any::type_name;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use bevy::log::{debug, error};

use crate::context::{Completion, ExecutionContext, SideObject, RESOLVED_TARGET};
use crate::error::{panic_message, BridgeError};
use crate::schema::ParamSpec;
use crate::tree::{DecisionTree, Outcome, Resolution};

/// Argument keys tried, in order, to describe what a two-phase method was
/// looking for.
pub const LOCATOR_KEYS: [&str; 4] = ["path", "instance_id", "id", "name"];

/// A named operation the dispatcher can invoke.
pub trait Handler: Send + Sync + 'static {
    /// Registry key override. `None` derives the key from the type name.
    fn name(&self) -> Option<&str> {
        None
    }

    fn params(&self) -> &[ParamSpec];

    /// Runs the operation. Either returns `Ready`, or returns `Pending` and
    /// arranges for `ctx` to be completed later.
    fn execute(&self, ctx: &ExecutionContext) -> Result<Outcome, BridgeError>;

    fn preview(&self) -> String {
        String::new()
    }

    fn type_label(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Runs `f`, turning a panic into an execution error.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, BridgeError>) -> Result<T, BridgeError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!("[Switchboard dispatch] Handler panicked: {msg}");
            Err(BridgeError::execution(format!("Unexpected error during execution: {msg}")))
        }
    }
}

/// Applies a handler's return value to its context. A context that is
/// already complete keeps its result.
pub(crate) fn settle(ctx: &ExecutionContext, result: Result<Outcome, BridgeError>) {
    if ctx.is_completed() {
        if let Ok(Outcome::Ready(_)) | Err(_) = &result {
            debug!("[Switchboard dispatch] Context completed during execute; ignoring return value");
        }
        return;
    }
    match result {
        Ok(Outcome::Ready(resp)) => {
            ctx.complete(resp);
        }
        Ok(Outcome::Pending) => {}
        Err(err) => {
            ctx.fail(err);
        }
    }
}

/// Dispatch boundary: nothing a handler does escapes as a panic or a lost result.
pub fn run_handler(handler: &dyn Handler, ctx: &ExecutionContext) {
    settle(ctx, guarded(|| handler.execute(ctx)));
}

/// A handler routed by a single decision tree.
pub trait StateMethod: Send + Sync + 'static {
    fn create_params(&self) -> Vec<ParamSpec>;
    fn create_tree(&self) -> DecisionTree<Outcome>;

    fn name(&self) -> Option<&str> {
        None
    }
}

/// Adapts a [`StateMethod`] into a [`Handler`], building its params and tree
/// on first use.
pub struct Routed<M> {
    method: M,
    params: OnceLock<Vec<ParamSpec>>,
    tree: OnceLock<DecisionTree<Outcome>>,
}

impl<M: StateMethod> Routed<M> {
    pub fn new(method: M) -> Self {
        Self {
            method,
            params: OnceLock::new(),
            tree: OnceLock::new(),
        }
    }

    fn tree(&self) -> &DecisionTree<Outcome> {
        self.tree.get_or_init(|| self.method.create_tree())
    }
}

impl<M: StateMethod> Handler for Routed<M> {
    fn name(&self) -> Option<&str> {
        self.method.name()
    }

    fn params(&self) -> &[ParamSpec] {
        self.params.get_or_init(|| self.method.create_params())
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
        self.tree().run(ctx)
    }

    fn preview(&self) -> String {
        self.tree().to_string()
    }

    fn type_label(&self) -> &'static str {
        type_name::<M>()
    }
}

/// "Resolve target, then act": a target tree locates the object, an action
/// tree operates on it through [`ExecutionContext::target`].
pub trait TwoPhaseMethod: Send + Sync + 'static {
    fn create_params(&self) -> Vec<ParamSpec>;
    fn create_target_tree(&self) -> DecisionTree<Resolution>;
    fn create_action_tree(&self) -> DecisionTree<Outcome>;

    fn name(&self) -> Option<&str> {
        None
    }

    /// Last look at the resolved target before the action runs. Returning
    /// `None` rejects it as not found.
    fn process_target(
        &self,
        target: Option<SideObject>,
        _ctx: &ExecutionContext,
    ) -> Option<SideObject> {
        target
    }

    /// Describes what was searched for when no target is found.
    fn locator(&self, ctx: &ExecutionContext) -> String {
        LOCATOR_KEYS
            .iter()
            .find_map(|key| {
                ctx.arg(key).map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
            })
            .unwrap_or_else(|| "<unspecified>".to_string())
    }
}

pub struct TwoPhase<M> {
    method: Arc<M>,
    params: OnceLock<Vec<ParamSpec>>,
    target_tree: OnceLock<Arc<DecisionTree<Resolution>>>,
    action_tree: OnceLock<Arc<DecisionTree<Outcome>>>,
}

impl<M: TwoPhaseMethod> TwoPhase<M> {
    pub fn new(method: M) -> Self {
        Self {
            method: Arc::new(method),
            params: OnceLock::new(),
            target_tree: OnceLock::new(),
            action_tree: OnceLock::new(),
        }
    }

    fn target_tree(&self) -> &Arc<DecisionTree<Resolution>> {
        self.target_tree
            .get_or_init(|| Arc::new(self.method.create_target_tree()))
    }

    fn action_tree(&self) -> &Arc<DecisionTree<Outcome>> {
        self.action_tree
            .get_or_init(|| Arc::new(self.method.create_action_tree()))
    }
}

fn act<M: TwoPhaseMethod>(
    method: &M,
    action: &DecisionTree<Outcome>,
    ctx: &ExecutionContext,
    target: Option<SideObject>,
    locator: &str,
) -> Result<Outcome, BridgeError> {
    let target = method.process_target(target, ctx).ok_or_else(|| {
        BridgeError::not_found(format!("Target could not be located: '{locator}'"))
    })?;
    ctx.set_side(RESOLVED_TARGET, target);
    action
        .run(ctx)
        .map_err(|e| e.context("Action execution failed"))
}

fn after_resolution<M: TwoPhaseMethod>(
    method: &M,
    action: &DecisionTree<Outcome>,
    ctx: &ExecutionContext,
    completion: Completion,
    locator: &str,
) -> Result<Outcome, BridgeError> {
    match completion {
        Completion::Target(target) => act(method, action, ctx, target, locator),
        Completion::Response(resp) => Ok(Outcome::Ready(resp)),
    }
}

impl<M: TwoPhaseMethod> Handler for TwoPhase<M> {
    fn name(&self) -> Option<&str> {
        self.method.name()
    }

    fn params(&self) -> &[ParamSpec] {
        self.params.get_or_init(|| self.method.create_params())
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
        let locator = self.method.locator(ctx);
        let target_ctx = ctx.duplicate();
        let resolution = self.target_tree().run(&target_ctx);

        // A target leaf that completed its context has the final word over
        // whatever it returned.
        if let Some(completion) = target_ctx.completion() {
            if !matches!(resolution, Ok(Resolution::Pending)) {
                debug!("[Switchboard dispatch] Target context completed during resolution; ignoring return value");
            }
            return after_resolution(self.method.as_ref(), self.action_tree(), ctx, completion, &locator);
        }

        match resolution.map_err(|e| e.context("Target location failed"))? {
            Resolution::Terminal(resp) => Ok(Outcome::Ready(resp)),
            Resolution::Target(target) => {
                act(self.method.as_ref(), self.action_tree(), ctx, target, &locator)
            }
            Resolution::Pending => {
                let method = Arc::clone(&self.method);
                let action = Arc::clone(self.action_tree());
                let outer = ctx.clone();
                target_ctx.on_completion(move |completion| {
                    let result = guarded(|| {
                        after_resolution(method.as_ref(), &action, &outer, completion.clone(), &locator)
                    });
                    settle(&outer, result);
                });
                Ok(Outcome::Pending)
            }
        }
    }

    fn preview(&self) -> String {
        format!(
            ">>> Target Location Tree <<<\n{}\n>>> Action Execution Tree <<<\n{}",
            self.target_tree(),
            self.action_tree()
        )
    }

    fn type_label(&self) -> &'static str {
        type_name::<M>()
    }
}
