use std::sync::Arc;
use std::time::Duration;

use bevy::log::{debug, warn};
use serde_json::{Map, Value};

use crate::batch::{run_batch, Invoker};
use crate::context::ExecutionContext;
use crate::deferred::Spawner;
use crate::envelope::{AsyncRequest, BatchRequest, BatchResponse, CallRequest, Response};
use crate::error::BridgeError;
use crate::method::{run_handler, Handler};
use crate::pending::PendingTasks;
use crate::registry::HandlerRegistry;
use crate::schema::validate_args;

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Check arguments against each handler's declared params before running it.
    pub validate_params: bool,
    pub pending_ttl: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            validate_params: true,
            pending_ttl: Duration::from_secs(600),
        }
    }
}

struct DispatcherInner {
    registry: HandlerRegistry,
    pending: PendingTasks,
    spawner: Spawner,
    options: DispatchOptions,
}

/// Owns the handler registry and pending tasks; entry point for single
/// calls, batches and async submit/poll. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, spawner: Spawner, options: DispatchOptions) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                pending: PendingTasks::new(options.pending_ttl),
                spawner,
                options,
            }),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn pending(&self) -> &PendingTasks {
        &self.inner.pending
    }

    fn lookup(&self, func: &str, args: &Map<String, Value>) -> Result<Arc<dyn Handler>, BridgeError> {
        let handler = self.inner.registry.get(func).ok_or_else(|| {
            BridgeError::not_found(format!(
                "Unknown method: '{func}'. Available methods: {}",
                self.inner.registry.names().join(", ")
            ))
        })?;
        if self.inner.options.validate_params {
            validate_args(handler.params(), args)?;
        }
        Ok(handler)
    }

    fn context(&self, args: Map<String, Value>) -> ExecutionContext {
        ExecutionContext::with_spawner(args, self.inner.spawner.clone())
    }

    /// Starts `func` and returns its context. Lookup and validation failures
    /// come back as an already-completed context.
    pub fn invoke(&self, func: &str, args: Map<String, Value>) -> ExecutionContext {
        debug!("[Switchboard dispatch] {func}");
        let handler = self.lookup(func, &args);
        let ctx = self.context(args);
        match handler {
            Ok(handler) => run_handler(handler.as_ref(), &ctx),
            Err(err) => {
                warn!("[Switchboard dispatch] {func}: {err}");
                ctx.fail(err);
            }
        }
        ctx
    }

    pub fn call(&self, req: CallRequest) -> ExecutionContext {
        self.invoke(&req.func, req.args)
    }

    pub fn submit(&self, id: &str, func: &str, args: Map<String, Value>) -> Result<Response, BridgeError> {
        if self.inner.pending.contains(id) {
            return Err(BridgeError::AlreadyRunning(id.to_string()));
        }
        let handler = self.lookup(func, &args)?;
        let ctx = self.context(args);
        self.inner
            .pending
            .submit(id, func, ctx, |ctx| run_handler(handler.as_ref(), ctx))
    }

    pub fn poll(&self, id: &str) -> Result<Response, BridgeError> {
        self.inner.pending.poll(id)
    }

    pub fn cancel(&self, id: &str) -> Result<Response, BridgeError> {
        self.inner.pending.cancel(id)
    }

    pub fn handle_async(&self, req: AsyncRequest) -> Response {
        if req.id.trim().is_empty() {
            return BridgeError::validation("Required parameter 'id' is missing.").into();
        }
        let result = match req.kind.as_str() {
            "in" => match req.func.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
                Some(func) => self.submit(&req.id, func, req.args.unwrap_or_default()),
                None => Err(BridgeError::validation(
                    "Required parameter 'func' is missing for type 'in'.",
                )),
            },
            "out" => self.poll(&req.id),
            "cancel" => self.cancel(&req.id),
            other => Err(BridgeError::validation(format!(
                "Invalid 'type' parameter: {other}. Must be 'in', 'out' or 'cancel'."
            ))),
        };
        result.unwrap_or_else(Response::from)
    }

    pub fn batch(&self, req: BatchRequest, done: impl FnOnce(BatchResponse) + Send + 'static) {
        if req.is_deprecated_shape() {
            warn!("[Switchboard batch] Bare-array batch requests are deprecated; send {{\"funcs\": [...]}}");
        }
        let (funcs, mode) = req.into_parts();
        run_batch(funcs, mode, Arc::new(self.clone()), done);
    }
}

impl Invoker for Dispatcher {
    fn invoke(&self, func: &str, args: Map<String, Value>) -> ExecutionContext {
        Dispatcher::invoke(self, func, args)
    }
}
