//! Command bridge: routes named operations with JSON arguments to handlers,
//! runs them to completion on a cooperative host loop, and answers single
//! calls, ordered batches and submit/poll requests.

pub mod api;
pub mod batch;
pub mod config;
pub mod context;
pub mod deferred;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod method;
pub mod pending;
pub mod registry;
pub mod schema;
pub mod tree;

pub use config::BridgeConfig;
pub use context::{Completion, ExecutionContext, SideObject};
pub use dispatch::Dispatcher;
pub use envelope::{BatchMode, BatchResponse, Response};
pub use error::BridgeError;
pub use method::{Handler, Routed, StateMethod, TwoPhase, TwoPhaseMethod};
pub use tree::{DecisionTree, Outcome, Resolution};
