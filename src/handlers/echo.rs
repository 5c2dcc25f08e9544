use serde_json::json;

use crate::context::ExecutionContext;
use crate::envelope::Response;
use crate::error::BridgeError;
use crate::method::StateMethod;
use crate::schema::ParamSpec;
use crate::tree::{DecisionTree, Outcome};

/// Returns its input. Used to check connectivity and routing.
pub struct Echo;

fn echo_with(ctx: &ExecutionContext, transform: fn(&str) -> String) -> Result<Outcome, BridgeError> {
    let text = transform(ctx.get_str("text").unwrap_or_default());
    Ok(Response::success_with(text.clone(), json!({ "text": text, "args": ctx.args() })).into())
}

fn plain(ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
    echo_with(ctx, str::to_string)
}

fn upper(ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
    echo_with(ctx, str::to_uppercase)
}

fn lower(ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
    echo_with(ctx, str::to_lowercase)
}

impl StateMethod for Echo {
    fn create_params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("text", "Text to send back").example("hello"),
            ParamSpec::string("case", "Case conversion applied to the text").one_of(["upper", "lower"]),
        ]
    }

    fn create_tree(&self) -> DecisionTree<Outcome> {
        DecisionTree::route("case")
            .leaf("upper", upper)
            .leaf("lower", lower)
            .default_leaf(plain)
            .build()
    }
}
