//! Declarative decision-tree router.
//!
//! Each internal node reads one argument and picks a branch by exact string
//! match, then optional-parameter branches, then the default. Leaves are
//! plain functions of the [`ExecutionContext`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::context::{ExecutionContext, SideObject};
use crate::envelope::Response;
use crate::error::BridgeError;

pub const DEFAULT_LABEL: &str = "*";

/// What an action leaf produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    Ready(Response),
    /// A later completion of the context carries the result.
    Pending,
}

impl From<Response> for Outcome {
    fn from(resp: Response) -> Self {
        Outcome::Ready(resp)
    }
}

/// What a target-resolution leaf produced.
pub enum Resolution {
    Target(Option<SideObject>),
    /// Ends the whole operation with this response; no action runs.
    Terminal(Response),
    Pending,
}

impl Resolution {
    pub fn found<T: std::any::Any + Send + Sync>(target: T) -> Self {
        Resolution::Target(Some(Arc::new(target)))
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Target(Some(_)) => f.write_str("Target(Some(..))"),
            Resolution::Target(None) => f.write_str("Target(None)"),
            Resolution::Terminal(resp) => f.debug_tuple("Terminal").field(resp).finish(),
            Resolution::Pending => f.write_str("Pending"),
        }
    }
}

pub type LeafFn<T> = Arc<dyn Fn(&ExecutionContext) -> Result<T, BridgeError> + Send + Sync>;

enum Node<T> {
    Branch {
        key: String,
        branches: Vec<(String, Node<T>)>,
        optional: Vec<(String, Node<T>)>,
        default: Option<Box<Node<T>>>,
    },
    Leaf {
        name: String,
        func: LeafFn<T>,
    },
}

impl<T> Node<T> {
    fn leaf<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<T, BridgeError> + Send + Sync + 'static,
    {
        Node::Leaf {
            name: leaf_name::<F>(),
            func: Arc::new(f),
        }
    }
}

fn leaf_name<F>() -> String {
    let full = std::any::type_name::<F>();
    if full.ends_with("{{closure}}") {
        return "closure".to_string();
    }
    full.rsplit("::").next().unwrap_or(full).to_string()
}

/// Canonical string form used to match a value against branch labels.
fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

pub struct DecisionTree<T> {
    root: Node<T>,
}

impl<T> DecisionTree<T> {
    pub fn route(key: impl Into<String>) -> TreeBuilder<T> {
        TreeBuilder {
            key: key.into(),
            branches: Vec::new(),
            optional: Vec::new(),
            default: None,
        }
    }

    /// A tree with no routing: always runs `f`.
    pub fn leaf<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<T, BridgeError> + Send + Sync + 'static,
    {
        Self { root: Node::leaf(f) }
    }

    pub fn run(&self, ctx: &ExecutionContext) -> Result<T, BridgeError> {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { func, .. } => return func(ctx),
                Node::Branch {
                    key,
                    branches,
                    optional,
                    default,
                } => {
                    let value = ctx.arg(key);
                    let label = value.and_then(label_of);
                    if let Some((_, next)) = label
                        .as_deref()
                        .and_then(|l| branches.iter().find(|(b, _)| b == l))
                    {
                        node = next;
                    } else if let Some((_, next)) =
                        optional.iter().find(|(name, _)| is_present(ctx.arg(name)))
                    {
                        node = next;
                    } else if let Some(next) = default {
                        node = next;
                    } else {
                        return Err(unmatched(key, value, branches, optional));
                    }
                }
            }
        }
    }
}

fn unmatched<T>(
    key: &str,
    value: Option<&Value>,
    branches: &[(String, Node<T>)],
    optional: &[(String, Node<T>)],
) -> BridgeError {
    let supported = branches
        .iter()
        .map(|(label, _)| label.clone())
        .chain(optional.iter().map(|(name, _)| format!("{name} (optional)")))
        .collect::<Vec<_>>()
        .join(", ");
    match value {
        None => BridgeError::validation(format!(
            "Missing value for key '{key}'. Supported values: [{supported}]"
        )),
        Some(v) => {
            let shown = label_of(v).unwrap_or_else(|| v.to_string());
            BridgeError::validation(format!(
                "Invalid value '{shown}' for key '{key}'. Supported values: [{supported}]"
            ))
        }
    }
}

pub struct TreeBuilder<T> {
    key: String,
    branches: Vec<(String, Node<T>)>,
    optional: Vec<(String, Node<T>)>,
    default: Option<Box<Node<T>>>,
}

impl<T> TreeBuilder<T> {
    pub fn leaf<F>(mut self, label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<T, BridgeError> + Send + Sync + 'static,
    {
        self.branches.push((label.into(), Node::leaf(f)));
        self
    }

    pub fn branch(mut self, label: impl Into<String>, sub: DecisionTree<T>) -> Self {
        self.branches.push((label.into(), sub.root));
        self
    }

    /// Taken when no label matched and argument `name` is present and non-empty.
    pub fn optional_leaf<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<T, BridgeError> + Send + Sync + 'static,
    {
        self.optional.push((name.into(), Node::leaf(f)));
        self
    }

    pub fn optional_branch(mut self, name: impl Into<String>, sub: DecisionTree<T>) -> Self {
        self.optional.push((name.into(), sub.root));
        self
    }

    pub fn default_leaf<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<T, BridgeError> + Send + Sync + 'static,
    {
        self.default = Some(Box::new(Node::leaf(f)));
        self
    }

    pub fn default_branch(mut self, sub: DecisionTree<T>) -> Self {
        self.default = Some(Box::new(sub.root));
        self
    }

    pub fn build(self) -> DecisionTree<T> {
        DecisionTree {
            root: Node::Branch {
                key: self.key,
                branches: self.branches,
                optional: self.optional,
                default: self.default,
            },
        }
    }
}

impl<T> fmt::Display for DecisionTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Node::Leaf { name, .. } => writeln!(f, "→ {name}"),
            Node::Branch { key, .. } => {
                writeln!(f, "({key})")?;
                render_children(&self.root, "", f)
            }
        }
    }
}

fn render_children<T>(node: &Node<T>, prefix: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Node::Branch {
        branches,
        optional,
        default,
        ..
    } = node
    else {
        return Ok(());
    };

    let mut entries: Vec<(String, &Node<T>)> = branches.iter().map(|(l, n)| (l.clone(), n)).collect();
    entries.extend(optional.iter().map(|(name, n)| (format!("{name}?"), n)));
    if let Some(d) = default {
        entries.push((DEFAULT_LABEL.to_string(), d.as_ref()));
    }

    let count = entries.len();
    for (i, (label, child)) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "└─ " } else { "├─ " };
        match child {
            Node::Leaf { name, .. } => writeln!(f, "{prefix}{connector}{label} → {name}")?,
            Node::Branch { key, .. } => {
                writeln!(f, "{prefix}{connector}{label} → ({key})")?;
                let nested = format!("{prefix}{}", if last { "   " } else { "│  " });
                render_children(child, &nested, f)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(v: Value) -> ExecutionContext {
        ExecutionContext::new(v.as_object().cloned().expect("object"))
    }

    fn said(text: &'static str) -> impl Fn(&ExecutionContext) -> Result<&'static str, BridgeError> {
        move |_| Ok(text)
    }

    fn read_leaf(_: &ExecutionContext) -> Result<&'static str, BridgeError> {
        Ok("read")
    }

    fn tree() -> DecisionTree<&'static str> {
        DecisionTree::route("action")
            .leaf("read", read_leaf)
            .branch(
                "write",
                DecisionTree::route("mode")
                    .leaf("append", said("append"))
                    .default_leaf(said("overwrite"))
                    .build(),
            )
            .leaf("3", said("three"))
            .build()
    }

    #[test]
    fn routes_by_label_and_nested_default() {
        assert_eq!(tree().run(&ctx(json!({ "action": "read" }))), Ok("read"));
        assert_eq!(
            tree().run(&ctx(json!({ "action": "write", "mode": "append" }))),
            Ok("append")
        );
        assert_eq!(
            tree().run(&ctx(json!({ "action": "write", "mode": "weird" }))),
            Ok("overwrite")
        );
        assert_eq!(tree().run(&ctx(json!({ "action": "write" }))), Ok("overwrite"));
    }

    #[test]
    fn numbers_match_their_string_rendering() {
        assert_eq!(tree().run(&ctx(json!({ "action": 3 }))), Ok("three"));
    }

    #[test]
    fn unmatched_value_names_value_key_and_supported_set() {
        let err = tree().run(&ctx(json!({ "action": "frobnicate" }))).expect_err("no match");
        assert_eq!(
            err,
            BridgeError::validation(
                "Invalid value 'frobnicate' for key 'action'. Supported values: [read, write, 3]"
            )
        );

        let missing = tree().run(&ctx(json!({ "action": null }))).expect_err("missing");
        assert!(missing.to_string().starts_with("Missing value for key 'action'"));
    }

    #[test]
    fn default_catches_everything_unmatched() {
        let t = DecisionTree::route("kind")
            .leaf("a", said("a"))
            .default_leaf(said("fallback"))
            .build();
        assert_eq!(t.run(&ctx(json!({ "kind": "zzz" }))), Ok("fallback"));
        assert_eq!(t.run(&ctx(json!({}))), Ok("fallback"));
    }

    #[test]
    fn optional_branches_follow_declaration_order() {
        let t = DecisionTree::route("source")
            .leaf("inline", said("inline"))
            .optional_leaf("path", said("by path"))
            .optional_leaf("id", said("by id"))
            .default_leaf(said("fallback"))
            .build();
        assert_eq!(t.run(&ctx(json!({ "id": 4, "path": "a.txt" }))), Ok("by path"));
        assert_eq!(t.run(&ctx(json!({ "id": 4, "path": "" }))), Ok("by id"));
        assert_eq!(t.run(&ctx(json!({ "path": null }))), Ok("fallback"));
        assert_eq!(t.run(&ctx(json!({ "source": "inline", "id": 1 }))), Ok("inline"));

        let err = DecisionTree::route("source")
            .optional_leaf("path", said("by path"))
            .build()
            .run(&ctx(json!({})))
            .expect_err("nothing present");
        assert!(err.to_string().contains("[path (optional)]"));
    }

    #[test]
    fn leaf_errors_propagate() {
        let t: DecisionTree<()> =
            DecisionTree::leaf(|_| Err(BridgeError::execution("disk full")));
        assert_eq!(t.run(&ctx(json!({}))), Err(BridgeError::execution("disk full")));
    }

    #[test]
    fn preview_draws_the_outline() {
        let preview = tree().to_string();
        let expected = "\
(action)
├─ read → read_leaf
├─ write → (mode)
│  ├─ append → closure
│  └─ * → closure
└─ 3 → closure
";
        assert_eq!(preview, expected);
    }
}
