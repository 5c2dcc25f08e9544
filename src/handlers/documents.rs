use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::json;

use crate::context::{lock, Completion, ExecutionContext, SideObject};
use crate::deferred::{from_fn, Step};
use crate::envelope::Response;
use crate::error::BridgeError;
use crate::method::TwoPhaseMethod;
use crate::schema::ParamSpec;
use crate::tree::{DecisionTree, Outcome, Resolution};

pub struct Document {
    pub id: u64,
    pub path: String,
    content: Mutex<String>,
    revision: AtomicU64,
}

impl Document {
    pub fn content(&self) -> String {
        lock(&self.content).clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn replace(&self, text: String) -> u64 {
        *lock(&self.content) = text;
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn append(&self, text: &str) -> u64 {
        lock(&self.content).push_str(text);
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn summary(&self) -> serde_json::Value {
        json!({ "id": self.id, "path": self.path, "revision": self.revision() })
    }
}

/// In-memory path-keyed document store shared by the `documents` handler.
#[derive(Clone, Default)]
pub struct DocumentStore {
    docs: Arc<RwLock<BTreeMap<String, Arc<Document>>>>,
    next_id: Arc<AtomicU64>,
}

impl DocumentStore {
    pub fn create(&self, path: &str, content: String) -> Result<Arc<Document>, BridgeError> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        if docs.contains_key(path) {
            return Err(BridgeError::validation(format!(
                "Document '{path}' already exists."
            )));
        }
        let doc = Arc::new(Document {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            path: path.to_string(),
            content: Mutex::new(content),
            revision: AtomicU64::new(1),
        });
        docs.insert(path.to_string(), doc.clone());
        Ok(doc)
    }

    pub fn by_path(&self, path: &str) -> Option<Arc<Document>> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn by_id(&self, id: u64) -> Option<Arc<Document>> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|d| d.id == id)
            .cloned()
    }

    fn remove(&self, path: &str) -> bool {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }

    fn list(&self) -> Vec<serde_json::Value> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|d| d.summary())
            .collect()
    }
}

/// Two-phase document editing: locate a document by `path` or `id`, then
/// read, write, append or delete it. `create` and `list` need no target.
pub struct Documents {
    store: DocumentStore,
}

impl Documents {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

fn found(doc: Option<Arc<Document>>) -> Resolution {
    Resolution::Target(doc.map(|d| d as SideObject))
}

fn target(ctx: &ExecutionContext) -> Result<Arc<Document>, BridgeError> {
    ctx.target::<Document>()
        .ok_or_else(|| BridgeError::execution("Resolved target is not a document."))
}

fn read(ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
    let doc = target(ctx)?;
    let mut data = doc.summary();
    data["content"] = json!(doc.content());
    Ok(Response::success_with(format!("Read '{}'.", doc.path), data).into())
}

fn write(ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
    let doc = target(ctx)?;
    let revision = doc.replace(ctx.require("content")?);
    Ok(Response::success_with(
        format!("Wrote '{}'.", doc.path),
        json!({ "id": doc.id, "revision": revision }),
    )
    .into())
}

fn append(ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
    let doc = target(ctx)?;
    let text: String = ctx.require("content")?;
    let revision = doc.append(&text);
    Ok(Response::success_with(
        format!("Appended to '{}'.", doc.path),
        json!({ "id": doc.id, "revision": revision }),
    )
    .into())
}

impl TwoPhaseMethod for Documents {
    fn create_params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("action", "Operation to perform")
                .required()
                .one_of(["create", "list", "read", "write", "append", "delete"]),
            ParamSpec::string("path", "Document path").example("notes/todo.md"),
            ParamSpec::integer("id", "Document id, as an alternative to path"),
            ParamSpec::string("content", "Text for create, write and append"),
            ParamSpec::string("lookup", "Resolve the target on the next tick instead of immediately")
                .one_of(["deferred"]),
        ]
    }

    fn create_target_tree(&self) -> DecisionTree<Resolution> {
        let creator = self.store.clone();
        let lister = self.store.clone();
        let by_path = self.store.clone();
        let by_id = self.store.clone();
        let deferred = self.store.clone();

        let locate = DecisionTree::route("lookup")
            .leaf("deferred", move |ctx| {
                let store = deferred.clone();
                let path = ctx.get_str("path").map(str::to_string);
                ctx.defer(from_fn(move |_| {
                    let doc = path.as_deref().and_then(|p| store.by_path(p));
                    Step::Done(Completion::Target(
                        doc.map(|d| d as SideObject),
                    ))
                }));
                Ok(Resolution::Pending)
            })
            .optional_leaf("path", move |ctx| {
                Ok(found(ctx.get_str("path").and_then(|p| by_path.by_path(p))))
            })
            .optional_leaf("id", move |ctx| {
                Ok(found(ctx.get::<u64>("id").and_then(|id| by_id.by_id(id))))
            })
            .build();

        DecisionTree::route("action")
            .leaf("create", move |ctx| {
                let path: String = ctx.require("path")?;
                let doc = creator.create(&path, ctx.get_or("content", String::new()))?;
                Ok(Resolution::Terminal(Response::success_with(
                    format!("Created '{path}'."),
                    doc.summary(),
                )))
            })
            .leaf("list", move |_| {
                let docs = lister.list();
                Ok(Resolution::Terminal(Response::success_with(
                    format!("{} document(s).", docs.len()),
                    json!({ "documents": docs }),
                )))
            })
            .default_branch(locate)
            .build()
    }

    fn create_action_tree(&self) -> DecisionTree<Outcome> {
        let store = self.store.clone();
        DecisionTree::route("action")
            .leaf("read", read)
            .leaf("write", write)
            .leaf("append", append)
            .leaf("delete", move |ctx| {
                let doc = target(ctx)?;
                store.remove(&doc.path);
                Ok(Response::success_with(
                    format!("Deleted '{}'.", doc.path),
                    json!({ "id": doc.id }),
                )
                .into())
            })
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::{Spawner, TaskScheduler};
    use crate::method::{run_handler, Handler, TwoPhase};
    use serde_json::Value;

    struct Fixture {
        handler: TwoPhase<Documents>,
        store: DocumentStore,
        spawner: Spawner,
        sched: TaskScheduler,
    }

    fn fixture() -> Fixture {
        let store = DocumentStore::default();
        store
            .create("notes/todo.md", "- ship it".to_string())
            .expect("seed");
        let (spawner, rx) = Spawner::channel();
        Fixture {
            handler: TwoPhase::new(Documents::new(store.clone())),
            store,
            spawner,
            sched: TaskScheduler::new(rx, 10),
        }
    }

    impl Fixture {
        fn start(&self, args: Value) -> ExecutionContext {
            let ctx = ExecutionContext::with_spawner(
                args.as_object().cloned().expect("object"),
                self.spawner.clone(),
            );
            run_handler(&self.handler, &ctx);
            ctx
        }

        fn call(&self, args: Value) -> Response {
            self.start(args).response().expect("synchronous")
        }
    }

    #[test]
    fn read_by_path_and_by_id() {
        let fx = fixture();
        let by_path = fx.call(json!({ "action": "read", "path": "notes/todo.md" }));
        assert_eq!(by_path.data.expect("data")["content"], json!("- ship it"));

        let by_id = fx.call(json!({ "action": "read", "id": 1 }));
        assert_eq!(by_id.message, "Read 'notes/todo.md'.");
    }

    #[test]
    fn create_then_write_and_append() {
        let fx = fixture();
        let created = fx.call(json!({ "action": "create", "path": "a.txt", "content": "x" }));
        assert!(created.success);

        fx.call(json!({ "action": "write", "path": "a.txt", "content": "hello" }));
        let appended = fx.call(json!({ "action": "append", "path": "a.txt", "content": " world" }));
        assert_eq!(appended.data.expect("data")["revision"], json!(3));
        assert_eq!(fx.store.by_path("a.txt").expect("exists").content(), "hello world");
    }

    #[test]
    fn missing_document_is_not_found() {
        let fx = fixture();
        let resp = fx.call(json!({ "action": "delete", "path": "ghost.md" }));
        assert!(!resp.success);
        assert_eq!(resp.error_text(), Some("Target could not be located: 'ghost.md'"));
    }

    #[test]
    fn no_locator_fails_target_routing() {
        let fx = fixture();
        let resp = fx.call(json!({ "action": "read" }));
        let text = resp.error_text().expect("error");
        assert!(text.starts_with("Target location failed: Missing value for key 'lookup'"));
    }

    #[test]
    fn deferred_lookup_resolves_next_tick() {
        let mut fx = fixture();
        let ctx = fx.start(json!({ "action": "delete", "path": "notes/todo.md", "lookup": "deferred" }));
        assert!(!ctx.is_completed());
        fx.sched.tick();
        assert_eq!(ctx.response().expect("done").message, "Deleted 'notes/todo.md'.");
        assert!(fx.store.by_path("notes/todo.md").is_none());
    }

    #[test]
    fn list_needs_no_target() {
        let fx = fixture();
        let resp = fx.call(json!({ "action": "list" }));
        assert_eq!(resp.message, "1 document(s).");
        assert!(fx.handler.preview().contains("* → (lookup)"));
    }
}
