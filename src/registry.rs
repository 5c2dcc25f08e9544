use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use bevy::log::{info, warn};
use serde::Serialize;

use crate::method::Handler;
use crate::schema::ParamSpec;

/// Introspection record for one registered handler.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerInfo {
    pub name: String,
    pub type_name: String,
    pub params: Vec<ParamSpec>,
    pub preview: String,
}

/// Name to handler map, filled once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<BTreeMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_handlers(handlers: impl IntoIterator<Item = Arc<dyn Handler>>) -> Self {
        let registry = Self::new();
        for handler in handlers {
            let name = registry_name(handler.as_ref());
            registry.register(name, handler);
        }
        info!(
            "[Switchboard registry] Registered {} handler(s): {}",
            registry.len(),
            registry.names().join(", ")
        );
        registry
    }

    /// Adds or replaces a handler. A replaced handler is reported.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        let name = name.into();
        let mut map = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = map.insert(name.clone(), handler) {
            warn!(
                "[Switchboard registry] Handler name '{name}' registered twice; {} replaced",
                previous.type_label()
            );
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn describe(&self, name: &str) -> Option<HandlerInfo> {
        let handler = self.get(name)?;
        Some(HandlerInfo {
            name: name.to_string(),
            type_name: handler.type_label().to_string(),
            params: handler.params().to_vec(),
            preview: handler.preview(),
        })
    }
}

/// Declared name, else the snake_case form of the type's last path segment.
pub fn registry_name(handler: &dyn Handler) -> String {
    match handler.name() {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => snake_case(short_type_name(handler.type_label())),
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::envelope::Response;
    use crate::error::BridgeError;
    use crate::tree::Outcome;

    struct WaitFrames;
    struct Named(&'static str, &'static str);

    impl Handler for WaitFrames {
        fn params(&self) -> &[ParamSpec] {
            &[]
        }

        fn execute(&self, _ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
            Ok(Response::success("waited").into())
        }
    }

    impl Handler for Named {
        fn name(&self) -> Option<&str> {
            Some(self.0)
        }

        fn params(&self) -> &[ParamSpec] {
            &[]
        }

        fn execute(&self, _ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
            Ok(Response::success(self.1).into())
        }
    }

    #[test]
    fn snake_case_handles_acronyms_and_digits() {
        assert_eq!(snake_case("WaitFrames"), "wait_frames");
        assert_eq!(snake_case("HTTPRequest"), "http_request");
        assert_eq!(snake_case("Model3DImport"), "model3_d_import");
        assert_eq!(snake_case("echo"), "echo");
    }

    #[test]
    fn names_derive_from_type_or_declaration() {
        let registry = HandlerRegistry::from_handlers([
            Arc::new(WaitFrames) as Arc<dyn Handler>,
            Arc::new(Named("console", "first")) as Arc<dyn Handler>,
        ]);
        assert_eq!(registry.names(), vec!["console", "wait_frames"]);
        assert!(registry.get("wait_frames").is_some());
        assert!(registry.get("WaitFrames").is_none());
    }

    #[test]
    fn collision_overwrites_with_later_handler() {
        let registry = HandlerRegistry::from_handlers([
            Arc::new(Named("console", "first")) as Arc<dyn Handler>,
            Arc::new(Named("console", "second")) as Arc<dyn Handler>,
        ]);
        assert_eq!(registry.len(), 1);
        let ctx = ExecutionContext::new(Default::default());
        let outcome = registry
            .get("console")
            .expect("registered")
            .execute(&ctx)
            .expect("runs");
        match outcome {
            Outcome::Ready(resp) => assert_eq!(resp.message, "second"),
            Outcome::Pending => panic!("expected ready"),
        }
    }

    #[test]
    fn generic_type_names_are_stripped() {
        assert_eq!(short_type_name("switchboard::handlers::Documents"), "Documents");
        assert_eq!(
            short_type_name("switchboard::method::Routed<switchboard::handlers::Echo>"),
            "Routed"
        );
    }
}
