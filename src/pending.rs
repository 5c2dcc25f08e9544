use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bevy::log::{debug, info};
use serde::Serialize;
use serde_json::json;

use crate::context::{lock, ExecutionContext};
use crate::envelope::Response;
use crate::error::BridgeError;

struct PendingEntry {
    func: String,
    ctx: ExecutionContext,
    submitted_at: Instant,
    completed_at: Option<Instant>,
}

/// Snapshot of one tracked task, reported by `/health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub func: String,
    pub completed: bool,
    pub age_secs: f64,
}

/// Id-keyed submit/poll registry. Cloning shares the same map.
#[derive(Clone)]
pub struct PendingTasks {
    entries: Arc<Mutex<HashMap<String, PendingEntry>>>,
    ttl: Duration,
}

fn not_found(id: &str) -> BridgeError {
    BridgeError::not_found(format!(
        "No task found with id '{id}'. It might have been completed and retrieved, or never started."
    ))
}

impl PendingTasks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Registers `ctx` under `id`, then runs it. Returns the "started"
    /// acknowledgement, never the result itself.
    pub fn submit(
        &self,
        id: &str,
        func: &str,
        ctx: ExecutionContext,
        run: impl FnOnce(&ExecutionContext),
    ) -> Result<Response, BridgeError> {
        if id.trim().is_empty() {
            return Err(BridgeError::validation("Task id must not be empty."));
        }
        {
            let mut entries = lock(&self.entries);
            if entries.contains_key(id) {
                return Err(BridgeError::AlreadyRunning(id.to_string()));
            }
            entries.insert(
                id.to_string(),
                PendingEntry {
                    func: func.to_string(),
                    ctx: ctx.clone(),
                    submitted_at: Instant::now(),
                    completed_at: None,
                },
            );
        }

        let entries = Arc::clone(&self.entries);
        let owner = ctx.clone();
        let task_id = id.to_string();
        ctx.on_completion(move |_| {
            if let Some(entry) = lock(&entries).get_mut(&task_id) {
                if entry.ctx.ptr_eq(&owner) {
                    entry.completed_at = Some(Instant::now());
                }
            }
            debug!("[Switchboard pending] Task '{task_id}' completed");
        });

        info!("[Switchboard pending] Task '{id}' started for '{func}'");
        run(&ctx);

        Ok(Response::success_with(
            format!("Task '{id}' started for function '{func}'."),
            json!({ "id": id, "status": "started" }),
        ))
    }

    /// Running tasks report progress; a completed task hands over its result
    /// once and frees its id.
    pub fn poll(&self, id: &str) -> Result<Response, BridgeError> {
        let mut entries = lock(&self.entries);
        let entry = entries.get(id).ok_or_else(|| not_found(id))?;
        let Some(resp) = entry.ctx.response() else {
            return Ok(Response::success_with(
                "Task is still in progress.",
                json!({ "id": id, "status": "running" }),
            ));
        };
        entries.remove(id);
        Ok(resp)
    }

    pub fn cancel(&self, id: &str) -> Result<Response, BridgeError> {
        let entries = lock(&self.entries);
        let entry = entries.get(id).ok_or_else(|| not_found(id))?;
        if entry.ctx.is_completed() {
            return Ok(Response::success_with(
                format!("Task '{id}' has already completed."),
                json!({ "id": id, "status": "completed" }),
            ));
        }
        entry.ctx.cancel_token().cancel();
        info!("[Switchboard pending] Cancellation requested for task '{id}'");
        Ok(Response::success_with(
            format!("Cancellation requested for task '{id}'."),
            json!({ "id": id, "status": "cancelling" }),
        ))
    }

    /// Drops completed results nobody polled within the TTL. Running tasks
    /// are never reaped.
    pub fn reap_expired(&self, now: Instant) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|id, entry| match entry.completed_at {
            Some(done) if now.saturating_duration_since(done) >= ttl => {
                info!(
                    "[Switchboard pending] Reaping unpolled result of task '{id}' ({})",
                    entry.func
                );
                false
            }
            _ => true,
        });
        before - entries.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.entries).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> Vec<TaskStatus> {
        let now = Instant::now();
        let mut all: Vec<TaskStatus> = lock(&self.entries)
            .iter()
            .map(|(id, entry)| TaskStatus {
                id: id.clone(),
                func: entry.func.clone(),
                completed: entry.completed_at.is_some(),
                age_secs: now.saturating_duration_since(entry.submitted_at).as_secs_f64(),
            })
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}
