mod commands;
mod router;
mod routes;
mod runtime;
mod security;
mod state;

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::BridgeConfig;
use crate::deferred::{LogProgress, Spawner, TaskScheduler};
use crate::dispatch::Dispatcher;
use crate::envelope::{AsyncRequest, BatchRequest, BatchResponse, CallRequest, Response};
use crate::error::BridgeError;
use crate::method::Handler;
use crate::registry::HandlerRegistry;
pub use commands::BridgeCommand;
use router::build_router;
use routes::*;
pub use runtime::BridgeRuntime;
use runtime::*;
use security::*;
use state::*;

/// Embeds the dispatcher in the app's frame loop and, unless disabled,
/// serves it over HTTP.
pub struct BridgePlugin {
    pub config: BridgeConfig,
    pub handlers: Vec<Arc<dyn Handler>>,
    pub serve_http: bool,
}

impl BridgePlugin {
    pub fn new(config: BridgeConfig, handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            config,
            handlers,
            serve_http: true,
        }
    }

    /// Frame-loop systems only; commands arrive through [`BridgeSender`].
    pub fn without_http(mut self) -> Self {
        self.serve_http = false;
        self
    }
}

/// In-process entry point to the frame loop. The HTTP layer holds a clone.
#[derive(Resource, Clone)]
pub struct BridgeSender(pub Sender<BridgeCommand>);

impl Plugin for BridgePlugin {
    fn build(&self, app: &mut App) {
        let (tx, rx) = crossbeam_channel::unbounded::<BridgeCommand>();
        let (spawner, task_rx) = Spawner::channel();

        let registry = HandlerRegistry::from_handlers(self.handlers.iter().cloned());
        let dispatcher = Dispatcher::new(registry, spawner, self.config.dispatch_options());
        let scheduler = TaskScheduler::new(task_rx, self.config.steps_per_tick)
            .with_progress(Box::new(LogProgress::default()));

        app.insert_resource(BridgeChannels { receiver: rx })
            .insert_resource(BridgeSender(tx.clone()))
            .insert_resource(BridgeRuntime {
                dispatcher: dispatcher.clone(),
                scheduler: Mutex::new(scheduler),
            })
            .add_systems(
                Update,
                (process_bridge_commands, tick_deferred_tasks, reap_pending_tasks).chain(),
            );

        if !self.serve_http {
            return;
        }

        let state = AppState {
            sender: tx,
            dispatcher,
            call_timeout: self.config.call_timeout(),
        };
        let security = ApiSecurity::from_config(&self.config);
        let bind = self.config.bind.clone();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("[Switchboard API] Failed to start tokio runtime: {e}");
                    return;
                }
            };
            rt.block_on(async {
                let app = build_router(state, security);

                let listener = match tokio::net::TcpListener::bind(&bind).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!("[Switchboard API] Failed to bind {bind}: {e}");
                        return;
                    }
                };

                info!("[Switchboard API] Listening on http://{bind}");

                if let Err(e) = axum::serve(listener, app).await {
                    error!("[Switchboard API] Server stopped: {e}");
                }
            });
        });
    }
}
