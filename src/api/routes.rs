use super::*;

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        Response::from(BridgeError::validation(format!("Malformed request body: {e}")))
    })
}

/// Waits for the frame loop's answer. Giving up does not stop the operation.
async fn await_reply<T>(
    rx: tokio::sync::oneshot::Receiver<T>,
    timeout: std::time::Duration,
    what: &str,
) -> Result<T, Response> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_)) => Err(BridgeError::execution("Channel closed").into()),
        Err(_) => {
            warn!("[Switchboard API] {what} still running after {timeout:?}; reply dropped");
            Err(BridgeError::execution(format!(
                "Timed out after {}s waiting for {what}; the operation keeps running.",
                timeout.as_secs()
            ))
            .into())
        }
    }
}

pub(super) async fn call(State(state): State<AppState>, body: Bytes) -> Json<Response> {
    let req: CallRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let what = format!("'{}'", req.func);
    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = state.sender.send(BridgeCommand::Call(req, tx));
    match await_reply(rx, state.call_timeout, &what).await {
        Ok(resp) | Err(resp) => Json(resp),
    }
}

pub(super) async fn batch(State(state): State<AppState>, body: Bytes) -> axum::response::Response {
    let req: BatchRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return Json(resp).into_response(),
    };
    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = state.sender.send(BridgeCommand::Batch(req, tx));
    match await_reply(rx, state.call_timeout, "batch").await {
        Ok(resp) => Json(resp).into_response(),
        Err(resp) => Json(resp).into_response(),
    }
}

pub(super) async fn async_call(State(state): State<AppState>, body: Bytes) -> Json<Response> {
    let req: AsyncRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = state.sender.send(BridgeCommand::Async(req, tx));
    match await_reply(rx, state.call_timeout, "async request").await {
        Ok(resp) | Err(resp) => Json(resp),
    }
}

pub(super) async fn list_methods(State(state): State<AppState>) -> Json<Response> {
    let registry = state.dispatcher.registry();
    let methods: Vec<serde_json::Value> = registry
        .names()
        .into_iter()
        .filter_map(|name| registry.describe(&name))
        .map(|info| {
            serde_json::json!({
                "name": info.name,
                "type": info.type_name,
                "params": info.params,
            })
        })
        .collect();
    Json(Response::success_with(
        format!("{} method(s) available.", methods.len()),
        serde_json::json!({ "methods": methods }),
    ))
}

pub(super) async fn describe_method(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<Response> {
    match state.dispatcher.registry().describe(&name) {
        Some(info) => Json(Response::success_with(format!("Method '{name}'."), info)),
        None => Json(BridgeError::not_found(format!("Unknown method: '{name}'.")).into()),
    }
}

pub(super) async fn health(State(state): State<AppState>) -> Json<Response> {
    Json(Response::success_with(
        "ok",
        serde_json::json!({
            "methods": state.dispatcher.registry().len(),
            "pending_tasks": state.dispatcher.pending().status(),
        }),
    ))
}
