use super::*;

pub(super) fn build_router(state: AppState, security: ApiSecurity) -> Router {
    Router::new()
        .route("/call", post(call))
        .route("/batch", post(batch))
        .route("/async", post(async_call))
        .route("/methods", get(list_methods))
        .route("/methods/{name}", get(describe_method))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn_with_state(security, api_guard))
}
