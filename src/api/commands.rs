use super::*;

/// Requests forwarded to the frame loop. Each carries the channel its
/// answer goes back on.
pub enum BridgeCommand {
    Call(CallRequest, tokio::sync::oneshot::Sender<Response>),
    Batch(BatchRequest, tokio::sync::oneshot::Sender<BatchResponse>),
    Async(AsyncRequest, tokio::sync::oneshot::Sender<Response>),
}
