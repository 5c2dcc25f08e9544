use super::*;

#[derive(Resource)]
pub(super) struct BridgeChannels {
    pub receiver: Receiver<BridgeCommand>,
}

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) sender: Sender<BridgeCommand>,
    /// Read-only use from the HTTP thread: registry introspection and health.
    pub(super) dispatcher: Dispatcher,
    pub(super) call_timeout: std::time::Duration,
}
