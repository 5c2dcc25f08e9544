//! Built-in handlers registered by the binary.

use std::sync::Arc;

use crate::method::{Handler, Routed, TwoPhase};

mod documents;
mod echo;
mod wait_frames;

pub use documents::{Document, DocumentStore, Documents};
pub use echo::Echo;
pub use wait_frames::WaitFrames;

pub fn builtin_handlers() -> Vec<Arc<dyn Handler>> {
    vec![
        Arc::new(Routed::new(Echo)),
        Arc::new(WaitFrames::new()),
        Arc::new(TwoPhase::new(Documents::new(DocumentStore::default()))),
    ]
}
