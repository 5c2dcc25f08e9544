use serde_json::json;

use crate::context::{Completion, ExecutionContext};
use crate::deferred::{DeferredTask, Step, StepContext};
use crate::envelope::Response;
use crate::error::BridgeError;
use crate::method::Handler;
use crate::schema::ParamSpec;
use crate::tree::Outcome;

const MAX_FRAMES: u64 = 100_000;

/// Waits a number of host ticks, reporting progress. Cancelling after some
/// frames have passed yields a partial result.
pub struct WaitFrames {
    params: Vec<ParamSpec>,
}

impl WaitFrames {
    pub fn new() -> Self {
        Self {
            params: vec![
                ParamSpec::integer("frames", "Number of ticks to wait")
                    .range(0.0, MAX_FRAMES as f64)
                    .default_value(1),
                ParamSpec::string("label", "Title shown on the progress indicator"),
            ],
        }
    }
}

impl Default for WaitFrames {
    fn default() -> Self {
        Self::new()
    }
}

struct FrameWait {
    label: String,
    requested: u64,
    waited: u64,
}

impl DeferredTask for FrameWait {
    fn step(&mut self, cx: &mut StepContext<'_>) -> Step {
        self.waited += 1;
        if self.waited >= self.requested {
            return Step::done(done(self.waited));
        }
        cx.progress(
            &self.label,
            &format!("{}/{} frames", self.waited, self.requested),
            self.waited as f32 / self.requested as f32,
        );
        Step::Yield
    }

    fn cancel(&mut self, _cx: &mut StepContext<'_>) -> Completion {
        if self.waited == 0 {
            return BridgeError::cancelled("Wait cancelled before any frame passed.").into();
        }
        Response::cancelled(
            format!("Waited {} of {} frame(s) before cancellation.", self.waited, self.requested),
            json!({ "frames_waited": self.waited, "frames_requested": self.requested }),
        )
        .into()
    }
}

fn done(frames: u64) -> Response {
    Response::success_with(
        format!("Waited {frames} frame(s)."),
        json!({ "frames_waited": frames }),
    )
}

impl Handler for WaitFrames {
    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<Outcome, BridgeError> {
        let requested = ctx.get_or::<u64>("frames", 1).min(MAX_FRAMES);
        if requested == 0 {
            return Ok(done(0).into());
        }
        ctx.defer(FrameWait {
            label: ctx.get_or("label", "Waiting".to_string()),
            requested,
            waited: 0,
        });
        Ok(Outcome::Pending)
    }
}
