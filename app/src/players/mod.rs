//! The three playback backends driven by the boombox arbiter.

use std::time::Duration;

use boombox_core::BackendError;
use hardware::{AudioPipeline, Element, HardwareError, PipelineFactory};
use log::warn;

pub mod air;
pub mod bt;
pub mod http;

pub use air::AirPlayer;
pub use bt::BtPlayer;
pub use http::{HttpPlayer, WifiCredentials};

/// Run iterations only look at events that are already queued.
const POLL: Duration = Duration::ZERO;

fn pipeline_err(err: HardwareError) -> BackendError {
    BackendError::Pipeline(err.to_string())
}

/// Build, link and start a linear pipeline from `chain` (source first).
///
/// `prepare` runs between linking and `run`, for URIs and clocks. A
/// pipeline that fails half way is torn down again before returning.
fn start_pipeline(
    role: &str,
    factory: &dyn PipelineFactory,
    chain: &[(Element, &'static str)],
    prepare: impl FnOnce(&mut dyn AudioPipeline) -> Result<(), HardwareError>,
) -> Result<Box<dyn AudioPipeline>, BackendError> {
    let mut pipeline = factory.create().map_err(pipeline_err)?;

    let mut registered: Vec<&'static str> = Vec::with_capacity(chain.len());
    let result = (|| {
        for &(element, tag) in chain {
            pipeline.register(element, tag)?;
            registered.push(tag);
        }
        let tags: Vec<&'static str> = chain.iter().map(|&(_, tag)| tag).collect();
        pipeline.link(&tags)?;
        prepare(pipeline.as_mut())?;
        pipeline.set_listener()?;
        pipeline.run()
    })();

    match result {
        Ok(()) => Ok(pipeline),
        Err(err) => {
            warn!("{role}: pipeline start failed: {err}");
            teardown(role, pipeline, &registered);
            Err(pipeline_err(err))
        }
    }
}

/// Stop and release a pipeline in framework order. Each step is attempted
/// even when an earlier one fails.
fn teardown(role: &str, mut pipeline: Box<dyn AudioPipeline>, tags: &[&'static str]) {
    let check = |step: &str, result: Result<(), HardwareError>| {
        if let Err(err) = result {
            warn!("{role}: {step}: {err}");
        }
    };

    check("remove listener", pipeline.remove_listener());
    check("stop", pipeline.stop());
    check("wait for stop", pipeline.wait_for_stop());
    check("terminate", pipeline.terminate());
    for &tag in tags {
        check("unregister", pipeline.unregister(tag));
    }
    check("deinit", pipeline.deinit());
}
