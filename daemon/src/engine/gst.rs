//! GStreamer implementation of the media engine contract
//!
//! The graph is built from the launch line rendered by
//! [`PipelineDescription::to_launch_string`]. The input endpoint is an
//! `appsrc`, the display sink any element implementing `GstVideoOverlay`
//! (directly, or through a child for auto-plugging sinks such as
//! `autovideosink`).

use std::sync::{Arc, OnceLock};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;

use super::{
    BusEvent, BusHandler, EngineError, EngineState, INPUT_CAPS, InputEndpoint, MediaEngine,
    OverlaySink, PipelineDescription, PipelineGraph, PushError, WindowHandle,
};
use crate::frame::Frame;

/// Initialize GStreamer (idempotent, safe to call multiple times)
pub fn initialize_gstreamer() -> Result<(), EngineError> {
    static GSTREAMER_INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(|e| EngineError::Build(format!("GStreamer initialization failed: {e}")))
}

fn gst_state(state: EngineState) -> gst::State {
    match state {
        EngineState::Null => gst::State::Null,
        EngineState::Playing => gst::State::Playing,
    }
}

pub struct GstEngine;

impl GstEngine {
    pub fn new() -> Result<Self, EngineError> {
        initialize_gstreamer()?;
        Ok(Self)
    }
}

impl MediaEngine for GstEngine {
    fn build(
        &self,
        description: &PipelineDescription,
    ) -> Result<Box<dyn PipelineGraph>, EngineError> {
        let launch = description.to_launch_string();
        log::debug!("GStreamer pipeline: {}", launch);

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| EngineError::Build(e.to_string()))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| EngineError::Build("launch line did not produce a pipeline".to_string()))?;

        Ok(Box::new(GstGraph {
            pipeline,
            source_timestamps: description.source_timestamps,
        }))
    }
}

struct GstGraph {
    pipeline: gst::Pipeline,
    source_timestamps: bool,
}

impl PipelineGraph for GstGraph {
    fn input_endpoint(&self, name: &str) -> Option<Arc<dyn InputEndpoint>> {
        let app_src = self
            .pipeline
            .by_name(name)?
            .dynamic_cast::<gst_app::AppSrc>()
            .ok()?;

        match INPUT_CAPS.parse::<gst::Caps>() {
            Ok(caps) => app_src.set_caps(Some(&caps)),
            Err(e) => log::warn!("Invalid input caps {}: {}", INPUT_CAPS, e),
        }
        // Never stall the producer when the internal queue is full
        app_src.set_property("block", false);

        Some(Arc::new(GstInput {
            app_src,
            source_timestamps: self.source_timestamps,
        }))
    }

    fn overlay_sink(&self, name: &str) -> Option<Arc<dyn OverlaySink>> {
        let element = self.pipeline.by_name(name)?;
        Some(Arc::new(GstOverlaySink { element }))
    }

    fn set_state(&self, target: EngineState) -> Result<(), EngineError> {
        self.pipeline
            .set_state(gst_state(target))
            .map(|_| ())
            .map_err(|e| EngineError::StateChange {
                target,
                reason: e.to_string(),
            })
    }

    fn subscribe(&self, handler: BusHandler) -> Result<(), EngineError> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| EngineError::Bus("pipeline has no bus".to_string()))?;

        // Handled on the posting thread: the sink blocks on prepare-window-handle
        // until the handler returns. Nothing is left queued on the bus.
        bus.set_sync_handler(move |_, msg| {
            if let Some(event) = bus_event(msg) {
                handler(event);
            }
            gst::BusSyncReply::Drop
        });
        Ok(())
    }

    fn unsubscribe(&self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
    }
}

impl Drop for GstGraph {
    fn drop(&mut self) {
        self.unsubscribe();
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn bus_event(msg: &gst::Message) -> Option<BusEvent> {
    let source = || msg.src().map(|src| src.path_string().to_string());

    match msg.view() {
        gst::MessageView::Error(err) => Some(BusEvent::Error {
            source: source(),
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        }),
        gst::MessageView::Warning(warning) => Some(BusEvent::Warning {
            source: source(),
            message: warning.error().to_string(),
        }),
        gst::MessageView::Eos(..) => Some(BusEvent::EndOfStream),
        gst::MessageView::Element(..)
            if gst_video::is_video_overlay_prepare_window_handle_message(msg) =>
        {
            Some(BusEvent::SurfaceRequested)
        }
        _ => None,
    }
}

struct GstInput {
    app_src: gst_app::AppSrc,
    source_timestamps: bool,
}

impl InputEndpoint for GstInput {
    fn push(&self, frame: Frame) -> Result<(), PushError> {
        let (timestamp, data) = frame.into_parts();
        let mut buffer = gst::Buffer::from_mut_slice(data);

        if self.source_timestamps {
            if let Some(buffer) = buffer.get_mut() {
                buffer.set_pts(gst::ClockTime::from_useconds(timestamp));
            }
        }

        self.app_src
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| match e {
                gst::FlowError::Flushing => PushError::Flushing,
                gst::FlowError::Eos => PushError::EndOfStream,
                gst::FlowError::NotLinked => PushError::NotLinked,
                other => PushError::Flow(format!("{other:?}")),
            })
    }
}

struct GstOverlaySink {
    element: gst::Element,
}

impl GstOverlaySink {
    /// The element implementing the overlay interface. Auto-plugging bins
    /// only create it on their way to Ready, so this is resolved late.
    fn overlay(&self) -> Option<gst_video::VideoOverlay> {
        if let Some(overlay) = self.element.dynamic_cast_ref::<gst_video::VideoOverlay>() {
            return Some(overlay.clone());
        }

        self.element
            .downcast_ref::<gst::Bin>()?
            .by_interface(gst_video::VideoOverlay::static_type())?
            .dynamic_cast::<gst_video::VideoOverlay>()
            .ok()
    }
}

impl OverlaySink for GstOverlaySink {
    fn set_window_handle(&self, handle: WindowHandle) {
        match self.overlay() {
            // SAFETY: the handle comes from the host GUI, which keeps the window
            // alive for as long as the pipeline is live
            Some(overlay) => unsafe { overlay.set_window_handle(handle) },
            None => log::warn!("Video sink does not support window embedding"),
        }
    }

    fn handle_events(&self, enabled: bool) {
        if let Some(overlay) = self.overlay() {
            overlay.handle_events(enabled);
        }
    }
}
