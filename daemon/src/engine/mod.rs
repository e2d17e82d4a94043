//! Media engine contract
//!
//! The sink never talks to a media framework directly. It needs exactly
//! these capabilities from one:
//!
//! - build a graph from a [`PipelineDescription`]
//! - resolve the named input and display-sink endpoints
//! - request state transitions
//! - push encoded buffers into the input endpoint
//! - deliver bus events (errors, surface requests) asynchronously
//! - attach a native window to the display sink and forward its events
//!
//! `gst` implements them with GStreamer.

#[cfg(feature = "video")]
pub mod gst;

use std::sync::Arc;
use thiserror::Error;

use crate::config::PipelineSettings;
use crate::frame::Frame;

/// Name of the encoded-input endpoint inside the graph
pub const INPUT_ENDPOINT: &str = "src";

/// Name of the display-sink endpoint inside the graph
pub const SINK_ENDPOINT: &str = "vsink";

/// Caps the producer commits to: H.264 byte-stream, one access unit per buffer
pub const INPUT_CAPS: &str = "video/x-h264,stream-format=byte-stream,alignment=au";

/// Opaque native window identifier (XID, HWND, ...)
pub type WindowHandle = usize;

/// Callback invoked on the engine's own thread for every bus event
pub type BusHandler = Box<dyn Fn(BusEvent) + Send + Sync>;

/// Engine-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("failed to build pipeline: {0}")]
    Build(String),

    #[error("state change to {target:?} refused: {reason}")]
    StateChange { target: EngineState, reason: String },

    #[error("bus unavailable: {0}")]
    Bus(String),
}

/// Reasons the input endpoint refuses a buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("pipeline is flushing")]
    Flushing,

    #[error("end of stream already signalled")]
    EndOfStream,

    #[error("downstream is not linked")]
    NotLinked,

    #[error("flow error: {0}")]
    Flow(String),
}

/// Target states understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Quiescent; all resources released
    Null,
    Playing,
}

/// Asynchronous notifications from the pipeline bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Error {
        source: Option<String>,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: Option<String>,
        message: String,
    },
    EndOfStream,
    /// The display sink is waiting for a window handle
    SurfaceRequested,
}

/// Entry point of a media framework
pub trait MediaEngine: Send + Sync {
    fn build(&self, description: &PipelineDescription)
    -> Result<Box<dyn PipelineGraph>, EngineError>;
}

/// A constructed element graph
pub trait PipelineGraph: Send {
    fn input_endpoint(&self, name: &str) -> Option<Arc<dyn InputEndpoint>>;

    fn overlay_sink(&self, name: &str) -> Option<Arc<dyn OverlaySink>>;

    fn set_state(&self, target: EngineState) -> Result<(), EngineError>;

    /// Install the bus listener, replacing any previous one
    fn subscribe(&self, handler: BusHandler) -> Result<(), EngineError>;

    fn unsubscribe(&self);
}

/// Endpoint that accepts encoded buffers
pub trait InputEndpoint: Send + Sync {
    /// Hand the frame over to the pipeline. Never blocks on a full queue.
    fn push(&self, frame: Frame) -> Result<(), PushError>;
}

/// Display-sink endpoint with video-overlay capability
pub trait OverlaySink: Send + Sync {
    fn set_window_handle(&self, handle: WindowHandle);

    fn handle_events(&self, enabled: bool);
}

/// Typed shape of the decode/render graph:
/// `input -> [queue] -> parse -> decode -> convert -> sink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    pub input_name: String,
    pub queue: bool,
    /// Parameter-set reinsertion interval for the parser (-1 = with every IDR)
    pub config_interval: i32,
    pub decoder: String,
    pub converter: String,
    pub sink: String,
    pub sink_name: String,
    /// Whether the sink synchronises on the pipeline clock
    pub sync: bool,
    /// Keep producer timestamps instead of stamping buffers on arrival
    pub source_timestamps: bool,
}

impl PipelineDescription {
    /// Build the description from configured element choices
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            input_name: INPUT_ENDPOINT.to_string(),
            queue: settings.queue,
            config_interval: settings.config_interval,
            decoder: settings.decoder.clone(),
            converter: settings.converter.clone(),
            sink: settings.video_sink.clone(),
            sink_name: SINK_ENDPOINT.to_string(),
            sync: settings.sync,
            source_timestamps: settings.source_timestamps,
        }
    }

    /// Render as a launch line understood by `gst::parse::launch`
    pub fn to_launch_string(&self) -> String {
        let queue = if self.queue { "! queue " } else { "" };
        format!(
            "appsrc name={} is-live=true format=time do-timestamp={} {}! h264parse config-interval={} ! {} ! {} ! {} name={} sync={}",
            self.input_name,
            !self.source_timestamps,
            queue,
            self.config_interval,
            self.decoder,
            self.converter,
            self.sink,
            self.sink_name,
            self.sync
        )
    }
}

impl Default for PipelineDescription {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

/// The engine compiled into this build
#[cfg(feature = "video")]
pub fn default_engine() -> anyhow::Result<Arc<dyn MediaEngine>> {
    Ok(Arc::new(gst::GstEngine::new()?))
}

#[cfg(not(feature = "video"))]
pub fn default_engine() -> anyhow::Result<Arc<dyn MediaEngine>> {
    anyhow::bail!("Video support not compiled in. Build with --features video")
}
