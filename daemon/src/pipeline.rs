//! Pipeline controller
//!
//! Owns the decode/render graph for the lifetime of one playback run:
//! build, start, hand frames to the input endpoint, react to bus events and
//! tear everything down again. All methods taking `&mut self` run on the
//! GUI-owning thread; the bus handler runs on the engine's own thread and
//! only touches [`SharedPipelineState`], the failure hook and the surface
//! binding.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::PipelineState;

use crate::engine::{
    BusEvent, BusHandler, EngineState, InputEndpoint, MediaEngine, PipelineDescription,
    PipelineGraph,
};
use crate::error::OutputError;
use crate::frame::Frame;
use crate::surface::{SurfaceBinder, SurfaceBinding};

/// Called from the engine thread after a bus error marked the pipeline failed
pub type FailureHook = Arc<dyn Fn() + Send + Sync>;

/// Pipeline state readable from any thread
#[derive(Debug, Clone, Default)]
pub struct SharedPipelineState(Arc<Mutex<PipelineState>>);

impl SharedPipelineState {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> PipelineState {
        *self.lock()
    }

    pub fn set(&self, state: PipelineState) {
        *self.lock() = state;
    }

    /// Move `from -> to` atomically; false if the state was not `from`
    pub fn advance(&self, from: PipelineState, to: PipelineState) -> bool {
        let mut state = self.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }
}

struct LivePipeline {
    graph: Box<dyn PipelineGraph>,
    input: Arc<dyn InputEndpoint>,
    binding: Arc<SurfaceBinding>,
}

pub struct PipelineController {
    engine: Arc<dyn MediaEngine>,
    description: PipelineDescription,
    binder: SurfaceBinder,
    state: SharedPipelineState,
    on_failure: FailureHook,
    live: Option<LivePipeline>,
}

impl PipelineController {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        description: PipelineDescription,
        binder: SurfaceBinder,
        on_failure: FailureHook,
    ) -> Self {
        Self {
            engine,
            description,
            binder,
            state: SharedPipelineState::default(),
            on_failure,
            live: None,
        }
    }

    /// Handle for observing the state from other threads
    pub fn shared_state(&self) -> SharedPipelineState {
        self.state.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Build the graph unless a live one with both endpoints exists.
    ///
    /// A graph whose endpoints cannot be resolved is shut down and dropped
    /// before the failure is reported. The bus listener is installed before
    /// returning success.
    pub fn ensure_pipeline(&mut self) -> Result<(), OutputError> {
        if self.live.is_some() {
            return Ok(());
        }

        log::info!("Creating pipeline: {}", self.description.to_launch_string());

        let graph = match self.engine.build(&self.description) {
            Ok(graph) => graph,
            Err(e) => {
                log::error!("Pipeline creation failed: {}", e);
                self.state.set(PipelineState::Failed);
                return Err(OutputError::GraphBuildFailure(e.to_string()));
            }
        };

        let input = graph.input_endpoint(&self.description.input_name);
        let sink = graph.overlay_sink(&self.description.sink_name);
        let (input, sink) = match (input, sink) {
            (Some(input), Some(sink)) => (input, sink),
            (input, _) => {
                let missing = if input.is_none() {
                    self.description.input_name.clone()
                } else {
                    self.description.sink_name.clone()
                };
                log::error!("Pipeline has no element named '{}'", missing);
                Self::discard(graph);
                self.state.set(PipelineState::Failed);
                return Err(OutputError::GraphBuildFailure(format!(
                    "endpoint '{missing}' not found"
                )));
            }
        };

        let binding = self.binder.binding(sink);
        if let Err(e) = graph.subscribe(self.bus_handler(Arc::clone(&binding))) {
            log::error!("Failed to watch pipeline bus: {}", e);
            Self::discard(graph);
            self.state.set(PipelineState::Failed);
            return Err(OutputError::GraphBuildFailure(e.to_string()));
        }

        self.live = Some(LivePipeline {
            graph,
            input,
            binding,
        });
        self.state.set(PipelineState::Built);
        Ok(())
    }

    /// Present the surface and bring the pipeline to Playing.
    ///
    /// Any failure tears the pipeline down completely. A pipeline left failed
    /// by a bus error is discarded and rebuilt.
    pub fn start(&mut self) -> Result<(), OutputError> {
        if self.live.is_some() {
            match self.state.get() {
                PipelineState::Playing => return Ok(()),
                PipelineState::Failed => {
                    log::info!("Discarding failed pipeline before restart");
                    self.teardown();
                }
                _ => {}
            }
        }

        self.ensure_pipeline()?;
        let Some(live) = self.live.as_ref() else {
            return Err(OutputError::GraphBuildFailure(
                "pipeline missing after build".to_string(),
            ));
        };

        self.binder.present();

        if let Err(e) = live.graph.set_state(EngineState::Playing) {
            log::error!("Failed to set pipeline to Playing: {}", e);
            self.teardown();
            self.state.set(PipelineState::Failed);
            return Err(OutputError::StateTransitionFailure(e.to_string()));
        }

        // A bus error may already have landed between the transition and here
        if !self
            .state
            .advance(PipelineState::Built, PipelineState::Playing)
        {
            log::error!("Pipeline failed while starting");
            self.teardown();
            self.state.set(PipelineState::Failed);
            return Err(OutputError::AsyncEngineError(
                "engine reported an error during startup".to_string(),
            ));
        }

        log::info!("Pipeline set to Playing, ready to receive buffers");
        Ok(())
    }

    /// Input endpoint of the live pipeline
    pub fn input_endpoint(&self) -> Option<Arc<dyn InputEndpoint>> {
        self.live.as_ref().map(|live| Arc::clone(&live.input))
    }

    /// Hand one frame to the input endpoint. No retry: an error tells the
    /// caller to close the gate.
    pub fn push(input: &dyn InputEndpoint, frame: Frame) -> Result<(), OutputError> {
        log::trace!("Pushing {} bytes at {}us", frame.len(), frame.timestamp());
        input.push(frame).map_err(|e| {
            log::error!("Pipeline refused buffer: {}", e);
            OutputError::PushRejected(e)
        })
    }

    /// Stop the engine, release the graph and its endpoints, hide the surface.
    /// No-op when nothing is live.
    pub fn teardown(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };

        live.graph.unsubscribe();
        if let Err(e) = live.graph.set_state(EngineState::Null) {
            log::warn!("Failed to stop pipeline cleanly: {}", e);
        }
        drop(live);

        self.binder.hide();
        self.state.set(PipelineState::Stopped);
        log::info!("Pipeline torn down");
    }

    fn discard(graph: Box<dyn PipelineGraph>) {
        if let Err(e) = graph.set_state(EngineState::Null) {
            log::debug!("Ignoring shutdown error of partial pipeline: {}", e);
        }
    }

    fn bus_handler(&self, binding: Arc<SurfaceBinding>) -> BusHandler {
        let state = self.state.clone();
        let on_failure = Arc::clone(&self.on_failure);

        Box::new(move |event| match event {
            BusEvent::Error {
                source,
                message,
                debug,
            } => {
                log::error!(
                    "[GStreamer] ERROR from {}: {} (debug: {})",
                    source.as_deref().unwrap_or("pipeline"),
                    message,
                    debug.as_deref().unwrap_or("none")
                );
                state.set(PipelineState::Failed);
                on_failure();
            }
            BusEvent::Warning { source, message } => {
                log::warn!(
                    "[GStreamer] WARNING from {}: {}",
                    source.as_deref().unwrap_or("pipeline"),
                    message
                );
            }
            BusEvent::EndOfStream => log::info!("Pipeline reached end of stream"),
            BusEvent::SurfaceRequested => {
                binding.bind();
            }
        })
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.teardown();
    }
}
