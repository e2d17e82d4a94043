//! Scripted collaborators for unit tests: an in-memory media engine and a
//! surface host that record every call made to them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{
    BusEvent, BusHandler, EngineError, EngineState, InputEndpoint, MediaEngine, OverlaySink,
    PipelineDescription, PipelineGraph, PushError, WindowHandle,
};
use crate::frame::Frame;
use crate::surface::{DisplayGeometry, SurfaceHost};

/// Input endpoint that stores pushed frames
pub struct RecordingInput {
    frames: Mutex<Vec<Frame>>,
    attempts: AtomicUsize,
    fail_after: Option<usize>,
    error: PushError,
}

impl RecordingInput {
    /// Accepts the first `fail_after` pushes (all of them when `None`)
    pub fn new(fail_after: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_after,
            error: PushError::Flushing,
        })
    }

    pub fn failing_with(error: PushError) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_after: Some(0),
            error,
        })
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl InputEndpoint for RecordingInput {
    fn push(&self, frame: Frame) -> Result<(), PushError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_after.is_some_and(|limit| attempt > limit) {
            return Err(self.error.clone());
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

/// Overlay sink that records attached handles
#[derive(Default)]
pub struct RecordingSink {
    handles: Mutex<Vec<WindowHandle>>,
    events: Mutex<Vec<bool>>,
}

impl RecordingSink {
    pub fn handles(&self) -> Vec<WindowHandle> {
        self.handles.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<bool> {
        self.events.lock().unwrap().clone()
    }
}

impl OverlaySink for RecordingSink {
    fn set_window_handle(&self, handle: WindowHandle) {
        self.handles.lock().unwrap().push(handle);
    }

    fn handle_events(&self, enabled: bool) {
        self.events.lock().unwrap().push(enabled);
    }
}

/// Failure switches for [`MockEngine`]
#[derive(Debug, Default, Clone)]
pub struct Script {
    pub fail_build: bool,
    pub missing_input: bool,
    pub missing_sink: bool,
    pub fail_playing: bool,
    /// Every pipeline's input accepts this many pushes, then refuses
    pub fail_push_after: Option<usize>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    builds: AtomicUsize,
    live_graphs: AtomicUsize,
    states: Mutex<Vec<EngineState>>,
    handler: Mutex<Option<Arc<BusHandler>>>,
    inputs: Mutex<Vec<Arc<RecordingInput>>>,
    sinks: Mutex<Vec<Arc<RecordingSink>>>,
}

/// In-memory engine; every graph it builds reports back to the engine
#[derive(Clone, Default)]
pub struct MockEngine {
    shared: Arc<Shared>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Script) -> Self {
        let engine = Self::new();
        engine.set_script(script);
        engine
    }

    pub fn set_script(&self, script: Script) {
        *self.shared.script.lock().unwrap() = script;
    }

    pub fn builds(&self) -> usize {
        self.shared.builds.load(Ordering::SeqCst)
    }

    /// Graphs built and not yet dropped
    pub fn live_graphs(&self) -> usize {
        self.shared.live_graphs.load(Ordering::SeqCst)
    }

    pub fn states(&self) -> Vec<EngineState> {
        self.shared.states.lock().unwrap().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.handler.lock().unwrap().is_some()
    }

    /// Input endpoint of the most recent graph
    pub fn last_input(&self) -> Option<Arc<RecordingInput>> {
        self.shared.inputs.lock().unwrap().last().cloned()
    }

    /// Display sink of the most recent graph
    pub fn last_sink(&self) -> Option<Arc<RecordingSink>> {
        self.shared.sinks.lock().unwrap().last().cloned()
    }

    /// Deliver a bus event the way the engine thread would.
    /// Returns false when no listener is installed.
    pub fn emit(&self, event: BusEvent) -> bool {
        let handler = self.shared.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

impl MediaEngine for MockEngine {
    fn build(
        &self,
        description: &PipelineDescription,
    ) -> Result<Box<dyn PipelineGraph>, EngineError> {
        let script = self.shared.script.lock().unwrap().clone();
        self.shared.builds.fetch_add(1, Ordering::SeqCst);
        if script.fail_build {
            return Err(EngineError::Build(format!(
                "no element \"{}\"",
                description.decoder
            )));
        }

        self.shared.live_graphs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockGraph {
            shared: Arc::clone(&self.shared),
            input: RecordingInput::new(script.fail_push_after),
            sink: Arc::new(RecordingSink::default()),
            script,
            subscribed: AtomicBool::new(false),
        }))
    }
}

struct MockGraph {
    shared: Arc<Shared>,
    script: Script,
    input: Arc<RecordingInput>,
    sink: Arc<RecordingSink>,
    subscribed: AtomicBool,
}

impl PipelineGraph for MockGraph {
    fn input_endpoint(&self, _name: &str) -> Option<Arc<dyn InputEndpoint>> {
        if self.script.missing_input {
            return None;
        }
        self.shared
            .inputs
            .lock()
            .unwrap()
            .push(Arc::clone(&self.input));
        Some(self.input.clone())
    }

    fn overlay_sink(&self, _name: &str) -> Option<Arc<dyn OverlaySink>> {
        if self.script.missing_sink {
            return None;
        }
        self.shared.sinks.lock().unwrap().push(Arc::clone(&self.sink));
        Some(self.sink.clone())
    }

    fn set_state(&self, target: EngineState) -> Result<(), EngineError> {
        self.shared.states.lock().unwrap().push(target);
        if target == EngineState::Playing && self.script.fail_playing {
            return Err(EngineError::StateChange {
                target,
                reason: "sink could not open display".to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(&self, handler: BusHandler) -> Result<(), EngineError> {
        *self.shared.handler.lock().unwrap() = Some(Arc::new(handler));
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unsubscribe(&self) {
        if self.subscribed.swap(false, Ordering::SeqCst) {
            *self.shared.handler.lock().unwrap() = None;
        }
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        self.shared.live_graphs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Surface host that logs every window operation by name
pub struct MockSurface {
    handle: Option<WindowHandle>,
    display: Option<DisplayGeometry>,
    calls: Mutex<Vec<String>>,
}

impl MockSurface {
    pub fn new(handle: Option<WindowHandle>, display: Option<DisplayGeometry>) -> Arc<Self> {
        Arc::new(Self {
            handle,
            display,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl SurfaceHost for MockSurface {
    fn window_handle(&self) -> Option<WindowHandle> {
        self.handle
    }

    fn primary_display(&self) -> Option<DisplayGeometry> {
        self.display
    }

    fn set_borderless_geometry(&self, geometry: DisplayGeometry) {
        self.record(format!(
            "geometry {}x{}+{}+{}",
            geometry.width, geometry.height, geometry.x, geometry.y
        ));
    }

    fn show_full_screen(&self) {
        self.record("fullscreen");
    }

    fn show(&self) {
        self.record("show");
    }

    fn raise(&self) {
        self.record("raise");
    }

    fn activate(&self) {
        self.record("activate");
    }

    fn hide(&self) {
        self.record("hide");
    }
}
