//! Video output facade
//!
//! The lifecycle surface used by the ingest session:
//! `open() -> init() -> write()* -> stop()`, then drop.
//!
//! `init()` and `stop()` run their pipeline work on the GUI thread and block
//! until it has finished. `write()` never leaves the calling thread; it only
//! takes the ingestion gate's lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{FrameCounters, PipelineState};

use crate::engine::{MediaEngine, PipelineDescription};
use crate::error::OutputError;
use crate::gate::{IngestionGate, WriteOutcome};
use crate::gui::GuiHandle;
use crate::pipeline::{FailureHook, PipelineController, SharedPipelineState};
use crate::surface::{SurfaceBinder, SurfaceHost};

/// Lifecycle position of a [`VideoOutput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Created,
    Opened,
    Initializing,
    Playing,
    Stopped,
    Destroyed,
}

pub struct VideoOutput {
    gui: GuiHandle,
    gate: Arc<IngestionGate>,
    controller: Arc<Mutex<PipelineController>>,
    pipeline_state: SharedPipelineState,
    state: Mutex<OutputState>,
}

fn lock_controller(controller: &Mutex<PipelineController>) -> MutexGuard<'_, PipelineController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VideoOutput {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        description: PipelineDescription,
        surface: Arc<dyn SurfaceHost>,
        gui: GuiHandle,
    ) -> Self {
        let gate = Arc::new(IngestionGate::new());

        // A bus error must stop forwarding right away
        let on_failure: FailureHook = {
            let gate = Arc::clone(&gate);
            Arc::new(move || gate.close())
        };

        let controller =
            PipelineController::new(engine, description, SurfaceBinder::new(surface), on_failure);
        let pipeline_state = controller.shared_state();

        Self {
            gui,
            gate,
            controller: Arc::new(Mutex::new(controller)),
            pipeline_state,
            state: Mutex::new(OutputState::Created),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lifecycle hook for the session layer; no pipeline work happens here
    pub fn open(&self) -> Result<(), OutputError> {
        let mut state = self.lock_state();
        if *state == OutputState::Created {
            *state = OutputState::Opened;
        }
        Ok(())
    }

    /// Build and start the pipeline on the GUI thread, then open the gate.
    ///
    /// Blocks until the pipeline is playing or has failed.
    pub fn init(&self) -> Result<(), OutputError> {
        let mut state = self.lock_state();

        if *state == OutputState::Playing && self.pipeline_state.get() == PipelineState::Playing {
            log::warn!("init() called while already playing");
            return Ok(());
        }
        if *state == OutputState::Created {
            log::warn!("init() called before open()");
        }
        *state = OutputState::Initializing;

        let gate = Arc::clone(&self.gate);
        let controller = Arc::clone(&self.controller);
        let result = self
            .gui
            .invoke_blocking(move || -> Result<(), OutputError> {
                gate.close();

                let mut controller = lock_controller(&controller);
                controller.start()?;
                let input = controller.input_endpoint().ok_or_else(|| {
                    OutputError::GraphBuildFailure("input endpoint released".to_string())
                })?;
                gate.open(input);

                // An engine error that landed after start() must not leave the gate open
                if controller.state() != PipelineState::Playing {
                    gate.close();
                    controller.teardown();
                    return Err(OutputError::AsyncEngineError(
                        "pipeline failed right after starting".to_string(),
                    ));
                }
                Ok(())
            })
            .map_err(OutputError::from);

        match result {
            Ok(Ok(())) => {
                *state = OutputState::Playing;
                log::info!("Video output playing");
                Ok(())
            }
            Ok(Err(e)) | Err(e) => {
                *state = OutputState::Opened;
                log::error!("Video output failed to start: {}", e);
                Err(e)
            }
        }
    }

    /// Submit one access unit. Safe from any thread; never blocks on the GUI.
    pub fn write(&self, timestamp: u64, bytes: &[u8]) -> WriteOutcome {
        self.gate.write(timestamp, bytes)
    }

    /// Close the gate and tear the pipeline down on the GUI thread.
    ///
    /// A no-op unless playing, so repeated calls and calls without `init()`
    /// are safe.
    pub fn stop(&self) {
        self.gate.close();

        let mut state = self.lock_state();
        if *state != OutputState::Playing {
            log::debug!("stop() ignored in state {:?}", *state);
            return;
        }

        let controller = Arc::clone(&self.controller);
        if let Err(e) = self
            .gui
            .invoke_blocking(move || lock_controller(&controller).teardown())
        {
            log::warn!("{}, tearing down on the calling thread", e);
            lock_controller(&self.controller).teardown();
        }

        *state = OutputState::Stopped;
        log::info!("Video output stopped");
    }

    pub fn state(&self) -> OutputState {
        *self.lock_state()
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline_state.get()
    }

    /// Whether frames are currently being forwarded
    pub fn is_accepting(&self) -> bool {
        self.gate.is_open()
    }

    pub fn counters(&self) -> FrameCounters {
        self.gate.counters()
    }
}

impl Drop for VideoOutput {
    fn drop(&mut self) {
        if self.state() == OutputState::Playing {
            self.stop();
        }
        *self.lock_state() = OutputState::Destroyed;
    }
}

/// Creates outputs sharing one engine, surface host and GUI context
#[derive(Clone)]
pub struct OutputFactory {
    engine: Arc<dyn MediaEngine>,
    description: PipelineDescription,
    surface: Arc<dyn SurfaceHost>,
    gui: GuiHandle,
}

impl OutputFactory {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        description: PipelineDescription,
        surface: Arc<dyn SurfaceHost>,
        gui: GuiHandle,
    ) -> Self {
        Self {
            engine,
            description,
            surface,
            gui,
        }
    }

    pub fn create(&self) -> VideoOutput {
        VideoOutput::new(
            Arc::clone(&self.engine),
            self.description.clone(),
            Arc::clone(&self.surface),
            self.gui.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BusEvent, EngineState};
    use crate::gui::GuiLoop;
    use crate::surface::DisplayGeometry;
    use crate::testing::{MockEngine, MockSurface, Script};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const HANDLE: usize = 0x4e0000a;

    /// Ten bytes: start code, IDR slice header and a little payload
    const ACCESS_UNIT: [u8; 10] = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33, 0xff];

    fn setup(script: Script) -> (VideoOutput, MockEngine, Arc<MockSurface>) {
        let engine = MockEngine::with_script(script);
        let host = MockSurface::new(
            Some(HANDLE),
            Some(DisplayGeometry {
                x: 0,
                y: 0,
                width: 1280,
                height: 720,
            }),
        );
        let (gui, _thread) = GuiLoop::spawn().unwrap();
        let output = VideoOutput::new(
            Arc::new(engine.clone()),
            PipelineDescription::default(),
            host.clone(),
            gui,
        );
        (output, engine, host)
    }

    #[test]
    fn test_write_after_init_forwards() {
        let (output, engine, _) = setup(Script::default());
        assert_eq!(output.state(), OutputState::Created);

        output.open().unwrap();
        assert_eq!(output.state(), OutputState::Opened);
        output.init().unwrap();
        assert_eq!(output.state(), OutputState::Playing);
        assert_eq!(output.pipeline_state(), PipelineState::Playing);

        assert_eq!(output.write(40_000, &ACCESS_UNIT), WriteOutcome::Forwarded);
        assert!(output.is_accepting());

        let frames = engine.last_input().unwrap().frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 10);
        assert_eq!(frames[0].timestamp(), 40_000);
    }

    #[test]
    fn test_failed_build_leaves_writes_and_stop_inert() {
        let (output, engine, host) = setup(Script {
            fail_build: true,
            ..Script::default()
        });
        output.open().unwrap();

        assert!(matches!(
            output.init(),
            Err(OutputError::GraphBuildFailure(_))
        ));
        assert_eq!(output.state(), OutputState::Opened);
        assert_eq!(output.pipeline_state(), PipelineState::Failed);

        for i in 0..3 {
            assert_eq!(output.write(i, &ACCESS_UNIT), WriteOutcome::Dropped);
        }
        assert_eq!(output.counters().dropped, 3);

        output.stop();
        assert_eq!(output.state(), OutputState::Opened);
        assert!(engine.states().is_empty());
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_push_failure_closes_gate_until_next_init() {
        let (output, engine, _) = setup(Script {
            fail_push_after: Some(100),
            ..Script::default()
        });
        output.open().unwrap();
        output.init().unwrap();

        for i in 1..=100 {
            assert_eq!(output.write(i, &ACCESS_UNIT), WriteOutcome::Forwarded);
        }
        assert_eq!(output.write(101, &ACCESS_UNIT), WriteOutcome::Rejected);
        assert!(!output.is_accepting());
        for i in 102..=110 {
            assert_eq!(output.write(i, &ACCESS_UNIT), WriteOutcome::Dropped);
        }

        let input = engine.last_input().unwrap();
        assert_eq!(input.attempts(), 101);
        assert_eq!(
            output.counters(),
            FrameCounters {
                forwarded: 100,
                dropped: 9,
                rejected: 1,
            }
        );

        output.stop();
        assert_eq!(output.state(), OutputState::Stopped);
        assert_eq!(output.pipeline_state(), PipelineState::Stopped);
        assert_eq!(engine.live_graphs(), 0);
        assert_eq!(
            engine.states(),
            vec![EngineState::Playing, EngineState::Null]
        );

        // A fresh init reopens the gate on a new pipeline
        output.init().unwrap();
        assert_eq!(engine.builds(), 2);
        assert_eq!(output.write(111, &ACCESS_UNIT), WriteOutcome::Forwarded);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (output, engine, host) = setup(Script::default());

        output.stop();
        assert_eq!(output.state(), OutputState::Created);
        output.open().unwrap();
        output.stop();
        assert_eq!(output.state(), OutputState::Opened);
        assert!(engine.states().is_empty());

        output.init().unwrap();
        output.stop();
        output.stop();
        assert_eq!(output.state(), OutputState::Stopped);
        assert_eq!(
            engine.states(),
            vec![EngineState::Playing, EngineState::Null]
        );
        assert_eq!(host.calls().iter().filter(|c| *c == "hide").count(), 1);
    }

    #[test]
    fn test_surface_bound_once_per_pipeline() {
        let (output, engine, host) = setup(Script::default());
        output.open().unwrap();
        output.init().unwrap();
        assert_eq!(
            host.calls(),
            vec!["geometry 1280x720+0+0", "show", "raise", "activate"]
        );

        assert!(engine.emit(BusEvent::SurfaceRequested));
        assert!(engine.emit(BusEvent::SurfaceRequested));
        let sink = engine.last_sink().unwrap();
        assert_eq!(sink.handles(), vec![HANDLE]);
        assert_eq!(sink.events(), vec![true]);
    }

    #[test]
    fn test_engine_error_closes_gate_without_teardown() {
        let (output, engine, _) = setup(Script::default());
        output.open().unwrap();
        output.init().unwrap();

        assert!(engine.emit(BusEvent::Error {
            source: Some("vsink".to_string()),
            message: "Output window was closed".to_string(),
            debug: None,
        }));
        assert!(!output.is_accepting());
        assert_eq!(output.pipeline_state(), PipelineState::Failed);
        assert_eq!(output.write(0, &ACCESS_UNIT), WriteOutcome::Dropped);
        assert_eq!(engine.live_graphs(), 1);

        // Recovery is caller driven
        output.init().unwrap();
        assert_eq!(engine.builds(), 2);
        assert_eq!(engine.live_graphs(), 1);
        assert_eq!(output.pipeline_state(), PipelineState::Playing);
        assert_eq!(output.write(1, &ACCESS_UNIT), WriteOutcome::Forwarded);
    }

    #[test]
    fn test_refused_playing_reports_failure() {
        let (output, engine, _) = setup(Script {
            fail_playing: true,
            ..Script::default()
        });
        output.open().unwrap();

        assert!(matches!(
            output.init(),
            Err(OutputError::StateTransitionFailure(_))
        ));
        assert!(!output.is_accepting());
        assert_eq!(engine.live_graphs(), 0);
    }

    #[test]
    fn test_no_frames_forwarded_after_stop() {
        let (output, engine, _) = setup(Script::default());
        let output = Arc::new(output);
        output.open().unwrap();
        output.init().unwrap();
        let input = engine.last_input().unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let writers: Vec<_> = (0..3)
            .map(|_| {
                let output = Arc::clone(&output);
                let running = Arc::clone(&running);
                thread::spawn(move || {
                    let mut ts = 0;
                    while running.load(Ordering::Relaxed) {
                        output.write(ts, &ACCESS_UNIT);
                        ts += 1;
                    }
                })
            })
            .collect();

        while input.frames().len() < 50 {
            thread::yield_now();
        }
        output.stop();
        let forwarded = input.frames().len();

        for _ in 0..20 {
            assert_eq!(output.write(0, &ACCESS_UNIT), WriteOutcome::Dropped);
        }
        running.store(false, Ordering::Relaxed);
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(input.frames().len(), forwarded);
        assert!(
            input
                .frames()
                .iter()
                .all(|frame| frame.as_slice() == ACCESS_UNIT)
        );
    }

    #[test]
    fn test_drop_tears_down() {
        let (output, engine, host) = setup(Script::default());
        output.open().unwrap();
        output.init().unwrap();

        drop(output);
        assert_eq!(engine.live_graphs(), 0);
        assert_eq!(host.calls().last().map(String::as_str), Some("hide"));
    }

    #[test]
    fn test_init_without_gui() {
        let engine = MockEngine::new();
        let host = MockSurface::new(None, None);
        let (gui, thread) = GuiLoop::spawn().unwrap();
        gui.quit();
        thread.join().unwrap();

        let output = VideoOutput::new(
            Arc::new(engine.clone()),
            PipelineDescription::default(),
            host,
            gui,
        );
        output.open().unwrap();
        assert_eq!(output.init(), Err(OutputError::GuiUnavailable));
        assert_eq!(output.state(), OutputState::Opened);
        assert_eq!(engine.builds(), 0);
    }

    #[test]
    fn test_factory_creates_independent_outputs() {
        let engine = MockEngine::new();
        let (gui, _thread) = GuiLoop::spawn().unwrap();
        let factory = OutputFactory::new(
            Arc::new(engine.clone()),
            PipelineDescription::default(),
            MockSurface::new(Some(HANDLE), None),
            gui,
        );

        let first = factory.create();
        first.open().unwrap();
        first.init().unwrap();
        drop(first);

        let second = factory.create();
        assert_eq!(second.state(), OutputState::Created);
        second.open().unwrap();
        second.init().unwrap();
        assert_eq!(engine.builds(), 2);
        assert_eq!(engine.live_graphs(), 1);
    }
}
