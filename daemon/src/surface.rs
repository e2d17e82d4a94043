//! Surface binding
//!
//! Embeds the display sink's output into a window owned by the host GUI.
//! [`SurfaceBinder::present`] arranges the window on the GUI thread before
//! the pipeline starts; [`SurfaceBinding::bind`] answers the sink's surface
//! request from the engine thread and attaches the native handle exactly
//! once per pipeline instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::{OverlaySink, WindowHandle};

/// Position and size of a display, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Window operations provided by the host GUI runtime.
///
/// Everything except `window_handle` must be called on the GUI-owning thread.
pub trait SurfaceHost: Send + Sync {
    /// Native handle of the video window, if the host has realized one
    fn window_handle(&self) -> Option<WindowHandle>;

    /// Geometry of the primary display, if known
    fn primary_display(&self) -> Option<DisplayGeometry>;

    fn set_borderless_geometry(&self, geometry: DisplayGeometry);

    fn show_full_screen(&self);

    fn show(&self);

    fn raise(&self);

    fn activate(&self);

    fn hide(&self);
}

/// Arranges the host window and hands out per-pipeline bindings
#[derive(Clone)]
pub struct SurfaceBinder {
    host: Arc<dyn SurfaceHost>,
}

impl SurfaceBinder {
    pub fn new(host: Arc<dyn SurfaceHost>) -> Self {
        Self { host }
    }

    /// Cover the primary display borderless, then show, raise and focus.
    /// Falls back to a plain full-screen request without display metadata.
    pub fn present(&self) {
        match self.host.primary_display() {
            Some(geometry) => {
                self.host.set_borderless_geometry(geometry);
                log::info!(
                    "Video surface geometry: {}x{} at ({},{})",
                    geometry.width,
                    geometry.height,
                    geometry.x,
                    geometry.y
                );
            }
            None => {
                log::warn!("No display geometry available, requesting full screen");
                self.host.show_full_screen();
            }
        }

        self.host.show();
        self.host.raise();
        self.host.activate();
    }

    pub fn hide(&self) {
        self.host.hide();
    }

    /// Fresh binding for a newly built pipeline's display sink
    pub fn binding(&self, sink: Arc<dyn OverlaySink>) -> Arc<SurfaceBinding> {
        Arc::new(SurfaceBinding {
            host: Arc::clone(&self.host),
            sink,
            bound: AtomicBool::new(false),
        })
    }
}

/// One pipeline's display sink and whether it already has a surface
pub struct SurfaceBinding {
    host: Arc<dyn SurfaceHost>,
    sink: Arc<dyn OverlaySink>,
    bound: AtomicBool,
}

impl SurfaceBinding {
    /// Attach the host window to the sink and enable event forwarding.
    ///
    /// Runs on the engine thread while the sink waits. Returns false if this
    /// binding was already used.
    pub fn bind(&self) -> bool {
        if self.bound.swap(true, Ordering::AcqRel) {
            log::debug!("Surface already bound, ignoring repeated request");
            return false;
        }

        match self.host.window_handle() {
            Some(handle) => {
                self.sink.set_window_handle(handle);
                log::info!("Attached window handle {:#x} to video sink", handle);
            }
            None => {
                log::warn!("Host has no window handle, video sink will open its own window");
            }
        }
        self.sink.handle_events(true);

        true
    }

    #[cfg(test)]
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }
}
