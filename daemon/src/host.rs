//! Standalone surface host
//!
//! Used when no host GUI embeds the sink. Window placement comes from the
//! `[window]` config section; without a configured handle the video sink
//! opens a window of its own.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::WindowSettings;
use crate::engine::WindowHandle;
use crate::surface::{DisplayGeometry, SurfaceHost};

pub struct StandaloneSurface {
    settings: WindowSettings,
    visible: AtomicBool,
}

impl StandaloneSurface {
    pub fn new(settings: WindowSettings) -> Self {
        Self {
            settings,
            visible: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }
}

impl SurfaceHost for StandaloneSurface {
    fn window_handle(&self) -> Option<WindowHandle> {
        self.settings
            .handle
            .and_then(|handle| WindowHandle::try_from(handle).ok())
    }

    fn primary_display(&self) -> Option<DisplayGeometry> {
        let (width, height) = (self.settings.width?, self.settings.height?);
        Some(DisplayGeometry {
            x: self.settings.x.unwrap_or(0),
            y: self.settings.y.unwrap_or(0),
            width,
            height,
        })
    }

    fn set_borderless_geometry(&self, geometry: DisplayGeometry) {
        log::debug!(
            "Window geometry {}x{}+{}+{} (borderless)",
            geometry.width,
            geometry.height,
            geometry.x,
            geometry.y
        );
    }

    fn show_full_screen(&self) {
        log::debug!("Window full screen");
    }

    fn show(&self) {
        self.visible.store(true, Ordering::Relaxed);
        log::debug!("Window shown");
    }

    fn raise(&self) {}

    fn activate(&self) {}

    fn hide(&self) {
        if self.visible.swap(false, Ordering::Relaxed) {
            log::debug!("Window hidden");
        }
    }
}
