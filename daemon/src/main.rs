mod config;
mod engine;
mod error;
mod frame;
mod gate;
mod gui;
mod host;
mod ingest_server;
mod macros;
mod output;
mod pipeline;
mod surface;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::engine::PipelineDescription;
use crate::gui::GuiLoop;
use crate::host::StandaloneSurface;
use crate::output::{OutputFactory, VideoOutput};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration decides the default log filter, so it is loaded first and
    // reported once the logger is up
    let loaded = config::Config::load();
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("Starting Projector video sink v{}", env!("CARGO_PKG_VERSION"));

    let config_path = config::Config::default_config_path()?;
    log::info!("Looking for config at: {}", config_path.display());

    let config = match loaded {
        Ok(cfg) => {
            log::info!("✓ Configuration loaded successfully");
            log::info!("  Pipeline settings:");
            log::info!("    - Decoder: {}", cfg.pipeline.decoder);
            log::info!("    - Converter: {}", cfg.pipeline.converter);
            log::info!("    - Video sink: {}", cfg.pipeline.video_sink);
            log::info!(
                "    - Clock sync: {}",
                if cfg.pipeline.sync { "yes" } else { "no" }
            );
            match cfg.window.handle {
                Some(handle) => log::info!("  Embedding into window {:#x}", handle),
                None => log::info!("  Window: sink-owned"),
            }
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config: {}. Using defaults.", e);
            config::Config::default()
        }
    };

    let engine = engine::default_engine()?;
    let (gui, gui_thread) = GuiLoop::spawn().context("Failed to start GUI thread")?;

    let factory = OutputFactory::new(
        engine,
        PipelineDescription::from_settings(&config.pipeline),
        Arc::new(StandaloneSurface::new(config.window.clone())),
        gui.clone(),
    );

    let state = Arc::new(Mutex::new(DaemonState::new()));

    // Start ingest server
    let ingest_state = state.clone();
    let socket_path = config.socket_path();
    let ingest_handle = tokio::spawn(async move {
        if let Err(e) = ingest_server::start(socket_path, ingest_state, factory).await {
            log::error!("Ingest server error: {}", e);
        }
    });

    // Set up signal handlers
    let signal_state = state.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    log::error!("Failed to set up signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
    });

    log_and_continue!(ingest_handle.await, "run ingest server");

    gui.quit();
    if !matches!(
        tokio::task::spawn_blocking(move || gui_thread.join()).await,
        Ok(Ok(()))
    ) {
        log::warn!("GUI thread did not shut down cleanly");
    }

    log::info!("Daemon shutting down");
    Ok(())
}

/// The connection currently owning the video output
#[derive(Clone)]
pub struct ActiveSession {
    pub id: u64,
    pub output: Arc<VideoOutput>,
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
    pub active: Option<ActiveSession>,
    next_session_id: u64,
}

impl DaemonState {
    fn new() -> Self {
        Self {
            should_exit: false,
            start_time: std::time::Instant::now(),
            active: None,
            next_session_id: 1,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn next_session_id(&mut self) -> u64 {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }
}
