use anyhow::Result;
use common::protocol::{self, PACKET_HEADER_LEN, PacketHeader, PacketKind};
use common::{Command, FrameCounters, PipelineState, ProjectorError, Response, SinkStatus};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use crate::gate::WriteOutcome;
use crate::output::{OutputFactory, VideoOutput};
use crate::{ActiveSession, DaemonState};

pub async fn start(
    socket_path: PathBuf,
    state: Arc<Mutex<DaemonState>>,
    factory: OutputFactory,
) -> Result<()> {
    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("Ingest server listening on: {}", socket_path.display());

    loop {
        // Check if we should exit
        if state.lock().await.should_exit {
            break;
        }

        // Accept connections with timeout
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let state = state.clone();
                let factory = factory.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state, factory).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => {
                // Timeout, continue loop to check exit condition
                continue;
            }
        }
    }

    // Release the video output before the GUI loop goes away
    let active = state.lock().await.active.take();
    if let Some(session) = active {
        stop_output(session).await;
    }

    // Clean up socket
    let _ = std::fs::remove_file(&socket_path);
    log::info!("Ingest server stopped");
    Ok(())
}

async fn handle_client(
    stream: UnixStream,
    state: Arc<Mutex<DaemonState>>,
    factory: OutputFactory,
) -> Result<()> {
    let mut session = None;
    let result = serve(stream, &state, &factory, &mut session).await;

    // Disconnecting ends the session this connection started
    if let Some(session) = session {
        end_session(&state, session).await;
    }
    result
}

async fn serve(
    stream: UnixStream,
    state: &Arc<Mutex<DaemonState>>,
    factory: &OutputFactory,
    session: &mut Option<ActiveSession>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut header = [0u8; PACKET_HEADER_LEN];
    let mut payload = Vec::new();

    loop {
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let packet = match PacketHeader::parse(&header) {
            Ok(packet) => packet,
            Err(e) => {
                // The stream cannot be resynchronized after a bad header
                log::warn!("Invalid packet header: {}", e);
                send_response(&mut writer, &Response::Error(e)).await?;
                return Ok(());
            }
        };

        payload.resize(packet.len as usize, 0);
        reader.read_exact(&mut payload).await?;

        match packet.kind {
            PacketKind::AccessUnit => match session {
                Some(session) => {
                    if session.output.write(packet.timestamp, &payload) == WriteOutcome::Rejected {
                        log::warn!("Session {} stopped accepting frames", session.id);
                    }
                }
                None => log::trace!("Access unit before Start, dropping"),
            },
            PacketKind::Control => {
                let response = match protocol::decode_command(&payload) {
                    Ok(command) => handle_command(command, state, factory, session).await,
                    Err(e) => {
                        log::warn!("Invalid command: {}", e);
                        Response::Error(ProjectorError::Ipc(format!("Invalid command: {}", e)))
                    }
                };
                send_response(&mut writer, &response).await?;
            }
        }
    }
}

async fn send_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let response_json = serde_json::to_string(response)?;
    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_command(
    command: Command,
    state: &Arc<Mutex<DaemonState>>,
    factory: &OutputFactory,
    session: &mut Option<ActiveSession>,
) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Query => {
            let state = state.lock().await;
            let (accepting, pipeline, frames) = match state.active {
                Some(ref active) => (
                    active.output.is_accepting(),
                    active.output.pipeline_state(),
                    active.output.counters(),
                ),
                None => (false, PipelineState::Uninitialized, FrameCounters::default()),
            };
            Response::Status(SinkStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: state.uptime_secs(),
                session_active: state.active.is_some(),
                accepting,
                pipeline,
                frames,
            })
        }

        Command::Start => {
            let (claimed, stale) = {
                let mut state = state.lock().await;

                // A repeated Start re-initializes the output this connection still owns
                if let Some(current) = session.as_ref()
                    && state
                        .active
                        .as_ref()
                        .is_some_and(|active| active.id == current.id)
                {
                    (Ok(Arc::clone(&current.output)), None)
                } else {
                    // Ownership is gone once another connection stopped the session
                    let stale = session.take();
                    if let Some(ref stale) = stale {
                        log::info!("Session {} was stopped by another connection", stale.id);
                    }

                    let claimed = match state.active {
                        Some(ref active) => {
                            log::warn!("Rejecting Start, session {} owns the output", active.id);
                            Err(Response::Error(ProjectorError::Busy(format!(
                                "session {} owns the video output",
                                active.id
                            ))))
                        }
                        None => {
                            let id = state.next_session_id();
                            let output = Arc::new(factory.create());
                            let started = ActiveSession {
                                id,
                                output: Arc::clone(&output),
                            };
                            state.active = Some(started.clone());
                            *session = Some(started);
                            log::info!("Session {} started", id);
                            Ok(output)
                        }
                    };
                    (claimed, stale)
                }
            };

            if let Some(stale) = stale {
                stop_output(stale).await;
            }
            match claimed {
                Ok(output) => start_output(output).await,
                Err(response) => response,
            }
        }

        Command::Stop => {
            if let Some(current) = session.take()
                && end_session(state, current).await
            {
                return Response::Ok;
            }

            let active = state.lock().await.active.take();
            match active {
                Some(active) => {
                    log::info!("Stopping session {} on request", active.id);
                    stop_output(active).await;
                    Response::Ok
                }
                None => Response::Error(ProjectorError::NotFound("No active session".to_string())),
            }
        }
    }
}

/// `open()` + `init()` off the async runtime; both may block on the GUI thread
async fn start_output(output: Arc<VideoOutput>) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        output.open()?;
        output.init()
    })
    .await;

    match result {
        Ok(Ok(())) => Response::Ok,
        Ok(Err(e)) => Response::Error(ProjectorError::Pipeline(e.to_string())),
        Err(e) => Response::Error(ProjectorError::Pipeline(format!(
            "Start task failed: {}",
            e
        ))),
    }
}

/// Release a connection's session. Returns whether it still owned the output.
async fn end_session(state: &Arc<Mutex<DaemonState>>, session: ActiveSession) -> bool {
    let owned = {
        let mut state = state.lock().await;
        let owned = state
            .active
            .as_ref()
            .is_some_and(|active| active.id == session.id);
        if owned {
            state.active = None;
        }
        owned
    };
    stop_output(session).await;
    owned
}

/// Stop the output on a blocking thread, which also drops the reference
async fn stop_output(session: ActiveSession) {
    let ActiveSession { id, output } = session;
    if let Err(e) = tokio::task::spawn_blocking(move || output.stop()).await {
        log::error!("Failed to stop session {}: {}", id, e);
    }
    log::info!("Session {} ended", id);
}
