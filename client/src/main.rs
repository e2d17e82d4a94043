use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::annexb::AccessUnits;
use common::{Command, Response, protocol};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Parser)]
#[command(name = "projctl")]
#[command(about = "Projector video sink control", long_about = None)]
#[command(version)]
struct Cli {
    /// Ingest socket (defaults to $XDG_RUNTIME_DIR/projector.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a raw H.264 Annex-B file to the sink
    Play {
        /// Path to the .h264 elementary stream
        path: PathBuf,

        /// Access units per second
        #[arg(short, long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=240))]
        fps: u32,

        /// Start over at the end of the file until interrupted
        #[arg(short, long = "loop")]
        looping: bool,
    },

    /// Query sink status
    Status,

    /// Check if the sink is running
    Ping,

    /// Stop the active playback session
    Stop,
}

#[derive(Error, Debug)]
enum ClientError {
    #[error("no access units found in {0}")]
    NoAccessUnits(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("connection closed by sink")]
    Disconnected,
}

/// One ingest socket connection
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn connect(socket: Option<PathBuf>) -> Result<Self> {
        let socket_path = socket.unwrap_or_else(common::get_socket_path);
        let stream = UnixStream::connect(&socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn request(&mut self, command: &Command) -> Result<Response> {
        // Send command
        let packet = protocol::encode_command(command)?;
        self.writer.write_all(&packet).await?;
        self.writer.flush().await?;

        // Read response
        let mut response_line = String::new();
        if self.reader.read_line(&mut response_line).await? == 0 {
            return Err(ClientError::Disconnected.into());
        }

        let response: Response = serde_json::from_str(&response_line)?;
        Ok(response)
    }

    async fn send_access_unit(&mut self, timestamp: u64, unit: &[u8]) -> Result<()> {
        self.writer
            .write_all(&protocol::encode_access_unit(timestamp, unit))
            .await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Play { path, fps, looping } => play(cli.socket, path, fps, looping).await,
        Commands::Status => send_command(cli.socket, Command::Query).await,
        Commands::Ping => send_command(cli.socket, Command::Ping).await,
        Commands::Stop => send_command(cli.socket, Command::Stop).await,
    };

    match result {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!("\nIs the sink running? Try starting it with: projector");
            std::process::exit(1);
        }
    }
}

async fn send_command(socket: Option<PathBuf>, command: Command) -> Result<Response> {
    let mut connection = Connection::connect(socket).await?;
    connection.request(&command).await
}

/// Presentation timestamp in microseconds of the `index`-th unit
fn frame_timestamp(index: u64, fps: u32) -> u64 {
    index * 1_000_000 / u64::from(fps)
}

async fn play(socket: Option<PathBuf>, path: PathBuf, fps: u32, looping: bool) -> Result<Response> {
    let data = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let units: Vec<&[u8]> = AccessUnits::new(&data).collect();
    if units.is_empty() {
        return Err(ClientError::NoAccessUnits(path.display().to_string()).into());
    }

    let mut connection = Connection::connect(socket).await?;
    match connection.request(&Command::Start).await? {
        Response::Ok => {}
        Response::Error(e) => return Err(e.into()),
        other => return Err(ClientError::UnexpectedResponse(format!("{:?}", other)).into()),
    }

    println!(
        "Streaming {} access units from {} at {} fps",
        units.len(),
        path.display(),
        fps
    );

    let mut ticker = tokio::time::interval(Duration::from_micros(frame_timestamp(1, fps)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut index = 0u64;
    'stream: loop {
        for unit in &units {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut ctrl_c => {
                    println!("Interrupted");
                    break 'stream;
                }
            }
            connection
                .send_access_unit(frame_timestamp(index, fps), unit)
                .await?;
            index += 1;
        }

        if !looping {
            break;
        }
    }

    println!("Sent {} access units", index);
    connection.request(&Command::Stop).await
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Sink Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!(
                "  Session: {}",
                if status.session_active { "active" } else { "idle" }
            );
            println!("  Pipeline: {}", status.pipeline);
            println!(
                "  Accepting frames: {}",
                if status.accepting { "yes" } else { "no" }
            );
            println!(
                "  Frames: {} forwarded, {} dropped, {} rejected",
                status.frames.forwarded, status.frames.dropped, status.frames.rejected
            );
        }
        Response::Pong => {
            println!("✓ Sink is running");
        }
    }
}
