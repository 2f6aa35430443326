use anyhow::Result;
use common::{BackdropError, Command, DaemonStatus, Response};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::DaemonState;
use crate::controller::ControllerEvent;
use crate::host::ControlCommand;

pub async fn start(
    state: Arc<Mutex<DaemonState>>,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
) -> Result<()> {
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        if state.lock().await.should_exit {
            break;
        }

        // Accept with a timeout so the exit flag is noticed
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let state = state.clone();
                let tx = control_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state, tx).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => continue,
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client(
    stream: UnixStream,
    state: Arc<Mutex<DaemonState>>,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &state, &control_tx).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(BackdropError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command(
    command: Command,
    state: &Arc<Mutex<DaemonState>>,
    control_tx: &mpsc::UnboundedSender<ControlCommand>,
) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Query => {
            let state = state.lock().await;
            Response::Status(DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: state.uptime_secs(),
                backend: state.backend.clone(),
                controller: state.controller.clone(),
            })
        }

        Command::ListClips => {
            let state = state.lock().await;
            Response::Clips(state.clips.clone())
        }

        Command::Skip => {
            log::info!("Skip requested over IPC");
            send(control_tx, ControlCommand::Event(ControllerEvent::Skip))
        }

        Command::Resume => {
            let (reply_tx, reply_rx) = oneshot::channel();
            if let Response::Error(e) = send(control_tx, ControlCommand::Resume { reply: reply_tx })
            {
                return Response::Error(e);
            }
            match reply_rx.await {
                Ok(true) => Response::Ok,
                Ok(false) => Response::Error(BackdropError::Media(
                    "Playback is running; nothing to resume".to_string(),
                )),
                Err(_) => Response::Error(BackdropError::Ipc(
                    "Playback loop stopped before replying".to_string(),
                )),
            }
        }

        Command::Kill => {
            log::info!("Received kill command");
            state.lock().await.should_exit = true;
            send(control_tx, ControlCommand::Shutdown)
        }
    }
}

fn send(control_tx: &mpsc::UnboundedSender<ControlCommand>, command: ControlCommand) -> Response {
    match control_tx.send(command) {
        Ok(()) => Response::Ok,
        Err(e) => Response::Error(BackdropError::Ipc(format!(
            "Failed to send command to playback loop: {}",
            e
        ))),
    }
}
