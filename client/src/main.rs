use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{Command, ControllerStatus, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "bdctl")]
#[command(about = "Background video daemon control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the daemon to check if it's running
    Ping,

    /// Show playback status
    Status,

    /// List the clips in the clip library
    Clips,

    /// Crossfade to the next playlist entry now
    Skip,

    /// Retry playback after falling back to the poster
    Resume,

    /// Kill the running daemon
    Kill,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Ping => Command::Ping,
        Commands::Status => Command::Query,
        Commands::Clips => Command::ListClips,
        Commands::Skip => Command::Skip,
        Commands::Resume => Command::Resume,
        Commands::Kill => Command::Kill,
    };

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nIs the daemon running? Try starting it with: backdropd");
            std::process::exit(1);
        }
    }
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
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
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!("  Backend: {}", status.backend);
            match status.controller {
                Some(controller) => print_controller(&controller),
                None => println!("  Playback: starting"),
            }
        }
        Response::Clips(clips) => {
            println!("Clip Library ({}):", clips.len());
            for clip in clips {
                println!("  {}", clip);
            }
        }
        Response::Pong => {
            println!("✓ Daemon is running");
        }
    }
}

fn print_controller(status: &ControllerStatus) {
    if status.showing_poster {
        println!(
            "  Playback: poster ({}) after {} failure(s)",
            status.poster.as_deref().unwrap_or("none"),
            status.consecutive_failures
        );
        return;
    }

    if status.warming_up {
        println!(
            "  Playback: loading videos ({} of {} still loading)",
            status.loading, status.resident
        );
    } else {
        println!(
            "  Playback: {} ({}, crossfade {:.2}s)",
            status.phase, status.trigger_mode, status.crossfade_secs
        );
    }
    if status.max_opacity < 1.0 {
        println!("  Dimmed: {:.0}%", status.max_opacity * 100.0);
    }
    if let Some(ref clip) = status.current_clip {
        println!(
            "  Current: {} [{}/{}]",
            clip.file_name(),
            status.playlist_index + 1,
            status.playlist_len
        );
    }
    if let Some(ref clip) = status.next_clip {
        println!("  Next: {}", clip.file_name());
    }
    println!("  Transitions: {}", status.completed_transitions);
    println!(
        "  Preloaded: {}/{} ({} loading)",
        status.resident, status.max_resident, status.loading
    );
    println!("  Slots:");
    for slot in &status.slots {
        println!(
            "    {} ({}): {} {} opacity {:.2} z {}",
            slot.label,
            slot.role,
            slot.state,
            slot.clip.as_ref().map(|c| c.file_name()).unwrap_or("-"),
            slot.opacity,
            slot.z_index
        );
    }
}
