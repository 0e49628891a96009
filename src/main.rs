use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use dify_stream::{ChatEvent, Config, DifyClient, StreamSession};

/// Stream one chat turn from a Dify app, printing answer deltas and saving
/// assembled TTS audio segments as MP3 files.
#[derive(Parser, Debug)]
#[command(name = "dify-stream", version)]
struct Args {
    /// Question to send
    query: String,

    /// Config file (extension optional; TOML/YAML/JSON)
    #[arg(short, long, default_value = "config/dify-stream")]
    config: String,

    /// Directory for assembled MP3 segments
    #[arg(short, long, default_value = "segments")]
    out_dir: PathBuf,

    /// Reference an already-uploaded image by file id
    #[arg(long)]
    file_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    std::fs::create_dir_all(&args.out_dir).context("Failed to create segment directory")?;

    let client = Arc::new(DifyClient::new(&cfg.server));
    let (session, sinks) = StreamSession::new(
        client,
        cfg.server.user.clone(),
        cfg.audio.assembler_config(),
    );
    let dify_stream::SessionSinks {
        mut events,
        mut segments,
    } = sinks;

    session
        .start(&args.query, Default::default(), args.file_id)
        .await?;

    // Write segments as they are produced
    let out_dir = args.out_dir.clone();
    let writer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(segment) = segments.recv().await {
            count += 1;
            let path = out_dir.join(format!("segment-{count:03}.mp3"));
            match std::fs::write(&path, &segment.bytes) {
                Ok(()) => info!("wrote {} ({} bytes)", path.display(), segment.len()),
                Err(e) => error!("failed to write {}: {}", path.display(), e),
            }
        }
        count
    });

    let mut check = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.stop().await;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChatEvent::Message(m) => {
                        print!("{}", m.answer);
                        std::io::stdout().flush().ok();
                    }
                    ChatEvent::MessageReplace(m) => {
                        println!();
                        println!("{}", m.answer);
                    }
                    ChatEvent::MessageEnd(_) => println!(),
                    ChatEvent::Error(e) => {
                        error!(
                            "server error {}: {}",
                            e.code.as_deref().unwrap_or("unknown"),
                            e.message.as_deref().unwrap_or("")
                        );
                    }
                    _ => {}
                }
            }
            _ = check.tick() => {
                if !session.state().await.is_active() && events.is_empty() {
                    break;
                }
            }
        }
    }

    let state = session.state().await;
    drop(session);

    let segments = writer.await?;
    info!("session {:?}, {} audio segments saved", state, segments);

    Ok(())
}
