//! Rip a stream into per-song files.
//!
//! Saves tracks to `rips/` and relays the stream on port 8000 while it runs.
//! An optional second argument is a TOML config file.
//!
//! Run with: cargo run --example rip -- http://host:8000/stream [config.toml]

use std::time::Duration;
use stream_rip::{RipConfig, StatusEvent, StreamRip};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: rip <stream-url> [config.toml]");
        std::process::exit(2);
    };
    let config = match args.next() {
        Some(path) => RipConfig::load(path)?,
        None => RipConfig::default(),
    };

    let session = StreamRip::builder()
        .url(url)
        .config(config)
        .output_dir("rips")
        .on_status(|event| match event {
            StatusEvent::TrackFinished { track, path } => {
                println!("saved #{} {} -> {:?}", track.number, track.file_stem(), path);
            }
            StatusEvent::Done { reason } => println!("done: {reason:?}"),
            other => tracing::debug!(?other, "status"),
        })
        .start()?;

    if let Some(port) = session.relay_port() {
        println!("Relaying on http://localhost:{port}/");
    }
    println!("Ripping for 60 seconds...");

    for _ in 0..60 {
        if !session.is_running() {
            break;
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    // Get stats before stopping (stop() consumes the session)
    let stats = session.stats();
    session.stop()?;

    println!("Stats: {stats:?}");
    Ok(())
}
