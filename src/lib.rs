pub mod alerts;
pub mod detection;
pub mod dom;
pub mod events;
pub mod session;
pub mod settings;
pub mod stats;
pub mod store;
pub mod tasks;
pub mod tracker;
pub mod utils;

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{error, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use alerts::messages::{self, Notice};
use events::{EventEmitter, PresentationEvent};
use settings::Settings;
use store::Store;
use tracker::{handle_control, ControlReply, Frame, ReelTracker, TrackerConfig};

const DEFAULT_DATA_DIR: &str = "reelaware-data";
const STORE_FILE: &str = "reelaware.sqlite3";

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'a PresentationEvent,
    notice: Notice,
}

#[derive(Serialize)]
struct InsertedLine {
    inserted: dom::NodeId,
}

fn emit_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => error!("Failed to encode output line: {err}"),
    }
}

fn error_reply(message: impl Into<String>) -> ControlReply {
    ControlReply::Error {
        message: message.into(),
    }
}

async fn handle_line(tracker: &ReelTracker, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let frame: Frame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("Ignoring malformed frame: {err}");
            emit_line(&error_reply(format!("malformed frame: {err}")));
            return;
        }
    };

    match frame {
        Frame::Control(message) => emit_line(&handle_control(tracker, message).await),
        Frame::Host(event) => match tracker.handle_host_event(event).await {
            Ok(Some(inserted)) => emit_line(&InsertedLine { inserted }),
            Ok(None) => {}
            Err(err) => {
                warn!("Host event failed: {err:#}");
                emit_line(&error_reply(format!("{err:#}")));
            }
        },
    }
}

fn present(event: &PresentationEvent, settings: &Settings, rng: &mut StdRng) {
    let notice = messages::render(event, settings, rng);
    emit_line(&EventLine { event, notice });
}

/// Drive the tracker from NDJSON frames on stdin, writing replies and
/// rendered presentation events to stdout until stdin closes.
async fn run_headless() -> Result<()> {
    let data_dir = std::env::var_os("REELAWARE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let store = Store::open(data_dir.join(STORE_FILE)).context("failed to open store")?;

    let (emitter, mut events) = EventEmitter::channel();
    let tracker = ReelTracker::init(store, emitter, TrackerConfig::from_env()).await?;
    let mut rng = StdRng::from_entropy();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => handle_line(&tracker, &line).await,
                None => break,
            },
            Some(event) = events.recv() => {
                let settings = tracker.settings().await;
                present(&event, &settings, &mut rng);
            }
        }
    }

    info!("Input closed, shutting down");
    if let Err(err) = tracker.shutdown().await {
        error!("Failed to persist final sessions: {err:#}");
    }

    let settings = tracker.settings().await;
    while let Ok(event) = events.try_recv() {
        present(&event, &settings, &mut rng);
    }
    Ok(())
}

pub fn run() {
    utils::logging::init_logging();
    info!("ReelAware starting up...");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run_headless()) {
        error!("ReelAware exited with error: {err:#}");
        std::process::exit(1);
    }
}
