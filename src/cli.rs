//! Command-line front end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use url::Url;

use crate::assets::HttpFetcher;
use crate::capture::{CaptureMode, CaptureScheduler, ContentCommand, HttpPageSource};
use crate::config::{save_default_mode, Config};
use crate::model::{SessionId, TimelineBundle};
use crate::recorder::{load_recording_states, CaptureSink, Recorder, RecorderMessage, RecorderReply};
use crate::replay::bundle::write_atomic;
use crate::replay::{Reconstructor, TimelineView};
use crate::store::{SnapshotStore, SqliteKvStore};
use crate::util;

#[derive(Parser, Debug)]
#[command(name = "domreel", version, about = "Record DOM snapshots into replayable timelines")]
pub struct Cli {
    /// Data directory (default: ~/.domreel)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record a page until interrupted or for a fixed time
    Record(RecordArgs),
    /// List stored sessions
    Sessions,
    /// List the snapshots of a session
    Show {
        session: String,
    },
    /// Print or write one rehydrated snapshot
    Render {
        session: String,
        /// 1-based snapshot position; clamped into range
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        index: i64,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Export a session as a timeline file, or one snapshot as HTML
    Export {
        session: String,
        /// Target directory (default: <data dir>/exports)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Export only this 1-based snapshot as a standalone document
        #[arg(long, allow_negative_numbers = true)]
        snapshot: Option<i64>,
    },
    /// Import a timeline file as a new session
    Import {
        file: PathBuf,
    },
    /// Delete one snapshot (1-based position) from a session
    Delete {
        session: String,
        index: usize,
    },
    /// Remove a session entirely
    Clear {
        session: String,
    },
    /// Edit the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set the capture mode used when `record` gets no --mode
    SetMode {
        #[arg(value_enum)]
        mode: CaptureMode,
    },
}

#[derive(Parser, Debug)]
pub struct RecordArgs {
    /// Page to record (http, https or file URL)
    pub url: String,

    /// Capture trigger (default: from config)
    #[arg(short, long, value_enum)]
    pub mode: Option<CaptureMode>,

    /// Session name (default: generated)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load();

    match cli.command {
        Command::Record(args) => record(&config, args).await,
        Command::Sessions => list_sessions(&open_store(&config)?),
        Command::Show { session } => show(&open_store(&config)?, SessionId::new(session)),
        Command::Render {
            session,
            index,
            out,
        } => render(&open_store(&config)?, SessionId::new(session), index, out.as_deref()),
        Command::Export {
            session,
            dir,
            snapshot,
        } => {
            let dir = dir.unwrap_or_else(util::exports_dir);
            export(&open_store(&config)?, SessionId::new(session), &dir, snapshot)
        }
        Command::Import { file } => import(&mut open_store(&config)?, &file),
        Command::Delete { session, index } => {
            delete(&mut open_store(&config)?, SessionId::new(session), index)
        }
        Command::Clear { session } => {
            let id = SessionId::new(session);
            open_store(&config)?.clear(&id)?;
            println!("Cleared {id}");
            Ok(())
        }
        Command::Config(ConfigCommand::SetMode { mode }) => {
            save_default_mode(mode).context("failed to update config file")?;
            println!("Default capture mode set to {mode}");
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<SnapshotStore> {
    let kv = SqliteKvStore::open_default().context("failed to open timeline database")?;
    Ok(SnapshotStore::new(Arc::new(kv), config.store.checkpoint_every))
}

async fn record(config: &Config, args: RecordArgs) -> Result<()> {
    let url = parse_page_url(&args.url)?;
    let mode = args.mode.unwrap_or(config.capture.default_mode);
    let session_id = args.session.map(SessionId::new).unwrap_or_else(SessionId::generate);

    let fetcher = Arc::new(HttpFetcher::new(config.fetch.timeout, &config.fetch.user_agent)?);
    let page = Arc::new(HttpPageSource::new(url.clone(), fetcher.clone()));
    let poller = page.spawn_poller(config.capture.poll_interval);

    let (handle, recorder_task) = Recorder::new(open_store(config)?).spawn();
    let sink = CaptureSink::new(session_id.clone(), handle.clone());
    let scheduler = CaptureScheduler::new(page.clone(), fetcher, sink, config.capture_timing());
    let (content_tx, content_rx) = mpsc::unbounded_channel();
    let scheduler_task = tokio::spawn(scheduler.run_commands(content_rx));

    handle
        .request(RecorderMessage::StartRecording {
            session_id: session_id.clone(),
            mode,
        })
        .await?;
    content_tx
        .send(ContentCommand::Init { mode })
        .context("capture task ended early")?;
    eprintln!("Recording {url} as {session_id} ({mode}); press Ctrl-C to stop");

    match args.duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    // Stop capture first so its last snapshot is queued before the stop.
    let _ = content_tx.send(ContentCommand::Stop);
    drop(content_tx);
    let scheduler = scheduler_task.await?;
    page.shutdown();
    poller.await?;

    let reply = handle
        .request(RecorderMessage::StopRecording {
            session_id: session_id.clone(),
        })
        .await?;
    drop(scheduler);
    drop(handle);
    recorder_task.await?;

    let snapshots = match reply {
        RecorderReply::Stopped { snapshots } => snapshots,
        _ => 0,
    };
    println!("{session_id}: {snapshots} snapshots");
    Ok(())
}

fn parse_page_url(raw: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(raw) {
        return Ok(url);
    }
    let path = std::fs::canonicalize(raw).with_context(|| format!("not a URL or file: {raw}"))?;
    Url::from_file_path(&path)
        .map_err(|_| anyhow::anyhow!("cannot turn {} into a URL", path.display()))
}

fn list_sessions(store: &SnapshotStore) -> Result<()> {
    let states = load_recording_states(store)?;
    let sessions = store.sessions()?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for summary in sessions {
        let mode = states
            .get(&summary.id)
            .map(|state| state.mode.as_str())
            .unwrap_or("imported");
        println!(
            "{}\t{} snapshots\t{} assets\t{}",
            summary.id, summary.snapshots, summary.assets, mode
        );
    }
    Ok(())
}

fn show(store: &SnapshotStore, id: SessionId) -> Result<()> {
    let mut view = TimelineView::open(store, id)?;
    if view.is_empty() {
        println!("{}", view.info());
        return Ok(());
    }
    for position in 0..view.len() {
        view.jump_to(position as i64);
        let bytes = view.timeline().snapshots[position].html.len();
        println!("{}\t{} bytes", view.info(), bytes);
    }
    Ok(())
}

fn render(store: &SnapshotStore, id: SessionId, index: i64, out: Option<&Path>) -> Result<()> {
    let timeline = store.load(&id)?;
    let Some(rendered) = Reconstructor::render(&timeline, zero_based(index)) else {
        bail!("session {id} has no snapshots");
    };
    match out {
        Some(path) => {
            write_atomic(path, rendered.html.as_bytes())?;
            eprintln!(
                "Wrote snapshot {}/{} to {}",
                rendered.index + 1,
                rendered.total,
                path.display()
            );
        }
        None => println!("{}", rendered.html),
    }
    Ok(())
}

fn export(store: &SnapshotStore, id: SessionId, dir: &Path, snapshot: Option<i64>) -> Result<()> {
    let mut view = TimelineView::open(store, id)?;
    let path = match snapshot {
        Some(position) => {
            view.jump_to(zero_based(position));
            view.export_current(dir)?
                .context("session has no snapshots to export")?
        }
        None => view.export_bundle(dir)?,
    };
    println!("{}", path.display());
    Ok(())
}

/// 1-based position from the command line to a cursor index. Out-of-range
/// values are clamped later, so this only needs to avoid overflow.
fn zero_based(position: i64) -> i64 {
    position.saturating_sub(1)
}

fn import(store: &mut SnapshotStore, file: &Path) -> Result<()> {
    let bundle = TimelineBundle::read_from_path(file)
        .with_context(|| format!("failed to import {}", file.display()))?;
    let id = store.import_bundle(bundle)?;
    println!("{id}");
    Ok(())
}

fn delete(store: &mut SnapshotStore, id: SessionId, position: usize) -> Result<()> {
    if position == 0 {
        bail!("snapshot positions start at 1");
    }
    let removed = store.delete(&id, position - 1)?;
    println!(
        "Deleted snapshot {position} of {id} ({})",
        util::time::clock_label(removed.time)
    );
    Ok(())
}
