use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cli::{BatchOpts, ConvertOpts, RenderOpts},
    config::{self, Config, RenderEngine},
    emulator, ident,
    index::{IndexEntry, SessionIndex},
    segment,
    session::{SessionBuilder, TurnContent},
    stage::{Stage, StageError},
};

/// Per-invocation options layered over the config file.
#[derive(Debug, Clone, Default)]
pub struct ProcessOpts {
    pub app: String,
    pub tag: Option<String>,
    /// Leave the raw capture in place instead of archiving it.
    pub keep_raw: bool,
    pub engine: Option<RenderEngine>,
    pub cols: Option<usize>,
    pub rows: Option<usize>,
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub session_id: Uuid,
    pub output_path: PathBuf,
    pub turn_count: usize,
}

/// Optional sidecar written by the capture wrapper; augments the session
/// and index records but is not required for correctness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended: Option<String>,
}

/// Run one raw capture through the full pipeline:
/// render -> segment -> identify -> write -> index -> archive.
///
/// On failure the capture stays on disk untouched next to a `.error`
/// marker naming the stage and cause; previously written sessions and the
/// index are never left half-written. Retrying reprocesses from scratch
/// and, thanks to deterministic ids, overwrites rather than duplicates.
pub fn process_capture(
    config: &Config,
    capture: &Path,
    opts: &ProcessOpts,
) -> Result<ProcessOutcome> {
    let bytes = fs::read(capture)
        .with_context(|| format!("failed to read capture {}", capture.display()))?;
    let filename = capture
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let start_time = capture_start_time(capture, &filename);
    let meta = read_capture_meta(capture);

    tracing::debug!(capture = %capture.display(), app = %opts.app, "processing capture");

    // Rendering
    let engine = opts.engine.unwrap_or(config.render.engine);
    let cols = opts.cols.unwrap_or(config.render.cols);
    let rows = opts.rows.unwrap_or(config.render.rows);
    let renderer = emulator::renderer_for(engine, cols, rows);
    let rendered = match renderer.render(&bytes) {
        Ok(rendered) => rendered,
        Err(err) => {
            write_error_marker(capture, Stage::Rendering, &err);
            return Err(err).with_context(|| {
                format!("rendering failed for {}; capture retained", capture.display())
            });
        }
    };

    // Segmenting
    let turns = segment::segment(&rendered, &config.markers);
    if turns.is_empty() {
        tracing::info!(
            capture = %capture.display(),
            "no prompt markers recognized; recording a zero-turn session"
        );
    }

    // Identified
    let mut builder = SessionBuilder::new(&opts.app, capture, start_time);
    builder.tag = opts.tag.clone().or_else(|| meta.tag.clone());
    builder.model = meta.model.clone();
    builder.cwd = meta.cwd.clone();
    for turn in turns {
        builder.push_turn(turn.role, TurnContent::Text(turn.text));
    }

    // Written
    let output_path = config
        .sessions_dir(&opts.app)
        .join(format!("{}.jsonl", builder.session_id));
    if let Err(err) = builder.write_jsonl(&output_path) {
        write_error_marker(capture, Stage::Written, &err);
        return Err(err).with_context(|| {
            format!("writing session failed for {}; capture retained", capture.display())
        });
    }

    // Indexed
    let index_path = config.index_path(&opts.app);
    let mut index = match SessionIndex::load(&index_path, &opts.app) {
        Ok(index) => index,
        Err(err @ StageError::IndexCorrupt { .. }) => {
            // recoverable, but never silent: prior entries are lost unless
            // the operator restores a backup or rebuilds from sessions/
            tracing::warn!(%err, "starting over with an empty index");
            eprintln!("warning: {err}; starting over with an empty index");
            SessionIndex::new(&opts.app)
        }
        Err(err) => {
            write_error_marker(capture, Stage::Indexed, &err);
            return Err(err).with_context(|| {
                format!("index update failed for {}; capture retained", capture.display())
            });
        }
    };

    let session_meta = builder.meta();
    index.upsert(IndexEntry {
        session_id: builder.session_id,
        full_path: output_path.display().to_string(),
        source_file: capture.display().to_string(),
        first_prompt: builder.first_prompt(),
        message_count: builder.turn_count(),
        created: session_meta.created,
        modified: session_meta.modified,
        model: builder.model.clone(),
        tag: builder.tag.clone(),
        cwd: builder.cwd.clone(),
    });
    if let Err(err) = index.save(&index_path) {
        write_error_marker(capture, Stage::Indexed, &err);
        return Err(err).with_context(|| {
            format!("index update failed for {}; capture retained", capture.display())
        });
    }

    clear_error_marker(capture);
    if !opts.keep_raw {
        archive_capture(config, &opts.app, capture)?;
    }

    tracing::info!(
        session = %builder.session_id,
        turns = builder.turn_count(),
        output = %output_path.display(),
        "capture processed"
    );

    Ok(ProcessOutcome {
        session_id: builder.session_id,
        output_path,
        turn_count: builder.turn_count(),
    })
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
}

/// Process every pending `*.log` capture in a directory. Failures are
/// isolated: one bad capture never aborts the rest of the batch.
pub fn process_batch(config: &Config, dir: &Path, opts: &ProcessOpts) -> Result<BatchSummary> {
    let mut captures: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read capture directory {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    captures.sort();

    let mut summary = BatchSummary::default();
    for capture in captures {
        match process_capture(config, &capture, opts) {
            Ok(outcome) => {
                summary.converted += 1;
                println!(
                    "Converted: {} -> {} ({} turns)",
                    capture.display(),
                    outcome.session_id,
                    outcome.turn_count
                );
            }
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(capture = %capture.display(), ?err, "capture failed");
                eprintln!("Failed: {}: {err:#}", capture.display());
            }
        }
    }
    Ok(summary)
}

fn capture_start_time(capture: &Path, filename: &str) -> DateTime<Utc> {
    if let Some(ts) = ident::timestamp_from_filename(filename) {
        return ts;
    }
    fs::metadata(capture)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn sidecar_path(capture: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{suffix}", capture.display()))
}

fn read_capture_meta(capture: &Path) -> CaptureMeta {
    let path = sidecar_path(capture, "meta.json");
    let Ok(raw) = fs::read_to_string(&path) else {
        return CaptureMeta::default();
    };
    match serde_json::from_str(&raw) {
        Ok(meta) => meta,
        Err(err) => {
            tracing::warn!(file = %path.display(), ?err, "ignoring unreadable capture metadata");
            CaptureMeta::default()
        }
    }
}

/// Diagnostic artifact left next to a failed capture.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub stage: String,
    pub error: String,
    pub retryable: bool,
    pub at: String,
}

fn write_error_marker(capture: &Path, stage: Stage, err: &StageError) {
    let marker = ErrorMarker {
        stage: stage.to_string(),
        error: format!("{err:#}"),
        retryable: err.is_retryable(),
        at: ident::iso_z(Utc::now()),
    };
    let path = sidecar_path(capture, "error");
    match serde_json::to_string_pretty(&marker) {
        Ok(json) => {
            if let Err(io_err) = fs::write(&path, json) {
                tracing::warn!(file = %path.display(), ?io_err, "failed to write error marker");
            }
        }
        Err(ser_err) => {
            tracing::warn!(?ser_err, "failed to serialize error marker");
        }
    }
}

fn clear_error_marker(capture: &Path) {
    let path = sidecar_path(capture, "error");
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

/// Move a converted capture (and its metadata sidecar) into the app's
/// raw-archive directory. Copy first, remove after, so an interruption
/// can lose the archive copy but never the capture itself.
fn archive_capture(config: &Config, app: &str, capture: &Path) -> Result<()> {
    let raw_dir = config.raw_dir(app);
    fs::create_dir_all(&raw_dir)
        .with_context(|| format!("failed to create archive dir {}", raw_dir.display()))?;

    let Some(name) = capture.file_name() else {
        return Ok(());
    };
    let dest = raw_dir.join(name);
    fs::copy(capture, &dest)
        .with_context(|| format!("failed to archive capture to {}", dest.display()))?;
    fs::remove_file(capture)
        .with_context(|| format!("failed to remove converted capture {}", capture.display()))?;

    let meta = sidecar_path(capture, "meta.json");
    if meta.exists() {
        if let Some(meta_name) = meta.file_name() {
            let meta_dest = raw_dir.join(meta_name);
            if fs::copy(&meta, &meta_dest).is_ok() {
                let _ = fs::remove_file(&meta);
            }
        }
    }
    Ok(())
}

/// `ttyscribe convert` — process one capture file.
pub fn run_convert(opts: ConvertOpts) -> Result<()> {
    let config = config::load()?;
    config.ensure_app_dirs(&opts.app)?;
    let process_opts = ProcessOpts {
        app: opts.app.clone(),
        tag: opts.tag,
        keep_raw: opts.keep,
        engine: opts.engine,
        cols: opts.cols,
        rows: opts.rows,
    };
    let outcome = process_capture(&config, &opts.logfile, &process_opts)?;
    println!(
        "Session {} ({} turns) -> {}",
        outcome.session_id,
        outcome.turn_count,
        outcome.output_path.display()
    );
    Ok(())
}

/// `ttyscribe batch` — process all pending captures for an app.
pub fn run_batch(opts: BatchOpts) -> Result<()> {
    let config = config::load()?;
    config.ensure_app_dirs(&opts.app)?;
    let dir = opts.dir.unwrap_or_else(|| config.app_dir(&opts.app));
    let process_opts = ProcessOpts {
        app: opts.app.clone(),
        keep_raw: opts.keep,
        ..Default::default()
    };
    let summary = process_batch(&config, &dir, &process_opts)?;
    println!("{} converted, {} failed", summary.converted, summary.failed);
    Ok(())
}

/// `ttyscribe render` — render a capture to text without converting it.
pub fn run_render(opts: RenderOpts) -> Result<()> {
    let config = config::load()?;
    let engine = opts.engine.unwrap_or(config.render.engine);
    let cols = opts.cols.unwrap_or(config.render.cols);
    let rows = opts.rows.unwrap_or(config.render.rows);

    let bytes = fs::read(&opts.logfile)
        .with_context(|| format!("failed to read capture {}", opts.logfile.display()))?;
    let rendered = emulator::renderer_for(engine, cols, rows).render(&bytes)?;

    match opts.output {
        Some(path) => {
            fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Written to: {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
