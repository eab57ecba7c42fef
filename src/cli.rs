use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RenderEngine;

/// Command line interface for the terminal-session pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "ttyscribe",
    version = version_with_build_time(),
    about = "Turn raw terminal captures into structured, searchable AI sessions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Returns version string with relative build time (e.g., "0.1.0 (built 5m ago)")
fn version_with_build_time() -> &'static str {
    use std::sync::OnceLock;
    static VERSION: OnceLock<String> = OnceLock::new();

    // Include the generated timestamp file to force recompilation when it changes
    const BUILD_TIMESTAMP_STR: &str = include_str!(concat!(env!("OUT_DIR"), "/build_timestamp.txt"));

    VERSION.get_or_init(|| {
        let version = env!("CARGO_PKG_VERSION");
        let build_timestamp: u64 = BUILD_TIMESTAMP_STR.trim().parse().unwrap_or(0);

        if build_timestamp == 0 {
            return version.to_string();
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let elapsed = now.saturating_sub(build_timestamp);
        let relative = format_relative_time(elapsed);

        format!("{version} (built {relative})")
    })
}

fn format_relative_time(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s ago", seconds)
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h ago", seconds / 3600)
    } else {
        format!("{}d ago", seconds / 86400)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Convert one raw capture into a structured session.",
        long_about = "Renders the capture through terminal emulation, splits it into user/assistant turns, writes the session JSONL, and updates the app's session index. The capture is archived under raw/ on success unless --keep is given."
    )]
    Convert(ConvertOpts),
    #[command(
        about = "Convert every pending capture for an app.",
        long_about = "Processes all *.log files in the app's capture directory (or --dir), in sorted order. A capture that fails is left in place with a .error marker and does not stop the rest of the batch."
    )]
    Batch(BatchOpts),
    #[command(
        about = "Render a capture to plain text without converting it.",
        long_about = "Replays the capture bytes through the selected render engine and prints the final transcript. Useful for checking what segmentation would see."
    )]
    Render(RenderOpts),
    #[command(
        about = "Run a command under a recording pty.",
        long_about = "Spawns the given command (or $SHELL) inside a pseudo-terminal, mirrors its output to your terminal, and records every byte to a timestamped capture file. When the command exits the capture is converted automatically unless --no-convert is given."
    )]
    Capture(CaptureOpts),
    #[command(
        about = "Query or rebuild an app's session index.",
        long_about = "Lists, searches, and summarizes the sessions recorded for an app. --rebuild rescans sessions/*.jsonl and regenerates the index from scratch, which is the recovery path for a corrupt index."
    )]
    Sessions(SessionsOpts),
}

#[derive(Args, Debug, Clone)]
pub struct ConvertOpts {
    /// Raw capture file to convert
    pub logfile: PathBuf,
    /// Application the capture belongs to (e.g. ollama, gemini)
    #[arg(long, default_value = "ollama")]
    pub app: String,
    /// Tag recorded on the session and its index entry
    #[arg(long)]
    pub tag: Option<String>,
    /// Keep the raw capture in place instead of archiving it
    #[arg(long)]
    pub keep: bool,
    /// Render engine override
    #[arg(long, value_enum)]
    pub engine: Option<RenderEngine>,
    /// Emulated screen width override
    #[arg(long)]
    pub cols: Option<usize>,
    /// Emulated screen height override
    #[arg(long)]
    pub rows: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct BatchOpts {
    /// Application whose captures to convert
    #[arg(long, default_value = "ollama")]
    pub app: String,
    /// Directory to scan instead of the app's capture directory
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Keep raw captures in place instead of archiving them
    #[arg(long)]
    pub keep: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RenderOpts {
    /// Raw capture file to render
    pub logfile: PathBuf,
    /// Write the transcript here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Render engine override
    #[arg(long, value_enum)]
    pub engine: Option<RenderEngine>,
    /// Emulated screen width override
    #[arg(long)]
    pub cols: Option<usize>,
    /// Emulated screen height override
    #[arg(long)]
    pub rows: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct CaptureOpts {
    /// Application to record under
    #[arg(long, default_value = "ollama")]
    pub app: String,
    /// Model name recorded in the session metadata
    #[arg(long)]
    pub model: Option<String>,
    /// Tag recorded on the session and its index entry
    #[arg(long)]
    pub tag: Option<String>,
    /// Record only; skip the automatic conversion afterwards
    #[arg(long)]
    pub no_convert: bool,
    /// Command to run (defaults to $SHELL)
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SessionsOpts {
    /// Application whose index to query
    #[arg(default_value = "ollama")]
    pub app: String,
    /// List every indexed session
    #[arg(long)]
    pub list: bool,
    /// Show the N most recently modified sessions
    #[arg(long, value_name = "N")]
    pub recent: Option<usize>,
    /// Print index totals (sessions, messages, models)
    #[arg(long)]
    pub stats: bool,
    /// List sessions carrying the given tag
    #[arg(long, value_name = "TAG")]
    pub find_tag: Option<String>,
    /// List sessions whose first prompt contains the given text
    #[arg(long, value_name = "TEXT")]
    pub find_prompt: Option<String>,
    /// Regenerate the index by scanning sessions/*.jsonl
    #[arg(long)]
    pub rebuild: bool,
}
