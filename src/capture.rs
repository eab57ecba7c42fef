use std::{
    fs::{self, File},
    io::{Read, Write, stdin, stdout},
    path::PathBuf,
    thread,
};

use anyhow::{Context, Result};
use chrono::Utc;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use portable_pty::{CommandBuilder, NativePtySystem, PtySize, PtySystem};

use crate::{
    cli::CaptureOpts,
    config::{self, Config},
    ident,
    pipeline::{self, CaptureMeta, ProcessOpts},
};

/// Record an interactive program's full terminal byte stream to an
/// app-scoped capture file, then (unless told not to) feed it straight
/// into the conversion pipeline.
pub fn run(opts: CaptureOpts) -> Result<()> {
    let config = config::load()?;
    config.ensure_app_dirs(&opts.app)?;

    let start = Utc::now();
    let capture_path = config
        .app_dir(&opts.app)
        .join(format!("{}.log", start.format("%Y-%m-%d_%H%M%S")));

    let (cols, rows) = pty_size(&config);
    let pty_system = NativePtySystem::default();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("failed to open pty")?;

    let mut builder = match opts.command.first() {
        Some(program) => {
            let mut b = CommandBuilder::new(program);
            b.args(&opts.command[1..]);
            b
        }
        None => {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into());
            CommandBuilder::new(shell)
        }
    };
    if let Ok(cwd) = std::env::current_dir() {
        builder.cwd(&cwd);
    }

    let mut child = pair
        .slave
        .spawn_command(builder)
        .context("failed to spawn captured command")?;
    // keep the slave handle from outliving the spawn, or reads never EOF
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .context("failed to clone pty reader")?;
    let mut writer = pair
        .master
        .take_writer()
        .context("failed to take pty writer")?;

    let capture_file = File::create(&capture_path)
        .with_context(|| format!("failed to create {}", capture_path.display()))?;

    println!("Capturing to {}", capture_path.display());

    // pty -> (stdout, capture file)
    let tee = thread::spawn(move || {
        let mut file = capture_file;
        let mut out = stdout();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = out.write_all(&buf[..n]);
                    let _ = out.flush();
                    if file.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = file.flush();
    });

    // stdin -> pty
    thread::spawn(move || {
        let mut input = stdin();
        let mut buf = [0u8; 1024];
        loop {
            match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if writer.write_all(&buf[..n]).is_err() {
                        break;
                    }
                    let _ = writer.flush();
                }
                Err(_) => break,
            }
        }
    });

    let raw = enable_raw_mode().is_ok();
    let status = child.wait().context("failed waiting for captured command")?;
    if raw {
        let _ = disable_raw_mode();
    }
    drop(pair.master);
    let _ = tee.join();

    println!("\nCommand exited with {status:?}");
    write_meta_sidecar(&capture_path, &opts, start)?;

    if opts.no_convert {
        println!("Capture kept at {}", capture_path.display());
        return Ok(());
    }

    let process_opts = ProcessOpts {
        app: opts.app.clone(),
        tag: opts.tag.clone(),
        ..Default::default()
    };
    let outcome = pipeline::process_capture(&config, &capture_path, &process_opts)?;
    println!(
        "Session {} ({} turns) -> {}",
        outcome.session_id,
        outcome.turn_count,
        outcome.output_path.display()
    );
    Ok(())
}

fn pty_size(config: &Config) -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) => (cols, rows),
        Err(_) => (config.render.cols as u16, config.render.rows as u16),
    }
}

fn write_meta_sidecar(
    capture_path: &std::path::Path,
    opts: &CaptureOpts,
    start: chrono::DateTime<Utc>,
) -> Result<()> {
    let meta = CaptureMeta {
        app: Some(opts.app.clone()),
        model: opts.model.clone(),
        tag: opts.tag.clone(),
        cwd: std::env::current_dir()
            .ok()
            .map(|p| p.display().to_string()),
        started: Some(ident::iso_z(start)),
        ended: Some(ident::iso_z(Utc::now())),
    };
    let path = PathBuf::from(format!("{}.meta.json", capture_path.display()));
    let json = serde_json::to_string_pretty(&meta).context("failed to serialize capture metadata")?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
