//! cpm80 - run CP/M 2.2 programs on an emulated Intel 8080.
//!
//! Usage:
//!   cpm80 [packages/files...] [-- command]
//!
//! Examples:
//!   cpm80 cpm-disk.zip               # provision A: from a package, boot to A>
//!   cpm80 hello.com                  # drop hello.com on A:, boot to A>
//!   cpm80 cpm-disk.zip -- STAT       # boot and type STAT at the prompt

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cpm80_core::{load_package_from_path, SessionManager, VirtualDisk};

/// CP/M 2.2 emulator
#[derive(Parser, Debug)]
#[command(name = "cpm80")]
#[command(about = "Run CP/M programs on an emulated Intel 8080")]
struct Args {
    /// Package ZIP files or .COM executables to place on drive A:
    files: Vec<PathBuf>,

    /// Log BDOS/BIOS call traces to stderr
    #[arg(short, long)]
    trace: bool,

    /// Command to type at the first prompt
    #[arg(last = true)]
    command: Vec<String>,
}

/// Translate crossterm key events to console bytes.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<char> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = code {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() {
                return Some(char::from(upper as u8 - 64)); // Ctrl+A = 1
            }
        }
    }

    match code {
        KeyCode::Char(c) => Some(c),
        KeyCode::Enter => Some('\r'),
        KeyCode::Backspace => Some('\u{8}'),
        KeyCode::Tab => Some('\t'),
        KeyCode::Esc => Some('\u{1b}'),
        _ => None,
    }
}

/// Build the A: drive contents from the command-line file list.
fn provision_disk(files: &[PathBuf]) -> Result<VirtualDisk, Box<dyn std::error::Error>> {
    let mut disk = VirtualDisk::new();
    for path in files {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_uppercase();
        match ext.as_str() {
            "ZIP" => {
                let pkg = load_package_from_path(path)?;
                eprintln!(
                    "Loaded package: {} ({} files)",
                    pkg.manifest.name,
                    pkg.files.len()
                );
                pkg.install(&mut disk);
            }
            _ => {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| format!("bad file name: {}", path.display()))?;
                disk.write(name, std::fs::read(path)?);
            }
        }
    }
    Ok(disk)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.trace {
        EnvFilter::new("cpm80_core=trace")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let disk = provision_disk(&args.files)?;

    let manager = Arc::new(SessionManager::new());
    let id = manager.open(
        |text| {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            let _ = handle.write_all(text.as_bytes());
            let _ = handle.flush();
        },
        move |machine| {
            machine.disk = disk;
        },
    )?;

    if !args.command.is_empty() {
        manager.input(id, &format!("{}\r", args.command.join(" ")))?;
    }

    let raw_mode_enabled = enable_raw_mode().is_ok();

    // Forward keystrokes until the session ends.
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let key_manager = Arc::clone(&manager);
    let input_pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(Duration::from_millis(10)) => {
                    while event::poll(Duration::from_millis(0)).unwrap_or(false) {
                        if let Ok(Event::Key(key)) = event::read() {
                            if let Some(ch) = translate_key(key.code, key.modifiers) {
                                let mut buf = [0u8; 4];
                                if key_manager.input(id, ch.encode_utf8(&mut buf)).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    // Block until the machine winds down (EXIT at the prompt).
    let wait_manager = Arc::clone(&manager);
    let result = tokio::task::spawn_blocking(move || wait_manager.wait(id)).await?;

    let _ = shutdown_tx.send(()).await;
    let _ = input_pump.await;

    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }
    println!();

    result?;
    Ok(())
}
