//! sidekey daemon
//!
//! Grabs a mouse and a keyboard exclusively, remaps the mouse side buttons
//! to keyboard modifiers and re-emits everything through virtual devices.

mod device;
mod injector;
mod queue;
mod remapper;
mod session;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sidekey_config::Config;

use crate::queue::EventQueue;
use crate::remapper::Remapper;
use crate::session::DeviceSession;
use crate::worker::{KeyboardInputWorker, KeyboardOutputWorker, MouseWorker};

#[derive(Parser, Debug)]
#[command(name = "sidekeyd")]
#[command(about = "Mouse side-button to keyboard-modifier remapping daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/sidekey/config.kdl")]
    config: String,
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let config = sidekey_config::parse_config(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    // A missing file means built-in defaults; a present-but-broken file is
    // fatal rather than silently ignored.
    let config = load_config(&config_path)?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.as_directive())),
        )
        .init();

    if config_path.exists() {
        tracing::info!("Loaded configuration from {}", config_path.display());
    } else {
        tracing::info!(
            "No configuration at {}, using defaults",
            config_path.display()
        );
    }

    if !nix::unistd::Uid::effective().is_root() {
        tracing::warn!(
            "not running as root; opening /dev/input and /dev/uinput will likely fail"
        );
    }

    tracing::info!(
        "capturing mouse {} and keyboard {}",
        config.mouse,
        config.keyboard
    );

    // Both physical devices must be present at startup. Steady-state
    // disconnects are recovered by the workers; a misconfigured or absent
    // device at launch is a hard error.
    let mut mouse_session =
        DeviceSession::new("mouse", config.mouse, config.recovery.settle());
    let mut keyboard_session =
        DeviceSession::new("keyboard", config.keyboard, config.recovery.settle());
    mouse_session.open().context("mouse device not usable")?;
    keyboard_session
        .open()
        .context("keyboard device not usable")?;

    // Virtual devices are created after the grabs so a failed grab never
    // leaves half the synthetic hardware behind.
    let pointer = injector::create_pointer("sidekey virtual pointer", config.mouse)
        .context("failed to create virtual pointer")?;
    let keyboard_out = injector::create_keyboard("sidekey virtual keyboard", config.keyboard)
        .context("failed to create virtual keyboard")?;

    let queue = Arc::new(EventQueue::new(
        config.queue.capacity,
        config.queue.overflow,
    ));
    let backoff = config.recovery.backoff();

    tracing::info!("sidekey daemon running");

    let output_worker = KeyboardOutputWorker::new(Arc::clone(&queue), keyboard_out);
    let output_thread = thread::Builder::new()
        .name("kb-output".into())
        .spawn(move || output_worker.run())
        .context("failed to spawn keyboard output thread")?;

    let input_worker =
        KeyboardInputWorker::new(keyboard_session, Arc::clone(&queue), backoff);
    let input_thread = thread::Builder::new()
        .name("kb-input".into())
        .spawn(move || input_worker.run())
        .context("failed to spawn keyboard input thread")?;

    let mouse_worker = MouseWorker::new(
        mouse_session,
        pointer,
        Arc::clone(&queue),
        Remapper::new(config.pointer.dpi_scale),
        backoff,
    );
    let mouse_thread = thread::Builder::new()
        .name("mouse-io".into())
        .spawn(move || mouse_worker.run())
        .context("failed to spawn mouse thread")?;

    // The workers loop forever; joining keeps the process alive and turns a
    // worker panic into a daemon exit instead of a silent half-dead state.
    for (name, handle) in [
        ("kb-output", output_thread),
        ("kb-input", input_thread),
        ("mouse-io", mouse_thread),
    ] {
        if handle.join().is_err() {
            anyhow::bail!("{} worker thread panicked", name);
        }
    }

    Ok(())
}
