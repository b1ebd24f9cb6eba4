//! keyhook binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Build the capture runtime on a tokio timer
//! 3. Set up and start one capture
//! 4. Feed the keystroke script from a simulated hook thread
//! 5. Drive relay and timer events until the capture is released
//! 6. Print the end report

mod cli;

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use keyhook_core::config::KeyhookConfig;
use keyhook_core::types::KeyEvent;
use keyhook_input::{Host, HookFeed, InputRuntime, InputStatus, TokioTimer, UsKeyboard};

use cli::CliArgs;

/// Host for the simulated hook: logs hook requests and records when the
/// runtime may exit.
struct AppHost {
    persistent: bool,
    exit: Arc<AtomicBool>,
}

impl Host for AppHost {
    fn install_keyboard_hook(&mut self) {
        tracing::debug!("keyboard hook installed");
    }

    fn maybe_uninstall_keyboard_hook(&mut self, still_needed: bool) {
        if !still_needed {
            tracing::debug!("keyboard hook uninstalled");
        }
    }

    fn exit_if_not_persistent(&mut self, active: usize) {
        if !self.persistent && active == 0 {
            tracing::info!("no active captures left, exiting");
            self.exit.store(true, Ordering::Release);
        }
    }
}

/// Feed `events` as key-down/key-up pairs, then signal completion.
fn run_hook_thread(feed: HookFeed, events: Vec<KeyEvent>, delay: Duration, done: oneshot::Sender<()>) {
    std::thread::spawn(move || {
        for event in events {
            let disposition = feed.key_down(&event);
            tracing::trace!(vk = event.vk, ?disposition, "key down");
            feed.key_up(&KeyEvent::new(event.vk, event.sc));
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        let _ = done.send(());
    });
}

fn read_script_from_stdin() -> std::io::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = KeyhookConfig::load_or_default(&config_file);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.resolve_log_level(&config))),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting keyhook v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    let script = match args.feed.clone() {
        Some(script) => script,
        None => tokio::task::spawn_blocking(read_script_from_stdin).await??,
    };
    let keyboard = UsKeyboard::new();
    let events = keyboard.events_for(&script)?;

    // Runtime.
    let exit = Arc::new(AtomicBool::new(false));
    let (timer, mut ticks) = TokioTimer::new(Handle::current());
    let (mut runtime, mut relay) = InputRuntime::new(
        Arc::new(keyboard),
        Box::new(timer),
        Box::new(AppHost {
            persistent: config.general.persistent,
            exit: Arc::clone(&exit),
        }),
    );
    runtime.configure(&config);

    let mut lifecycle = runtime.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            tracing::debug!(event = event.event_name(), session = ?event.session(), "lifecycle");
        }
    });

    // Capture.
    let capture = args.resolve_capture(&config);
    let id = runtime.setup(&capture.options, &capture.end_keys, &capture.match_list, None)?;
    runtime.start(id)?;

    let (done_tx, mut done_rx) = oneshot::channel();
    run_hook_thread(
        runtime.hook_feed(),
        events,
        Duration::from_millis(args.delay_ms),
        done_tx,
    );

    let mut feed_done = false;
    loop {
        tokio::select! {
            Some(event) = relay.recv() => {
                if let Some(released) = runtime.release(event) {
                    runtime.finish_callback(released);
                }
                if runtime.status(id)? != InputStatus::InProgress && !runtime.stack().contains(&id) {
                    break;
                }
            }
            Some(()) = ticks.recv() => {
                runtime.on_timer(Instant::now());
            }
            _ = &mut done_rx, if !feed_done => {
                feed_done = true;
                let has_timeout = runtime.session(id).is_some_and(|s| s.timeout_at().is_some());
                if !has_timeout {
                    tracing::info!(session = %id, "keystroke script exhausted, cancelling capture");
                    runtime.cancel(id)?;
                }
            }
        }
    }

    let report = runtime.end_reason(id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("reason: {}", report.reason);
        if let Some(key) = &report.end_key {
            println!("end key: {key}");
        }
        if !report.end_mods.is_empty() {
            println!("end mods: {}", report.end_mods);
        }
        if let Some(phrase) = &report.matched {
            println!("matched: {phrase}");
        }
        println!("input: {}", report.input);
    }

    if !exit.load(Ordering::Acquire) {
        tracing::info!("persistent runtime, waiting for Ctrl+C");
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
