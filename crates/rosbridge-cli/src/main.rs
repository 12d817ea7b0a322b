//! `rosbridge` – demo host for `rosbridge-client`.
//!
//! Connects to a rosbridge server, subscribes to the `topic:type` pairs given
//! on the command line, publishes a heartbeat once per second and polls the
//! client at a fixed 30 Hz, the way a game or control loop would.  Ctrl-C
//! disconnects cleanly.
//!
//! ```text
//! rosbridge /flag:Bool /speed:std_msgs/Float64 \
//!     --call /add_two_ints:rospy_tutorials/AddTwoInts '{"a":1,"b":2}'
//! ```

mod args;
mod bindings;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use colored::Colorize;
use rosbridge_client::config::{self, ClientConfig};
use rosbridge_client::{ConnectionState, RosbridgeClient};
use tracing::{info, warn};

use crate::args::{CliArgs, USAGE};
use crate::bindings::{Dashboard, HEARTBEAT_TOPIC, Heartbeat, PrintingResponder};

const POLL_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info").  ROSBRIDGE_LOG_FORMAT=json
    // switches to newline-delimited JSON.  User-facing output stays println!.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("ROSBRIDGE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {e}\n", "error".red().bold());
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return;
    }

    print_banner();
    let cfg = load_config();
    println!("  Server: {}\n", cfg.url().bold());

    // ── Shutdown flag ─────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – disconnecting …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not disconnect cleanly");
    }

    // ── Bindings ──────────────────────────────────────────────────────────
    let mut client = RosbridgeClient::<Dashboard>::new(&cfg);
    for sub in &args.subscriptions {
        match sub.register(&mut client) {
            Ok(()) => println!("  {} {} ({:?})", "+".green(), sub.topic.bold(), sub.kind),
            Err(e) => println!("  {} {}: {e}", "✗".red(), sub.topic),
        }
    }
    if let Err(e) = client.register_publisher(Heartbeat) {
        println!("  {} {HEARTBEAT_TOPIC}: {e}", "✗".red());
    }
    if let Some(call) = &args.call {
        let responder = PrintingResponder::new(&call.service, &call.service_type);
        if let Err(e) = client.register_service_responder(responder) {
            println!("  {} {}: {e}", "✗".red(), call.service);
        }
    }

    if let Err(e) = client.connect() {
        println!("{}: {e}", "Connect failed".red());
        std::process::exit(1);
    }

    let dashboard = run_host_loop(&client, &args, &shutdown);
    client.disconnect();

    println!();
    println!(
        "  {} {} message(s), {} service result(s)",
        "✓".green().bold(),
        dashboard.messages,
        dashboard.service_results.len()
    );
    for (topic, value) in &dashboard.latest {
        println!("    {} = {}", topic.bold(), value);
    }
}

/// Poll at 30 Hz until Ctrl-C or the connection is lost.
fn run_host_loop(
    client: &RosbridgeClient<Dashboard>,
    args: &CliArgs,
    shutdown: &AtomicBool,
) -> Dashboard {
    let mut dashboard = Dashboard::default();
    let mut was_open = false;
    let mut call_pending = args.call.is_some();
    let mut beats: u64 = 0;
    let mut last_beat: Option<Instant> = None;

    while !shutdown.load(Ordering::SeqCst) {
        let tick = Instant::now();
        client.poll(&mut dashboard);

        match client.state() {
            ConnectionState::Open => {
                if !was_open {
                    println!("  {}", "Connected.".green());
                    was_open = true;
                }
                if call_pending && let Some(call) = &args.call {
                    call_pending = false;
                    if let Err(e) = client.call_service(&call.service, &call.args) {
                        println!("  {} {}: {e}", "✗".red(), call.service);
                    }
                }
                if last_beat.is_none_or(|at| at.elapsed() >= HEARTBEAT_INTERVAL) {
                    beats += 1;
                    last_beat = Some(Instant::now());
                    if let Err(e) = client.publish(HEARTBEAT_TOPIC, &Heartbeat::message(beats)) {
                        warn!(error = %e, "heartbeat not published");
                    }
                }
            }
            ConnectionState::Closed => {
                println!("  {}", "Connection closed.".yellow());
                break;
            }
            _ => {}
        }

        std::thread::sleep(POLL_INTERVAL.saturating_sub(tick.elapsed()));
    }

    info!(beats, messages = dashboard.messages, "host loop finished");
    dashboard
}

fn load_config() -> ClientConfig {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = ClientConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = ClientConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ┌──────────────────────────┐".bold().cyan());
    println!("{}", "  │   rosbridge demo host    │".bold().cyan());
    println!("{}", "  └──────────────────────────┘".bold().cyan());
    println!(
        "  {} {}",
        "rosbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}
