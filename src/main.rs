//! Microgrid controller entry point: CLI wiring and config-driven construction.

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use microgrid_ctl::config::ControllerConfig;
use microgrid_ctl::control::{
    Clock, DecisionEngine, Dispatcher, LoadBalancer, Optimizer, SystemClock,
};
use microgrid_ctl::emergency::EmergencyRegistry;
use microgrid_ctl::feed::{FlakySink, SyntheticFeed};
use microgrid_ctl::forecast::{HeuristicPredictor, optimization_schedule};
use microgrid_ctl::io::export::export_csv;
use microgrid_ctl::monitor::SystemMonitor;
use microgrid_ctl::notify::{AlertLog, Notifier};
use microgrid_ctl::ports::{CommandSink, SnapshotSource};
use microgrid_ctl::scheduler::Scheduler;
use microgrid_ctl::store::DocumentStore;
use microgrid_ctl::ticker::run_every;
use microgrid_ctl::watchdog::Watchdog;

/// Seed offset for the command-link RNG to avoid correlation with the sensors.
const LINK_SEED_OFFSET: u64 = 57;
/// Hours covered by the printed forecast schedule.
const SCHEDULE_HOURS: usize = 24;

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    failure_rate: Option<f64>,
    run_for: Option<u64>,
    telemetry_out: Option<String>,
    once: bool,
}

fn print_help() {
    eprintln!("microgrid-ctl: zone relay controller for a solar microgrid");
    eprintln!();
    eprintln!("Usage: microgrid-ctl [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load configuration from a TOML file");
    eprintln!("  --preset <name>          Use a built-in preset (baseline, extended)");
    eprintln!("  --seed <u64>             Override the synthetic feed seed");
    eprintln!("  --failure-rate <f64>     Share of command writes to drop (0.0-1.0)");
    eprintln!("  --run-for <secs>         Stop after this many seconds (default: until Ctrl-C)");
    eprintln!("  --telemetry-out <path>   Export cycle telemetry to CSV on exit");
    eprintln!("  --once                   Run a single cycle, print the plan and exit");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the baseline preset is used.");
    eprintln!("Log verbosity follows RUST_LOG (default: info).");
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str, what: &str) -> &'a str {
    *i += 1;
    match args.get(*i) {
        Some(v) => v.as_str(),
        None => {
            eprintln!("error: {flag} requires {what}");
            process::exit(1);
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str, ty: &str) -> T {
    match value.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("error: {flag} value \"{value}\" is not a valid {ty}");
            process::exit(1);
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        preset: None,
        seed_override: None,
        failure_rate: None,
        run_for: None,
        telemetry_out: None,
        once: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                cli.config_path = Some(next_value(&args, &mut i, "--config", "a path argument").into());
            }
            "--preset" => {
                cli.preset = Some(next_value(&args, &mut i, "--preset", "a name argument").into());
            }
            "--seed" => {
                let v = next_value(&args, &mut i, "--seed", "a u64 argument");
                cli.seed_override = Some(parse_number(v, "--seed", "u64"));
            }
            "--failure-rate" => {
                let v = next_value(&args, &mut i, "--failure-rate", "an f64 argument");
                cli.failure_rate = Some(parse_number(v, "--failure-rate", "f64"));
            }
            "--run-for" => {
                let v = next_value(&args, &mut i, "--run-for", "a number of seconds");
                cli.run_for = Some(parse_number(v, "--run-for", "u64"));
            }
            "--telemetry-out" => {
                cli.telemetry_out =
                    Some(next_value(&args, &mut i, "--telemetry-out", "a path argument").into());
            }
            "--once" => {
                cli.once = true;
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn load_config(cli: &CliArgs) -> ControllerConfig {
    // --config takes priority, then --preset, then baseline default
    let loaded = if let Some(ref path) = cli.config_path {
        ControllerConfig::from_toml_file(Path::new(path))
    } else if let Some(ref name) = cli.preset {
        ControllerConfig::from_preset(name)
    } else {
        Ok(ControllerConfig::baseline())
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    if let Some(seed) = cli.seed_override {
        config.feed.seed = seed;
    }
    if let Some(rate) = cli.failure_rate {
        config.feed.failure_rate = rate;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    config
}

/// Every long-lived component, wired against the in-memory store.
struct System {
    clock: Arc<dyn Clock>,
    store: Arc<DocumentStore>,
    predictor: Arc<HeuristicPredictor>,
    feed: Arc<SyntheticFeed>,
    optimizer: Arc<Optimizer<HeuristicPredictor>>,
    monitor: Arc<SystemMonitor<HeuristicPredictor>>,
    watchdog: Arc<Watchdog>,
    emergencies: Arc<EmergencyRegistry>,
}

fn build_system(config: &ControllerConfig) -> System {
    let registry = match config.registry() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(DocumentStore::new(Arc::clone(&clock)));
    let source: Arc<dyn SnapshotSource> = store.clone();
    let notifier: Arc<dyn Notifier> = Arc::new(
        AlertLog::new(config.notify.clone(), Arc::clone(&clock)).with_push_store(store.clone()),
    );
    let sink: Arc<dyn CommandSink> = Arc::new(FlakySink::new(
        store.clone(),
        config.feed.failure_rate,
        config.feed.seed.wrapping_add(LINK_SEED_OFFSET),
    ));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(Arc::clone(&sink), Arc::clone(&clock), config.dispatch)
        .with_event_channel(events_tx);
    let retrier = Dispatcher::new(
        Arc::clone(&sink),
        Arc::clone(&clock),
        config.dispatch.single_attempt(),
    );

    let predictor = Arc::new(HeuristicPredictor::default());
    let engine = DecisionEngine::new(Arc::clone(&registry), predictor.clone(), config.thresholds);
    let balancer = LoadBalancer::new(Arc::clone(&registry), config.safety_margin);
    let optimizer = Arc::new(
        Optimizer::new(
            engine,
            balancer,
            dispatcher.clone(),
            Arc::clone(&source),
            Arc::clone(&clock),
        )
        .with_io_timeout(Duration::from_secs(config.dispatch.io_timeout_secs))
        .with_min_gap(Duration::from_secs(config.scheduler.min_optimize_gap_secs)),
    );

    let emergencies = Arc::new(EmergencyRegistry::new(
        Arc::clone(&registry),
        dispatcher,
        Arc::clone(&notifier),
        Arc::clone(&clock),
        config.thresholds,
    ));
    let monitor = Arc::new(SystemMonitor::new(
        Arc::clone(&registry),
        Arc::clone(&source),
        predictor.clone(),
        Arc::clone(&notifier),
        Arc::clone(&emergencies),
        Arc::clone(&clock),
        config.thresholds,
        Duration::from_secs(config.watchdog.io_timeout_secs),
    ));
    let watchdog = Arc::new(Watchdog::new(
        Arc::clone(&registry),
        source,
        store.clone(),
        retrier,
        notifier,
        Arc::clone(&clock),
        config.watchdog,
        events_rx,
    ));
    let feed = Arc::new(SyntheticFeed::new(
        registry,
        store.clone(),
        Arc::clone(&clock),
        config.feed.clone(),
    ));

    System {
        clock,
        store,
        predictor,
        feed,
        optimizer,
        monitor,
        watchdog,
        emergencies,
    }
}

/// Runs one cycle against fresh synthetic readings and prints it.
async fn run_once(system: &System) {
    if let Err(e) = system.feed.step().await {
        eprintln!("error: synthetic feed failed: {e}");
        process::exit(1);
    }
    let outcome = system.optimizer.optimize().await;
    let Some(plan) = outcome.plan.as_ref() else {
        eprintln!(
            "error: cycle skipped: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        process::exit(1);
    };

    println!("Mode: {}", plan.mode);
    println!(
        "Battery {:.1}%  input {:.1} W  output {:.1} W  sustain {:.2} h",
        plan.state.avg_battery_percentage,
        plan.state.total_input,
        plan.state.total_output,
        plan.state.sustain_hours
    );
    println!("Decision: {}", plan.decision);
    println!("\nReasoning:");
    for line in &plan.reasoning {
        println!("  - {line}");
    }
    println!("\nExecution:");
    for (zone, r) in &outcome.execution {
        let status = if r.success { "ok" } else { "FAILED" };
        println!(
            "  {zone:<8} {:<3} {status} (attempts: {})",
            r.command.as_str(),
            r.attempts
        );
    }

    println!("\nSchedule:");
    for slot in optimization_schedule(system.predictor.as_ref(), system.clock.now(), SCHEDULE_HOURS) {
        println!("  {slot}");
    }
}

/// Waits for Ctrl-C, or until `run_for` elapses when given.
async fn wait_for_stop(run_for: Option<Duration>) {
    let deadline = async {
        match run_for {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "cannot listen for Ctrl-C; stopping");
            }
            info!("interrupt received, shutting down");
        }
        () = deadline => info!("run time elapsed, shutting down"),
    }
}

async fn run(cli: CliArgs, config: ControllerConfig) {
    let system = build_system(&config);

    if cli.once {
        run_once(&system).await;
        return;
    }

    // Readings must exist before the first optimize cycle.
    if let Err(e) = system.feed.step().await {
        error!(error = %e, "initial synthetic readings failed");
    }

    let (feed_stop, feed_stop_rx) = watch::channel(false);
    let feed = Arc::clone(&system.feed);
    let feed_task = tokio::spawn(run_every(
        "feed",
        Duration::from_secs(config.feed.period_secs),
        feed_stop_rx,
        move || {
            let feed = Arc::clone(&feed);
            async move {
                if let Err(e) = feed.step().await {
                    warn!(error = %e, "synthetic readings not published");
                }
            }
        },
    ));

    let handle = Scheduler::new(
        Arc::clone(&system.optimizer),
        Arc::clone(&system.monitor),
        config.scheduler,
    )
    .with_watchdog(Arc::clone(&system.watchdog))
    .start();

    wait_for_stop(cli.run_for.map(Duration::from_secs)).await;

    handle.shutdown().await;
    feed_stop.send_replace(true);
    if let Err(e) = feed_task.await {
        error!(error = %e, "feed task ended abnormally");
    }

    let history = system.optimizer.history();
    for record in &history {
        println!("{record}");
    }
    let status = system.watchdog.status().await;
    println!(
        "\nWatchdog: {} queued command(s), {} consecutive connectivity failure(s)",
        status.failed_commands, status.connection_failures
    );
    for emergency in system.emergencies.active() {
        println!("Active emergency {}: {} ({})", emergency.id, emergency.kind, emergency.reason);
    }
    match system.store.list("notifications/admin").await {
        Ok(alerts) => println!("Alerts pushed: {}", alerts.len()),
        Err(e) => warn!(error = %e, "cannot read pushed alerts"),
    }

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&history, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Telemetry written to {path}");
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();
    let config = load_config(&cli);

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    rt.block_on(run(cli, config));
}
