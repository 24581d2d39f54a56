//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use colored::Colorize;
use cortex_runtime::{CortexConfig, CortexRuntime, RuntimeHandle};
use cortex_types::{CortexError, RuntimeMetrics};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Exit code used when a second Ctrl-C forces the process down.
const FORCED_EXIT: i32 = 130;

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn version() {
    println!("{} {}", "cortex".bold(), env!("CARGO_PKG_VERSION"));
}

/// Load, override and fully validate a configuration file.
pub fn load_config(path: &Path) -> Result<CortexConfig, CortexError> {
    let config = CortexConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

pub fn validate(path: &Path) -> Result<(), CortexError> {
    let config = load_config(path)?;
    println!("{} {} is valid", "✓".green().bold(), path.display().to_string().bold());
    println!("{}", summary(&config));
    Ok(())
}

pub async fn status(path: &Path) -> Result<(), CortexError> {
    let mut runtime = CortexRuntime::new(load_config(path)?);
    runtime.initialize().await?;
    let status = runtime.status();
    runtime.stop().await;
    let json = serde_json::to_string_pretty(&status).map_err(|e| CortexError::Serialization(e.to_string()))?;
    println!("{json}");
    Ok(())
}

pub async fn run(path: &Path, dev: bool) -> Result<(), CortexError> {
    let mut config = load_config(path)?;
    if dev {
        config.development.debug_mode = true;
        config.development.websim_enabled = true;
    }
    print_banner(&config);

    let mut runtime = CortexRuntime::new(config);
    runtime.initialize().await?;
    if runtime.config().development.websim_enabled {
        let dev = &runtime.config().development;
        println!(
            "  Debug interface: {}",
            format!("http://{}:{}", dev.websim_host, dev.websim_port).cyan()
        );
    }
    println!("  Press {} to emergency-stop and exit.\n", "Ctrl-C".bold());

    install_ctrlc(runtime.handle());
    let outcome = runtime.run().await;
    print_metrics(runtime.metrics());
    outcome
}

/// Run for `seconds`, print the metrics and fail when no tick completed.
pub async fn test(path: &Path, seconds: f64) -> Result<(), CortexError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(CortexError::Config(format!("--duration must be positive, got {seconds}")));
    }
    let mut runtime = CortexRuntime::new(load_config(path)?);
    runtime.initialize().await?;
    install_ctrlc(runtime.handle());

    info!(seconds, "bounded test run");
    let outcome = runtime.run_for(Duration::from_secs_f64(seconds)).await;
    runtime.stop().await;
    outcome?;

    let metrics = runtime.metrics();
    print_metrics(metrics);
    if metrics.total_loops == 0 {
        return Err(CortexError::Initialization {
            component: "runtime".to_string(),
            details: "no tick completed".to_string(),
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Ctrl-C
// ─────────────────────────────────────────────────────────────────────────────

/// First Ctrl-C: emergency stop (the loop then returns and tears down).
/// Second Ctrl-C: exit immediately.
fn install_ctrlc(handle: RuntimeHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let presses = Arc::new(AtomicUsize::new(0));

    let result = ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) > 0 {
            eprintln!("{}", "Second Ctrl-C, exiting now.".red().bold());
            std::process::exit(FORCED_EXIT);
        }
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – emergency stop …".yellow().bold());
        let _ = tx.send(());
    });
    if let Err(e) = result {
        warn!(error = %e, "failed to install Ctrl-C handler; Ctrl-C will not emergency-stop");
        return;
    }

    tokio::spawn(async move {
        if rx.recv().await.is_some() {
            handle.emergency_stop().await;
            eprintln!("{}", "  ✓ Actuators fail-safed, shutting down.".green());
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn summary(config: &CortexConfig) -> String {
    let names = |table: &cortex_runtime::PluginTable| {
        table.enabled().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
    };
    let mut out = format!(
        "  name:    {}\n  hertz:   {}\n  inputs:  {}\n  actions: {}\n  llm:     {} ({})",
        config.name,
        config.hertz,
        names(&config.agent_inputs),
        names(&config.agent_actions),
        config.llm.provider,
        config.llm.model,
    );
    if let Some(fallback) = &config.llm.fallback_provider {
        out.push_str(&format!(", fallback {fallback}"));
    }
    out
}

fn print_banner(config: &CortexConfig) {
    println!();
    println!("  {} {}", "G1 cortex".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("{}", summary(config));
    println!();
}

fn print_metrics(metrics: &RuntimeMetrics) {
    println!();
    println!("  {}", "Metrics".bold());
    println!("    loop_count:    {}", metrics.loop_count);
    println!("    total_loops:   {}", metrics.total_loops);
    println!("    avg_loop_time: {:.1} ms", metrics.avg_loop_time.as_secs_f64() * 1_000.0);
    let errors = metrics.errors.to_string();
    println!(
        "    errors:        {}",
        if metrics.errors == 0 { errors.green() } else { errors.red() }
    );
    if let Some(last) = &metrics.last_error {
        println!("    last_error:    {}", last.dimmed());
    }
}
