//! `armloop-cli` – ArmLoop command line interface
//!
//! This binary runs policy rollouts episode by episode.  It:
//!
//! 1. Loads `~/.armloop/config.toml` (or `--config <path>`); runs a
//!    **First-Run Wizard** when the file is absent.
//! 2. Loads every configured policy and builds the control loop around the
//!    simulated arm.
//! 3. Prompts the operator for a policy and an instruction before each
//!    episode and saves the captured frames afterwards.
//! 4. Intercepts **Ctrl-C** to abort the running episode at the next batch
//!    boundary and exit.

mod config;
mod operator;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use armloop_hal::{FrameDirSink, SimArm};
use armloop_runtime::{ControlLoop, EpisodeOutcome, EpisodeReport};
use armloop_types::ArmError;

use crate::operator::PromptOperator;

#[derive(Parser, Debug)]
#[command(name = "armloop", version, about = "Closed-loop policy rollouts for robot arms")]
struct Cli {
    /// Configuration file (defaults to ~/.armloop/config.toml).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::config_path)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = armloop_runtime::init_tracing("armloop");
    let config_path = cli.config_path();

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping after the current batch …"
                .yellow()
                .bold()
        );
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will kill the process mid-step");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load_from(&config_path) {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config_path.display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(&config_path),
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match run(&cfg, shutdown) {
        Ok(reports) => {
            print_summary(&reports);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Fatal".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Build the loop from `cfg` and hand control to the operator.
fn run(cfg: &config::Config, shutdown: Arc<AtomicBool>) -> Result<Vec<EpisodeReport>, ArmError> {
    let loop_config = cfg.validate()?;
    let policies = cfg.load_policies()?;

    let arm = SimArm::builder()
        .with_im_size(cfg.im_size)
        .with_bounds(cfg.workspace_bounds)
        .build();
    info!(policies = policies.len(), "driving the simulated arm");

    let mut control = ControlLoop::new(loop_config, arm, policies)?
        .with_shutdown(Arc::clone(&shutdown))
        .with_video_sink(Box::new(FrameDirSink::new()));
    let mut operator = PromptOperator::stdio(shutdown);
    control.run(&mut operator)
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard(path: &std::path::Path) -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       ArmLoop First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up a rollout.\n");

    let mut cfg = config::Config::default();

    let im_size = prompt_line(
        &format!("  Camera image size in pixels [{}]: ", cfg.im_size),
        &cfg.im_size.to_string(),
    );
    if let Ok(n) = im_size.trim().parse::<usize>() {
        cfg.im_size = n;
    }

    let steps = prompt_line(
        &format!("  Actions per episode [{}]: ", cfg.num_timesteps),
        &cfg.num_timesteps.to_string(),
    );
    if let Ok(n) = steps.trim().parse::<usize>() {
        cfg.num_timesteps = n;
    }

    let videos = prompt_line("  Directory for episode videos (empty to disable): ", "");
    if !videos.is_empty() {
        cfg.video_save_path = Some(PathBuf::from(videos));
    }

    let actions = prompt_line("  Recorded actions (JSON) to replay: ", "");
    if !actions.is_empty() {
        let run_name = prompt_line("  Run name [replay]: ", "replay");
        cfg.policies.push(config::PolicyEntry {
            run_name,
            checkpoint_num: 0,
            actions_path: PathBuf::from(actions),
            obs_horizon: None,
            action_mean: armloop_types::PolicyStatistics::identity().action_mean,
            action_std: armloop_types::PolicyStatistics::identity().action_std,
        });
    }

    match config::save_to(&cfg, path) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ _ _ __ _ __ ___  | | ___   ___  _ __  "#.bold().cyan());
    println!("{}", r#"  / _` | '__| '_ ` _ \ | |/ _ \ / _ \| '_ \ "#.bold().cyan());
    println!("{}", r#" | (_| | |  | | | | | || | (_) | (_) | |_) |"#.bold().cyan());
    println!("{}", r#"  \__,_|_|  |_| |_| |_||_|\___/ \___/| .__/ "#.bold().cyan());
    println!("{}", r#"                                     |_|    "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "ArmLoop".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Closed-loop policy rollouts for robot arms");
    println!();
}

fn print_summary(reports: &[EpisodeReport]) {
    if reports.is_empty() {
        println!("\n  No episodes run.");
        return;
    }
    println!("\n{}", "Episodes".bold().underline());
    for report in reports {
        let outcome = match &report.outcome {
            EpisodeOutcome::Completed => "completed".green().to_string(),
            EpisodeOutcome::Aborted { reason } => format!("{} ({reason})", "aborted".yellow()),
            EpisodeOutcome::ResetFailed { reason } => {
                format!("{} ({reason})", "reset failed".red())
            }
        };
        println!(
            "  {}  {:>4} steps  {}",
            report.policy.bold(),
            report.steps,
            outcome
        );
        if let Some(path) = &report.video_path {
            println!("        video: {}", path.display().to_string().dimmed());
        }
    }
    println!();
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
