//! HEXA - closed-loop servo convergence
//! Command-line interface for rig files and simulated runs

use std::path::{Path, PathBuf};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use colored::*;
use hexa_actuator::{
    ActuatorId, Connection, EventFilter, EventSink, FaultRule, Motion, Position, SimulatedBus,
    SimulatedDriver,
};
use hexa_convergence::{CancellationToken, ConvergenceController, ConvergenceReport, RIG_FILE, RigConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hexa")]
#[command(author = "HEXA Contributors")]
#[command(version = "2026.10.18")]
#[command(about = "HEXA - closed-loop convergence for serial-bus servos", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default six-leg rig file
    Init {
        /// Output file
        #[arg(value_name = "OUTPUT", default_value = RIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a rig file
    Check {
        /// Rig file
        #[arg(value_name = "RIG", default_value = RIG_FILE)]
        rig: PathBuf,
    },

    /// Run every group against a simulated bus
    Simulate {
        /// Rig file (the default rig is used when absent)
        #[arg(value_name = "RIG")]
        rig: Option<PathBuf>,

        /// Move all actuators as a single group
        #[arg(long)]
        whole_body: bool,

        /// Run groups on separate threads
        #[arg(long)]
        concurrent: bool,

        /// Starting position of every simulated servo
        #[arg(long, default_value_t = 0)]
        start: u16,

        /// Ticks moved per position read
        #[arg(long, default_value_t = 100)]
        step: u16,

        /// Actuator that drops its first goal commands
        #[arg(long, value_name = "ID")]
        flaky: Vec<u8>,

        /// Actuator that never moves
        #[arg(long, value_name = "ID")]
        stuck: Vec<u8>,

        /// Give up after N attempts per operation
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,

        /// Give up a group move after this many milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Give up after N poll iterations
        #[arg(long, value_name = "N")]
        max_polls: Option<u32>,

        /// Print status events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show information about HEXA
    Info,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hexa=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { output, force } => init_command(&output, force),
        Commands::Check { rig } => check_command(&rig),
        Commands::Simulate {
            rig,
            whole_body,
            concurrent,
            start,
            step,
            flaky,
            stuck,
            max_attempts,
            timeout_ms,
            max_polls,
            json,
        } => {
            let options = SimulateOptions {
                whole_body,
                concurrent,
                start,
                step,
                flaky,
                stuck,
                max_attempts,
                timeout_ms,
                max_polls,
                json,
            };
            simulate_command(rig.as_deref(), &options)
        }
        Commands::Info => {
            print_info();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

// ============================================================================
// Rig file commands
// ============================================================================

fn init_command(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let rig = RigConfig::default();
    rig.save(output)?;

    println!("{} {}", "   Created".green().bold(), output.display().to_string().cyan());
    println!(
        "  {} groups, {} actuators on {} @ {} baud",
        rig.groups.len(),
        rig.actuator_ids()?.len(),
        rig.bus.device,
        rig.bus.baud_rate
    );
    Ok(())
}

fn check_command(path: &Path) -> anyhow::Result<()> {
    println!("{} {}", "Checking".green().bold(), path.display().to_string().cyan());

    let rig = load_rig(path)?;
    rig.validate()?;

    for (name, ids) in rig.group_ids()? {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        println!("  {:<12} {}", name.bold(), ids.join(" "));
    }
    println!(
        "  goal {} {} speed {}",
        rig.motion.goal,
        format!("±{}", rig.motion.tolerance).dimmed(),
        rig.motion.speed
    );
    println!("{} No errors found", "    Finished".green().bold());
    Ok(())
}

fn load_rig(path: &Path) -> anyhow::Result<RigConfig> {
    RigConfig::from_file(path).with_context(|| format!("invalid rig file {}", path.display()))
}

// ============================================================================
// Simulation
// ============================================================================

struct SimulateOptions {
    whole_body: bool,
    concurrent: bool,
    start: u16,
    step: u16,
    flaky: Vec<u8>,
    stuck: Vec<u8>,
    max_attempts: Option<u32>,
    timeout_ms: Option<u64>,
    max_polls: Option<u32>,
    json: bool,
}

fn simulate_command(path: Option<&Path>, options: &SimulateOptions) -> anyhow::Result<()> {
    let mut rig = match path {
        Some(path) => load_rig(path)?,
        None => RigConfig::default(),
    };
    if options.max_attempts.is_some() {
        rig.retry.max_attempts = options.max_attempts;
    }
    if options.timeout_ms.is_some() {
        rig.limits.timeout_ms = options.timeout_ms;
    }
    if options.max_polls.is_some() {
        rig.limits.max_polls = options.max_polls;
    }
    rig.validate()?;

    let start = rig.range()?.check(options.start)?;
    let bus = build_simulation(&rig, start, options)?;
    let driver = SimulatedDriver::new(bus);
    let connection = Connection::open(&driver, &rig.bus.device, rig.bus.baud_rate)?;
    tracing::info!(device = %rig.bus.device, baud = rig.bus.baud_rate, "simulated bus opened");

    let events = EventSink::new();
    if options.json {
        events.subscribe(EventFilter::All, |event| {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
        });
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel()).context("failed to install Ctrl-C handler")?;
    let controller = ConvergenceController::new(rig.controller_config_with_cancel(cancel)?);
    let command = rig.move_command()?;
    let bus = connection.bus();

    let reports = if options.whole_body {
        let body = rig.whole_body(&bus, &events)?;
        vec![controller.run_group(&body, command)?]
    } else {
        let groups = rig.build_groups(&bus, &events)?;
        if options.concurrent {
            controller.run_groups_concurrently(&groups, command)?
        } else {
            controller.run_groups(&groups, command)?
        }
    };

    if !options.json {
        for report in &reports {
            print_report(report);
        }
        println!(
            "{} {} transactions, {} failed",
            "    Finished".green().bold(),
            bus.transaction_count(),
            events.filtered(EventFilter::Failures).len()
        );
    }

    connection.close();
    tracing::debug!(transactions = bus.transaction_count(), "simulated bus closed");
    Ok(())
}

fn build_simulation(rig: &RigConfig, start: Position, options: &SimulateOptions) -> anyhow::Result<SimulatedBus> {
    let registers = rig.registers.resolve()?;
    let mut bus = SimulatedBus::new(registers)
        .with_polarity(rig.torque)
        .with_range(rig.range()?);

    let motion = if options.step == 0 { Motion::Instant } else { Motion::Step(options.step) };
    for id in rig.actuator_ids()? {
        bus.add_servo(id, start);
        bus.set_motion(id, motion.clone());
    }

    for &raw in &options.flaky {
        let id = ActuatorId::new(raw)?;
        bus.inject(FaultRule::transport().on(id).at(registers.goal_position).writes().times(3));
    }
    for &raw in &options.stuck {
        bus.set_motion(ActuatorId::new(raw)?, Motion::Stuck);
    }
    Ok(bus)
}

fn print_report(report: &ConvergenceReport) {
    println!(
        "{} {} in {} poll(s), {} correction(s), {} retr{} ({:.1?})",
        "Converged".green().bold(),
        report.group.cyan(),
        report.iterations,
        report.total_corrections(),
        report.retries,
        if report.retries == 1 { "y" } else { "ies" },
        report.elapsed
    );
    for actuator in &report.actuators {
        println!(
            "  {:<5} goal {:>4}  final {:>4}  corrections {}",
            actuator.id.to_string(),
            actuator.acknowledged_goal,
            actuator.final_position,
            actuator.corrections
        );
    }
}

fn print_info() {
    println!("{}", "HEXA - closed-loop servo convergence".bold());
    println!();
    println!("{}", "Drives groups of serial-bus servos to a goal position and keeps correcting until they arrive.");
    println!();
    println!("{}", "Move sequence:".bold());
    println!("  torque on → speed → goal (acknowledged)");
    println!("       ↓");
    println!("  poll positions ⇄ resend goal to actuators off target");
    println!("       ↓");
    println!("  torque off → final positions");
    println!();
    println!("{}", "Commands:".bold());
    println!("  hexa init                        # Write the default rig ({})", RIG_FILE);
    println!("  hexa check hexa.toml             # Validate a rig file");
    println!("  hexa simulate                    # Run the default rig on a simulated bus");
    println!("  hexa simulate --whole-body       # Move all 18 actuators together");
    println!("  hexa simulate --stuck 5 --max-polls 20");
    println!("  hexa simulate --stuck 5          # Runs until Ctrl-C cancels the move");
    println!("  hexa simulate --json             # Status events as JSON lines");
    println!("  hexa info                        # Show this info");
    println!();
    println!("{}", "Logging:".bold());
    println!("  RUST_LOG=hexa=debug hexa simulate");
}
