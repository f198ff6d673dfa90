mod seed;
mod storage;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use colored::Colorize;

use cantina_core::{
    AccountId, CantinaEngine, CantinaState, ItemId, Role, ScanOutcome, SweepOptions, SweepReport,
    validate_cpf,
};
use storage::{FsDataSource, JsonDirStorage};

#[derive(Debug, Parser)]
#[command(name = "cantina", version)]
#[command(about = "Operational tooling for the Cantina lunch service - sweep, scan lane and seeding")]
struct Args {
    /// Data directory holding state and config JSON files
    #[arg(long, default_value = "cantina-data")]
    data_dir: PathBuf,

    /// State snapshot name inside the data directory
    #[arg(long, default_value = "state")]
    state_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a demo state, catalog and policy into the data directory
    Seed {
        /// Academic year stamped on the seeded classes
        #[arg(long, default_value_t = 2026)]
        year: u16,
        /// Overwrite an existing state snapshot
        #[arg(long)]
        force: bool,
    },
    /// Settle overdue pending orders as no-shows (run daily after the cutoff)
    Sweep {
        /// Report what would change without saving anything
        #[arg(long)]
        dry_run: bool,
        /// Ignore the cutoff-time gate (manual/test invocation)
        #[arg(long)]
        force: bool,
    },
    /// Redeem a scanned pickup token at the counter
    Scan {
        /// Raw scanner input; non-digits are stripped before validation
        code: String,
        /// CPF of the operating staff account (defaults to the first staff)
        #[arg(long)]
        operator: Option<String>,
    },
    /// Place an order for a student
    Order {
        /// Student CPF
        cpf: String,
        /// Item IDs, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        items: Vec<u64>,
    },
    /// Show the next eligible service day for a student
    NextDay {
        /// Student CPF
        cpf: String,
    },
    /// Manually block a student from ordering
    Block {
        /// Student CPF
        cpf: String,
        #[arg(long, default_value = "bloqueio manual")]
        reason: String,
        /// CPF of the acting staff member
        #[arg(long)]
        operator: Option<String>,
    },
    /// Lift a block; staff only, resets the no-show streak
    Unblock {
        /// Student CPF
        cpf: String,
        #[arg(long, default_value = "desbloqueio manual")]
        reason: String,
        /// CPF of the acting staff member
        #[arg(long)]
        operator: Option<String>,
    },
    /// Show or change the stored daily cutoff
    Cutoff {
        /// New cutoff as HH:MM
        #[arg(long)]
        set: Option<String>,
        /// Clear the stored value back to the default
        #[arg(long)]
        clear: bool,
    },
}

type Engine = CantinaEngine<FsDataSource, JsonDirStorage>;

fn find_by_cpf(state: &CantinaState, cpf: &str) -> Result<AccountId> {
    let normalized = validate_cpf(cpf).context("invalid CPF")?;
    state
        .roster
        .accounts()
        .find(|a| a.cpf == normalized)
        .map(|a| a.id)
        .with_context(|| format!("no account with CPF {normalized}"))
}

fn find_operator(state: &CantinaState, cpf: Option<&str>) -> Result<AccountId> {
    if let Some(cpf) = cpf {
        return find_by_cpf(state, cpf);
    }
    state
        .roster
        .accounts()
        .find(|a| a.role.is_operator())
        .map(|a| a.id)
        .context("no staff account in state; pass --operator")
}

fn load_state(engine: &Engine, name: &str) -> Result<CantinaState> {
    engine
        .load_state(name)?
        .with_context(|| format!("no state snapshot {name:?}; run `cantina seed` first"))
}

fn print_sweep_report(report: &SweepReport, state: &CantinaState, now: NaiveDateTime) {
    if !report.ran {
        println!(
            "{}",
            format!(
                "Now {} is before the {} cutoff. Nothing to do (use --force).",
                now.time().format("%H:%M"),
                report.cutoff.format("%H:%M")
            )
            .yellow()
        );
        return;
    }
    if report.entries.is_empty() {
        println!("No orders eligible for no-show.");
        return;
    }
    for entry in &report.entries {
        let student = state
            .roster
            .account(entry.student)
            .map_or_else(|| entry.student.to_string(), |a| a.name.clone());
        if entry.applied {
            let blocked = if entry.auto_blocked {
                " [auto-blocked]".red().to_string()
            } else {
                String::new()
            };
            println!(
                "{} — {student} marked no_show (streak {}){blocked}",
                entry.order,
                entry.streak_after.unwrap_or_default()
            );
        } else {
            println!("{} {} — {student} would be marked no_show", "[DRY]".cyan(), entry.order);
        }
    }
    if report.dry_run {
        println!("{}", "Dry run complete - nothing saved.".yellow());
    } else {
        println!("{}", format!("{} order(s) marked as no_show.", report.marked()).green());
    }
}

fn run(args: Args) -> Result<()> {
    let mut engine = CantinaEngine::new(
        FsDataSource::new(&args.data_dir),
        JsonDirStorage::new(&args.data_dir),
    )?;
    let now = Local::now().naive_local();
    let name = args.state_name.as_str();

    match args.command {
        Command::Seed { year, force } => {
            if !force && engine.load_state(name)?.is_some() {
                bail!("state snapshot {name:?} already exists; use --force to overwrite");
            }
            let (state, staff) = seed::demo_state(year);
            let catalog_path = args.data_dir.join("catalog.json");
            std::fs::create_dir_all(&args.data_dir)?;
            std::fs::write(
                &catalog_path,
                serde_json::to_string_pretty(&seed::demo_catalog())?,
            )?;
            engine.save_state(name, &state)?;
            let operator = state.roster.account(staff).expect("seeded staff exists");
            println!("{}", format!("Seeded demo state into {}", args.data_dir.display()).green());
            println!("Counter operator: {} (CPF {})", operator.name, operator.cpf);
            for account in state.roster.accounts().filter(|a| a.role == Role::Student) {
                println!("  student {} (CPF {})", account.name, account.cpf);
            }
        }
        Command::Sweep { dry_run, force } => {
            let mut state = load_state(&engine, name)?;
            let report = engine.sweep(&mut state, now, SweepOptions { dry_run, force })?;
            print_sweep_report(&report, &state, now);
            if report.ran && !report.dry_run {
                engine.save_state(name, &state)?;
            }
        }
        Command::Scan { code, operator } => {
            let mut state = load_state(&engine, name)?;
            let actor = find_operator(&state, operator.as_deref())?;
            let outcome = engine.redeem(&mut state, &code, actor, now)?;
            match &outcome {
                ScanOutcome::Delivered(result) => {
                    let student = state
                        .roster
                        .account(result.student)
                        .map_or_else(|| result.student.to_string(), |a| a.name.clone());
                    println!("{}", format!("Delivered {} to {student}.", result.order).green());
                    engine.save_state(name, &state)?;
                }
                ScanOutcome::AlreadyDelivered { delivered_at, .. } => {
                    println!(
                        "{}",
                        format!("Already delivered at {}.", delivered_at.format("%H:%M")).yellow()
                    );
                }
                ScanOutcome::WrongDay { service_day, .. } => {
                    println!(
                        "{}",
                        format!("Order is scheduled for {}.", service_day.format("%d/%m/%Y")).yellow()
                    );
                }
                ScanOutcome::NotFound => println!("{}", "Token not found.".red()),
                ScanOutcome::InvalidFormat => {
                    println!("{}", "Invalid token (13-digit EAN-13 expected).".red());
                }
            }
        }
        Command::Order { cpf, items } => {
            let mut state = load_state(&engine, name)?;
            let student = find_by_cpf(&state, &cpf)?;
            let lines: Vec<(ItemId, u32)> = items.iter().map(|id| (ItemId(*id), 1)).collect();
            let placement = engine.checkout(&mut state, student, &lines, now)?;
            let order = state
                .ledger
                .get(placement.order)
                .expect("placed order exists");
            engine.save_state(name, &state)?;
            println!(
                "{}",
                format!(
                    "Order placed for {}: token {}",
                    placement.service_day.day.format("%d/%m/%Y"),
                    order.pickup_token
                )
                .green()
            );
            if placement.service_day.exhausted {
                println!(
                    "{}",
                    "Warning: no eligible day found in the scan window; base day used.".yellow()
                );
            }
        }
        Command::NextDay { cpf } => {
            let state = load_state(&engine, name)?;
            let student = find_by_cpf(&state, &cpf)?;
            let outcome = engine.next_service_day(&state, student, now)?;
            println!("Next service day: {}", outcome.day.format("%d/%m/%Y"));
            if outcome.exhausted {
                println!(
                    "{}",
                    "Warning: eligibility scan exhausted; check masks and closures.".yellow()
                );
            }
        }
        Command::Block { cpf, reason, operator } => {
            let mut state = load_state(&engine, name)?;
            let student = find_by_cpf(&state, &cpf)?;
            let actor = find_operator(&state, operator.as_deref())?;
            engine.block(&mut state, student, Some(actor), &reason, now)?;
            engine.save_state(name, &state)?;
            println!("{}", "Student blocked.".green());
        }
        Command::Unblock { cpf, reason, operator } => {
            let mut state = load_state(&engine, name)?;
            let student = find_by_cpf(&state, &cpf)?;
            let actor = find_operator(&state, operator.as_deref())?;
            engine.unblock(&mut state, student, actor, &reason, now)?;
            engine.save_state(name, &state)?;
            println!("{}", "Student unblocked; streak reset.".green());
        }
        Command::Cutoff { set, clear } => {
            let mut state = load_state(&engine, name)?;
            if clear {
                engine.set_cutoff(&mut state, None);
                engine.save_state(name, &state)?;
                println!("Cutoff cleared back to the default.");
            } else if let Some(raw) = set {
                let time = NaiveTime::parse_from_str(&raw, "%H:%M")
                    .context("cutoff must be HH:MM")?;
                engine.set_cutoff(&mut state, Some(time));
                engine.save_state(name, &state)?;
                println!("Cutoff set to {}.", time.format("%H:%M"));
            } else {
                let effective = engine.cutoff(&state, now);
                match state.cutoff_time {
                    Some(stored) => println!("Stored cutoff: {}", stored.format("%H:%M")),
                    None => println!("No stored cutoff; default {} applies.", effective.format("%H:%M")),
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    run(Args::parse())
}
