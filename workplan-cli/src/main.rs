use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use workplan_core::{
    Clock, Priority, SchedulerConfig, SchedulerKernel, SystemClock, TaskRequirements, WorkCalendar,
    WorkerCandidate, parse_instant,
};

mod config;
mod dispatcher;
mod import;
mod snapshot;
mod state;

use dispatcher::{AssignRequest, Dispatcher};
use snapshot::{Snapshot, SnapshotStore};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("WORKPLAN_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "workplan", version = VERSION, about = "Task placement and assignment for work queues")]
struct Cli {
    /// Config file (default ~/.workplan/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pin "now" (RFC3339 or "YYYY-MM-DD HH:MM" in the configured timezone)
    #[arg(long, global = true)]
    now: Option<String>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute where a new task would land for one worker
    Insert {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        worker: String,
        #[arg(long)]
        priority: Priority,
        #[arg(long)]
        days: f64,
    },

    /// Re-sequence a worker's queue behind an anchor deadline
    Shift {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        worker: String,
        #[arg(long)]
        anchor: String,
        #[arg(long)]
        index: usize,
    },

    /// Pick an assignee for a task type
    Select {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        task_type: String,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long, default_value_t = 1.0)]
        days: f64,
    },

    /// Place a task end to end: select, insert, shift, commit
    Assign {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        task_type: String,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        #[arg(long)]
        days: f64,
        /// Repeatable; omit to auto-select
        #[arg(long = "assignee")]
        assignees: Vec<String>,
        /// Persist the result back to the snapshot file
        #[arg(long)]
        write: bool,
    },

    /// Vacation data
    Vacations {
        #[command(subcommand)]
        command: VacationsCommand,
    },

    /// Working-calendar arithmetic
    Calendar {
        #[command(subcommand)]
        command: CalendarCommand,
    },

    /// Scheduler configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum VacationsCommand {
    /// Merge a CSV (worker_id,start_date,end_date) into the snapshot
    Import {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        csv: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum CalendarCommand {
    /// Earliest working instant at or after --at (default: now)
    Next {
        #[arg(long)]
        at: Option<String>,
    },
    /// Deadline for a task of --days starting at --start
    Deadline {
        #[arg(long)]
        start: String,
        #[arg(long)]
        days: f64,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a default config if none exists
    Init,
    /// Print the effective config
    Show,
}

/// Wall clock, or a pinned instant from `--now`.
#[derive(Debug, Clone, Copy)]
enum CliClock {
    System(SystemClock),
    Fixed(DateTime<Utc>),
}

impl Clock for CliClock {
    fn now(&self) -> DateTime<Utc> {
        match self {
            CliClock::System(c) => c.now(),
            CliClock::Fixed(t) => *t,
        }
    }
}

#[derive(Serialize)]
struct Selection {
    selected: Option<WorkerCandidate>,
    pool: Vec<WorkerCandidate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref();
    let command = match cli.command {
        Command::Config { command } => return run_config(command, config_path),
        other => other,
    };

    let cfg = config::load_config(config_path)?;
    let clock = match &cli.now {
        Some(s) => CliClock::Fixed(parse_ts(s, &cfg).context("--now")?),
        None => CliClock::System(SystemClock),
    };
    let kernel = SchedulerKernel::new(&cfg, clock)?;

    match command {
        Command::Insert {
            snapshot,
            worker,
            priority,
            days,
        } => {
            let snap = load_snapshot(snapshot.as_deref())?;
            require_worker(&snap, &worker)?;
            let res = kernel.compute_insertion(
                &worker,
                priority,
                days,
                &snap.timeline_for(&worker),
                &snap.vacations_for(&worker),
            )?;
            print_json(&res)?;
        }

        Command::Shift {
            snapshot,
            worker,
            anchor,
            index,
        } => {
            let snap = load_snapshot(snapshot.as_deref())?;
            require_worker(&snap, &worker)?;
            let anchor = parse_ts(&anchor, &cfg).context("--anchor")?;
            print_json(&kernel.compute_shift(&worker, anchor, index, &snap.timeline_for(&worker))?)?;
        }

        Command::Select {
            snapshot,
            task_type,
            brand,
            days,
        } => {
            let snap = load_snapshot(snapshot.as_deref())?;
            let req = TaskRequirements {
                task_type,
                brand,
                duration_days: days,
            };
            let pool: Vec<WorkerCandidate> = snap
                .workers
                .iter()
                .filter_map(|w| {
                    kernel.build_candidate(w, &req, &snap.timeline_for(&w.id), &snap.vacations_for(&w.id))
                })
                .collect();
            let selected = kernel.select_candidate(&pool);
            print_json(&Selection { selected, pool })?;
        }

        Command::Assign {
            snapshot,
            task_id,
            task_type,
            brand,
            priority,
            days,
            assignees,
            write,
        } => {
            let path = snapshot_location(snapshot.as_deref())?;
            let store = Arc::new(SnapshotStore::new(Snapshot::load(&path)?));
            let dispatcher = Dispatcher::new(kernel, Arc::clone(&store));

            let out = dispatcher
                .assign(AssignRequest {
                    task_id,
                    task_type,
                    brand,
                    priority,
                    duration_days: days,
                    assignees,
                })
                .await?;
            print_json(&out)?;

            if write {
                store.read().await.save(&path)?;
                eprintln!("Wrote {}", path.display());
            }
        }

        Command::Vacations {
            command: VacationsCommand::Import { snapshot, csv },
        } => {
            let path = snapshot_location(snapshot.as_deref())?;
            let mut snap = if path.exists() {
                Snapshot::load(&path)?
            } else {
                Snapshot::default()
            };
            let imported = import::read_vacations_csv(&csv, cfg.tz()?)?;
            let count = imported.len();
            for v in imported {
                if !snap.vacations.contains(&v) {
                    snap.vacations.push(v);
                }
            }
            snap.save(&path)?;
            eprintln!("Imported {} vacations into {}", count, path.display());
        }

        Command::Calendar { command } => {
            let cal: &WorkCalendar = kernel.calendar();
            match command {
                CalendarCommand::Next { at } => {
                    let t = match at {
                        Some(s) => parse_ts(&s, &cfg).context("--at")?,
                        None => kernel.now(),
                    };
                    print_json(&cal.next_available_start(t))?;
                }
                CalendarCommand::Deadline { start, days } => {
                    let start = parse_ts(&start, &cfg).context("--start")?;
                    print_json(&cal.task_deadline(start, days))?;
                }
            }
        }

        Command::Config { command } => run_config(command, config_path)?,
    }

    Ok(())
}

fn run_config(command: ConfigCommand, path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Init => config::init_config(path),
        ConfigCommand::Show => {
            let cfg = config::load_config(path)?;
            print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_ts(s: &str, cfg: &SchedulerConfig) -> Result<DateTime<Utc>> {
    Ok(parse_instant(s, cfg.tz()?)?)
}

fn snapshot_location(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => state::snapshot_path(),
    }
}

fn load_snapshot(explicit: Option<&Path>) -> Result<Snapshot> {
    Snapshot::load(&snapshot_location(explicit)?)
}

fn require_worker(snap: &Snapshot, worker: &str) -> Result<()> {
    if snap.worker(worker).is_none() {
        bail!("unknown worker {worker}");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}
