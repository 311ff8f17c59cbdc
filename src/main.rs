use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::{Config, LogFormat, LoggingSettings, load_config_from};
use core_types::{
    Clock, ExecutionLogEntry, Frequency, Nominee, PlanChanges, PlanRequest, PlanStatus, PlanType,
    Product, SystemClock, SystematicPlan,
};
use database::{DbRepository, InMemoryPlanStore, LogQuery, PlanQuery, PlanStore, connect, run_migrations};
use engine::{ExecutionScheduler, LifecycleError, PlanLifecycle};
use events::{DaySummary, LifecycleEvent};
use executor::{InMemoryCatalog, SimulatedOrderBook};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use uuid::Uuid;
use validation::ValidationEngine;

/// The main entry point for the Cadence systematic-plan engine.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let _guard = init_logging(&config.logging, cli.log_format.unwrap_or(config.logging.format));

    let app = App::build(&cli, &config).await?;

    match cli.command {
        Commands::Run => handle_run(&app).await,
        Commands::RunOnce(args) => handle_run_once(&app, args).await,
        Commands::Plans(command) => handle_plans(&app, command).await,
        Commands::Log(args) => handle_log(&app, args).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Schedules and executes systematic investment, transfer and withdrawal plans.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file. Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// JSON file listing products and current market values.
    #[arg(long, global = true, default_value = "catalog.json")]
    catalog: PathBuf,

    /// Keep plans in memory instead of Postgres. Nothing survives the process.
    #[arg(long, global = true)]
    paper: bool,

    /// Overrides `logging.format` from the configuration.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily scheduler until interrupted.
    Run,
    /// Work a single business day and print its summary.
    RunOnce(RunOnceArgs),
    /// Create, inspect, modify and cancel plans.
    #[command(subcommand)]
    Plans(PlanCommands),
    /// Browse the execution log.
    Log(LogArgs),
}

#[derive(Parser)]
struct RunOnceArgs {
    /// The business date to run (format: YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum PlanCommands {
    /// List plans matching the given filters.
    List(ListArgs),
    /// Show a single plan.
    Show { plan_id: Uuid },
    /// Open a new plan.
    Create(CreateArgs),
    /// Change the terms of an active plan.
    Modify(ModifyArgs),
    /// Cancel an active plan.
    Cancel {
        plan_id: Uuid,
        /// Confirms the cancellation.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Parser)]
struct ListArgs {
    #[arg(long)]
    status: Option<PlanStatus>,
    #[arg(long = "type")]
    plan_type: Option<PlanType>,
    /// Matches either the source or the target product.
    #[arg(long)]
    product: Option<String>,
    /// Earliest next execution date (format: YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Latest next execution date (format: YYYY-MM-DD).
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Fragment of the plan id.
    #[arg(long)]
    search: Option<String>,
}

#[derive(Parser)]
struct CreateArgs {
    #[arg(long = "type")]
    plan_type: PlanType,
    #[arg(long)]
    product: String,
    /// Target product (STP only).
    #[arg(long)]
    target: Option<String>,
    #[arg(long)]
    amount: Decimal,
    #[arg(long, default_value = "monthly")]
    frequency: Frequency,
    /// First installment date (format: YYYY-MM-DD).
    #[arg(long)]
    start: NaiveDate,
    #[arg(long)]
    installments: u32,
    /// JSON file with the nominee list. Without it the plan opts out of nomination.
    #[arg(long)]
    nominees: Option<PathBuf>,
    #[arg(long)]
    broker_code: Option<String>,
}

#[derive(Parser)]
struct ModifyArgs {
    plan_id: Uuid,
    #[arg(long)]
    amount: Option<Decimal>,
    #[arg(long)]
    installments: Option<u32>,
    /// Replaces the nominee list from a JSON file.
    #[arg(long, conflicts_with = "opt_out")]
    nominees: Option<PathBuf>,
    /// Opts the plan out of nomination.
    #[arg(long)]
    opt_out: bool,
    #[arg(long, conflicts_with = "clear_broker_code")]
    broker_code: Option<String>,
    #[arg(long)]
    clear_broker_code: bool,
}

#[derive(Parser)]
struct LogArgs {
    #[arg(long)]
    plan: Option<Uuid>,
    /// Earliest due date (format: YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Latest due date (format: YYYY-MM-DD).
    #[arg(long)]
    to: Option<NaiveDate>,
}

// ==============================================================================
// Wiring
// ==============================================================================

/// The on-disk shape of `--catalog`.
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    products: Vec<Product>,
    #[serde(default)]
    market_values: HashMap<String, Decimal>,
}

struct App {
    lifecycle: Arc<PlanLifecycle>,
    scheduler: ExecutionScheduler,
    events: broadcast::Sender<LifecycleEvent>,
}

impl App {
    async fn build(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn PlanStore> = if cli.paper {
            tracing::info!("Paper mode: plans are kept in memory.");
            Arc::new(InMemoryPlanStore::new())
        } else {
            let pool = connect(&config.database).await?;
            run_migrations(&pool).await?;
            Arc::new(DbRepository::new(pool))
        };

        let catalog = Arc::new(load_catalog(&cli.catalog).await?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let validator = ValidationEngine::new(config.validation.clone())?;
        let (events, _) = broadcast::channel(256);

        let lifecycle = Arc::new(
            PlanLifecycle::new(store, catalog.clone(), catalog, validator, clock).with_events(events.clone()),
        );
        let scheduler = ExecutionScheduler::new(
            lifecycle.clone(),
            Arc::new(SimulatedOrderBook::new()),
            &config.scheduler,
        )?;

        Ok(Self {
            lifecycle,
            scheduler,
            events,
        })
    }
}

async fn load_catalog(path: &Path) -> anyhow::Result<InMemoryCatalog> {
    let file: CatalogFile = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Catalog file not found; every product will be unknown.");
            CatalogFile::default()
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    tracing::info!(products = file.products.len(), "Catalog loaded.");
    let catalog = InMemoryCatalog::with_products(file.products);
    for (product_id, value) in &file.market_values {
        catalog.set_market_value(product_id, *value).await;
    }
    Ok(catalog)
}

fn load_nominees(path: &Path) -> anyhow::Result<Vec<Nominee>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Installs the global subscriber. The returned guard flushes the log file on drop.
fn init_logging(settings: &LoggingSettings, format: LogFormat) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let console = match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    // `rolling::daily` panics if it cannot create the file, so check the directory first.
    let (file_layer, guard) = match settings.directory.as_deref() {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "cadence.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!("Warning: could not create log directory {} ({}); file logging disabled", dir, e);
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    guard
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_run(app: &App) -> anyhow::Result<()> {
    let mut events = app.events.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.to_json() {
                    Ok(json) => tracing::debug!(target: "cadence::events", %json, "Lifecycle event."),
                    Err(e) => tracing::warn!(error = %e, "Could not serialize lifecycle event."),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind.");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tracing::info!("Scheduler started. Press Ctrl+C to stop.");
    tokio::select! {
        _ = app.scheduler.run_forever() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl+C")?;
            tracing::info!("Shutdown requested.");
        }
    }
    event_log.abort();
    Ok(())
}

async fn handle_run_once(app: &App, args: RunOnceArgs) -> anyhow::Result<()> {
    let date = args.date.unwrap_or_else(|| SystemClock.today());
    let summary = app.scheduler.run_business_day(date).await?;
    print_summary(&summary);
    Ok(())
}

async fn handle_plans(app: &App, command: PlanCommands) -> anyhow::Result<()> {
    match command {
        PlanCommands::List(args) => {
            let query = PlanQuery {
                plan_type: args.plan_type,
                status: args.status,
                product_id: args.product,
                from: args.from,
                to: args.to,
                plan_id_contains: args.search,
            };
            let plans = app.lifecycle.query(&query).await?;
            print_plans(&plans);
        }
        PlanCommands::Show { plan_id } => {
            let plan = app.lifecycle.get(plan_id).await?;
            print_plans(std::slice::from_ref(&plan));
            let log = app.lifecycle.execution_log(&LogQuery::for_plan(plan_id)).await?;
            print_log(&log);
        }
        PlanCommands::Create(args) => {
            let nominees = args.nominees.as_deref().map(load_nominees).transpose()?;
            let request = PlanRequest {
                plan_type: args.plan_type,
                product_id: args.product,
                target_product_id: args.target,
                amount: args.amount,
                frequency: args.frequency,
                start_date: args.start,
                total_installments: args.installments,
                opted_out_of_nomination: nominees.is_none(),
                nominees: nominees.unwrap_or_default(),
                broker_code: args.broker_code,
            };
            let plan = report_rejection(app.lifecycle.create(request).await)?;
            println!("Created plan {}", plan.plan_id);
        }
        PlanCommands::Modify(args) => {
            let nominees = args.nominees.as_deref().map(load_nominees).transpose()?;
            let broker_code = match (args.broker_code, args.clear_broker_code) {
                (Some(code), _) => Some(Some(code)),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let changes = PlanChanges {
                amount: args.amount,
                total_installments: args.installments,
                opted_out_of_nomination: if args.opt_out {
                    Some(true)
                } else {
                    nominees.as_ref().map(|_| false)
                },
                nominees: if args.opt_out { Some(Vec::new()) } else { nominees },
                broker_code,
            };
            let plan = report_rejection(app.lifecycle.modify(args.plan_id, changes).await)?;
            println!("Modified plan {} (version {})", plan.plan_id, plan.version);
        }
        PlanCommands::Cancel { plan_id, yes } => {
            let plan = app.lifecycle.cancel(plan_id, yes).await?;
            println!("Cancelled plan {}", plan.plan_id);
        }
    }
    Ok(())
}

async fn handle_log(app: &App, args: LogArgs) -> anyhow::Result<()> {
    let query = LogQuery {
        plan_id: args.plan,
        from: args.from,
        to: args.to,
    };
    let entries = app.lifecycle.execution_log(&query).await?;
    print_log(&entries);
    Ok(())
}

/// Lists every validation error on its own line before failing.
fn report_rejection(result: Result<SystematicPlan, LifecycleError>) -> anyhow::Result<SystematicPlan> {
    match result {
        Err(LifecycleError::Validation(errors)) => {
            eprintln!("Plan rejected:");
            for error in &errors {
                eprintln!("  - {}", error);
            }
            anyhow::bail!("{} validation error(s)", errors.len())
        }
        other => Ok(other?),
    }
}

// ==============================================================================
// Output
// ==============================================================================

fn print_plans(plans: &[SystematicPlan]) {
    let mut table = Table::new();
    table.set_header(vec![
        "Plan", "Type", "Product", "Target", "Amount", "Frequency", "Progress", "Next", "Status",
    ]);
    for plan in plans {
        table.add_row(vec![
            plan.plan_id.to_string(),
            plan.plan_type.to_string(),
            plan.product_id.clone(),
            plan.target_product_id.clone().unwrap_or_else(|| "-".to_string()),
            plan.amount.to_string(),
            plan.frequency.to_string(),
            format!("{}/{}", plan.installments_executed, plan.total_installments),
            plan.next_execution_date.to_string(),
            plan.status.to_string(),
        ]);
    }
    println!("{table}");
    println!("{} plan(s)", plans.len());
}

fn print_log(entries: &[ExecutionLogEntry]) {
    let mut table = Table::new();
    table.set_header(vec!["Plan", "Due", "Attempt", "At", "Outcome", "Order", "Reason"]);
    for entry in entries {
        table.add_row(vec![
            entry.plan_id.to_string(),
            entry.due_date.to_string(),
            entry.attempt_number.to_string(),
            entry.attempted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.outcome.to_string(),
            entry.order_id.clone().unwrap_or_default(),
            entry.reason.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
}

fn print_summary(summary: &DaySummary) {
    let mut table = Table::new();
    table.set_header(vec!["Date", "Due", "Executed", "Failed", "Skipped", "Attempts"]);
    table.add_row(vec![
        summary.date.to_string(),
        summary.due.to_string(),
        summary.executed.to_string(),
        summary.failed.to_string(),
        summary.skipped.to_string(),
        summary.attempts.to_string(),
    ]);
    println!("{table}");
}
