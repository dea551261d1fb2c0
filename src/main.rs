use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};

use stock_autoassign::{
    config::{self, AppConfig},
    db,
    events::{self, EventSender},
    models::{LocationId, MoveId, ShipmentId},
    services::{AssignReport, AutoAssignService, LockBackoffGate, ManualSelection, SweepScope},
    store::{PgLockProbe, SeaOrmStore},
};

#[derive(Parser)]
#[command(
    name = "stock-autoassign",
    about = "Reserve stock for waiting outbound shipments",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Run one sweep over the waiting backlog
    Sweep(ScopeArgs),
    /// Sweep on a fixed interval until interrupted
    Watch(ScopeArgs),
    /// Try to assign the given shipments one by one
    TryAssign(ShipmentIdsArgs),
    /// Handle shipments that just entered the waiting state
    Waiting(ShipmentIdsArgs),
    /// Handle completed inbound moves
    Received(MoveIdsArgs),
    /// Show which waiting shipments could be assigned, without writing
    Preview(SelectionArgs),
    /// Assign everything the preview accepts
    Assign(SelectionArgs),
    #[command(subcommand)]
    Cursor(CursorCommands),
}

#[derive(Subcommand)]
enum CursorCommands {
    /// Print the stored sweep position
    Show,
    /// Forget the sweep position
    Reset,
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long = "warehouse", help = "Limit to these warehouse ids (repeatable)")]
    warehouses: Vec<LocationId>,
}

#[derive(Args)]
struct ShipmentIdsArgs {
    #[arg(required = true)]
    ids: Vec<ShipmentId>,
}

#[derive(Args)]
struct MoveIdsArgs {
    #[arg(required = true)]
    ids: Vec<MoveId>,
}

#[derive(Args)]
struct SelectionArgs {
    #[arg(long = "warehouse", required = true, help = "Warehouse ids (repeatable)")]
    warehouses: Vec<LocationId>,
    #[arg(long, help = "Only shipments updated at or after this RFC 3339 instant")]
    since: Option<DateTime<Utc>>,
}

impl SelectionArgs {
    fn selection(&self) -> ManualSelection {
        ManualSelection {
            warehouses: self.warehouses.clone(),
            ..ManualSelection::default()
        }
        .since(self.since)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load application config")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let db_pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate || matches!(cli.command, Commands::Migrate) {
        db::run_migrations(&db_pool)
            .await
            .context("failed running migrations")?;
        if matches!(cli.command, Commands::Migrate) {
            return Ok(());
        }
    }
    let db = Arc::new(db_pool);

    let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
    let event_loop = tokio::spawn(events::process_events(event_rx));
    let service = build_service(&cfg, db, event_sender);

    let outcome = run(&cli, &cfg, &service).await;
    drop(service);
    if let Err(e) = event_loop.await {
        warn!("event loop ended abnormally: {}", e);
    }
    outcome
}

fn build_service(
    cfg: &AppConfig,
    db: Arc<db::DbPool>,
    events: EventSender,
) -> AutoAssignService {
    let store = SeaOrmStore::new(db.clone()).with_defaults(cfg.assign.settings_seed());
    let gate = LockBackoffGate::new(
        Arc::new(PgLockProbe::new(db)),
        cfg.assign.lock_poll_interval(),
    );
    AutoAssignService::new(Arc::new(store), gate, cfg.assign.options()).with_events(events)
}

async fn run(cli: &Cli, cfg: &AppConfig, service: &AutoAssignService) -> Result<()> {
    match &cli.command {
        Commands::Migrate => Ok(()),
        Commands::Sweep(args) => {
            let report = service
                .run_sweep(&SweepScope::warehouses(args.warehouses.clone()))
                .await
                .context("sweep failed")?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Swept {} block(s), {} shipment(s): {} assigned, {} rejected, {} failed; cursor ({}, {}]",
                    report.blocks,
                    report.visited,
                    report.assigned.len(),
                    report.rejected.len(),
                    report.failed.len(),
                    report.cursor.next_id,
                    report.cursor.last_id
                );
            }
            Ok(())
        }
        Commands::Watch(args) => {
            watch(cfg, service, SweepScope::warehouses(args.warehouses.clone())).await
        }
        Commands::TryAssign(args) => {
            let report = service.try_assign(&args.ids).await?;
            render_report(&report, cli.json)
        }
        Commands::Waiting(args) => {
            let report = service.on_shipments_waiting(&args.ids).await?;
            render_report(&report, cli.json)
        }
        Commands::Received(args) => {
            let report = service.on_inbound_received(&args.ids).await?;
            render_report(&report, cli.json)
        }
        Commands::Preview(args) => {
            let outcome = service.preview_assignable(&args.selection()).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!("Assignable: {:?}", outcome.accepted);
                println!("Short of stock: {:?}", outcome.rejected);
            }
            Ok(())
        }
        Commands::Assign(args) => {
            let report = service.assign_selected(&args.selection()).await?;
            render_report(&report, cli.json)
        }
        Commands::Cursor(CursorCommands::Show) => {
            let cursor = service.cursor().await?;
            if cli.json {
                print_json(&cursor)?;
            } else {
                println!("next_id={} last_id={}", cursor.next_id, cursor.last_id);
            }
            Ok(())
        }
        Commands::Cursor(CursorCommands::Reset) => {
            service.reset_cursor().await?;
            println!("Cursor reset");
            Ok(())
        }
    }
}

async fn watch(cfg: &AppConfig, service: &AutoAssignService, scope: SweepScope) -> Result<()> {
    let mut ticker = tokio::time::interval(cfg.assign.sweep_interval());
    info!(interval = ?cfg.assign.sweep_interval(), "watching waiting backlog");
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                return Ok(());
            }
            _ = ticker.tick() => {
                match service.run_sweep(&scope).await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err::<(), _>(e).context("sweep aborted"),
                    Err(e) => error!("sweep failed: {}", e),
                }
            }
        }
    }
}

fn render_report(report: &AssignReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    println!(
        "{} considered: {} assigned, {} rejected, {} skipped, {} failed",
        report.considered,
        report.assigned.len(),
        report.rejected.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (id, reason) in &report.failed {
        println!("- shipment {}: {}", id, reason);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
