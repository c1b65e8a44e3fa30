//! RideControl command line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ridecontrol::controller::{
    drive_targets, ControllerConfig, ControllerInputs, RideCommand, RideController, RideUpdate,
};
use ridecontrol::metrics::zones::zone_for_power;
use ridecontrol::recording::{export_tcx_to_file, generate_tcx_filename, WorkoutRecord};
use ridecontrol::sensors::{
    supervise, BtleAdapter, DeviceSession, GattAdapter, HeartRateSession,
    SimulatedHeartRateConfig, SimulatedTrainerConfig, SimulatedAdapter, TrainerSession,
};
use ridecontrol::storage::{AppConfig, Database, WorkoutStore};
use ridecontrol::workouts::{export_zwo, parse_zwo_file, SessionEngine, WorkoutTemplate};

#[derive(Parser)]
#[command(name = "ridecontrol", version, about = "Smart trainer control and ride recording")]
struct Cli {
    /// Use a config file other than the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ride a free ride or a structured workout
    Ride(RideArgs),
    /// List recent rides
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Export a recorded ride as TCX
    Export {
        id: i64,
        /// Output file; defaults to a name derived from the ride
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import a .zwo workout as a template
    Import { path: PathBuf },
    /// Manage workout templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// Show or update configuration
    Config {
        /// Set the rider FTP in watts
        #[arg(long)]
        ftp: Option<u16>,
    },
}

#[derive(clap::Args)]
struct RideArgs {
    /// Use simulated devices instead of Bluetooth
    #[arg(long)]
    simulate: bool,
    /// Ride a stored template
    #[arg(long, conflicts_with = "workout")]
    template: Option<i64>,
    /// Ride a .zwo file directly
    #[arg(long)]
    workout: Option<PathBuf>,
    /// Skip the heart rate strap
    #[arg(long)]
    no_heart_rate: bool,
    /// FTP for this ride only, overriding the configured value
    #[arg(long)]
    ftp: Option<u16>,
    /// Write the finished ride to this TCX file
    #[arg(long, value_name = "FILE.tcx")]
    export: Option<PathBuf>,
}

#[derive(Subcommand)]
enum TemplateAction {
    List,
    Show { id: i64 },
    Delete { id: i64 },
    /// Write a template as .zwo
    Export { id: i64, out: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideControl v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Command::Config { ftp } => configure(config, cli.config, ftp),
        command => {
            let db = Arc::new(
                Database::open(&config.database_path()).context("Failed to open database")?,
            );
            match command {
                Command::Ride(args) => ride(&config, db, args).await,
                Command::History { limit } => history(db.as_ref(), limit),
                Command::Export { id, out } => export(db.as_ref(), id, out),
                Command::Import { path } => import(db.as_ref(), &path),
                Command::Templates { action } => templates(&config, db.as_ref(), action),
                Command::Config { .. } => Ok(()),
            }
        }
    }
}

fn configure(mut config: AppConfig, path: Option<PathBuf>, ftp: Option<u16>) -> Result<()> {
    if let Some(ftp) = ftp {
        config.rider.set_ftp(ftp)?;
        match &path {
            Some(path) => config.save_to(path),
            None => config.save(),
        }
        .context("Failed to save configuration")?;
        println!("FTP set to {}W", ftp);
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn ride(config: &AppConfig, db: Arc<Database>, args: RideArgs) -> Result<()> {
    let mut config = config.clone();
    if let Some(ftp) = args.ftp {
        config.rider.set_ftp(ftp)?;
    }

    let template = match (&args.template, &args.workout) {
        (Some(id), _) => Some(
            db.get_template(*id)?
                .with_context(|| format!("No template with id {}", id))?,
        ),
        (None, Some(path)) => Some(
            parse_zwo_file(path).with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let sensor_config = config.sensor_config();
    let adapter: Arc<dyn GattAdapter> = if args.simulate {
        Arc::new(
            SimulatedAdapter::new()
                .with_trainer(SimulatedTrainerConfig::default())
                .with_heart_rate(SimulatedHeartRateConfig::default()),
        )
    } else {
        Arc::new(BtleAdapter::new(sensor_config.discovery_timeout).await?)
    };

    let trainer = Arc::new(TrainerSession::new(adapter.clone(), sensor_config.clone()));
    let (trainer_tx, trainer_rx) = crossbeam::channel::unbounded();
    trainer
        .connect(trainer_tx.clone())
        .await
        .context("Failed to connect trainer")?;
    tokio::spawn(supervise(
        trainer.clone(),
        trainer_tx,
        sensor_config.clone(),
    ));

    let mut heart_rate = None;
    let mut heart_rate_rx = None;
    if !args.no_heart_rate {
        let session = Arc::new(HeartRateSession::new(adapter, sensor_config.clone()));
        let (tx, rx) = crossbeam::channel::unbounded();
        match session.connect(tx.clone()).await {
            Ok(()) => {
                tokio::spawn(supervise(session.clone(), tx, sensor_config.clone()));
                heart_rate = Some(session);
                heart_rate_rx = Some(rx);
            }
            Err(e) => tracing::warn!("Riding without heart rate: {}", e),
        }
    }

    let (target_tx, target_rx) = tokio::sync::mpsc::unbounded_channel();
    let erg = if trainer.supports_control() {
        tokio::spawn(drive_targets(trainer.clone(), target_rx));
        Some(target_tx)
    } else {
        tracing::warn!("Trainer has no control point, ERG targets disabled");
        None
    };

    let engine = SessionEngine::new(config.engine_config()).with_store(db);
    let handle = RideController::spawn(
        engine,
        ControllerInputs {
            trainer_events: Some(trainer_rx),
            heart_rate_events: heart_rate_rx,
            targets: erg,
        },
        ControllerConfig {
            live_metrics: config.live_metrics,
            ..Default::default()
        },
    )
    .context("Failed to start ride controller")?;

    handle.send(match template {
        Some(template) => RideCommand::StartWorkout(template),
        None => RideCommand::StartFreeRide,
    })?;
    println!("Riding. Press Ctrl+C to finish.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(Duration::from_millis(200));
    let mut stopping = false;

    let record = 'ride: loop {
        tokio::select! {
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                handle.send(RideCommand::Stop)?;
            }
            _ = poll.tick() => {
                while let Ok(update) = handle.updates().try_recv() {
                    match update {
                        RideUpdate::Progress { progress, snapshot } => {
                            let zone = config
                                .rider
                                .ftp
                                .and_then(|ftp| zone_for_power(snapshot.power_watts as f64, ftp))
                                .map(|z| format!(" {}", z))
                                .unwrap_or_default();
                            println!(
                                "{:>5}s {:>4}W{} {:>3.0}rpm {:>5.1}km/h hr {} target {}",
                                progress.elapsed_seconds,
                                snapshot.power_watts,
                                zone,
                                snapshot.cadence_rpm,
                                snapshot.speed_kmh,
                                snapshot
                                    .heart_rate_bpm
                                    .map(|hr| hr.to_string())
                                    .unwrap_or_else(|| "--".to_string()),
                                progress
                                    .target_power
                                    .map(|w| format!("{}W", w))
                                    .unwrap_or_else(|| "--".to_string()),
                            );
                        }
                        RideUpdate::LinkChanged { sensor, state } => {
                            println!("{} {}", sensor, state);
                        }
                        RideUpdate::Rejected { command, reason } => {
                            bail!("Could not {}: {}", command, reason);
                        }
                        RideUpdate::Completed(record) => break 'ride *record,
                    }
                }
            }
        }
    };

    tokio::task::spawn_blocking(move || handle.shutdown()).await?;
    trainer.disconnect().await;
    if let Some(session) = heart_rate {
        session.disconnect().await;
    }

    print_summary(&record);
    if let Some(path) = args.export {
        if record.samples.is_empty() {
            tracing::warn!("Ride has no samples, skipping TCX export");
        } else {
            export_tcx_to_file(&record, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn print_summary(record: &WorkoutRecord) {
    let s = &record.summary;
    println!("{}", record.name);
    println!(
        "  duration {}s, distance {:.2} km",
        s.duration_seconds, s.distance_km
    );
    println!("  power avg {:.0}W max {}W", s.avg_power, s.max_power);
    if let Some(np) = s.normalized_power {
        println!("  NP {:.0}W", np);
    }
    if let (Some(tss), Some(intensity)) = (s.tss, s.intensity_factor) {
        println!("  IF {:.2} TSS {:.0}", intensity, tss);
    }
    if let (Some(avg), Some(max)) = (s.avg_heart_rate, s.max_heart_rate) {
        println!("  heart rate avg {:.0} max {}", avg, max);
    }
    if let Some(id) = record.id {
        println!("  saved as #{}", id);
    }
}

fn history(db: &dyn WorkoutStore, limit: usize) -> Result<()> {
    let records = db.recent_records(limit)?;
    if records.is_empty() {
        println!("No rides recorded yet.");
    }
    for record in records {
        println!(
            "#{:<4} {} {:<32} {:>6}s {:>4.0}W avg",
            record.id.unwrap_or_default(),
            record.started_at.format("%Y-%m-%d %H:%M"),
            record.name,
            record.summary.duration_seconds,
            record.summary.avg_power,
        );
    }
    Ok(())
}

fn export(db: &dyn WorkoutStore, id: i64, out: Option<PathBuf>) -> Result<()> {
    let record = db
        .get_record(id)?
        .with_context(|| format!("No ride with id {}", id))?;
    let path = out.unwrap_or_else(|| PathBuf::from(generate_tcx_filename(&record)));
    export_tcx_to_file(&record, &path)
        .with_context(|| format!("Failed to export ride {}", id))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn import(db: &dyn WorkoutStore, path: &std::path::Path) -> Result<()> {
    let template =
        parse_zwo_file(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let id = db.save_template(&template)?;
    println!(
        "Imported '{}' ({} intervals) as template #{}",
        template.name,
        template.intervals.len(),
        id
    );
    Ok(())
}

fn templates(config: &AppConfig, db: &dyn WorkoutStore, action: TemplateAction) -> Result<()> {
    match action {
        TemplateAction::List => {
            for template in db.list_templates()? {
                println!(
                    "#{:<4} {:<32} {:>3} intervals {:>6}s",
                    template.id.unwrap_or_default(),
                    template.name,
                    template.intervals.len(),
                    template.total_duration_seconds()
                );
            }
        }
        TemplateAction::Show { id } => {
            let template = find_template(db, id)?;
            println!("{}", template.name);
            if let Some(description) = &template.description {
                println!("  {}", description);
            }
            for interval in &template.intervals {
                println!(
                    "  {:<24} {:>5}s {}",
                    interval.name, interval.duration_seconds, interval.target
                );
            }
        }
        TemplateAction::Delete { id } => {
            db.delete_template(id)?;
            println!("Deleted template #{}", id);
        }
        TemplateAction::Export { id, out } => {
            let template = find_template(db, id)?;
            let xml = export_zwo(&template, config.rider.ftp)?;
            std::fs::write(&out, xml)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote {}", out.display());
        }
    }
    Ok(())
}

fn find_template(db: &dyn WorkoutStore, id: i64) -> Result<WorkoutTemplate> {
    db.get_template(id)?
        .with_context(|| format!("No template with id {}", id))
}
