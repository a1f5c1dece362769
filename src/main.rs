use anyhow::Result;
use clap::{Parser, Subcommand};

use crowdmon::{config, db::Database, logging};

#[derive(Parser)]
#[command(name = "crowdmon", version, about = "Distributed crowd-monitoring server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP/WS server and per-camera workers.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },

    /// List registered cameras.
    Cameras,

    /// Show recent entry/exit events for a camera.
    Recent {
        #[arg(short, long)]
        camera: String,
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Aggregate counters: cameras, active alerts, cross-camera movements.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let mut cfg = config::load_config().unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        config::default_config()
    });

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            crowdmon::serve(cfg).await?;
        }

        Command::Cameras => {
            let db = Database::open(&cfg.database.path)?;
            for camera in db.list_cameras()? {
                println!(
                    "{:<16} {:<12} {:<20} {}x{} @{:.1}fps [{:?}]",
                    camera.id, camera.edge_id, camera.location, camera.resolution.0, camera.resolution.1, camera.fps, camera.status
                );
            }
        }

        Command::Recent { camera, limit } => {
            let db = Database::open(&cfg.database.path)?;
            let events = db.recent_entry_exit_events(&camera, limit)?;
            if events.is_empty() {
                println!("No entry/exit events for camera {camera}.");
            } else {
                for event in events {
                    println!("{} {} zone={} track={} {:?}", event.timestamp, event.camera_id, event.zone_id, event.track_id, event.kind);
                }
            }
        }

        Command::Stats => {
            let db = Database::open(&cfg.database.path)?;
            let cameras = db.list_cameras()?;
            let active_alerts = db.active_alerts(None, None, u32::MAX)?;
            let (total_movements, avg_similarity) = db.movement_statistics()?;
            println!("cameras:          {}", cameras.len());
            println!("active alerts:    {}", active_alerts.len());
            println!("movements total:  {total_movements}");
            println!("avg similarity:   {avg_similarity:.3}");
        }
    }

    Ok(())
}
