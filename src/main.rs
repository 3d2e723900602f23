mod capture;
mod config;
mod console;
mod db;
mod error;
mod location;
mod models;
mod repository;
mod sos;

use std::sync::Arc;

use capture::device::FileMediaDevice;
use capture::upload::SupabaseStorage;
use config::AppConfig;
use location::{GpsdPositionSource, LocationProvider, PositionSource, StaticPositionSource};
use repository::PgAlertRepository;
use sos::machine::{AlertStateMachine, Collaborators, SosTimings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting SOS alert agent...");

    // Init DB
    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");

    let source: Option<Arc<dyn PositionSource>> = match (&config.gpsd_addr, config.fixed_position) {
        (Some(addr), _) => {
            info!("Using gpsd at {}", addr);
            Some(Arc::new(GpsdPositionSource::new(addr.clone())))
        }
        (None, Some(fix)) => {
            info!("Using fixed position {}, {}", fix.latitude, fix.longitude);
            Some(Arc::new(StaticPositionSource::new(fix)))
        }
        (None, None) => None,
    };

    let collaborators = Collaborators {
        store: Arc::new(PgAlertRepository::new(pool)),
        storage: Arc::new(SupabaseStorage::new(config.storage.clone())?),
        location: Arc::new(LocationProvider::new(source)),
        devices: Arc::new(FileMediaDevice::new(config.media_source.clone())),
    };

    let handle = AlertStateMachine::spawn(collaborators, config.context.clone(), SosTimings::default());

    console::run(handle).await
}
