use anyhow::Result;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use trafficwatch::api::RestApi;
use trafficwatch::config;
use trafficwatch::db::repositories::{AccidentStore, AccidentsRepository};
use trafficwatch::db::DatabaseService;
use trafficwatch::messaging::{Broadcaster, MqttIngest};
use trafficwatch::services::{AccidentService, ClassifierService};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting trafficwatch accident service");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;
    info!("Configuration loaded");

    let database = DatabaseService::new(&config.database).await?;
    let store: Arc<dyn AccidentStore> = Arc::new(AccidentsRepository::new(database.pool.clone()));

    let broadcaster = Arc::new(Broadcaster::new());

    let classifier = Arc::new(ClassifierService::new(
        config.classifier.clone(),
        store.clone(),
        broadcaster.clone(),
    )?);

    let service = Arc::new(AccidentService::new(
        store,
        broadcaster.clone(),
        classifier,
    ));

    MqttIngest::new(config.broker.clone(), service.clone()).spawn();
    info!("MQTT ingestion bridge started");

    let api = RestApi::new(&config.api, service, broadcaster)?;
    api.run().await?;

    Ok(())
}
