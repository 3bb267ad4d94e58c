use anyhow::Result;
use std::sync::Arc;

use gradewatch::config::Config;
use gradewatch::messaging::ChannelMessenger;
use gradewatch::portal::WebDriverPortal;
use gradewatch::scheduler::Engine;
use gradewatch::storage::GradeStore;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path =
        std::env::var("GRADEWATCH_CONFIG").unwrap_or_else(|_| "gradewatch.yml".to_string());
    let config = Config::load(&config_path)?;

    let store = GradeStore::open(&config.db_path)?;
    let portal = Arc::new(WebDriverPortal::new(&config));
    let messenger = Arc::new(ChannelMessenger::new());

    log::info!(
        "gradewatch starting, polling {} every {}s",
        config.portal_url,
        config.poll_interval_secs
    );

    let engine = Arc::new(Engine::new(store, portal, messenger, config));
    engine.run().await;
    Ok(())
}
