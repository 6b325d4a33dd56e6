use std::{fs, fs::File, sync::Arc};

use chrono::Local;
use log::info;
use schemasync::{
    backup::BackupManager, client::tui::ReplicationUI, config::AppConfig, DbManager,
};

const LOG_DIR: &str = "logs";

/// The terminal belongs to the UI, so log records go to a per-run file.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(LOG_DIR)?;
    let path = format!(
        "{}/schemasync_{}.log",
        LOG_DIR,
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let file = File::create(path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_logging()?;

    let config = AppConfig::load(AppConfig::default_path())?;
    let db_manager = Arc::new(DbManager::from_config(&config)?);
    let backups = BackupManager::new(AppConfig::backup_dir())?;
    info!("Starting schemasync with {}", config.path().display());

    let mut tui = ReplicationUI::new(db_manager, config, backups);
    tui.run_ui().await?;

    Ok(())
}
