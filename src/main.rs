use log::{error, info};
use movie_night::config::Settings;
use movie_night::db::Database;
use movie_night::tasks;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let settings = Settings::from_env();

    // Initialize database
    let database = match Database::new(&settings).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to {}", settings.database_url);

    tasks::round_ender::check_due_rounds_task(database, settings.check_interval_seconds).await;
}
