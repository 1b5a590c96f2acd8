mod database;
mod eager_env;
mod logging;
mod positions;
mod queries;
mod store;
mod worker;

use crate::{
    database::{connect_db, parse_database_urls},
    eager_env::check_env,
    positions::PositionService,
    worker::{RecalculationScheduler, referrals::ReferralEventManager},
};
use std::{sync::Arc, time::Duration};

#[tokio::main]
async fn main() {
    // Variables already set in the environment take precedence over `.env`.
    let dotenv = dotenvy::dotenv();
    logging::init();

    match dotenv {
        Ok(path) => log::info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("Failed to load .env file: {e}"),
    }
    check_env();

    let node_urls = parse_database_urls(&eager_env::DATABASE_NODE_URLS);

    let database = connect_db(&node_urls, &eager_env::DATABASE_KEYSPACE)
        .await
        .expect("failed to connect to the database");
    let database = Arc::new(database);

    let service = PositionService::new(database.clone());

    let stop_scheduler = RecalculationScheduler::new(
        service.clone(),
        Duration::from_secs(*eager_env::RECALCULATION_INTERVAL_SECONDS),
        *eager_env::DATABASE_CONCURRENT_REQUESTS,
    )
    .start();

    // Event sources (signup and verification handlers) push into this manager.
    let referrals = ReferralEventManager::new(service, *eager_env::DATABASE_CONCURRENT_REQUESTS);

    log::info!("Waitlist position service running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
    }

    log::info!("Shutting down");

    stop_scheduler();
    referrals.close().await;
}
