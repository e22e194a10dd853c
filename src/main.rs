use std::process;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use diceroom::config::mongo_config::setup_mongo;
use diceroom::config::settings::{Settings, StorageBackend};
use diceroom::game::payout::PayoutTable;
use diceroom::repository::file_repository::FileRepository;
use diceroom::repository::mongo_repository::MongoRepository;
use diceroom::repository::Storage;
use diceroom::services::scheduler_service::GameScheduler;
use diceroom::services::websocket_service::run_websocket_server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Arc::new(Settings::from_env());

    let payout = match PayoutTable::from_settings(&settings) {
        Ok(payout) => payout,
        Err(err) => {
            error!(error = %err, "invalid payout configuration");
            process::exit(1);
        }
    };

    let storage: Arc<dyn Storage> = match settings.storage_backend {
        StorageBackend::Mongo => {
            let client = match setup_mongo(&settings.mongo_uri).await {
                Ok(client) => client,
                Err(err) => {
                    error!(error = %err, "could not connect to mongodb");
                    process::exit(1);
                }
            };
            info!(uri = %settings.mongo_uri, "using mongodb storage");
            Arc::new(MongoRepository::new(&client))
        }
        StorageBackend::File => {
            let repository = match FileRepository::open(&settings.data_file).await {
                Ok(repository) => repository,
                Err(err) => {
                    error!(error = %err, "could not open data file");
                    process::exit(1);
                }
            };
            info!(path = %settings.data_file.display(), "using flat-file storage");
            Arc::new(repository)
        }
    };

    let scheduler = Arc::new(GameScheduler::new(Arc::clone(&settings), payout, storage));
    if let Err(err) = scheduler.recover_all().await {
        error!(error = %err, "startup recovery failed");
        process::exit(1);
    }

    run_websocket_server(&settings.listen_addr, scheduler).await;
}
