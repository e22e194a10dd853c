use mongodb::{options::ClientOptions, Client};

use crate::error::StorageError;

pub async fn setup_mongo(uri: &str) -> Result<Client, StorageError> {
    let mut client_options = ClientOptions::parse(uri).await?;
    client_options.app_name = Some("diceroom".to_string());
    Ok(Client::with_options(client_options)?)
}
