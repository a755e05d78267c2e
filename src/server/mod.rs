pub mod api;

use anyhow::Result;

use crate::config::Config;

pub use api::{router, AppState};

pub async fn start(config: Config) -> Result<()> {
    api::serve(config).await
}
