#![deny(warnings)]

use persistence::{default_sqlite_url, FormStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| default_sqlite_url().to_string());
    let store = FormStore::open(&url).await?;
    let saved = if store.load().await?.is_some() {
        "saved form present"
    } else {
        "no saved form"
    };
    println!("DB migrated at {} ({})", url, saved);
    Ok(())
}
