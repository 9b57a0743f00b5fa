use std::env;
use std::fs;
use std::path::Path;

use outreach_site::db::SqliteStore;
use outreach_site::settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if it exists
    dotenvy::dotenv().ok();

    println!("Starting database migration...");

    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/outreach.db".to_string());
    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    println!("Opening {}...", db_path);
    let store = SqliteStore::open(&db_path)
        .map_err(|e| anyhow::anyhow!("Failed to open document store: {}", e))?;

    store.create_schema().await?;
    println!("Schema ready.");

    match settings::seed(&store).await {
        Ok(true) => println!("Seeded default application settings."),
        Ok(false) => println!("Skipping settings (already present)."),
        Err(e) => return Err(anyhow::anyhow!("Seeding settings failed: {}", e)),
    }

    println!("Migration complete.");
    Ok(())
}
