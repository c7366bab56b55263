//! Server command implementation

use std::path::Path;

use anyhow::{Context, Result};

use super::open_engine;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
    config_path: Option<&Path>,
    static_dir: Option<&Path>,
) -> Result<()> {
    println!("🚀 Starting Sift web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    if let Some(dir) = static_dir {
        println!("   Static files: {}", dir.display());
    }

    let config = sift_server::ServerConfig::from_env(!no_auth);

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if config.api_keys.is_empty() {
        println!("   ❌ No API keys configured: set SIFT_API_KEYS or use --no-auth");
    } else {
        println!(
            "   🔑 API keys: {} configured (SIFT_API_KEYS)",
            config.api_keys.len()
        );
    }
    if !config.allowed_origins.is_empty() {
        println!(
            "   🌐 CORS origins: {} (SIFT_ALLOWED_ORIGINS)",
            config.allowed_origins.join(", ")
        );
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let engine = open_engine(db_path, no_encrypt, config_path)?;

    // Ensure categories are seeded (idempotent)
    engine
        .db()
        .seed_default_categories()
        .context("Failed to seed categories")?;

    let static_dir_str = static_dir
        .map(|p| p.to_str().context("static_dir path must be valid UTF-8"))
        .transpose()?;
    sift_server::serve_with_config(engine, host, port, static_dir_str, config).await?;

    Ok(())
}
