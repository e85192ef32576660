//! Chorus room server.
//!
//! ```text
//! chorus-server [config.toml]
//! ```
//!
//! The config path may also come from `CHORUS_CONFIG`; without one the
//! defaults are used. `RUST_LOG` controls log filtering (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use chorus_collab::{admin, RoomServer, ServerConfig, SessionRegistry};
use log::info;
use tokio::net::TcpListener;

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CHORUS_CONFIG").ok())
        .map(PathBuf::from)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config_path() {
        Some(path) => {
            info!("Loading config from {}", path.display());
            ServerConfig::load(&path)?
        }
        None => ServerConfig::default(),
    };

    let registry = Arc::new(SessionRegistry::open(config.clone())?);

    if let Some(admin_addr) = config.admin_addr {
        let listener = TcpListener::bind(admin_addr).await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, registry).await {
                log::error!("Admin server stopped: {e}");
            }
        });
    }

    let server = RoomServer::new(registry);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
