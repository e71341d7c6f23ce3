use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use kf_fleet::config::LaunchConfig;
use kf_fleet::{Environment, Launcher, Server};

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .expect("usage: kf-launch <server.json>")
        .into();

    let raw = tokio::fs::read_to_string(&path)
        .await
        .expect("failed to read server record");
    let server: Server = serde_json::from_str(&raw).expect("server record is not valid JSON");

    let config = LaunchConfig::from_env();
    let env = Environment::from_env().expect("failed to load launch environment");
    let launcher = Launcher::from_config(&config).expect("failed to build launcher");
    tracing::info!(zones = ?launcher.zones(), server = %server.name, "launcher ready");

    let report = launcher.launch(&server, &env).await;
    println!("{}", report.message);

    // Only a started server changes; everything else leaves the record as is.
    if let Some(updated) = report.server {
        let json = serde_json::to_string_pretty(&updated).expect("Server is always serializable");
        tokio::fs::write(&path, json + "\n")
            .await
            .expect("failed to write server record");
        tracing::info!(path = %path.display(), state = %updated.last_state, "server record updated");
    }
}
