//! Price-gated spot fleet launches for game servers.
//!
//! A launch renders the bootstrap scripts, walks the availability zones in
//! priority order until one quotes a spot price under the server's ceiling,
//! fills in the fleet request document and submits it. The server record is
//! only advanced to `Started` once the cloud hands back a fleet request id.

pub mod bootstrap;
pub mod config;
pub mod ec2;
pub mod fleet;
pub mod launch;
pub mod notify;
pub mod pricing;
pub mod template;
pub mod types;

use std::time::Duration;

pub use launch::{LaunchOutcome, LaunchReport, Launcher};
pub use types::{Environment, Server, ServerState};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("template {name} could not be read: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spot price lookup in {zone} failed: {reason}")]
    PriceQuery { zone: String, reason: String },

    #[error("Spot instance price is currently too high to start {0}")]
    PriceTooHigh(String),

    #[error("{0} must be stopped first")]
    Precondition(String),

    #[error("{0} is already being started")]
    LaunchInProgress(String),

    #[error("spot fleet request was rejected: {0}")]
    Submission(String),

    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },

    #[error("fleet request document is not valid JSON: {0}")]
    InvalidFleetConfig(#[from] serde_json::Error),

    #[error("max price {0:?} is not a number")]
    InvalidMaxPrice(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Run one external call under a deadline, naming the step on expiry.
pub(crate) async fn timed<T>(
    step: &'static str,
    after: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { step, after })?
}
