use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

use crate::Result;
use crate::template::Template;
use crate::types::{Environment, Server};

/// How long a submitted fleet request stays valid.
pub const VALIDITY_HOURS: i64 = 18;

/// Prefix EC2 puts on every spot fleet request id.
pub const REQUEST_ID_PREFIX: &str = "sfr";

/// Submits finished fleet request documents.
#[async_trait]
pub trait FleetApi: Send + Sync + 'static {
    /// Submit `config` and return the provider's request id.
    async fn submit(&self, config: &Value) -> Result<String>;
}

/// Fill the base fleet config and parse it into a request document.
///
/// The validity window runs from `now` to `now + 18h`. Price ceiling and
/// instance type always come from the server record, never from the zone
/// quote that cleared the price check.
pub fn build_fleet_request(
    base: &Template,
    bootstrap: &str,
    server: &Server,
    env: &Environment,
    now: DateTime<Utc>,
) -> Result<Value> {
    let from = iso_timestamp(now);
    let to = iso_timestamp(now + Duration::hours(VALIDITY_HOURS));

    let rendered = base.render(&[
        ("UDATA", bootstrap),
        ("FROM", from.as_str()),
        ("TO", to.as_str()),
        ("INSTANCETYPE", server.instance.as_str()),
        ("ACCOUNT", env.account_id.as_str()),
        ("KEY", env.key_name.as_str()),
        ("SGID", env.security_group_id.as_str()),
        ("MAXPRICE", server.maxprice.as_str()),
    ]);

    Ok(serde_json::from_str(&rendered)?)
}

/// `2024-03-01T12:00:00.000Z`
pub fn iso_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn is_fleet_request_id(id: &str) -> bool {
    id.starts_with(REQUEST_ID_PREFIX)
}
