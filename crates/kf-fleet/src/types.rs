use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Lifecycle state as stored on the server record.
///
/// Only `Stopped` and `Started` are managed here; anything else the record
/// store holds round-trips untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerState {
    Stopped,
    Started,
    Other(String),
}

impl ServerState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stopped => "Stopped",
            Self::Started => "Started",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ServerState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Stopped" => Self::Stopped,
            "Started" => Self::Started,
            _ => Self::Other(s),
        }
    }
}

impl From<ServerState> for String {
    fn from(state: ServerState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Player-facing credentials, only ever echoed back in the start message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Special {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub admin: String,
}

impl Special {
    pub fn is_empty(&self) -> bool {
        self.password.is_empty() && self.admin.is_empty()
    }
}

/// A game server record as kept by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    /// DNS label; the server answers on `<code>.<domain>`.
    pub code: String,
    /// EC2 instance type, e.g. `c5.large`.
    pub instance: String,
    /// Spot price ceiling in USD/hour, kept as entered.
    pub maxprice: String,
    #[serde(rename = "lastState")]
    pub last_state: ServerState,
    #[serde(rename = "lastSFR", default, skip_serializing_if = "Option::is_none")]
    pub last_sfr: Option<String>,
    #[serde(default, skip_serializing_if = "Special::is_empty")]
    pub special: Special,
    /// Fields owned by the record store that launching never touches.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Server {
    /// The ceiling as a number. Must be finite and not negative.
    pub fn max_price(&self) -> Result<f64> {
        match self.maxprice.trim().parse::<f64>() {
            Ok(price) if price.is_finite() && price >= 0.0 => Ok(price),
            _ => Err(Error::InvalidMaxPrice(self.maxprice.clone())),
        }
    }

    pub fn address(&self, domain: &str) -> String {
        format!("{}.{domain}", self.code)
    }

    /// Copy of this record after a fleet request was accepted.
    pub fn started(&self, request_id: &str) -> Self {
        Self {
            last_state: ServerState::Started,
            last_sfr: Some(request_id.to_string()),
            ..self.clone()
        }
    }
}

/// Per-request deployment context. Built fresh for every launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub region: String,
    #[serde(rename = "awsAccountId")]
    pub account_id: String,
    #[serde(rename = "kf2sgid")]
    pub security_group_id: String,
    #[serde(rename = "keyName")]
    pub key_name: String,
    #[serde(rename = "hostedZone")]
    pub hosted_zone_id: String,
    pub domain: String,
    #[serde(rename = "facebookAccessToken", default)]
    pub facebook_token: String,
    #[serde(rename = "kf2configBucket")]
    pub config_bucket: String,
    #[serde(rename = "discordWebhook", default)]
    pub discord_webhook: Option<String>,
}

impl Environment {
    /// Build from env vars:
    ///
    /// - `AWS_REGION` (default: `"eu-west-2"`)
    /// - `AWS_ACCOUNT_ID`, `KF_SECURITY_GROUP_ID`, `KF_KEY_NAME`,
    ///   `KF_HOSTED_ZONE_ID`, `KF_DOMAIN`, `KF_CONFIG_BUCKET` (required)
    /// - `KF_FACEBOOK_TOKEN` (default: empty)
    /// - `KF_DISCORD_WEBHOOK` (optional)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Environment::from_env`], reading variables through `var`.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| var(key).ok_or_else(|| Error::MissingEnv(key.into()));

        Ok(Self {
            region: var("AWS_REGION").unwrap_or_else(|| "eu-west-2".into()),
            account_id: required("AWS_ACCOUNT_ID")?,
            security_group_id: required("KF_SECURITY_GROUP_ID")?,
            key_name: required("KF_KEY_NAME")?,
            hosted_zone_id: required("KF_HOSTED_ZONE_ID")?,
            domain: required("KF_DOMAIN")?,
            facebook_token: var("KF_FACEBOOK_TOKEN").unwrap_or_default(),
            config_bucket: required("KF_CONFIG_BUCKET")?,
            discord_webhook: var("KF_DISCORD_WEBHOOK").filter(|s| !s.trim().is_empty()),
        })
    }
}
