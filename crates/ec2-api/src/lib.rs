//! Typed Rust client for the Amazon EC2 Query API.
//!
//! Covers the subset needed for launching spot fleets:
//! spot price history and spot fleet requests.

mod sigv4;
mod types;
mod xml;

pub use types::*;

use chrono::{DateTime, Utc};

const API_VERSION: &str = "2016-11-15";

/// JSON member names whose EC2 query name differs from the SDK shape name.
const QUERY_NAMES: &[(&str, &str)] = &[
    ("SecurityGroups", "GroupSet"),
    ("BlockDeviceMappings", "BlockDeviceMapping"),
    ("NetworkInterfaces", "NetworkInterfaceSet"),
    ("TagSpecifications", "TagSpecificationSet"),
    ("Tags", "Tag"),
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ec2 api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ec2 api {action} returned {status}: {code}: {message}")]
    Api {
        action: &'static str,
        status: reqwest::StatusCode,
        code: String,
        message: String,
    },

    #[error("ec2 api {action} response could not be parsed: {reason}")]
    Parse {
        action: &'static str,
        reason: String,
    },

    #[error("invalid ec2 endpoint: {0}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the EC2 Query API, signing every call with SigV4.
#[derive(Clone)]
pub struct Ec2Client {
    region: String,
    endpoint: String,
    credentials: Credentials,
    http: reqwest::Client,
}

impl Ec2Client {
    pub fn new(region: impl Into<String>, credentials: Credentials) -> Self {
        let region = region.into();
        Self {
            endpoint: format!("https://ec2.{region}.amazonaws.com"),
            region,
            credentials,
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at a different endpoint (VPC endpoint, local stub).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn call(&self, action: &'static str, params: Vec<(String, String)>) -> Result<String> {
        let mut form = vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
        ];
        form.extend(params);

        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|_| Error::InvalidEndpoint(self.endpoint.clone()))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(Error::InvalidEndpoint(self.endpoint.clone())),
        };
        let path = url.path().to_string();

        let request = self.http.post(url).form(&form).build()?;
        let content_type = request
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let body = request.body().and_then(|b| b.as_bytes()).unwrap_or_default();

        let signature = sigv4::sign(
            &sigv4::SigningRequest {
                host: &host,
                path: &path,
                content_type,
                body,
                region: &self.region,
                service: "ec2",
            },
            &self.credentials,
            Utc::now(),
        );

        let mut req = reqwest::RequestBuilder::from_parts(self.http.clone(), request)
            .header("X-Amz-Date", signature.amz_date)
            .header("Authorization", signature.authorization);
        if let Some(token) = &self.credentials.session_token {
            req = req.header("X-Amz-Security-Token", token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            let code = xml::tag_text(&text, "Code")
                .map(xml::unescape)
                .unwrap_or_else(|| "Unknown".into());
            let message = xml::tag_text(&text, "Message")
                .map(xml::unescape)
                .unwrap_or_default();
            return Err(Error::Api {
                action,
                status,
                code,
                message,
            });
        }

        Ok(text)
    }

    // ── Spot prices ──────────────────────────────────────────────────

    /// Price history entries, newest first as EC2 returns them.
    pub async fn describe_spot_price_history(
        &self,
        req: &DescribeSpotPriceHistoryRequest,
    ) -> Result<Vec<SpotPrice>> {
        const ACTION: &str = "DescribeSpotPriceHistory";

        let body = self.call(ACTION, req.to_params()).await?;
        let set = xml::tag_text(&body, "spotPriceHistorySet").unwrap_or_default();

        xml::elements(set, "item")
            .into_iter()
            .map(|item| parse_spot_price(ACTION, item))
            .collect()
    }

    // ── Spot fleets ──────────────────────────────────────────────────

    /// Submit a spot fleet request and return its `sfr-` identifier.
    ///
    /// `config` is the `SpotFleetRequestConfig` document in SDK JSON shape; it
    /// is flattened into query parameters (`Member.Sub`, lists as `Member.N`).
    pub async fn request_spot_fleet(&self, config: &serde_json::Value) -> Result<String> {
        const ACTION: &str = "RequestSpotFleet";

        let mut params = Vec::new();
        flatten_params("SpotFleetRequestConfig", config, &mut params);

        let body = self.call(ACTION, params).await?;
        xml::tag_text(&body, "spotFleetRequestId")
            .map(|id| id.trim().to_string())
            .ok_or_else(|| Error::Parse {
                action: ACTION,
                reason: "missing spotFleetRequestId".into(),
            })
    }
}

fn parse_spot_price(action: &'static str, item: &str) -> Result<SpotPrice> {
    let field = |tag: &str| xml::tag_text(item, tag).map(|s| xml::unescape(s.trim()));

    let raw_price = field("spotPrice").ok_or_else(|| Error::Parse {
        action,
        reason: "item without spotPrice".into(),
    })?;
    let spot_price = raw_price.parse::<f64>().map_err(|_| Error::Parse {
        action,
        reason: format!("spotPrice {raw_price:?} is not a number"),
    })?;

    let timestamp = field("timestamp")
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(SpotPrice {
        availability_zone: field("availabilityZone").unwrap_or_default(),
        instance_type: field("instanceType").unwrap_or_default(),
        product_description: field("productDescription").unwrap_or_default(),
        spot_price,
        timestamp,
    })
}

fn flatten_params(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    use serde_json::Value;

    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_params(&format!("{prefix}.{}", i + 1), item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let name = QUERY_NAMES
                    .iter()
                    .find(|(json, _)| *json == key.as_str())
                    .map(|(_, query)| *query)
                    .unwrap_or(key.as_str());
                flatten_params(&format!("{prefix}.{name}"), item, out);
            }
        }
    }
}
