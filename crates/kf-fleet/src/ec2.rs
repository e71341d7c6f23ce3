use async_trait::async_trait;
use ec2_api::{Credentials, DescribeSpotPriceHistoryRequest, Ec2Client};
use serde_json::Value;
use tracing::info;

use crate::fleet::FleetApi;
use crate::pricing::PriceOracle;
use crate::{Error, Result};

const PRODUCT_DESCRIPTION: &str = "Linux/UNIX";

/// EC2 spot market: price history for quotes, spot fleet for submission.
///
/// Delegates to `ec2_api::Ec2Client` for all HTTP calls.
#[derive(Clone)]
pub struct Ec2Market {
    client: Ec2Client,
}

impl Ec2Market {
    pub fn new(client: Ec2Client) -> Self {
        Self { client }
    }

    /// Create from env vars:
    ///
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` (required)
    /// - `AWS_SESSION_TOKEN` (optional)
    /// - `AWS_REGION` (default: `"eu-west-2"`)
    /// - `EC2_ENDPOINT` (optional override)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::MissingEnv("AWS_ACCESS_KEY_ID".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::MissingEnv("AWS_SECRET_ACCESS_KEY".into()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "eu-west-2".into());

        let mut client = Ec2Client::new(
            region,
            Credentials {
                access_key_id,
                secret_access_key,
                session_token,
            },
        );
        if let Ok(endpoint) = std::env::var("EC2_ENDPOINT") {
            client = client.with_endpoint(endpoint);
        }

        Ok(Self { client })
    }
}

#[async_trait]
impl PriceOracle for Ec2Market {
    async fn quote(&self, zone: &str, instance_type: &str) -> Result<f64> {
        let history = self
            .client
            .describe_spot_price_history(&DescribeSpotPriceHistoryRequest {
                availability_zone: Some(zone.to_string()),
                instance_types: vec![instance_type.to_string()],
                product_descriptions: vec![PRODUCT_DESCRIPTION.to_string()],
                max_results: Some(1),
            })
            .await
            .map_err(|e| Error::PriceQuery {
                zone: zone.to_string(),
                reason: e.to_string(),
            })?;

        let latest = history.first().ok_or_else(|| Error::PriceQuery {
            zone: zone.to_string(),
            reason: format!("no spot price history for {instance_type}"),
        })?;

        info!(zone, instance_type, price = latest.spot_price, "ec2: spot price quoted");
        Ok(latest.spot_price)
    }
}

#[async_trait]
impl FleetApi for Ec2Market {
    async fn submit(&self, config: &Value) -> Result<String> {
        let id = self
            .client
            .request_spot_fleet(config)
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;

        info!(request_id = %id, "ec2: spot fleet requested");
        Ok(id)
    }
}
