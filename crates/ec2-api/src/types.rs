use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static AWS credentials used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Spot price history ──────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DescribeSpotPriceHistoryRequest {
    pub availability_zone: Option<String>,
    pub instance_types: Vec<String>,
    pub product_descriptions: Vec<String>,
    pub max_results: Option<u32>,
}

impl DescribeSpotPriceHistoryRequest {
    pub(crate) fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(zone) = &self.availability_zone {
            params.push(("AvailabilityZone".to_string(), zone.clone()));
        }
        for (i, t) in self.instance_types.iter().enumerate() {
            params.push((format!("InstanceType.{}", i + 1), t.clone()));
        }
        for (i, p) in self.product_descriptions.iter().enumerate() {
            params.push((format!("ProductDescription.{}", i + 1), p.clone()));
        }
        if let Some(max) = self.max_results {
            params.push(("MaxResults".to_string(), max.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotPrice {
    pub availability_zone: String,
    pub instance_type: String,
    pub product_description: String,
    pub spot_price: f64,
    pub timestamp: Option<DateTime<Utc>>,
}
