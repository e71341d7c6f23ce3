use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{Result, timed};

/// Zones tried when nothing else is configured, highest priority first.
pub const DEFAULT_ZONES: &[&str] = &["eu-west-2a", "eu-west-2b", "eu-west-2c"];

/// Source of current spot prices.
#[async_trait]
pub trait PriceOracle: Send + Sync + 'static {
    /// Most recent spot price for `instance_type` in `zone`, USD/hour.
    ///
    /// Failures are reported as `Error::PriceQuery`, never as a high price.
    async fn quote(&self, zone: &str, instance_type: &str) -> Result<f64>;
}

/// The zone a launch settled on and the price it was quoted there.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneQuote {
    pub zone: String,
    pub price: f64,
}

/// Walk `zones` in order and stop at the first one priced at or under `ceiling`.
///
/// Later zones are never queried once an earlier one is acceptable. `None`
/// means every zone was over the ceiling. A failed quote aborts the walk.
pub async fn resolve_zone(
    oracle: &dyn PriceOracle,
    zones: &[String],
    instance_type: &str,
    ceiling: f64,
    timeout: Duration,
) -> Result<Option<ZoneQuote>> {
    for zone in zones {
        let price = timed("spot price query", timeout, oracle.quote(zone, instance_type)).await?;

        if price <= ceiling {
            info!(zone = %zone, price, ceiling, "spot price acceptable");
            return Ok(Some(ZoneQuote {
                zone: zone.clone(),
                price,
            }));
        }
        debug!(zone = %zone, price, ceiling, "spot price above ceiling, trying next zone");
    }

    Ok(None)
}
