use std::time::Duration;

use tracing::debug;

use crate::template::{Template, TemplateNames, TemplateSource, encode};
use crate::types::Environment;
use crate::{Result, timed};

/// Build the base64 user data for a new game server instance.
///
/// The service, monitor and prepare scripts are each rendered and base64'd,
/// dropped into the userdata template at `£SERVICE`, `£MONITOR` and
/// `£PREPARE`, and the finished userdata is base64'd once more so it can sit
/// inside the fleet request document.
pub async fn compose(
    source: &dyn TemplateSource,
    names: &TemplateNames,
    env: &Environment,
    timeout: Duration,
) -> Result<String> {
    let userdata = load(source, &names.userdata, timeout).await?;

    let prepare = load(source, &names.prepare, timeout).await?.render(&[
        ("REGION", env.region.as_str()),
        ("HOSTEDZONEID", env.hosted_zone_id.as_str()),
        ("DOMAIN", env.domain.as_str()),
        ("BUCKET", env.config_bucket.as_str()),
    ]);

    let service = load(source, &names.service, timeout)
        .await?
        .render(&[("REGION", env.region.as_str())]);

    let monitor = load(source, &names.monitor, timeout).await?.render(&[
        ("REGION", env.region.as_str()),
        ("ACCOUNT", env.account_id.as_str()),
        ("DOMAIN", env.domain.as_str()),
        ("HOSTEDZONEID", env.hosted_zone_id.as_str()),
        ("FBTOKEN", env.facebook_token.as_str()),
    ]);

    let (prepare, service, monitor) = (encode(&prepare), encode(&service), encode(&monitor));
    let combined = userdata.render(&[
        ("PREPARE", prepare.as_str()),
        ("SERVICE", service.as_str()),
        ("MONITOR", monitor.as_str()),
    ]);
    debug!(bytes = combined.len(), "bootstrap userdata composed");

    Ok(encode(&combined))
}

async fn load(source: &dyn TemplateSource, name: &str, timeout: Duration) -> Result<Template> {
    timed("template load", timeout, source.load(name)).await
}
