use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::pricing::DEFAULT_ZONES;
use crate::template::TemplateNames;

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub template_dir: PathBuf,
    pub templates: TemplateNames,
    /// Availability zones in priority order.
    pub zones: Vec<String>,
    /// Deadline for each external call.
    pub call_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("./resource"),
            templates: TemplateNames::default(),
            zones: DEFAULT_ZONES.iter().map(|z| z.to_string()).collect(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl LaunchConfig {
    /// Read from env vars, falling back to defaults:
    ///
    /// - `KF_TEMPLATE_DIR` (default: `"./resource"`)
    /// - `KF_ZONES` (comma-separated, default: `eu-west-2a,eu-west-2b,eu-west-2c`)
    /// - `KF_CALL_TIMEOUT_SECS` (default: `30`)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let template_dir = var("KF_TEMPLATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.template_dir);

        let zones = var("KF_ZONES")
            .map(|raw| parse_zones(&raw))
            .filter(|z| !z.is_empty())
            .unwrap_or(defaults.zones);

        let call_timeout = var("KF_CALL_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.call_timeout);

        Self {
            template_dir,
            templates: defaults.templates,
            zones,
            call_timeout,
        }
    }
}

fn parse_zones(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
