//! Literal find/replace templating over `£NAME` placeholders.
//!
//! This is deliberately not a template language: each placeholder is replaced
//! everywhere it occurs and anything not in the mapping is left as written.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Marks the start of a placeholder. Never appears in the scripts themselves.
pub const DELIMITER: char = '£';

/// Store keys for every template a launch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateNames {
    pub service: String,
    pub monitor: String,
    pub prepare: String,
    pub userdata: String,
    pub fleet_config: String,
}

impl Default for TemplateNames {
    fn default() -> Self {
        Self {
            service: "kf2/kf2server.sh".into(),
            monitor: "kf2/monitor.sh".into(),
            prepare: "kf2/prepare.sh".into(),
            userdata: "kf2/userdata.yml".into(),
            fleet_config: "config.json".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    text: String,
}

impl Template {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace every `£KEY` with its value, in mapping order.
    ///
    /// Placeholders missing from `vars` stay verbatim; they are reported with
    /// a warning since they usually mean an empty environment field.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = self.text.clone();
        for (key, value) in vars {
            out = out.replace(&format!("{DELIMITER}{key}"), value);
        }

        let unresolved = self.unresolved(vars);
        if !unresolved.is_empty() {
            warn!(
                template = %self.name,
                unresolved = ?unresolved,
                "template rendered with unresolved placeholders"
            );
        }
        out
    }

    /// Placeholders in the raw text that `vars` has no value for.
    pub fn unresolved(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !vars.iter().any(|(key, _)| *key == name.as_str()))
            .collect()
    }

    /// Distinct placeholder names present in the raw text, in first-seen order.
    pub fn placeholders(&self) -> Vec<String> {
        placeholders(&self.text)
    }
}

fn placeholders(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for (i, _) in text.match_indices(DELIMITER) {
        let name: String = text[i + DELIMITER.len_utf8()..]
            .chars()
            .take_while(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_')
            .collect();
        if !name.is_empty() && !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

/// Standard base64 of the UTF-8 text, safe to nest inside YAML or JSON.
pub fn encode(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Where raw templates come from.
#[async_trait]
pub trait TemplateSource: Send + Sync + 'static {
    async fn load(&self, name: &str) -> Result<Template>;
}

/// Templates read from a directory on disk, one file per name.
#[derive(Debug, Clone)]
pub struct FsTemplates {
    root: PathBuf,
}

impl FsTemplates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TemplateSource for FsTemplates {
    async fn load(&self, name: &str) -> Result<Template> {
        let path = self.root.join(name);
        debug!(path = %path.display(), "loading template");

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| Error::Io {
                name: name.to_string(),
                source,
            })?;
        Ok(Template::new(name, text))
    }
}

/// Map-backed templates, for tests and embedded defaults.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplates {
    templates: HashMap<String, String>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(name.into(), text.into());
        self
    }
}

#[async_trait]
impl TemplateSource for MemoryTemplates {
    async fn load(&self, name: &str) -> Result<Template> {
        self.templates
            .get(name)
            .map(|text| Template::new(name, text.clone()))
            .ok_or_else(|| Error::Io {
                name: name.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such template"),
            })
    }
}
