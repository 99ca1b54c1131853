//! Exported outputs
//!
//! The machine-consumable hand-off between pipeline stages. Humans get
//! tracing lines on stderr; the next stage gets `export KEY="value"` lines on
//! stdout and, optionally, appended to an explicit env file. Values are only
//! ever taken from confirmed cloud state, never from the request we sent.

use crate::error::Result;
use anyhow::Context;
use serde_json::Value;
use std::io::Write;
use std::path::Path;

/// Insertion-ordered key/value exports from one stage run
#[derive(Debug, Default)]
pub struct ExportedOutputs {
    values: Vec<(String, String)>,
}

impl ExportedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        self.values.push((key.to_string(), value.into()));
    }

    /// Pull a value out of an ARM payload by dot-notation path and export it.
    /// Missing paths are skipped: absent optional fields (a portal URL on a
    /// Consumption SKU, say) must not export empty strings.
    pub fn push_from(&mut self, key: &str, details: &Value, path: &str) {
        if let Some(value) = extract_str(details, path) {
            self.push(key, value);
        }
    }

    #[allow(dead_code)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Print the exports: human-readable summary on the log, shell-ready
    /// export lines on stdout
    pub fn emit(&self) {
        for (key, value) in &self.values {
            tracing::info!("{} = {}", key, value);
        }
        for (key, value) in &self.values {
            println!("export {}=\"{}\"", key, shell_quote(value));
        }
    }

    /// Append the exports to an env file for the next stage to source
    pub fn append_env_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        writeln!(file, "# azprov exports {}", chrono::Utc::now().to_rfc3339())
            .context("Failed to write env file")?;
        for (key, value) in &self.values {
            writeln!(file, "export {}=\"{}\"", key, shell_quote(value))
                .context("Failed to write env file")?;
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a ExportedOutputs {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Escape a value for double-quoted shell interpolation
fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

/// Extract a string value from JSON using a dot-notation path
fn extract_str(item: &Value, path: &str) -> Option<String> {
    let mut current = item;

    for part in path.split('.') {
        current = current.get(part)?;
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_from_skips_missing_paths() {
        let details = json!({
            "id": "/sub/x",
            "properties": {"gatewayUrl": "https://apim.azure-api.net"}
        });

        let mut outputs = ExportedOutputs::new();
        outputs.push_from("APIM_ID", &details, "id");
        outputs.push_from("APIM_GATEWAY_URL", &details, "properties.gatewayUrl");
        outputs.push_from("APIM_PORTAL_URL", &details, "properties.developerPortalUrl");

        assert_eq!(outputs.get("APIM_ID"), Some("/sub/x"));
        assert_eq!(
            outputs.get("APIM_GATEWAY_URL"),
            Some("https://apim.azure-api.net")
        );
        assert_eq!(outputs.get("APIM_PORTAL_URL"), None);
    }

    #[test]
    fn shell_quote_escapes_interpolation() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote("a\"b"), "a\\\"b");
        assert_eq!(shell_quote("$HOME"), "\\$HOME");
        assert_eq!(shell_quote("tick`"), "tick\\`");
    }

    #[test]
    fn env_file_appends_across_runs() {
        let path = std::env::temp_dir().join(format!("azprov-test-{}.env", uuid::Uuid::new_v4()));

        let mut first = ExportedOutputs::new();
        first.push("VNET_NAME", "vnet-apim");
        first.append_env_file(&path).unwrap();

        let mut second = ExportedOutputs::new();
        second.push("APIM_NAME", "apim-demo");
        second.append_env_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(content.contains("export VNET_NAME=\"vnet-apim\""));
        assert!(content.contains("export APIM_NAME=\"apim-demo\""));
    }
}
