//! Configuration Management
//!
//! Option values merge from three sources, strongest last: an optional YAML
//! defaults file, the process environment, CLI flags. The merged `Settings`
//! value is immutable for the rest of the run; required-key and allow-list
//! checks happen before the first cloud call.

use crate::error::{ProvisionError, Result};
use crate::resource::reconciler::PollPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Merged option values for one stage run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub apim_name: Option<String>,
    #[serde(default)]
    pub apim_sku: Option<String>,
    #[serde(default)]
    pub publisher_email: Option<String>,
    #[serde(default)]
    pub publisher_name: Option<String>,
    #[serde(default)]
    pub apim_subnet_id: Option<String>,
    #[serde(default)]
    pub apim_system_identity: Option<bool>,

    #[serde(default)]
    pub vnet_mode: Option<String>,
    #[serde(default)]
    pub vnet_name: Option<String>,
    #[serde(default)]
    pub vnet_prefix: Option<String>,
    #[serde(default)]
    pub subnet_name: Option<String>,
    #[serde(default)]
    pub subnet_prefix: Option<String>,

    #[serde(default)]
    pub peer_vnet_name: Option<String>,
    #[serde(default)]
    pub peer_resource_group: Option<String>,

    #[serde(default)]
    pub keyvault_name: Option<String>,

    #[serde(default)]
    pub identity_name: Option<String>,
    #[serde(default)]
    pub create_identity: Option<bool>,

    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub poll_timeout_mins: Option<u64>,

    #[serde(default)]
    pub output_env: Option<PathBuf>,
}

impl Settings {
    /// Default defaults-file location
    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("azprov").join("defaults.yaml"))
    }

    /// Load the YAML defaults file. An explicit path must parse; the default
    /// location is best-effort.
    pub fn load_file(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let settings = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            return Ok(settings);
        }

        let Some(path) = Self::default_config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(serde_yaml::from_str(&content).unwrap_or_default()),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Read option values from the environment
    pub fn from_env() -> Self {
        Self {
            resource_group: env_any(&["RESOURCE_GROUP", "AZURE_RESOURCE_GROUP"]),
            location: env_any(&["AZURE_LOCATION", "LOCATION"]),
            apim_name: env_any(&["APIM_NAME"]),
            apim_sku: env_any(&["APIM_SKU"]),
            publisher_email: env_any(&["APIM_PUBLISHER_EMAIL"]),
            publisher_name: env_any(&["APIM_PUBLISHER_NAME"]),
            apim_subnet_id: env_any(&["APIM_SUBNET_ID"]),
            apim_system_identity: env_bool("APIM_SYSTEM_IDENTITY"),
            vnet_mode: env_any(&["VNET_MODE"]),
            vnet_name: env_any(&["VNET_NAME"]),
            vnet_prefix: env_any(&["VNET_PREFIX"]),
            subnet_name: env_any(&["SUBNET_NAME"]),
            subnet_prefix: env_any(&["SUBNET_PREFIX"]),
            peer_vnet_name: env_any(&["PEER_VNET_NAME"]),
            peer_resource_group: env_any(&["PEER_RESOURCE_GROUP"]),
            keyvault_name: env_any(&["KEYVAULT_NAME"]),
            identity_name: env_any(&["IDENTITY_NAME"]),
            create_identity: env_bool("CREATE_IDENTITY"),
            poll_interval_secs: env_u64("POLL_INTERVAL_SECS"),
            poll_timeout_mins: env_u64("POLL_TIMEOUT_MINS"),
            output_env: env_any(&["AZPROV_OUTPUT_ENV"]).map(PathBuf::from),
        }
    }

    /// Merge another settings layer on top; its values win where present
    pub fn overlay(self, over: Self) -> Self {
        Self {
            resource_group: over.resource_group.or(self.resource_group),
            location: over.location.or(self.location),
            apim_name: over.apim_name.or(self.apim_name),
            apim_sku: over.apim_sku.or(self.apim_sku),
            publisher_email: over.publisher_email.or(self.publisher_email),
            publisher_name: over.publisher_name.or(self.publisher_name),
            apim_subnet_id: over.apim_subnet_id.or(self.apim_subnet_id),
            apim_system_identity: over.apim_system_identity.or(self.apim_system_identity),
            vnet_mode: over.vnet_mode.or(self.vnet_mode),
            vnet_name: over.vnet_name.or(self.vnet_name),
            vnet_prefix: over.vnet_prefix.or(self.vnet_prefix),
            subnet_name: over.subnet_name.or(self.subnet_name),
            subnet_prefix: over.subnet_prefix.or(self.subnet_prefix),
            peer_vnet_name: over.peer_vnet_name.or(self.peer_vnet_name),
            peer_resource_group: over.peer_resource_group.or(self.peer_resource_group),
            keyvault_name: over.keyvault_name.or(self.keyvault_name),
            identity_name: over.identity_name.or(self.identity_name),
            create_identity: over.create_identity.or(self.create_identity),
            poll_interval_secs: over.poll_interval_secs.or(self.poll_interval_secs),
            poll_timeout_mins: over.poll_timeout_mins.or(self.poll_timeout_mins),
            output_env: over.output_env.or(self.output_env),
        }
    }

    // =========================================================================
    // Accessors with the required/default/allow-list contracts
    // =========================================================================

    pub fn resource_group(&self) -> Result<&str> {
        require(self.resource_group.as_deref(), "RESOURCE_GROUP")
    }

    pub fn apim_sku(&self) -> Result<ApimSku> {
        match self.apim_sku.as_deref() {
            Some(value) => value.parse(),
            None => Ok(ApimSku::Developer),
        }
    }

    pub fn vnet_mode(&self) -> Result<VnetMode> {
        match self.vnet_mode.as_deref() {
            Some(value) => value.parse(),
            None => Ok(VnetMode::None),
        }
    }

    pub fn publisher_email(&self) -> Result<&str> {
        let email = require(self.publisher_email.as_deref(), "APIM_PUBLISHER_EMAIL")?;
        // Just enough structure to catch swapped or empty values
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(ProvisionError::validation(
                "APIM_PUBLISHER_EMAIL",
                format!("'{email}' is not an email address"),
            ));
        }
        Ok(email)
    }

    pub fn publisher_name(&self) -> Result<&str> {
        require(self.publisher_name.as_deref(), "APIM_PUBLISHER_NAME")
    }

    pub fn apim_name(&self) -> String {
        self.apim_name
            .clone()
            .unwrap_or_else(|| generate_name("apim-subnetcalc"))
    }

    pub fn apim_subnet_id(&self) -> Result<&str> {
        require(self.apim_subnet_id.as_deref(), "APIM_SUBNET_ID")
    }

    pub fn apim_system_identity(&self) -> bool {
        self.apim_system_identity.unwrap_or(false)
    }

    pub fn vnet_name(&self) -> &str {
        self.vnet_name.as_deref().unwrap_or("vnet-apim")
    }

    pub fn vnet_prefix(&self) -> Result<&str> {
        let prefix = self.vnet_prefix.as_deref().unwrap_or("10.200.0.0/16");
        validate_prefix(prefix, "VNET_PREFIX")?;
        Ok(prefix)
    }

    pub fn subnet_name(&self) -> &str {
        self.subnet_name.as_deref().unwrap_or("snet-apim")
    }

    pub fn subnet_prefix(&self) -> Result<&str> {
        let prefix = self.subnet_prefix.as_deref().unwrap_or("10.200.0.0/27");
        validate_prefix(prefix, "SUBNET_PREFIX")?;
        Ok(prefix)
    }

    pub fn peer_vnet_name(&self) -> Result<&str> {
        require(self.peer_vnet_name.as_deref(), "PEER_VNET_NAME")
    }

    pub fn identity_name(&self) -> &str {
        self.identity_name.as_deref().unwrap_or("id-subnetcalc")
    }

    pub fn create_identity(&self) -> bool {
        self.create_identity.unwrap_or(true)
    }

    /// Polling policy for long-running creates. A timeout of 0 minutes
    /// restores the original scripts' unbounded wait.
    pub fn poll_policy(&self) -> PollPolicy {
        let interval = Duration::from_secs(self.poll_interval_secs.unwrap_or(30));
        let deadline = match self.poll_timeout_mins.unwrap_or(120) {
            0 => None,
            mins => Some(Duration::from_secs(mins * 60)),
        };
        PollPolicy { interval, deadline }
    }
}

fn require<'a>(value: Option<&'a str>, key: &'static str) -> Result<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ProvisionError::configuration(key)),
    }
}

fn env_any(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = std::env::var(key) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn env_bool(key: &str) -> Option<bool> {
    env_any(&[key]).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_u64(key: &str) -> Option<u64> {
    env_any(&[key]).and_then(|v| v.parse().ok())
}

/// API Management SKU tiers accepted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApimSku {
    Consumption,
    Developer,
    Basic,
    Standard,
    Premium,
    BasicV2,
    StandardV2,
}

impl ApimSku {
    const ALL: &'static [ApimSku] = &[
        ApimSku::Consumption,
        ApimSku::Developer,
        ApimSku::Basic,
        ApimSku::Standard,
        ApimSku::Premium,
        ApimSku::BasicV2,
        ApimSku::StandardV2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApimSku::Consumption => "Consumption",
            ApimSku::Developer => "Developer",
            ApimSku::Basic => "Basic",
            ApimSku::Standard => "Standard",
            ApimSku::Premium => "Premium",
            ApimSku::BasicV2 => "BasicV2",
            ApimSku::StandardV2 => "StandardV2",
        }
    }

    /// Unit count for the SKU block; the serverless tier requires 0
    pub fn capacity(&self) -> u32 {
        match self {
            ApimSku::Consumption => 0,
            _ => 1,
        }
    }
}

impl std::str::FromStr for ApimSku {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|sku| sku.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| {
                ProvisionError::validation(
                    "APIM_SKU",
                    format!(
                        "'{}' is not a supported SKU (expected one of: {})",
                        s,
                        ApimSku::ALL
                            .iter()
                            .map(|x| x.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
            })
    }
}

/// Virtual network integration modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnetMode {
    None,
    External,
    Internal,
}

impl VnetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VnetMode::None => "None",
            VnetMode::External => "External",
            VnetMode::Internal => "Internal",
        }
    }
}

impl std::str::FromStr for VnetMode {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        [VnetMode::None, VnetMode::External, VnetMode::Internal]
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                ProvisionError::validation(
                    "VNET_MODE",
                    format!("'{s}' is not a supported mode (expected None, External, or Internal)"),
                )
            })
    }
}

/// Validate an IPv4 CIDR prefix
pub fn validate_prefix(prefix: &str, field: &'static str) -> Result<()> {
    if is_valid_cidr(prefix) {
        Ok(())
    } else {
        Err(ProvisionError::validation(
            field,
            format!("'{prefix}' is not an IPv4 CIDR prefix"),
        ))
    }
}

fn is_valid_cidr(prefix: &str) -> bool {
    let Some((addr, len)) = prefix.split_once('/') else {
        return false;
    };
    if addr.parse::<std::net::Ipv4Addr>().is_err() {
        return false;
    }
    matches!(len.parse::<u8>(), Ok(bits) if bits <= 32)
}

/// Random-suffixed resource name for kinds named on first creation
pub fn generate_name(base: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", base, &suffix[..8])
}

/// Key Vault names are globally scoped: 3-24 chars, alphanumerics and
/// hyphens, starting with a letter
pub fn generate_vault_name(base: &str) -> String {
    let candidate = generate_name(base);
    let mut name: String = candidate
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();

    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        name.insert(0, 'k');
    }
    name.truncate(24);
    while name.ends_with('-') {
        name.pop();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn missing_resource_group_names_the_key() {
        let settings = Settings::default();
        let err = settings.resource_group().unwrap_err();
        assert_eq!(err.to_string(), "missing required configuration: RESOURCE_GROUP");
    }

    #[test]
    fn overlay_prefers_the_stronger_layer() {
        let weak = Settings {
            resource_group: Some("rg-from-env".to_string()),
            vnet_name: Some("vnet-from-env".to_string()),
            ..Settings::default()
        };
        let strong = Settings {
            resource_group: Some("rg-from-cli".to_string()),
            ..Settings::default()
        };

        let merged = weak.overlay(strong);
        assert_eq!(merged.resource_group.as_deref(), Some("rg-from-cli"));
        assert_eq!(merged.vnet_name.as_deref(), Some("vnet-from-env"));
    }

    #[test]
    fn sku_allow_list() {
        assert_eq!("Developer".parse::<ApimSku>().unwrap(), ApimSku::Developer);
        assert_eq!("premium".parse::<ApimSku>().unwrap(), ApimSku::Premium);
        assert_eq!("StandardV2".parse::<ApimSku>().unwrap(), ApimSku::StandardV2);
        assert!("Gold".parse::<ApimSku>().is_err());
    }

    #[test]
    fn consumption_sku_has_zero_capacity() {
        assert_eq!(ApimSku::Consumption.capacity(), 0);
        assert_eq!(ApimSku::Developer.capacity(), 1);
    }

    #[test]
    fn vnet_mode_allow_list() {
        assert_eq!("External".parse::<VnetMode>().unwrap(), VnetMode::External);
        assert_eq!("none".parse::<VnetMode>().unwrap(), VnetMode::None);
        assert!("Sideways".parse::<VnetMode>().is_err());
    }

    #[test]
    fn default_prefixes_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.vnet_prefix().unwrap(), "10.200.0.0/16");
        assert_eq!(settings.subnet_prefix().unwrap(), "10.200.0.0/27");
        assert_eq!(settings.subnet_name(), "snet-apim");
    }

    #[test]
    fn bad_prefix_is_a_validation_error() {
        let settings = Settings {
            vnet_prefix: Some("10.0.0.0".to_string()),
            ..Settings::default()
        };
        assert!(settings.vnet_prefix().is_err());

        let settings = Settings {
            vnet_prefix: Some("300.0.0.0/16".to_string()),
            ..Settings::default()
        };
        assert!(settings.vnet_prefix().is_err());
    }

    #[test]
    fn bad_publisher_email_is_rejected() {
        let settings = Settings {
            publisher_email: Some("not-an-email".to_string()),
            ..Settings::default()
        };
        assert!(settings.publisher_email().is_err());
    }

    #[test]
    fn poll_timeout_zero_means_unbounded() {
        let settings = Settings {
            poll_timeout_mins: Some(0),
            ..Settings::default()
        };
        assert!(settings.poll_policy().deadline.is_none());

        let default_policy = Settings::default().poll_policy();
        assert_eq!(default_policy.interval, Duration::from_secs(30));
        assert!(default_policy.deadline.is_some());
    }

    #[test]
    fn generated_names_carry_a_suffix() {
        let a = generate_name("apim-subnetcalc");
        let b = generate_name("apim-subnetcalc");
        assert!(a.starts_with("apim-subnetcalc-"));
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn generated_vault_names_respect_the_rules(base in "[a-z]{1,40}") {
            let name = generate_vault_name(&base);
            prop_assert!(name.len() >= 3);
            prop_assert!(name.len() <= 24);
            prop_assert!(name.chars().next().unwrap().is_ascii_alphabetic());
            prop_assert!(!name.ends_with('-'));
            prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        }

        #[test]
        fn valid_cidrs_are_accepted(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255, len in 0u8..=32) {
            let prefix = format!("{a}.{b}.{c}.{d}/{len}");
            prop_assert!(is_valid_cidr(&prefix));
        }

        #[test]
        fn junk_without_a_slash_is_rejected(s in "[a-z0-9.]{0,20}") {
            prop_assume!(!s.contains('/'));
            prop_assert!(!is_valid_cidr(&s));
        }
    }
}
