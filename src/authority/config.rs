// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Certificate authority configuration.
//!
//! This module defines the TOML configuration schema for the issuer registry
//! and the loader that discovers the configuration file.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [[authority.issuers]]
//! label = "TestCA2"
//! key_file = "/etc/ca/ca2.key"
//! cert_file = "/etc/ca/ca2.pem"
//! ca_bundle_file = "/etc/ca/ca1.pem"
//! root_bundle_file = "/etc/ca/root.pem"
//!
//! [authority.issuers.aia]
//! aia_url = "https://ca.example/v1/cert/${ISSUER_ID}"
//! ocsp_url = "https://ca.example/v1/ocsp"
//! crl_url = "https://ca.example/v1/crl/${ISSUER_ID}"
//!
//! [authority.issuers.profiles.server]
//! description = "server TLS"
//! usages = ["signing", "key encipherment", "server auth"]
//! expiry = "8760h"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::template::expand_env;
use crate::error::{CaError, Result};
use crate::logging::LogConfig;

/// Complete configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaConfig {
    /// Issuer registry configuration.
    #[serde(default)]
    pub authority: AuthorityConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LogConfig,
}

impl CaConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or missing required fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| CaError::config(format!("Invalid TOML: {e}")))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CaError::config(format!("TOML serialize: {e}")))
    }

    /// Expand environment variables in file references.
    ///
    /// URL templates are left alone; they are expanded per issuer at call time.
    pub fn expand_variables(&mut self) {
        for issuer in &mut self.authority.issuers {
            issuer.expand_variables();
        }
        if let Some(path) = self.logging.path.as_mut() {
            *path = PathBuf::from(expand_env(&path.to_string_lossy()));
        }
    }

    /// Validate the configuration for completeness and consistency.
    pub fn validate(&self) -> Result<()> {
        self.authority.validate()
    }
}

/// The issuer registry section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorityConfig {
    /// Issuer definitions, in document order.
    #[serde(default)]
    pub issuers: Vec<IssuerConfig>,
}

impl AuthorityConfig {
    /// Parse a TOML document that has an `[authority]` table.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(CaConfig::from_toml(toml_str)?.authority)
    }

    /// Issuers that are not disabled, in document order.
    pub fn active_issuers(&self) -> impl Iterator<Item = &IssuerConfig> {
        self.issuers.iter().filter(|issuer| !issuer.disabled)
    }

    /// Validate every issuer, collecting all problems.
    ///
    /// Disabled issuers are checked too; a label may only appear once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut labels = HashSet::new();

        for (index, issuer) in self.issuers.iter().enumerate() {
            errors.extend(
                issuer
                    .problems()
                    .into_iter()
                    .map(|problem| format!("authority.issuers[{index}]: {problem}")),
            );

            if !issuer.label.is_empty() && !labels.insert(issuer.label.as_str()) {
                errors.push(format!(
                    "authority.issuers[{index}]: duplicate label {:?}",
                    issuer.label
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CaError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Declarative description of one issuer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerConfig {
    /// Human identifier, unique within the registry.
    #[serde(default)]
    pub label: String,

    /// Disabled issuers are not loaded into the registry.
    #[serde(default)]
    pub disabled: bool,

    /// Reference to the private key (PEM) or a `pkcs11:` key reference.
    #[serde(default)]
    pub key_file: String,

    /// Reference to the issuer certificate.
    #[serde(default)]
    pub cert_file: String,

    /// Reference to the intermediate chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle_file: Option<String>,

    /// Reference to the root bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_bundle_file: Option<String>,

    /// Extension URL templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aia: Option<AiaConfig>,

    /// Named certificate profiles.
    #[serde(default)]
    pub profiles: HashMap<String, CertProfile>,
}

impl IssuerConfig {
    /// Whether the issuer is disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Validate this issuer on its own.
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CaError::config(problems.join("; ")))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.label.trim().is_empty() {
            problems.push("label is required".to_string());
        }
        if self.key_file.trim().is_empty() {
            problems.push("key_file is required".to_string());
        }
        if self.cert_file.trim().is_empty() {
            problems.push("cert_file is required".to_string());
        }
        problems
    }

    fn expand_variables(&mut self) {
        self.key_file = expand_env(&self.key_file);
        self.cert_file = expand_env(&self.cert_file);
        for file in [&mut self.ca_bundle_file, &mut self.root_bundle_file]
            .into_iter()
            .flatten()
        {
            *file = expand_env(file);
        }
    }
}

/// Authority Information Access templates.
///
/// Each template may contain `${ISSUER_ID}`, replaced by the issuer's hex
/// subject key identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiaConfig {
    /// CA issuers URL template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aia_url: Option<String>,

    /// OCSP responder URL template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocsp_url: Option<String>,

    /// CRL distribution point template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crl_url: Option<String>,
}

/// A named certificate profile.
///
/// Profiles are looked up by name only; their fields are carried for callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertProfile {
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Key usage and extended key usage names.
    #[serde(default)]
    pub usages: Vec<String>,

    /// Validity period, e.g. `"8760h"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,

    /// Backdate applied to notBefore, e.g. `"30m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backdate: Option<String>,

    /// Whether certificates from this profile are CAs.
    #[serde(default)]
    pub is_ca: bool,
}

/// Configuration file loader with discovery and precedence rules.
///
/// # Search Order
///
/// 1. Explicit path (if set via `with_path()`)
/// 2. Environment variable `CA_CONFIG_PATH`
/// 3. Current directory: `./ca-config.toml`
///
/// # Example
///
/// ```no_run
/// use usg_ca::authority::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_path("/etc/ca/ca-config.toml")
///     .load()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Explicit configuration file path.
    explicit_path: Option<PathBuf>,

    /// Whether to expand variables after loading.
    expand_variables: bool,

    /// Whether to validate after loading.
    validate: bool,

    /// Environment variable name for config path override.
    env_var_name: String,
}

/// Default file name searched in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ca-config.toml";

/// Default environment variable holding the configuration path.
pub const CONFIG_PATH_ENV: &str = "CA_CONFIG_PATH";

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            expand_variables: true,
            validate: true,
            env_var_name: CONFIG_PATH_ENV.to_string(),
        }
    }

    /// Set an explicit configuration file path.
    ///
    /// When set, only this path will be checked (no discovery).
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enable or disable variable expansion.
    ///
    /// Default: `true`
    pub fn with_expand_variables(mut self, expand: bool) -> Self {
        self.expand_variables = expand;
        self
    }

    /// Enable or disable validation after loading.
    ///
    /// Default: `true`
    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Set the environment variable name for path override.
    ///
    /// Default: `CA_CONFIG_PATH`
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var_name = name.into();
        self
    }

    /// Load the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No configuration file is found
    /// - The file cannot be read
    /// - The TOML is invalid
    /// - Validation fails (if enabled)
    pub fn load(&self) -> Result<CaConfig> {
        let config_path = self.find_config_file()?;

        let toml_content = std::fs::read_to_string(&config_path).map_err(|e| {
            CaError::config(format!("Failed to read {}: {e}", config_path.display()))
        })?;

        tracing::debug!(path = %config_path.display(), "Loading CA configuration");
        self.load_from_str(&toml_content)
    }

    /// Load configuration from a TOML string.
    pub fn load_from_str(&self, toml_content: &str) -> Result<CaConfig> {
        let mut config = CaConfig::from_toml(toml_content)?;

        if self.expand_variables {
            config.expand_variables();
        }

        if self.validate {
            config.validate()?;
        }

        Ok(config)
    }

    /// Find the configuration file path.
    pub fn find_config_file(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.explicit_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(CaError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        if let Ok(env_path) = std::env::var(&self.env_var_name) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(path);
            }
            // If explicitly set but doesn't exist, that's an error
            return Err(CaError::config(format!(
                "Configuration file from {} not found: {}",
                self.env_var_name, env_path
            )));
        }

        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default.exists() {
            return Ok(default);
        }

        Err(CaError::config(format!(
            "No configuration file found. Searched: ${}, ./{}",
            self.env_var_name, DEFAULT_CONFIG_FILE
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[[authority.issuers]]
label = "TestCA1"
disabled = true
key_file = "ca1.key"
cert_file = "ca1.pem"

[[authority.issuers]]
label = "TestCA2"
key_file = "ca2.key"
cert_file = "ca2.pem"
ca_bundle_file = "ca1.pem"
root_bundle_file = "root.pem"

[authority.issuers.aia]
aia_url = "https://localhost/v1/cert/${ISSUER_ID}"
ocsp_url = "https://localhost/v1/ocsp"
crl_url = "https://localhost/v1/crl/${ISSUER_ID}"

[authority.issuers.profiles.server]
description = "server TLS"
usages = ["signing", "key encipherment", "server auth"]
expiry = "8760h"
"#;

    #[test]
    fn test_parse_sample() {
        let config = CaConfig::from_toml(SAMPLE).unwrap();
        let issuers = &config.authority.issuers;

        assert_eq!(issuers.len(), 2);
        assert_eq!(issuers[0].label, "TestCA1");
        assert!(issuers[0].is_disabled());
        assert!(issuers[0].aia.is_none());

        let ca2 = &issuers[1];
        assert_eq!(ca2.ca_bundle_file.as_deref(), Some("ca1.pem"));
        assert_eq!(
            ca2.aia.as_ref().and_then(|a| a.crl_url.as_deref()),
            Some("https://localhost/v1/crl/${ISSUER_ID}")
        );
        assert_eq!(ca2.profiles["server"].usages.len(), 3);
        assert_eq!(ca2.profiles["server"].expiry.as_deref(), Some("8760h"));

        let active: Vec<_> = config.authority.active_issuers().map(|i| i.label.as_str()).collect();
        assert_eq!(active, vec!["TestCA2"]);

        assert_eq!(config.logging.level, crate::logging::LogLevel::Debug);
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = CaConfig::from_toml(SAMPLE).unwrap();
        let toml = config.to_toml().unwrap();
        assert_eq!(CaConfig::from_toml(&toml).unwrap(), config);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = CaConfig::from_toml("[[authority.issuers]]\nlable = \"typo\"\n").unwrap_err();
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_validate_collects_problems() {
        let config = AuthorityConfig {
            issuers: vec![
                IssuerConfig {
                    label: "a".to_string(),
                    key_file: "a.key".to_string(),
                    cert_file: "a.pem".to_string(),
                    ..Default::default()
                },
                IssuerConfig {
                    label: "a".to_string(),
                    ..Default::default()
                },
            ],
        };

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("authority.issuers[1]: key_file is required"));
        assert!(message.contains("authority.issuers[1]: cert_file is required"));
        assert!(message.contains("duplicate label \"a\""));
    }

    #[test]
    fn test_expand_variables_leaves_url_templates() {
        // SAFETY: This is a test, no other test reads this variable
        unsafe {
            std::env::set_var("USG_CA_CONFIG_TEST_DIR", "/srv/pki");
        }

        let mut config = CaConfig::from_toml(
            r#"
[[authority.issuers]]
label = "x"
key_file = "${USG_CA_CONFIG_TEST_DIR}/x.key"
cert_file = "${USG_CA_CONFIG_TEST_DIR}/x.pem"
root_bundle_file = "${USG_CA_CONFIG_TEST_DIR}/root.pem"
[authority.issuers.aia]
crl_url = "https://h/${ISSUER_ID}"
"#,
        )
        .unwrap();
        config.expand_variables();

        unsafe {
            std::env::remove_var("USG_CA_CONFIG_TEST_DIR");
        }

        let issuer = &config.authority.issuers[0];
        assert_eq!(issuer.key_file, "/srv/pki/x.key");
        assert_eq!(issuer.cert_file, "/srv/pki/x.pem");
        assert_eq!(issuer.root_bundle_file.as_deref(), Some("/srv/pki/root.pem"));
        assert_eq!(
            issuer.aia.as_ref().and_then(|a| a.crl_url.as_deref()),
            Some("https://h/${ISSUER_ID}")
        );
    }

    #[test]
    fn test_loader_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca-config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ConfigLoader::new().with_path(&path).load().unwrap();
        assert_eq!(config.authority.issuers.len(), 2);

        let missing = ConfigLoader::new()
            .with_path(dir.path().join("nope.toml"))
            .load()
            .unwrap_err();
        assert!(missing.to_string().contains("Configuration file not found"));
    }

    #[test]
    fn test_loader_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        // SAFETY: This is a test, the variable name is unique to it
        unsafe {
            std::env::set_var("USG_CA_TEST_CONFIG_PATH", &path);
        }
        let loader = ConfigLoader::new().with_env_var("USG_CA_TEST_CONFIG_PATH");
        assert_eq!(loader.find_config_file().unwrap(), path);
        unsafe {
            std::env::remove_var("USG_CA_TEST_CONFIG_PATH");
        }
    }

    #[test]
    fn test_load_from_str_without_validation() {
        let config = ConfigLoader::new()
            .with_validate(false)
            .load_from_str("[[authority.issuers]]\nlabel = \"bare\"\n")
            .unwrap();
        assert_eq!(config.authority.issuers[0].label, "bare");

        assert!(ConfigLoader::new()
            .load_from_str("[[authority.issuers]]\nlabel = \"bare\"\n")
            .is_err());
    }
}
