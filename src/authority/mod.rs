// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Issuers and the issuer registry.
//!
//! An [`Authority`] is built once from an [`AuthorityConfig`] and is then
//! shared read-only. Disabled issuers are skipped at load time, so every
//! lookup only ever sees enabled issuers.
//!
//! # Example
//!
//! ```no_run
//! use usg_ca::authority::{Authority, ConfigLoader};
//! use usg_ca::hsm::ProviderRegistry;
//! use usg_ca::loader::FsByteSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_path("/etc/ca/ca-config.toml").load()?;
//! let providers = ProviderRegistry::new();
//! let authority = Authority::new(&config.authority, &providers, &FsByteSource::new()).await?;
//!
//! if let Some(issuer) = authority.issuer("TestCA1") {
//!     println!("{} {}", issuer.label(), issuer.subject_kid());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod issuer;
pub mod template;

pub use config::{AiaConfig, AuthorityConfig, CaConfig, CertProfile, ConfigLoader, IssuerConfig};
pub use issuer::{Bundle, Issuer};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::error::{CaError, Result};
use crate::hsm::{HashAlgorithm, ProviderRegistry};
use crate::loader::ByteSource;

/// Enabled issuers keyed by label, in configuration order.
#[derive(Debug, Default)]
pub struct Authority {
    issuers: IndexMap<String, Issuer>,
}

impl Authority {
    /// Load every enabled issuer in `config`.
    ///
    /// Loading stops at the first issuer that fails to validate or load; the
    /// error names that issuer.
    pub async fn new(
        config: &AuthorityConfig,
        providers: &ProviderRegistry,
        source: &dyn ByteSource,
    ) -> Result<Self> {
        let mut authority = Self::default();

        for issuer_config in &config.issuers {
            let label = issuer_config.label.as_str();
            if issuer_config.is_disabled() {
                debug!(label, "Skipping disabled issuer");
                continue;
            }

            issuer_config
                .validate()
                .map_err(|e| CaError::issuer(label, e))?;

            if authority.issuers.contains_key(label) {
                return Err(CaError::issuer(
                    label,
                    CaError::config("duplicate issuer label"),
                ));
            }

            let issuer = Issuer::new(issuer_config, providers, source)
                .await
                .map_err(|e| CaError::issuer(label, e))?;
            authority.issuers.insert(label.to_string(), issuer);
        }

        info!(issuers = authority.len(), "Loaded issuer registry");
        Ok(authority)
    }

    /// Build a registry from already-constructed issuers.
    ///
    /// Disabled issuers are dropped; duplicate labels are rejected.
    pub fn from_issuers(issuers: impl IntoIterator<Item = Issuer>) -> Result<Self> {
        let mut authority = Self::default();
        for issuer in issuers {
            if issuer.is_disabled() {
                continue;
            }
            if authority.issuers.contains_key(issuer.label()) {
                return Err(CaError::issuer(
                    issuer.label(),
                    CaError::config("duplicate issuer label"),
                ));
            }
            authority.issuers.insert(issuer.label().to_string(), issuer);
        }
        Ok(authority)
    }

    /// Issuer by label.
    pub fn issuer(&self, label: &str) -> Option<&Issuer> {
        self.issuers.get(label)
    }

    /// Issuer whose public key hashes to `hash` under `algorithm`.
    pub fn issuer_by_key_hash(&self, algorithm: HashAlgorithm, hash: &[u8]) -> Option<&Issuer> {
        self.issuers
            .values()
            .find(|issuer| issuer.key_hash(algorithm) == hash)
    }

    /// First issuer, in configuration order, that defines `profile`.
    pub fn issuer_by_profile(&self, profile: &str) -> Option<&Issuer> {
        self.issuers
            .values()
            .find(|issuer| issuer.profile(profile).is_some())
    }

    /// Enabled issuers in configuration order.
    pub fn issuers(&self) -> impl Iterator<Item = &Issuer> {
        self.issuers.values()
    }

    /// Labels in configuration order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.issuers.keys().map(String::as_str)
    }

    /// Number of enabled issuers.
    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    /// True when no issuer is enabled.
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemByteSource;
    use rcgen::{CertificateParams, KeyPair};

    fn source_with(labels: &[&str]) -> MemByteSource {
        let mut source = MemByteSource::new();
        for label in labels {
            let key = KeyPair::generate().unwrap();
            let cert = CertificateParams::default().self_signed(&key).unwrap();
            source = source
                .with_file(format!("{label}.key"), key.serialize_pem())
                .with_file(format!("{label}.pem"), cert.pem());
        }
        source
    }

    fn issuer_config(label: &str) -> IssuerConfig {
        IssuerConfig {
            label: label.to_string(),
            key_file: format!("{label}.key"),
            cert_file: format!("{label}.pem"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_order_and_disabled() {
        let source = source_with(&["b", "a", "c"]);
        let mut disabled = issuer_config("c");
        disabled.disabled = true;
        disabled.key_file = "missing".to_string();

        let config = AuthorityConfig {
            issuers: vec![issuer_config("b"), issuer_config("a"), disabled],
        };
        let authority = Authority::new(&config, &ProviderRegistry::new(), &source)
            .await
            .unwrap();

        assert_eq!(authority.labels().collect::<Vec<_>>(), ["b", "a"]);
        assert!(authority.issuer("c").is_none());
        assert_eq!(authority.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_label_rejected() {
        let source = source_with(&["a"]);
        let config = AuthorityConfig {
            issuers: vec![issuer_config("a"), issuer_config("a")],
        };
        let err = Authority::new(&config, &ProviderRegistry::new(), &source)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "issuer \"a\": invalid configuration: duplicate issuer label"
        );
    }

    #[tokio::test]
    async fn test_load_failure_names_issuer() {
        let source = source_with(&["a"]);
        let mut broken = issuer_config("b");
        broken.key_file = "not_found".to_string();
        let config = AuthorityConfig {
            issuers: vec![issuer_config("a"), broken],
        };

        let err = Authority::new(&config, &ProviderRegistry::new(), &source)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "issuer \"b\": unable to create signer: load key file: open not_found: file does not exist"
        );
    }

    #[tokio::test]
    async fn test_lookup_by_key_hash_and_profile() {
        let source = source_with(&["a", "b"]);
        let mut with_profile = issuer_config("b");
        with_profile
            .profiles
            .insert("server".to_string(), CertProfile::default());
        let config = AuthorityConfig {
            issuers: vec![issuer_config("a"), with_profile],
        };
        let authority = Authority::new(&config, &ProviderRegistry::new(), &source)
            .await
            .unwrap();

        let b = authority.issuer("b").unwrap();
        let hash = b.key_hash(HashAlgorithm::Sha256);
        assert_eq!(
            authority
                .issuer_by_key_hash(HashAlgorithm::Sha256, &hash)
                .map(Issuer::label),
            Some("b")
        );
        assert!(authority
            .issuer_by_key_hash(HashAlgorithm::Sha1, &hash)
            .is_none());
        assert_eq!(authority.issuer_by_profile("server").map(Issuer::label), Some("b"));
        assert!(authority.issuer_by_profile("client").is_none());
    }

    #[test]
    fn test_empty_registry() {
        let authority = Authority::from_issuers(Vec::new()).unwrap();
        assert!(authority.is_empty());
        assert_eq!(authority.issuers().count(), 0);
    }
}
