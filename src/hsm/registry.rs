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

//! Named key providers built from a manifest.
//!
//! A [`ProviderManifest`] lists the providers a deployment uses. Each entry
//! names a `kind`, and [`ProviderFactories`] maps kinds to constructors.
//! Factories are handed to [`ProviderRegistry::load`] explicitly, so tests
//! and embedders decide exactly which backends exist.
//!
//! ```json
//! {
//!   "default": "hsm",
//!   "providers": [
//!     {
//!       "name": "hsm",
//!       "kind": "pkcs11",
//!       "manufacturer": "SoftHSM project",
//!       "params": { "path": "/usr/lib/softhsm/libsofthsm2.so", "token_label": "ca", "pin": "1234" }
//!     }
//!   ]
//! }
//! ```
//!
//! Keys held by a module are referenced from issuer key files with a
//! [`KeyReference`] such as `pkcs11:token=hsm;object=issuing-key`.

use super::{KeyProvider, Signer, SoftwareKeyProvider};
use crate::error::{CaError, Result};
use crate::loader::ByteSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Kind and name of the in-process software provider.
pub const SOFTWARE_PROVIDER: &str = "software";

/// Kind name of the PKCS#11 provider.
pub const PKCS11_PROVIDER: &str = "pkcs11";

/// One provider entry in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    /// Unique provider name, used by key references.
    pub name: String,

    /// Factory kind (e.g. "software", "pkcs11").
    pub kind: String,

    /// Manufacturer identity used for lookups. Defaults to what the provider reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    /// Kind-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl ProviderDefinition {
    /// String parameter, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(serde_json::Value::as_str)
    }

    /// Unsigned integer parameter, accepting numbers or numeric strings.
    pub fn param_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.params.get(key) {
            None => Ok(None),
            Some(serde_json::Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                CaError::provider_init(&self.name, format!("parameter {key:?} must be unsigned"))
            }),
            Some(serde_json::Value::String(s)) => s.parse().map(Some).map_err(|_| {
                CaError::provider_init(&self.name, format!("parameter {key:?} must be a number"))
            }),
            Some(_) => Err(CaError::provider_init(
                &self.name,
                format!("parameter {key:?} must be a number"),
            )),
        }
    }

    #[cfg_attr(not(feature = "pkcs11"), allow(dead_code))]
    fn require_str(&self, key: &str) -> Result<&str> {
        self.param_str(key).ok_or_else(|| {
            CaError::provider_init(&self.name, format!("missing parameter {key:?}"))
        })
    }
}

/// The list of providers a deployment uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderManifest {
    /// Name of the provider used when none is specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Provider entries.
    #[serde(default)]
    pub providers: Vec<ProviderDefinition>,
}

impl ProviderManifest {
    /// Parse a JSON manifest.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CaError::config(format!("provider manifest: {e}")))
    }

    /// Read and parse a JSON manifest from a byte source.
    pub fn load(source: &dyn ByteSource, reference: &str) -> Result<Self> {
        Self::from_json(&source.read_bytes(reference)?)
    }
}

/// Constructor for one provider kind.
pub type ProviderFactory =
    Box<dyn Fn(&ProviderDefinition) -> Result<Arc<dyn KeyProvider>> + Send + Sync>;

/// Provider kinds known to a registry load.
pub struct ProviderFactories {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderFactories {
    /// No kinds at all.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The kinds compiled into this crate: `software`, plus `pkcs11` with the
    /// `pkcs11` feature.
    pub fn with_defaults() -> Self {
        let factories = Self::new().register(SOFTWARE_PROVIDER, |_| {
            Ok(Arc::new(SoftwareKeyProvider::new()) as Arc<dyn KeyProvider>)
        });

        #[cfg(feature = "pkcs11")]
        let factories = factories.register(PKCS11_PROVIDER, pkcs11_factory);

        factories
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ProviderDefinition) -> Result<Arc<dyn KeyProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
        self
    }

    /// Whether a factory exists for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    fn build(&self, definition: &ProviderDefinition) -> Result<Arc<dyn KeyProvider>> {
        let factory = self.factories.get(&definition.kind).ok_or_else(|| {
            CaError::provider_init(
                &definition.name,
                format!("unknown provider kind {:?}", definition.kind),
            )
        })?;

        factory(definition).map_err(|e| match e {
            CaError::ProviderInit { .. } => e,
            other => CaError::provider_init(&definition.name, other),
        })
    }
}

impl Default for ProviderFactories {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ProviderFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("ProviderFactories")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(feature = "pkcs11")]
fn pkcs11_factory(definition: &ProviderDefinition) -> Result<Arc<dyn KeyProvider>> {
    use super::pkcs11::{Pkcs11KeyProvider, Pkcs11Settings};

    let mut settings = Pkcs11Settings::new(
        definition.require_str("path")?,
        definition.require_str("pin")?,
    );
    settings.slot_id = definition.param_u64("slot")?;
    settings.token_label = definition.param_str("token_label").map(String::from);
    if let Some(secs) = definition.param_u64("timeout_secs")? {
        settings.timeout = std::time::Duration::from_secs(secs);
    }

    Ok(Arc::new(Pkcs11KeyProvider::open(&settings)?))
}

struct RegisteredProvider {
    manufacturer: String,
    provider: Arc<dyn KeyProvider>,
}

/// Named providers, shared read-only after load.
///
/// A software provider is always present for keys imported from PEM files;
/// it answers to the name `software` unless the manifest defines that name.
pub struct ProviderRegistry {
    software: Arc<SoftwareKeyProvider>,
    providers: HashMap<String, RegisteredProvider>,
    default: Option<String>,
}

impl ProviderRegistry {
    /// A registry holding only the software provider.
    pub fn new() -> Self {
        Self::with_software(SoftwareKeyProvider::new())
    }

    /// A registry whose built-in software provider is `software`.
    pub fn with_software(software: SoftwareKeyProvider) -> Self {
        Self {
            software: Arc::new(software),
            providers: HashMap::new(),
            default: None,
        }
    }

    /// Build every provider in `manifest`.
    ///
    /// Loading stops at the first provider that fails, with
    /// [`CaError::ProviderInit`] naming it.
    pub fn load(manifest: &ProviderManifest, factories: &ProviderFactories) -> Result<Self> {
        Self::new().extend(manifest, factories)
    }

    /// Build every provider in `manifest` into this registry.
    pub fn extend(
        mut self,
        manifest: &ProviderManifest,
        factories: &ProviderFactories,
    ) -> Result<Self> {
        for definition in &manifest.providers {
            if self.providers.contains_key(&definition.name) {
                return Err(CaError::config(format!(
                    "duplicate provider name {:?}",
                    definition.name
                )));
            }

            let provider = factories.build(definition)?;
            let manufacturer = definition
                .manufacturer
                .clone()
                .unwrap_or_else(|| provider.manufacturer());

            info!(
                name = %definition.name,
                kind = %definition.kind,
                manufacturer = %manufacturer,
                "Loaded key provider"
            );

            self.providers.insert(
                definition.name.clone(),
                RegisteredProvider {
                    manufacturer,
                    provider,
                },
            );
        }

        if let Some(default) = &manifest.default {
            if self.provider(default).is_none() {
                return Err(CaError::config(format!(
                    "default provider {default:?} is not defined"
                )));
            }
            self.default = Some(default.clone());
        }

        Ok(self)
    }

    /// The built-in software provider.
    pub fn software(&self) -> &Arc<SoftwareKeyProvider> {
        &self.software
    }

    /// The manifest default, or the software provider.
    pub fn default_provider(&self) -> Arc<dyn KeyProvider> {
        self.default
            .as_deref()
            .and_then(|name| self.provider(name))
            .unwrap_or_else(|| self.software.clone() as Arc<dyn KeyProvider>)
    }

    /// Provider by name.
    pub fn provider(&self, name: &str) -> Option<Arc<dyn KeyProvider>> {
        match self.providers.get(name) {
            Some(entry) => Some(entry.provider.clone()),
            None if name == SOFTWARE_PROVIDER => Some(self.software.clone() as Arc<dyn KeyProvider>),
            None => None,
        }
    }

    /// First provider whose manufacturer matches.
    pub fn by_manufacturer(&self, manufacturer: &str) -> Option<Arc<dyn KeyProvider>> {
        let mut names: Vec<_> = self
            .providers
            .iter()
            .filter(|(_, entry)| entry.manufacturer == manufacturer)
            .map(|(name, _)| name)
            .collect();
        names.sort();
        match names.first() {
            Some(name) => self.provider(name),
            None if self.software.manufacturer() == manufacturer => {
                Some(self.software.clone() as Arc<dyn KeyProvider>)
            }
            None => None,
        }
    }

    /// Names of manifest providers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Turn key file contents into a signer.
    ///
    /// A `pkcs11:` key reference is looked up in the named provider (by
    /// provider name, then by manufacturer). Anything else must be a PEM
    /// private key, which is imported into the software provider.
    pub async fn resolve_signer(&self, key_material: &[u8]) -> Result<Signer> {
        let text = std::str::from_utf8(key_material).map(str::trim).ok();

        if let Some(reference) = text.filter(|t| t.starts_with(KeyReference::SCHEME)) {
            let reference = KeyReference::parse(reference)?;
            return self.resolve_reference(&reference).await;
        }

        let handle = self.software.import_pem(key_material, None)?;
        debug!(key_id = %handle.id_hex(), "Imported PEM key into software provider");
        Signer::new(self.software.clone(), handle).await
    }

    async fn resolve_reference(&self, reference: &KeyReference) -> Result<Signer> {
        let provider = self
            .provider(&reference.token)
            .or_else(|| self.by_manufacturer(&reference.token))
            .ok_or_else(|| {
                CaError::key_not_found(format!("no provider for token {:?}", reference.token))
            })?;

        let handle = match &reference.selector {
            KeySelector::Id(id) => provider.find_key_by_id(id).await?,
            KeySelector::Label(label) => provider.find_key(label).await?,
        }
        .ok_or_else(|| CaError::key_not_found(reference.to_string()))?;

        debug!(%reference, key_id = %handle.id_hex(), "Resolved key reference");
        Signer::new(provider, handle).await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("default", &self.default)
            .finish()
    }
}

/// How a key reference picks a key within its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    /// CKA_ID / provider key id.
    Id(Vec<u8>),
    /// CKA_LABEL / provider label.
    Label(String),
}

/// A `pkcs11:token=<name>;id=<hex>` or `pkcs11:token=<name>;object=<label>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyReference {
    /// Provider name or manufacturer.
    pub token: String,
    /// Key within the provider.
    pub selector: KeySelector,
}

impl KeyReference {
    /// URI scheme prefix.
    pub const SCHEME: &'static str = "pkcs11:";

    /// Parse a key reference. Unknown attributes are ignored; `id` wins over `object`.
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |reason: &str| CaError::invalid_key(format!("key reference {input:?}: {reason}"));

        let body = input
            .trim()
            .strip_prefix(Self::SCHEME)
            .ok_or_else(|| malformed("missing pkcs11: scheme"))?;

        let mut token = None;
        let mut id = None;
        let mut object = None;

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| malformed("attribute without value"))?;
            match key.trim() {
                "token" => token = Some(value.trim().to_string()),
                "id" => {
                    let hex_id = value.trim().replace(['%', ':'], "");
                    id = Some(hex::decode(hex_id).map_err(|_| malformed("id is not hex"))?);
                }
                "object" => object = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| malformed("missing token"))?;
        let selector = match (id, object) {
            (Some(id), _) => KeySelector::Id(id),
            (None, Some(label)) => KeySelector::Label(label),
            (None, None) => return Err(malformed("missing id or object")),
        };

        Ok(Self { token, selector })
    }
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            KeySelector::Id(id) => write!(f, "pkcs11:token={};id={}", self.token, hex::encode(id)),
            KeySelector::Label(label) => write!(f, "pkcs11:token={};object={}", self.token, label),
        }
    }
}
