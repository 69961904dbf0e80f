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

//! Crypto provider abstraction.
//!
//! This module provides a trait-based abstraction for cryptographic key providers,
//! allowing issuers and CSR generation to use keys held in process memory or
//! inside Hardware Security Modules through one interface.
//!
//! # Key Features
//!
//! - **Zero key material exposure**: module-backed keys never leave the secure boundary
//! - **Async-first design**: all key operations are async-compatible
//! - **Provider-agnostic**: works with any [`KeyProvider`] implementation
//! - **Explicit registration**: providers are built from a manifest through
//!   constructor-injected factories (see [`registry`])
//!
//! # Example
//!
//! ```no_run
//! use usg_ca::hsm::{HashAlgorithm, KeyAlgorithm, KeyProvider, SoftwareKeyProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SoftwareKeyProvider::new();
//!
//! let key_handle = provider
//!     .generate_key_pair(KeyAlgorithm::EcdsaP256, Some("my-device-key"))
//!     .await?;
//!
//! let public_key = provider.public_key(&key_handle).await?;
//!
//! let digest = HashAlgorithm::Sha256.digest(b"data to sign");
//! let signature = provider.sign(&key_handle, &digest).await?;
//! # Ok(())
//! # }
//! ```

mod algorithm;
pub mod registry;
mod signer;
mod software;

#[cfg(feature = "pkcs11")]
pub mod pkcs11;

pub use algorithm::{HashAlgorithm, KeyAlgorithm, SignatureAlgorithm};
pub use registry::{
    KeyReference, KeySelector, ProviderDefinition, ProviderFactories, ProviderFactory,
    ProviderManifest, ProviderRegistry,
};
pub use signer::Signer;
pub use software::SoftwareKeyProvider;

#[cfg(feature = "pkcs11")]
pub use pkcs11::{Pkcs11KeyProvider, Pkcs11Settings};

use crate::error::{CaError, Result};
use async_trait::async_trait;
use spki::SubjectPublicKeyInfoOwned;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Handle to a key stored in a key provider.
///
/// This is an opaque reference to a cryptographic key. The actual key material
/// stays within the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    /// Opaque identifier for the key (provider-specific).
    pub(crate) id: Vec<u8>,

    /// Key algorithm and parameters.
    pub(crate) algorithm: KeyAlgorithm,

    /// Provider-specific metadata.
    pub(crate) metadata: KeyMetadata,
}

impl KeyHandle {
    /// Create a new key handle.
    pub fn new(id: Vec<u8>, algorithm: KeyAlgorithm, metadata: KeyMetadata) -> Self {
        Self {
            id,
            algorithm,
            metadata,
        }
    }

    /// Get the key algorithm.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Get the key metadata.
    pub fn metadata(&self) -> &KeyMetadata {
        &self.metadata
    }

    /// Get the key ID (opaque, provider-specific).
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Get the key ID as lowercase hex.
    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }
}

/// Metadata about a cryptographic key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMetadata {
    /// Human-readable label for the key.
    pub label: Option<String>,

    /// Whether the key can be used for signing operations.
    pub can_sign: bool,

    /// Whether the key material is extractable from the provider.
    pub extractable: bool,

    /// Provider-specific attributes (e.g., "slot_id", "key_id").
    pub attributes: HashMap<String, String>,
}

/// Information about a key provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Provider name (e.g., "SoftHSM", "YubiHSM", "AWS KMS").
    pub name: String,

    /// Provider version.
    pub version: String,

    /// Manufacturer or vendor name.
    pub manufacturer: String,

    /// Whether the provider supports key generation.
    pub supports_key_generation: bool,

    /// Whether the provider supports key deletion.
    pub supports_key_deletion: bool,

    /// Whether private key material can be exported.
    pub supports_key_export: bool,
}

/// Trait for cryptographic key providers (software, HSM, TPM, cloud KMS, etc.).
///
/// Implementations own their concurrency discipline: callers share a provider
/// behind an `Arc` and invoke it from many tasks without external locking.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Generate a new key pair in the provider's storage.
    ///
    /// Fails with [`CaError::UnsupportedAlgorithm`] when the algorithm or size
    /// is not offered, and with [`CaError::ProviderIo`] when the backing
    /// module cannot be reached.
    async fn generate_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        label: Option<&str>,
    ) -> Result<KeyHandle>;

    /// Get the public key for a given key handle, in SubjectPublicKeyInfo form.
    async fn public_key(&self, handle: &KeyHandle) -> Result<SubjectPublicKeyInfoOwned>;

    /// Sign a pre-computed digest with the private key identified by handle.
    ///
    /// The signature format depends on the key algorithm:
    /// - ECDSA: DER-encoded ECDSA-Sig-Value (SEQUENCE of two INTEGERs)
    /// - RSA: PKCS#1 v1.5 signature over the DigestInfo of the digest
    ///
    /// The digest algorithm is inferred from the digest length.
    async fn sign(&self, handle: &KeyHandle, digest: &[u8]) -> Result<Vec<u8>>;

    /// List all keys available in this provider.
    async fn list_keys(&self) -> Result<Vec<KeyHandle>>;

    /// Find a key by label.
    async fn find_key(&self, label: &str) -> Result<Option<KeyHandle>>;

    /// Find a key by its opaque identifier.
    async fn find_key_by_id(&self, id: &[u8]) -> Result<Option<KeyHandle>>;

    /// Delete a key (if supported by the provider).
    async fn delete_key(&self, handle: &KeyHandle) -> Result<()>;

    /// Export the private key as PKCS#8 PEM.
    ///
    /// Only in-memory providers can honor this. Module-backed providers keep
    /// the default, which always fails.
    async fn export_private_key(&self, handle: &KeyHandle) -> Result<Zeroizing<String>> {
        let _ = handle;
        Err(CaError::not_supported(format!(
            "{} does not export private keys",
            self.provider_info().name
        )))
    }

    /// Get information about this provider.
    fn provider_info(&self) -> ProviderInfo;

    /// Manufacturer identity of the provider.
    fn manufacturer(&self) -> String {
        self.provider_info().manufacturer
    }
}
