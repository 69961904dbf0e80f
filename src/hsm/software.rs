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

//! Software-based (in-memory) key provider implementation.
//!
//! This module provides a software-based implementation of the [`KeyProvider`] trait
//! that stores cryptographic keys in memory. It backs:
//!
//! - **Issuer keys loaded from PEM files**: imported with [`SoftwareKeyProvider::import_pem`]
//! - **CSR flows that export the key**: the only provider that honors
//!   [`KeyProvider::export_private_key`]
//! - **Development and testing**: quick setup without HSM hardware
//!
//! # Security Considerations
//!
//! Private keys held here are not protected by a hardware boundary. They:
//!
//! - May be swapped to disk by the operating system
//! - Can be extracted via memory dumps or debugging tools
//! - Are lost when the process terminates
//!
//! Key identifiers are the SHA-1 of the public key bits, so importing the
//! same key twice yields the same handle.
//!
//! # Example
//!
//! ```no_run
//! use usg_ca::hsm::{KeyProvider, KeyAlgorithm, SoftwareKeyProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SoftwareKeyProvider::new();
//!
//! let handle = provider
//!     .generate_key_pair(KeyAlgorithm::EcdsaP256, Some("my-key"))
//!     .await?;
//!
//! // Export the key for storage outside the provider
//! let pem = provider.export_private_key(&handle).await?;
//!
//! // And load it back later
//! let again = provider.import_pem(pem.as_bytes(), Some("restored"))?;
//! assert_eq!(handle.id(), again.id());
//! # Ok(())
//! # }
//! ```

use super::{HashAlgorithm, KeyAlgorithm, KeyHandle, KeyMetadata, KeyProvider, ProviderInfo};
use crate::error::{CaError, Result};
use async_trait::async_trait;
use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1, SECP_384_R_1};
use der::Decode;
use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding, PrivateKeyInfo};
use rand_core::{CryptoRngCore, OsRng};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384, Sha512};
use spki::SubjectPublicKeyInfoOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;
use zeroize::Zeroizing;

/// Private key material held by the software provider.
#[derive(Clone)]
enum SoftwareKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    Rsa(Box<RsaPrivateKey>),
}

impl SoftwareKey {
    fn generate<R: CryptoRngCore>(algorithm: KeyAlgorithm, rng: &mut R) -> Result<Self> {
        algorithm.check_generation_size()?;
        match algorithm {
            KeyAlgorithm::EcdsaP256 => Ok(Self::P256(p256::ecdsa::SigningKey::random(rng))),
            KeyAlgorithm::EcdsaP384 => Ok(Self::P384(p384::ecdsa::SigningKey::random(rng))),
            KeyAlgorithm::Rsa { bits } => {
                let key = RsaPrivateKey::new(rng, bits as usize).map_err(|e| {
                    CaError::provider_io(format!("Failed to generate RSA key: {e}"))
                })?;
                Ok(Self::Rsa(Box::new(key)))
            }
        }
    }

    /// Parse a PKCS#8, SEC1 or PKCS#1 private key from PEM text.
    ///
    /// Sections other than private keys (e.g. `EC PARAMETERS`) are skipped.
    fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut reader = pem;

        loop {
            match rustls_pemfile::read_one(&mut reader) {
                Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                    return Self::from_pkcs8_der(key.secret_pkcs8_der());
                }
                Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                    return Self::from_sec1_der(key.secret_sec1_der());
                }
                Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                    let key = RsaPrivateKey::from_pkcs1_der(key.secret_pkcs1_der())
                        .map_err(|e| CaError::invalid_key(e.to_string()))?;
                    return Ok(Self::Rsa(Box::new(key)));
                }
                Ok(Some(_)) => debug!("Skipping PEM section in key material"),
                Ok(None) => break,
                Err(e) => return Err(CaError::invalid_pem(format!("Failed to parse PEM: {e}"))),
            }
        }

        Err(CaError::invalid_pem("no private key found"))
    }

    fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = PrivateKeyInfo::from_der(der)?;
        let invalid = |e: pkcs8::Error| CaError::invalid_key(e.to_string());

        if info.algorithm.oid == RSA_ENCRYPTION {
            let key = RsaPrivateKey::from_pkcs8_der(der).map_err(invalid)?;
            return Ok(Self::Rsa(Box::new(key)));
        }

        if info.algorithm.oid == ID_EC_PUBLIC_KEY {
            let curve = info
                .algorithm
                .parameters_oid()
                .map_err(|e| CaError::invalid_key(format!("missing EC curve: {e}")))?;
            return if curve == SECP_256_R_1 {
                Ok(Self::P256(
                    p256::ecdsa::SigningKey::from_pkcs8_der(der).map_err(invalid)?,
                ))
            } else if curve == SECP_384_R_1 {
                Ok(Self::P384(
                    p384::ecdsa::SigningKey::from_pkcs8_der(der).map_err(invalid)?,
                ))
            } else {
                Err(CaError::unsupported_algorithm(format!("EC curve {curve}")))
            };
        }

        Err(CaError::unsupported_algorithm(format!(
            "private key algorithm {}",
            info.algorithm.oid
        )))
    }

    fn from_sec1_der(der: &[u8]) -> Result<Self> {
        if let Ok(secret) = p256::SecretKey::from_sec1_der(der) {
            return Ok(Self::P256(secret.into()));
        }
        if let Ok(secret) = p384::SecretKey::from_sec1_der(der) {
            return Ok(Self::P384(secret.into()));
        }
        Err(CaError::unsupported_algorithm(
            "EC private key is not on P-256 or P-384",
        ))
    }

    fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::P256(_) => KeyAlgorithm::EcdsaP256,
            Self::P384(_) => KeyAlgorithm::EcdsaP384,
            Self::Rsa(key) => KeyAlgorithm::Rsa {
                bits: (key.size() * 8) as u32,
            },
        }
    }

    fn public_key(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let document = match self {
            Self::P256(key) => key.verifying_key().to_public_key_der(),
            Self::P384(key) => key.verifying_key().to_public_key_der(),
            Self::Rsa(key) => key.to_public_key().to_public_key_der(),
        }
        .map_err(|e| CaError::invalid_key(format!("Failed to encode public key: {e}")))?;

        Ok(SubjectPublicKeyInfoOwned::from_der(document.as_bytes())?)
    }

    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        use p256::ecdsa::signature::hazmat::PrehashSigner;

        match self {
            Self::P256(key) => {
                let signature: p256::ecdsa::Signature =
                    key.sign_prehash(digest).map_err(sign_failed)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            Self::P384(key) => {
                let signature: p384::ecdsa::Signature =
                    key.sign_prehash(digest).map_err(sign_failed)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            Self::Rsa(key) => {
                let scheme = match HashAlgorithm::from_digest_len(digest.len()) {
                    Some(HashAlgorithm::Sha1) => Pkcs1v15Sign::new::<Sha1>(),
                    Some(HashAlgorithm::Sha256) => Pkcs1v15Sign::new::<Sha256>(),
                    Some(HashAlgorithm::Sha384) => Pkcs1v15Sign::new::<Sha384>(),
                    Some(HashAlgorithm::Sha512) => Pkcs1v15Sign::new::<Sha512>(),
                    None => {
                        return Err(CaError::unsupported_algorithm(format!(
                            "digest of {} bytes",
                            digest.len()
                        )))
                    }
                };
                key.sign(scheme, digest).map_err(sign_failed)
            }
        }
    }

    fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        match self {
            Self::P256(key) => key.to_pkcs8_pem(LineEnding::LF),
            Self::P384(key) => key.to_pkcs8_pem(LineEnding::LF),
            Self::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| CaError::invalid_key(format!("Failed to encode private key: {e}")))
    }
}

fn sign_failed(e: impl std::fmt::Display) -> CaError {
    CaError::provider_io(format!("Failed to sign: {e}"))
}

/// Software-based key provider that stores keys in memory.
///
/// Keys are stored in a thread-safe HashMap protected by an `Arc<RwLock<>>`.
/// Cloning the provider shares the key store.
///
/// # Thread Safety
///
/// All operations are thread-safe and can be called concurrently from multiple tasks.
#[derive(Clone)]
pub struct SoftwareKeyProvider {
    /// Internal key storage: key_id -> (key, metadata)
    keys: Arc<RwLock<HashMap<Vec<u8>, (SoftwareKey, KeyMetadata)>>>,

    /// Entropy source for key generation
    rng: Arc<Mutex<Box<dyn CryptoRngCore + Send>>>,
}

impl SoftwareKeyProvider {
    /// Create a new software key provider backed by the OS entropy source.
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }

    /// Create a provider that draws key material from `rng`.
    ///
    /// Intended for deterministic tests; production code should use [`new`](Self::new).
    pub fn with_rng(rng: impl CryptoRngCore + Send + 'static) -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
            rng: Arc::new(Mutex::new(Box::new(rng))),
        }
    }

    /// Import a PEM private key (PKCS#8, SEC1 or PKCS#1).
    ///
    /// Importing a key that is already present returns the existing handle.
    pub fn import_pem(&self, pem: &[u8], label: Option<&str>) -> Result<KeyHandle> {
        let key = SoftwareKey::from_pem(pem)?;
        self.insert(key, label)
    }

    /// Import a DER-encoded PKCS#8 private key.
    pub fn import_pkcs8_der(&self, der: &[u8], label: Option<&str>) -> Result<KeyHandle> {
        let key = SoftwareKey::from_pkcs8_der(der)?;
        self.insert(key, label)
    }

    fn insert(&self, key: SoftwareKey, label: Option<&str>) -> Result<KeyHandle> {
        let key_id = Sha1::digest(key.public_key()?.subject_public_key.raw_bytes()).to_vec();
        let algorithm = key.algorithm();

        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);

        if let Some((_, metadata)) = keys.get(&key_id) {
            return Ok(KeyHandle::new(key_id, algorithm, metadata.clone()));
        }

        // Check for duplicate labels
        if let Some(label_str) = label {
            if keys
                .values()
                .any(|(_, metadata)| metadata.label.as_deref() == Some(label_str))
            {
                return Err(CaError::invalid_key(format!(
                    "Key with label '{label_str}' already exists"
                )));
            }
        }

        let metadata = KeyMetadata {
            label: label.map(String::from),
            can_sign: true,
            extractable: true, // Software keys are always extractable
            attributes: HashMap::new(),
        };

        keys.insert(key_id.clone(), (key, metadata.clone()));
        debug!(
            key_id = %hex::encode(&key_id),
            algorithm = %algorithm,
            "Stored software key"
        );

        Ok(KeyHandle::new(key_id, algorithm, metadata))
    }

    fn with_key<T>(&self, handle: &KeyHandle, f: impl FnOnce(&SoftwareKey) -> Result<T>) -> Result<T> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let (key, _) = keys
            .get(&handle.id)
            .ok_or_else(|| CaError::key_not_found(handle.id_hex()))?;
        f(key)
    }

    fn handle_for(key_id: &[u8], key: &SoftwareKey, metadata: &KeyMetadata) -> KeyHandle {
        KeyHandle::new(key_id.to_vec(), key.algorithm(), metadata.clone())
    }
}

impl Default for SoftwareKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyProvider for SoftwareKeyProvider {
    async fn generate_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        label: Option<&str>,
    ) -> Result<KeyHandle> {
        let key = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            SoftwareKey::generate(algorithm, &mut *rng)?
        };
        self.insert(key, label)
    }

    async fn public_key(&self, handle: &KeyHandle) -> Result<SubjectPublicKeyInfoOwned> {
        self.with_key(handle, SoftwareKey::public_key)
    }

    async fn sign(&self, handle: &KeyHandle, digest: &[u8]) -> Result<Vec<u8>> {
        self.with_key(handle, |key| key.sign_digest(digest))
    }

    async fn list_keys(&self) -> Result<Vec<KeyHandle>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .map(|(key_id, (key, metadata))| Self::handle_for(key_id, key, metadata))
            .collect())
    }

    async fn find_key(&self, label: &str) -> Result<Option<KeyHandle>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .find(|(_, (_, metadata))| metadata.label.as_deref() == Some(label))
            .map(|(key_id, (key, metadata))| Self::handle_for(key_id, key, metadata)))
    }

    async fn find_key_by_id(&self, id: &[u8]) -> Result<Option<KeyHandle>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .get(id)
            .map(|(key, metadata)| Self::handle_for(id, key, metadata)))
    }

    async fn delete_key(&self, handle: &KeyHandle) -> Result<()> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);

        if keys.remove(&handle.id).is_some() {
            Ok(())
        } else {
            Err(CaError::key_not_found(format!(
                "Key not found for deletion: {}",
                handle.id_hex()
            )))
        }
    }

    async fn export_private_key(&self, handle: &KeyHandle) -> Result<Zeroizing<String>> {
        self.with_key(handle, SoftwareKey::to_pkcs8_pem)
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Software Key Provider".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            manufacturer: "usg-ca".to_string(),
            supports_key_generation: true,
            supports_key_deletion: true,
            supports_key_export: true,
        }
    }
}
