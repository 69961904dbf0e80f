// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! A signing capability bound to exactly one provider key.

use std::fmt;
use std::sync::Arc;

use der::Encode;
use spki::SubjectPublicKeyInfoOwned;

use super::{HashAlgorithm, KeyAlgorithm, KeyHandle, KeyProvider, SignatureAlgorithm};
use crate::error::Result;

/// A public key plus the ability to produce signatures with its private half.
///
/// The private key stays with the provider. Whether it can ever be exported
/// is decided by the provider, not by the signer.
#[derive(Clone)]
pub struct Signer {
    provider: Arc<dyn KeyProvider>,
    handle: KeyHandle,
    public_key: SubjectPublicKeyInfoOwned,
}

impl Signer {
    /// Bind `handle` in `provider`, fetching its public key once.
    pub async fn new(provider: Arc<dyn KeyProvider>, handle: KeyHandle) -> Result<Self> {
        let public_key = provider.public_key(&handle).await?;
        Ok(Self {
            provider,
            handle,
            public_key,
        })
    }

    /// The public key in SubjectPublicKeyInfo form.
    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.public_key
    }

    /// DER encoding of the SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.public_key.to_der()?)
    }

    /// The raw subjectPublicKey bits.
    pub fn public_key_bytes(&self) -> &[u8] {
        self.public_key.subject_public_key.raw_bytes()
    }

    /// Digest of the public key bytes.
    pub fn key_hash(&self, algorithm: HashAlgorithm) -> Vec<u8> {
        algorithm.digest(self.public_key_bytes())
    }

    /// Subject key identifier: SHA-1 of the subjectPublicKey bits
    /// (RFC 5280, section 4.2.1.2, method 1).
    pub fn subject_key_id(&self) -> Vec<u8> {
        self.key_hash(HashAlgorithm::Sha1)
    }

    /// Key algorithm and size.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.handle.algorithm()
    }

    /// Canonical signature algorithm for this key.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.algorithm().default_signature_algorithm()
    }

    /// Handle of the bound key.
    pub fn key_handle(&self) -> &KeyHandle {
        &self.handle
    }

    /// Hex-encoded provider key identifier.
    pub fn key_id(&self) -> String {
        self.handle.id_hex()
    }

    /// The provider holding the private key.
    pub fn provider(&self) -> &Arc<dyn KeyProvider> {
        &self.provider
    }

    /// Sign a pre-computed digest.
    pub async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        self.provider.sign(&self.handle, digest).await
    }

    /// Hash `message` with the signer's default algorithm and sign it.
    pub async fn sign_message(&self, message: &[u8]) -> Result<(SignatureAlgorithm, Vec<u8>)> {
        let algorithm = self.signature_algorithm();
        let signature = self.sign(&algorithm.hash().digest(message)).await?;
        Ok((algorithm, signature))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("provider", &self.provider.provider_info().name)
            .field("key_id", &self.key_id())
            .field("algorithm", &self.algorithm())
            .finish()
    }
}
