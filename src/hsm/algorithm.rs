// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Key, hash and signature algorithm tables.

use std::fmt;

use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, SHA_256_WITH_RSA_ENCRYPTION,
    SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
};
use der::asn1::{Any, AnyRef};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use spki::{AlgorithmIdentifierOwned, ObjectIdentifier};

use crate::error::{CaError, Result};

/// Supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// ECDSA with P-256 curve (secp256r1 / prime256v1).
    EcdsaP256,

    /// ECDSA with P-384 curve (secp384r1).
    EcdsaP384,

    /// RSA with specified key size.
    Rsa {
        /// RSA modulus size in bits (typically 2048, 3072, or 4096).
        bits: u32,
    },
}

/// RSA modulus sizes the providers generate.
pub(crate) const RSA_KEY_SIZES: [u32; 3] = [2048, 3072, 4096];

impl KeyAlgorithm {
    /// Reject RSA sizes outside [`RSA_KEY_SIZES`] before a provider is asked
    /// to generate.
    pub(crate) fn check_generation_size(self) -> Result<()> {
        match self {
            Self::Rsa { bits } if !RSA_KEY_SIZES.contains(&bits) => {
                Err(CaError::unsupported_algorithm(format!(
                    "Unsupported RSA key size: {bits} bits (supported: 2048, 3072, 4096)"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Parse an algorithm name and size-or-curve parameter.
    ///
    /// `algo` is matched case-insensitively against `RSA` and `ECDSA`
    /// (or `EC`). For ECDSA the size selects the curve. RSA sizes are
    /// passed through; providers reject sizes they do not offer.
    pub fn from_request(algo: &str, size: u32) -> Result<Self> {
        match algo.to_ascii_uppercase().as_str() {
            "RSA" => Ok(Self::Rsa { bits: size }),
            "ECDSA" | "EC" => match size {
                256 => Ok(Self::EcdsaP256),
                384 => Ok(Self::EcdsaP384),
                _ => Err(CaError::unsupported_algorithm(format!(
                    "ECDSA curve size {size}"
                ))),
            },
            other => Err(CaError::unsupported_algorithm(other.to_string())),
        }
    }

    /// Get a string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ECDSA-P256",
            Self::EcdsaP384 => "ECDSA-P384",
            Self::Rsa { .. } => "RSA",
        }
    }

    /// Key size in bits (curve size for ECDSA).
    pub fn bits(&self) -> u32 {
        match self {
            Self::EcdsaP256 => 256,
            Self::EcdsaP384 => 384,
            Self::Rsa { bits } => *bits,
        }
    }

    /// The canonical signature algorithm for keys of this type and size.
    pub fn default_signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => SignatureAlgorithm::EcdsaWithSha256,
            Self::EcdsaP384 => SignatureAlgorithm::EcdsaWithSha384,
            Self::Rsa { bits } if *bits < 3072 => SignatureAlgorithm::Sha256WithRsa,
            Self::Rsa { bits } if *bits < 4096 => SignatureAlgorithm::Sha384WithRsa,
            Self::Rsa { .. } => SignatureAlgorithm::Sha512WithRsa,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa { bits } => write!(f, "RSA-{bits}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Digest algorithms used for signing and key fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1. Used for key identifiers only.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl HashAlgorithm {
    /// Hash `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Identify the algorithm that produced a digest of `len` bytes.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            48 => Some(Self::Sha384),
            64 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// DER prefix of the PKCS#1 v1.5 `DigestInfo` for this algorithm
    /// (RFC 8017, section 9.2, note 1).
    pub fn digest_info_prefix(&self) -> &'static [u8] {
        match self {
            Self::Sha1 => &[
                0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04,
                0x14,
            ],
            Self::Sha256 => &[
                0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x01, 0x05, 0x00, 0x04, 0x20,
            ],
            Self::Sha384 => &[
                0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x02, 0x05, 0x00, 0x04, 0x30,
            ],
            Self::Sha512 => &[
                0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x03, 0x05, 0x00, 0x04, 0x40,
            ],
        }
    }

    /// Get the algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature algorithms produced by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// sha256WithRSAEncryption.
    Sha256WithRsa,
    /// sha384WithRSAEncryption.
    Sha384WithRsa,
    /// sha512WithRSAEncryption.
    Sha512WithRsa,
    /// ecdsa-with-SHA256.
    EcdsaWithSha256,
    /// ecdsa-with-SHA384.
    EcdsaWithSha384,
}

impl SignatureAlgorithm {
    /// Object identifier of the algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha256WithRsa => SHA_256_WITH_RSA_ENCRYPTION,
            Self::Sha384WithRsa => SHA_384_WITH_RSA_ENCRYPTION,
            Self::Sha512WithRsa => SHA_512_WITH_RSA_ENCRYPTION,
            Self::EcdsaWithSha256 => ECDSA_WITH_SHA_256,
            Self::EcdsaWithSha384 => ECDSA_WITH_SHA_384,
        }
    }

    /// Look up an algorithm by object identifier.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            Self::Sha256WithRsa,
            Self::Sha384WithRsa,
            Self::Sha512WithRsa,
            Self::EcdsaWithSha256,
            Self::EcdsaWithSha384,
        ]
        .into_iter()
        .find(|alg| alg.oid() == *oid)
    }

    /// Digest algorithm applied before signing.
    pub fn hash(&self) -> HashAlgorithm {
        match self {
            Self::Sha256WithRsa | Self::EcdsaWithSha256 => HashAlgorithm::Sha256,
            Self::Sha384WithRsa | Self::EcdsaWithSha384 => HashAlgorithm::Sha384,
            Self::Sha512WithRsa => HashAlgorithm::Sha512,
        }
    }

    /// Whether this is an RSA PKCS#1 v1.5 algorithm.
    pub fn is_rsa(&self) -> bool {
        matches!(
            self,
            Self::Sha256WithRsa | Self::Sha384WithRsa | Self::Sha512WithRsa
        )
    }

    /// AlgorithmIdentifier for certificates and CSRs.
    ///
    /// RSA identifiers carry explicit NULL parameters; ECDSA identifiers
    /// omit them (RFC 5758, section 3.2).
    pub fn algorithm_identifier(&self) -> AlgorithmIdentifierOwned {
        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters: self.is_rsa().then(|| Any::from(AnyRef::NULL)),
        }
    }

    /// Get the algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256WithRsa => "SHA256-RSA",
            Self::Sha384WithRsa => "SHA384-RSA",
            Self::Sha512WithRsa => "SHA512-RSA",
            Self::EcdsaWithSha256 => "ECDSA-SHA256",
            Self::EcdsaWithSha384 => "ECDSA-SHA384",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
