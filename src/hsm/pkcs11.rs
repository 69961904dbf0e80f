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

//! PKCS#11 Hardware Security Module integration.
//!
//! This module provides a PKCS#11-based implementation of the [`KeyProvider`] trait,
//! allowing issuers and CSR generation to use keys stored in hardware security
//! modules, smart cards, and other PKCS#11-compatible devices.
//!
//! # Key Features
//!
//! - **Hardware security boundary**: Private keys never leave the HSM/token
//! - **Slot selection**: by slot id, by token label, or the first slot with a token
//! - **Bounded calls**: every module call runs on the blocking pool under a timeout
//! - **Persistent keys**: Keys persist across application restarts
//!
//! # Security Considerations
//!
//! - Private keys are generated sensitive and non-extractable
//! - PIN authentication is required for token access
//! - [`KeyProvider::export_private_key`] is never honored
//!
//! # Example
//!
//! ```no_run
//! use usg_ca::hsm::{HashAlgorithm, KeyProvider, KeyAlgorithm};
//! # #[cfg(feature = "pkcs11")]
//! use usg_ca::hsm::pkcs11::Pkcs11KeyProvider;
//!
//! # #[cfg(feature = "pkcs11")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize PKCS#11 provider with SoftHSM library
//! let provider = Pkcs11KeyProvider::new(
//!     "/usr/lib/softhsm/libsofthsm2.so",
//!     None, // Use first available slot
//!     "1234", // PIN
//! )?;
//!
//! let key_handle = provider
//!     .generate_key_pair(KeyAlgorithm::EcdsaP256, Some("issuing-key"))
//!     .await?;
//!
//! let digest = HashAlgorithm::Sha256.digest(b"data to sign");
//! let signature = provider.sign(&key_handle, &digest).await?;
//! # Ok(())
//! # }
//! ```

use super::{HashAlgorithm, KeyAlgorithm, KeyHandle, KeyMetadata, KeyProvider, ProviderInfo};
use crate::error::{CaError, Result};
use async_trait::async_trait;
use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, SECP_256_R_1, SECP_384_R_1};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::RvError;
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::{AuthPin, Ulong};
use der::asn1::{Any, BitString, OctetString};
use der::{Decode, Encode};
use pkcs8::EncodePublicKey;
use spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on a single module call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to reach and authenticate to a token.
#[derive(Debug, Clone)]
pub struct Pkcs11Settings {
    /// Path to the PKCS#11 module (e.g., "/usr/lib/softhsm/libsofthsm2.so").
    pub library_path: PathBuf,

    /// Slot to use. Takes precedence over `token_label`.
    pub slot_id: Option<u64>,

    /// Label of the token to use when no slot is given.
    pub token_label: Option<String>,

    /// User PIN.
    pub pin: String,

    /// Bound on each module call.
    pub timeout: Duration,
}

impl Pkcs11Settings {
    /// Settings for `library_path` with the first token and default timeout.
    pub fn new(library_path: impl Into<PathBuf>, pin: impl Into<String>) -> Self {
        Self {
            library_path: library_path.into(),
            slot_id: None,
            token_label: None,
            pin: pin.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// PKCS#11-based key provider for hardware security modules.
///
/// Keys are generated and stored within the secure boundary of the device.
/// The [`KeyHandle`] id of a key is its CKA_ID.
///
/// # Thread Safety
///
/// The PKCS#11 session is protected by a mutex. Module calls are blocking,
/// so each one is moved to the blocking thread pool and bounded by the
/// provider timeout; a call that exceeds it fails with
/// [`CaError::ProviderIo`].
pub struct Pkcs11KeyProvider {
    /// PKCS#11 context (library interface)
    _pkcs11: Arc<Pkcs11>,

    /// Active session with the token
    session: Arc<Mutex<Session>>,

    /// Slot being used
    slot: Slot,

    /// Bound on each module call
    timeout: Duration,

    /// Provider metadata
    info: ProviderInfo,
}

impl Pkcs11KeyProvider {
    /// Create a new PKCS#11 key provider.
    ///
    /// # Arguments
    ///
    /// * `library_path` - Path to the PKCS#11 library
    /// * `slot_id` - Optional slot ID to use. If None, uses the first slot with a token.
    /// * `pin` - PIN/password for token authentication
    ///
    /// # Errors
    ///
    /// Returns [`CaError::ProviderInit`] if:
    /// - The PKCS#11 library cannot be loaded
    /// - No token is found in the specified slot
    /// - PIN authentication fails
    pub fn new<P: AsRef<Path>>(library_path: P, slot_id: Option<u64>, pin: &str) -> Result<Self> {
        let mut settings = Pkcs11Settings::new(library_path.as_ref(), pin);
        settings.slot_id = slot_id;
        Self::open(&settings)
    }

    /// Open a session as described by `settings` and log in.
    pub fn open(settings: &Pkcs11Settings) -> Result<Self> {
        let name = settings.library_path.display().to_string();
        let init_err = |context: &str, e: cryptoki::error::Error| {
            CaError::provider_init(name.clone(), format!("{context}: {e}"))
        };

        let pkcs11 = Pkcs11::new(&settings.library_path)
            .map_err(|e| init_err("Failed to load PKCS#11 library", e))?;

        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| init_err("Failed to initialize PKCS#11 library", e))?;

        let lib_info = pkcs11
            .get_library_info()
            .map_err(|e| init_err("Failed to get library info", e))?;

        let slots = pkcs11
            .get_slots_with_token()
            .map_err(|e| init_err("Failed to get slots", e))?;

        let slot = match (settings.slot_id, settings.token_label.as_deref()) {
            (Some(id), _) => slots.into_iter().find(|s| s.id() == id).ok_or_else(|| {
                CaError::provider_init(&name, format!("Slot {id} not found or has no token"))
            })?,
            (None, Some(label)) => slots
                .into_iter()
                .find(|s| {
                    pkcs11
                        .get_token_info(*s)
                        .map(|t| t.label().trim() == label)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    CaError::provider_init(&name, format!("Token {label:?} not found"))
                })?,
            (None, None) => slots.into_iter().next().ok_or_else(|| {
                CaError::provider_init(&name, "No PKCS#11 slots with tokens found")
            })?,
        };

        let token_info = pkcs11
            .get_token_info(slot)
            .map_err(|e| init_err("Failed to get token info", e))?;

        let session = pkcs11
            .open_rw_session(slot)
            .map_err(|e| init_err("Failed to open session", e))?;

        let auth_pin = AuthPin::new(settings.pin.clone());
        session
            .login(UserType::User, Some(&auth_pin))
            .map_err(|e| init_err("Failed to login to token", e))?;

        let info = ProviderInfo {
            name: format!(
                "{} ({})",
                token_info.label().trim(),
                lib_info.library_description().trim()
            ),
            version: format!(
                "{}.{}",
                lib_info.cryptoki_version().major(),
                lib_info.cryptoki_version().minor()
            ),
            manufacturer: token_info.manufacturer_id().trim().to_string(),
            supports_key_generation: true,
            supports_key_deletion: true,
            supports_key_export: false,
        };

        info!(
            slot = slot.id(),
            token = %token_info.label().trim(),
            "Opened PKCS#11 session"
        );

        Ok(Self {
            _pkcs11: Arc::new(pkcs11),
            session: Arc::new(Mutex::new(session)),
            slot,
            timeout: settings.timeout,
            info,
        })
    }

    /// Replace the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `f` against the session on the blocking pool, bounded by the timeout.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let task = tokio::task::spawn_blocking(move || {
            let session = session.lock().unwrap_or_else(PoisonError::into_inner);
            f(&session)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CaError::provider_io(format!("{op} task failed: {e}"))),
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "PKCS#11 call timed out");
                Err(CaError::provider_io(format!(
                    "{op} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

fn hsm_error(context: &str, e: cryptoki::error::Error) -> CaError {
    CaError::provider_io(format!("{context}: {e}"))
}

/// Key generation rejections that mean "not offered", not "module failed".
fn generation_error(algorithm: KeyAlgorithm, e: cryptoki::error::Error) -> CaError {
    match e {
        cryptoki::error::Error::Pkcs11(
            RvError::KeySizeRange
            | RvError::MechanismInvalid
            | RvError::MechanismParamInvalid
            | RvError::CurveNotSupported
            | RvError::DomainParamsInvalid,
            _,
        ) => CaError::unsupported_algorithm(format!("{algorithm} rejected by module: {e}")),
        e => hsm_error("Failed to generate key pair", e),
    }
}

/// Attributes read to describe a private key object.
const KEY_ATTRIBUTES: [AttributeType; 7] = [
    AttributeType::KeyType,
    AttributeType::Id,
    AttributeType::EcParams,
    AttributeType::Modulus,
    AttributeType::Label,
    AttributeType::Sign,
    AttributeType::Extractable,
];

fn find_first(session: &Session, template: &[Attribute]) -> Result<Option<ObjectHandle>> {
    session
        .find_objects(template)
        .map(|handles| handles.into_iter().next())
        .map_err(|e| hsm_error("Failed to find object", e))
}

fn find_private_key(session: &Session, key_id: &[u8]) -> Result<ObjectHandle> {
    let template = [
        Attribute::Id(key_id.to_vec()),
        Attribute::Class(ObjectClass::PRIVATE_KEY),
    ];
    find_first(session, &template)?
        .ok_or_else(|| CaError::key_not_found(hex::encode(key_id)))
}

fn find_public_key(session: &Session, key_id: &[u8]) -> Result<ObjectHandle> {
    let template = [
        Attribute::Id(key_id.to_vec()),
        Attribute::Class(ObjectClass::PUBLIC_KEY),
    ];
    find_first(session, &template)?
        .ok_or_else(|| CaError::key_not_found(format!("public key {}", hex::encode(key_id))))
}

/// Build a [`KeyHandle`] for a private key object, or `None` for key types we don't use.
fn describe_key(session: &Session, object: ObjectHandle, slot_id: u64) -> Result<Option<KeyHandle>> {
    let attrs = session
        .get_attributes(object, &KEY_ATTRIBUTES)
        .map_err(|e| hsm_error("Failed to get key attributes", e))?;

    let Some(key_id) = attrs.iter().find_map(|a| match a {
        Attribute::Id(id) => Some(id.clone()),
        _ => None,
    }) else {
        return Ok(None);
    };

    let algorithm = match algorithm_from_attributes(&attrs) {
        Some(KeyAlgorithm::Rsa { bits: 0 }) => {
            // Modulus not readable on the private object; ask the public half.
            let public = find_public_key(session, &key_id)?;
            let public_attrs = session
                .get_attributes(public, &[AttributeType::ModulusBits, AttributeType::Modulus])
                .map_err(|e| hsm_error("Failed to get RSA attributes", e))?;
            match rsa_bits(&public_attrs) {
                Some(bits) => KeyAlgorithm::Rsa { bits },
                None => return Ok(None),
            }
        }
        Some(algorithm) => algorithm,
        None => return Ok(None),
    };

    Ok(Some(KeyHandle::new(
        key_id,
        algorithm,
        key_metadata(&attrs, slot_id),
    )))
}

/// Key algorithm from KeyType/EcParams/Modulus attributes.
///
/// RSA keys whose size can't be read yet come back as `Rsa { bits: 0 }`.
fn algorithm_from_attributes(attrs: &[Attribute]) -> Option<KeyAlgorithm> {
    let key_type = attrs.iter().find_map(|a| match a {
        Attribute::KeyType(kt) => Some(*kt),
        _ => None,
    })?;

    if key_type == KeyType::EC {
        let params = attrs.iter().find_map(|a| match a {
            Attribute::EcParams(p) => Some(p),
            _ => None,
        })?;
        let curve = ObjectIdentifier::from_der(params).ok()?;
        if curve == SECP_256_R_1 {
            Some(KeyAlgorithm::EcdsaP256)
        } else if curve == SECP_384_R_1 {
            Some(KeyAlgorithm::EcdsaP384)
        } else {
            None
        }
    } else if key_type == KeyType::RSA {
        Some(KeyAlgorithm::Rsa {
            bits: rsa_bits(attrs).unwrap_or(0),
        })
    } else {
        None
    }
}

fn rsa_bits(attrs: &[Attribute]) -> Option<u32> {
    attrs.iter().find_map(|a| match a {
        Attribute::ModulusBits(bits) => Some(**bits as u32),
        Attribute::Modulus(m) => {
            let leading = m.iter().take_while(|b| **b == 0).count();
            Some(((m.len() - leading) * 8) as u32)
        }
        _ => None,
    })
}

fn key_metadata(attrs: &[Attribute], slot_id: u64) -> KeyMetadata {
    let mut metadata = KeyMetadata::default();
    let mut attributes = HashMap::new();
    attributes.insert("slot_id".to_string(), slot_id.to_string());

    for attr in attrs {
        match attr {
            Attribute::Label(l) if !l.is_empty() => {
                metadata.label = Some(String::from_utf8_lossy(l).to_string());
            }
            Attribute::Sign(s) => metadata.can_sign = *s,
            Attribute::Extractable(e) => metadata.extractable = *e,
            Attribute::Id(id) => {
                attributes.insert("key_id".to_string(), hex::encode(id));
            }
            _ => {}
        }
    }

    metadata.attributes = attributes;
    metadata
}

/// Strip the DER OCTET STRING wrapper modules put around CKA_EC_POINT.
fn ec_point_bytes(raw: &[u8]) -> Vec<u8> {
    // Some modules return the bare uncompressed point.
    if raw.first() == Some(&0x04) && matches!(raw.len(), 65 | 97) {
        return raw.to_vec();
    }
    match OctetString::from_der(raw) {
        Ok(octets) => octets.as_bytes().to_vec(),
        Err(_) => raw.to_vec(),
    }
}

fn ec_spki(point: &[u8], curve: ObjectIdentifier) -> Result<SubjectPublicKeyInfoOwned> {
    Ok(SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: ID_EC_PUBLIC_KEY,
            parameters: Some(Any::encode_from(&curve)?),
        },
        subject_public_key: BitString::from_bytes(point)?,
    })
}

fn rsa_spki(modulus: &[u8], exponent: &[u8]) -> Result<SubjectPublicKeyInfoOwned> {
    let key = rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(modulus),
        rsa::BigUint::from_bytes_be(exponent),
    )
    .map_err(|e| CaError::invalid_key(format!("RSA public key: {e}")))?;
    let document = key
        .to_public_key_der()
        .map_err(|e| CaError::invalid_key(format!("RSA public key: {e}")))?;
    Ok(SubjectPublicKeyInfoOwned::from_der(document.as_bytes())?)
}

fn read_public_key(
    session: &Session,
    key_id: &[u8],
    algorithm: KeyAlgorithm,
) -> Result<SubjectPublicKeyInfoOwned> {
    let public = find_public_key(session, key_id)?;

    match algorithm {
        KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 => {
            let attrs = session
                .get_attributes(public, &[AttributeType::EcPoint])
                .map_err(|e| hsm_error("Failed to get EC_POINT", e))?;
            let point = attrs
                .iter()
                .find_map(|a| match a {
                    Attribute::EcPoint(p) => Some(ec_point_bytes(p)),
                    _ => None,
                })
                .ok_or_else(|| CaError::provider_io("EC_POINT attribute missing"))?;
            let curve = if algorithm == KeyAlgorithm::EcdsaP256 {
                SECP_256_R_1
            } else {
                SECP_384_R_1
            };
            ec_spki(&point, curve)
        }
        KeyAlgorithm::Rsa { .. } => {
            let attrs = session
                .get_attributes(
                    public,
                    &[AttributeType::Modulus, AttributeType::PublicExponent],
                )
                .map_err(|e| hsm_error("Failed to get RSA attributes", e))?;
            let mut modulus = None;
            let mut exponent = None;
            for attr in attrs {
                match attr {
                    Attribute::Modulus(m) => modulus = Some(m),
                    Attribute::PublicExponent(e) => exponent = Some(e),
                    _ => {}
                }
            }
            match (modulus, exponent) {
                (Some(m), Some(e)) => rsa_spki(&m, &e),
                _ => Err(CaError::provider_io("RSA public key attributes missing")),
            }
        }
    }
}

/// Data handed to CKM_RSA_PKCS: the DigestInfo for `digest`.
fn rsa_digest_info(digest: &[u8]) -> Result<Vec<u8>> {
    let hash = HashAlgorithm::from_digest_len(digest.len()).ok_or_else(|| {
        CaError::unsupported_algorithm(format!("digest of {} bytes", digest.len()))
    })?;
    let mut data = hash.digest_info_prefix().to_vec();
    data.extend_from_slice(digest);
    Ok(data)
}

/// CKM_ECDSA returns r||s; callers expect a DER ECDSA-Sig-Value.
fn ecdsa_signature_der(raw: &[u8], algorithm: KeyAlgorithm) -> Result<Vec<u8>> {
    let invalid = |e: p256::ecdsa::Error| {
        CaError::provider_io(format!("Malformed ECDSA signature from module: {e}"))
    };
    match algorithm {
        KeyAlgorithm::EcdsaP256 => Ok(p256::ecdsa::Signature::from_slice(raw)
            .map_err(invalid)?
            .to_der()
            .as_bytes()
            .to_vec()),
        KeyAlgorithm::EcdsaP384 => Ok(p384::ecdsa::Signature::from_slice(raw)
            .map_err(invalid)?
            .to_der()
            .as_bytes()
            .to_vec()),
        KeyAlgorithm::Rsa { .. } => Ok(raw.to_vec()),
    }
}

fn key_templates(
    algorithm: KeyAlgorithm,
    key_id: &[u8],
    label: &[u8],
) -> Result<(Mechanism<'static>, Vec<Attribute>, Vec<Attribute>)> {
    let private = vec![
        Attribute::Label(label.to_vec()),
        Attribute::Id(key_id.to_vec()),
        Attribute::Token(true),
        Attribute::Private(true),
        Attribute::Sensitive(true),
        Attribute::Sign(true),
        Attribute::Extractable(false),
    ];
    let mut public = vec![
        Attribute::Label(label.to_vec()),
        Attribute::Id(key_id.to_vec()),
        Attribute::Token(true),
        Attribute::Verify(true),
    ];

    let mechanism = match algorithm {
        KeyAlgorithm::EcdsaP256 => {
            public.push(Attribute::EcParams(SECP_256_R_1.to_der()?));
            Mechanism::EccKeyPairGen
        }
        KeyAlgorithm::EcdsaP384 => {
            public.push(Attribute::EcParams(SECP_384_R_1.to_der()?));
            Mechanism::EccKeyPairGen
        }
        KeyAlgorithm::Rsa { bits } => {
            public.push(Attribute::ModulusBits(Ulong::from(u64::from(bits))));
            public.push(Attribute::PublicExponent(vec![0x01, 0x00, 0x01])); // 65537
            Mechanism::RsaPkcsKeyPairGen
        }
    };

    Ok((mechanism, public, private))
}

#[async_trait]
impl KeyProvider for Pkcs11KeyProvider {
    async fn generate_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        label: Option<&str>,
    ) -> Result<KeyHandle> {
        algorithm.check_generation_size()?;
        let label = label.map(String::from);
        let slot_id = self.slot.id();

        self.run("generate_key_pair", move |session| {
            // Check for duplicate labels
            if let Some(label_str) = label.as_deref() {
                let template = [
                    Attribute::Label(label_str.as_bytes().to_vec()),
                    Attribute::Class(ObjectClass::PRIVATE_KEY),
                ];
                if find_first(session, &template)?.is_some() {
                    return Err(CaError::invalid_key(format!(
                        "Key with label '{label_str}' already exists"
                    )));
                }
            }

            // Generate a unique CKA_ID for this key pair
            let key_id = uuid::Uuid::new_v4().as_bytes().to_vec();
            let label_bytes = label.unwrap_or_default().into_bytes();
            let (mechanism, public, private) = key_templates(algorithm, &key_id, &label_bytes)?;

            let (_, private_handle) = session
                .generate_key_pair(&mechanism, &public, &private)
                .map_err(|e| generation_error(algorithm, e))?;

            let attrs = session
                .get_attributes(private_handle, &KEY_ATTRIBUTES)
                .map_err(|e| hsm_error("Failed to get key attributes", e))?;

            debug!(key_id = %hex::encode(&key_id), %algorithm, "Generated PKCS#11 key pair");
            Ok(KeyHandle::new(key_id, algorithm, key_metadata(&attrs, slot_id)))
        })
        .await
    }

    async fn public_key(&self, handle: &KeyHandle) -> Result<SubjectPublicKeyInfoOwned> {
        let key_id = handle.id.clone();
        let algorithm = handle.algorithm;
        self.run("public_key", move |session| {
            read_public_key(session, &key_id, algorithm)
        })
        .await
    }

    async fn sign(&self, handle: &KeyHandle, digest: &[u8]) -> Result<Vec<u8>> {
        let key_id = handle.id.clone();
        let algorithm = handle.algorithm;
        let data = match algorithm {
            KeyAlgorithm::Rsa { .. } => rsa_digest_info(digest)?,
            _ => digest.to_vec(),
        };

        let raw = self
            .run("sign", move |session| {
                let private = find_private_key(session, &key_id)?;
                let mechanism = match algorithm {
                    KeyAlgorithm::Rsa { .. } => Mechanism::RsaPkcs,
                    _ => Mechanism::Ecdsa,
                };
                session
                    .sign(&mechanism, private, &data)
                    .map_err(|e| hsm_error("Failed to sign data", e))
            })
            .await?;

        ecdsa_signature_der(&raw, algorithm)
    }

    async fn list_keys(&self) -> Result<Vec<KeyHandle>> {
        let slot_id = self.slot.id();
        self.run("list_keys", move |session| {
            let objects = session
                .find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])
                .map_err(|e| hsm_error("Failed to list keys", e))?;

            let mut handles = Vec::new();
            for object in objects {
                if let Some(handle) = describe_key(session, object, slot_id)? {
                    handles.push(handle);
                }
            }
            Ok(handles)
        })
        .await
    }

    async fn find_key(&self, label: &str) -> Result<Option<KeyHandle>> {
        let label = label.as_bytes().to_vec();
        let slot_id = self.slot.id();
        self.run("find_key", move |session| {
            let template = [
                Attribute::Label(label),
                Attribute::Class(ObjectClass::PRIVATE_KEY),
            ];
            match find_first(session, &template)? {
                Some(object) => describe_key(session, object, slot_id),
                None => Ok(None),
            }
        })
        .await
    }

    async fn find_key_by_id(&self, id: &[u8]) -> Result<Option<KeyHandle>> {
        let id = id.to_vec();
        let slot_id = self.slot.id();
        self.run("find_key_by_id", move |session| {
            let template = [Attribute::Id(id), Attribute::Class(ObjectClass::PRIVATE_KEY)];
            match find_first(session, &template)? {
                Some(object) => describe_key(session, object, slot_id),
                None => Ok(None),
            }
        })
        .await
    }

    async fn delete_key(&self, handle: &KeyHandle) -> Result<()> {
        let key_id = handle.id.clone();
        self.run("delete_key", move |session| {
            let private = find_private_key(session, &key_id)?;
            let public = find_public_key(session, &key_id).ok();

            session
                .destroy_object(private)
                .map_err(|e| hsm_error("Failed to delete private key", e))?;

            if let Some(public) = public {
                session
                    .destroy_object(public)
                    .map_err(|e| hsm_error("Failed to delete public key", e))?;
            }
            Ok(())
        })
        .await
    }

    fn provider_info(&self) -> ProviderInfo {
        self.info.clone()
    }
}

impl Drop for Pkcs11KeyProvider {
    fn drop(&mut self) {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = session.logout() {
            debug!("PKCS#11 logout failed: {}", e);
        }
    }
}
