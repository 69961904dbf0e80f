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

//! CSR (Certificate Signing Request) generation.
//!
//! [`CsrProvider`] turns a [`CertificateRequest`] into a fresh key pair and a
//! PKCS#10 request signed with it. Keys are generated through a
//! [`KeyProvider`], so a module-backed provider keeps the private key inside
//! the module and only hands back a [`Signer`] and key id.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usg_ca::csr::{CsrProvider, X509Name};
//! use usg_ca::hsm::SoftwareKeyProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let csr = CsrProvider::new(Arc::new(SoftwareKeyProvider::new()));
//! let request = csr.new_signing_certificate_request(
//!     "web",
//!     "ECDSA",
//!     256,
//!     "localhost",
//!     vec![X509Name {
//!         organization: "Example Corp".into(),
//!         ..Default::default()
//!     }],
//!     vec!["127.0.0.1".into(), "localhost".into()],
//! );
//!
//! let generated = csr.generate_key_and_request(&request).await?;
//! println!("{}", generated.csr_pem);
//! # Ok(())
//! # }
//! ```

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use const_oid::db::rfc4519;
use const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME;
use const_oid::db::rfc5912::ID_EXTENSION_REQ;
use der::asn1::{BitString, Ia5String, OctetString, PrintableStringRef, SetOfVec, Utf8StringRef};
use der::pem::LineEnding;
use der::{Any, Encode, Tag};
use rand_core::{CryptoRngCore, OsRng, RngCore};
use serde::{Deserialize, Serialize};
use spki::{ObjectIdentifier, SubjectPublicKeyInfoOwned};
use tracing::{debug, info};
use x509_cert::attr::{Attribute, AttributeTypeAndValue, Attributes};
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq, Version};
use zeroize::Zeroizing;

use crate::error::{CaError, Result};
use crate::hsm::{KeyAlgorithm, KeyProvider, SignatureAlgorithm, Signer};

/// Label used for generated keys when the request does not name one.
pub const DEFAULT_KEY_LABEL: &str = "csr";

const PEM_LABEL: &str = "CERTIFICATE REQUEST";

/// Subject name attributes beyond the common name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509Name {
    /// Country (C).
    #[serde(rename = "C", default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    /// State or province (ST).
    #[serde(rename = "ST", default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// Locality (L).
    #[serde(rename = "L", default, skip_serializing_if = "String::is_empty")]
    pub locality: String,
    /// Organization (O).
    #[serde(rename = "O", default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    /// Organizational unit (OU).
    #[serde(rename = "OU", default, skip_serializing_if = "String::is_empty")]
    pub organizational_unit: String,
}

/// Algorithm and size of the key to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    /// Label prefix for the generated key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// `RSA` or `ECDSA`.
    pub algo: String,
    /// RSA modulus bits, or ECDSA curve size.
    pub size: u32,
}

impl KeyRequest {
    /// A key request for `algo` and `size`.
    pub fn new(label: impl Into<String>, algo: impl Into<String>, size: u32) -> Self {
        Self {
            label: label.into(),
            algo: algo.into(),
            size,
        }
    }

    /// The requested key algorithm.
    pub fn algorithm(&self) -> Result<KeyAlgorithm> {
        KeyAlgorithm::from_request(&self.algo, self.size)
    }

    /// The signature algorithm a key of this type and size signs with.
    pub fn sig_algo(&self) -> Result<SignatureAlgorithm> {
        Ok(self.algorithm()?.default_signature_algorithm())
    }
}

/// Everything needed to build a signing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Subject common name.
    #[serde(rename = "CN", default)]
    pub common_name: String,
    /// Additional subject name records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<X509Name>,
    /// Subject alternative names: IPs, emails, URIs or DNS names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// Subject serial number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Key to generate. Required.
    #[serde(rename = "key", default, skip_serializing_if = "Option::is_none")]
    pub key_request: Option<KeyRequest>,
}

impl CertificateRequest {
    /// The key request, or [`CaError::InvalidKeyRequest`].
    pub fn key_request(&self) -> Result<&KeyRequest> {
        self.key_request.as_ref().ok_or(CaError::InvalidKeyRequest)
    }

    /// Subject distinguished name.
    ///
    /// Per name record: C, ST, L, O, OU. Then CN, then serial number.
    pub fn subject(&self) -> Result<Name> {
        let mut rdns = Vec::new();
        for name in &self.names {
            push_rdn(&mut rdns, rfc4519::C, Tag::PrintableString, &name.country)?;
            push_rdn(&mut rdns, rfc4519::ST, Tag::Utf8String, &name.state)?;
            push_rdn(&mut rdns, rfc4519::L, Tag::Utf8String, &name.locality)?;
            push_rdn(&mut rdns, rfc4519::O, Tag::Utf8String, &name.organization)?;
            push_rdn(&mut rdns, rfc4519::OU, Tag::Utf8String, &name.organizational_unit)?;
        }
        push_rdn(&mut rdns, rfc4519::CN, Tag::Utf8String, &self.common_name)?;
        if let Some(serial) = &self.serial_number {
            push_rdn(&mut rdns, rfc4519::SERIAL_NUMBER, Tag::PrintableString, serial)?;
        }
        Ok(RdnSequence(rdns))
    }

    /// Subject alternative names, classified from `hosts`.
    pub fn subject_alt_names(&self) -> Result<Vec<GeneralName>> {
        self.hosts.iter().map(|host| classify_host(host)).collect()
    }
}

fn push_rdn(
    rdns: &mut Vec<RelativeDistinguishedName>,
    oid: ObjectIdentifier,
    tag: Tag,
    value: &str,
) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    let encoded = match tag {
        Tag::PrintableString => PrintableStringRef::new(value).and_then(|v| Any::encode_from(&v)),
        Tag::Utf8String => Utf8StringRef::new(value).and_then(|v| Any::encode_from(&v)),
        other => Any::new(other, value.as_bytes()),
    }
    .map_err(|e| CaError::csr(format!("subject attribute {oid} {value:?}: {e}")))?;

    let mut set = SetOfVec::new();
    set.insert(AttributeTypeAndValue {
        oid,
        value: encoded,
    })?;
    rdns.push(RelativeDistinguishedName(set));
    Ok(())
}

/// IP literal, then `@` (email), then `://` (URI), else DNS name.
fn classify_host(host: &str) -> Result<GeneralName> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        let octets = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        return Ok(GeneralName::IpAddress(OctetString::new(octets)?));
    }

    let value = Ia5String::new(host).map_err(|e| CaError::csr(format!("host {host:?}: {e}")))?;
    Ok(if host.contains('@') {
        GeneralName::Rfc822Name(value)
    } else if host.contains("://") {
        GeneralName::UniformResourceIdentifier(value)
    } else {
        GeneralName::DnsName(value)
    })
}

/// Subject and attributes of a request, built before any key is involved.
struct RequestBody {
    subject: Name,
    attributes: Attributes,
}

impl RequestBody {
    fn new(request: &CertificateRequest) -> Result<Self> {
        Ok(Self {
            subject: request.subject()?,
            attributes: request_attributes(&request.subject_alt_names()?)?,
        })
    }

    /// Bind the signer's public key, sign, and return DER.
    async fn sign(self, signer: &Signer) -> Result<Vec<u8>> {
        let info = CertReqInfo {
            version: Version::V1,
            subject: self.subject,
            public_key: signer.public_key().clone(),
            attributes: self.attributes,
        };

        let tbs = info.to_der()?;
        let (algorithm, signature) = signer.sign_message(&tbs).await?;

        let csr = CertReq {
            info,
            algorithm: algorithm.algorithm_identifier(),
            signature: BitString::from_bytes(&signature)?,
        };
        Ok(csr.to_der()?)
    }
}

/// Result of [`CsrProvider::generate_key_and_request`].
#[derive(Debug, Clone)]
pub struct GeneratedRequest {
    /// PEM `CERTIFICATE REQUEST`.
    pub csr_pem: String,
    /// DER encoding of the request.
    pub csr_der: Vec<u8>,
    /// Signer for the generated key, which stays in the provider.
    pub signer: Signer,
    /// Hex identifier of the generated key.
    pub key_id: String,
}

/// Result of [`CsrProvider::create_request_and_export_key`].
pub struct ExportedRequest {
    /// PEM `CERTIFICATE REQUEST`.
    pub csr_pem: String,
    /// DER encoding of the request.
    pub csr_der: Vec<u8>,
    /// PKCS#8 PEM private key.
    pub private_key: Zeroizing<String>,
    /// Hex identifier of the key.
    pub key_id: String,
    /// Public key of the request.
    pub public_key: SubjectPublicKeyInfoOwned,
}

impl std::fmt::Debug for ExportedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedRequest")
            .field("csr_der", &self.csr_der.len())
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// The signature algorithm `signer` uses for requests and certificates.
///
/// Depends only on the key type and size.
pub fn default_sig_algo(signer: &Signer) -> SignatureAlgorithm {
    signer.algorithm().default_signature_algorithm()
}

/// Builds signing requests with keys from one provider.
#[derive(Clone)]
pub struct CsrProvider {
    provider: Arc<dyn KeyProvider>,

    /// Entropy source for key label suffixes
    rng: Arc<Mutex<Box<dyn CryptoRngCore + Send>>>,
}

impl CsrProvider {
    /// A CSR engine generating keys in `provider`.
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self::with_rng(provider, OsRng)
    }

    /// A CSR engine that draws key label suffixes from `rng`.
    pub fn with_rng(
        provider: Arc<dyn KeyProvider>,
        rng: impl CryptoRngCore + Send + 'static,
    ) -> Self {
        Self {
            provider,
            rng: Arc::new(Mutex::new(Box::new(rng))),
        }
    }

    /// The bound provider.
    pub fn provider(&self) -> &Arc<dyn KeyProvider> {
        &self.provider
    }

    /// Convenience constructor for a complete request.
    pub fn new_signing_certificate_request(
        &self,
        key_label: &str,
        algo: &str,
        size: u32,
        common_name: &str,
        names: Vec<X509Name>,
        hosts: Vec<String>,
    ) -> CertificateRequest {
        CertificateRequest {
            common_name: common_name.to_string(),
            names,
            hosts,
            serial_number: None,
            key_request: Some(KeyRequest::new(key_label, algo, size)),
        }
    }

    /// Generate a key in the provider and a request signed by it.
    ///
    /// The key request, subject and SANs are validated before the provider
    /// is touched, so a malformed request never leaves a key behind. If the
    /// key is generated but signing or encoding fails, the error is
    /// [`CaError::RequestAssembly`] carrying the key id; the key is left in
    /// the provider.
    pub async fn generate_key_and_request(
        &self,
        request: &CertificateRequest,
    ) -> Result<GeneratedRequest> {
        let key_request = request.key_request()?;
        let algorithm = key_request.algorithm()?;
        let body = RequestBody::new(request)?;
        let label = self.unique_label(&key_request.label);

        let handle = self
            .provider
            .generate_key_pair(algorithm, Some(&label))
            .await?;
        let key_id = handle.id_hex();
        debug!(%label, %key_id, %algorithm, "Generated key for request");

        let assembled = async {
            let signer = Signer::new(self.provider.clone(), handle).await?;
            let csr_der = body.sign(&signer).await?;
            let csr_pem = encode_pem(&csr_der)?;
            Ok::<_, CaError>((signer, csr_der, csr_pem))
        }
        .await;
        let (signer, csr_der, csr_pem) =
            assembled.map_err(|e| CaError::request_assembly(&key_id, e))?;

        info!(
            common_name = %request.common_name,
            %key_id,
            signature = default_sig_algo(&signer).as_str(),
            "Created certificate request"
        );

        Ok(GeneratedRequest {
            csr_pem,
            csr_der,
            signer,
            key_id,
        })
    }

    /// Generate a key, build a request, and hand back the private key.
    ///
    /// The key is removed from the provider once exported. Only providers
    /// that export private keys can serve this call. Every failure is
    /// wrapped in [`CaError::ProcessRequest`].
    pub async fn create_request_and_export_key(
        &self,
        request: &CertificateRequest,
    ) -> Result<ExportedRequest> {
        self.create_and_export(request)
            .await
            .map_err(CaError::process_request)
    }

    async fn create_and_export(&self, request: &CertificateRequest) -> Result<ExportedRequest> {
        request.key_request()?;
        if !self.provider.provider_info().supports_key_export {
            return Err(CaError::not_supported(format!(
                "{} does not export private keys",
                self.provider.provider_info().name
            )));
        }

        let generated = self.generate_key_and_request(request).await?;
        let handle = generated.signer.key_handle();
        let private_key = self
            .provider
            .export_private_key(handle)
            .await
            .map_err(|e| CaError::request_assembly(&generated.key_id, e))?;
        self.provider
            .delete_key(handle)
            .await
            .map_err(|e| CaError::request_assembly(&generated.key_id, e))?;

        Ok(ExportedRequest {
            csr_pem: generated.csr_pem,
            csr_der: generated.csr_der,
            private_key,
            public_key: generated.signer.public_key().clone(),
            key_id: generated.key_id,
        })
    }

    /// Build `request` for an existing key and sign it. Returns DER.
    ///
    /// The key request, if any, is ignored; the signer decides the
    /// algorithm.
    pub async fn sign_request(
        &self,
        request: &CertificateRequest,
        signer: &Signer,
    ) -> Result<Vec<u8>> {
        RequestBody::new(request)?.sign(signer).await
    }

    /// `{label}_{8 hex chars}`, so repeated requests never collide on label.
    fn unique_label(&self, label: &str) -> String {
        let prefix = if label.is_empty() {
            DEFAULT_KEY_LABEL
        } else {
            label
        };
        let mut suffix = [0u8; 4];
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(&mut suffix);
        format!("{prefix}_{}", hex::encode(suffix))
    }
}

impl std::fmt::Debug for CsrProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrProvider")
            .field("provider", &self.provider.provider_info().name)
            .finish()
    }
}

/// An `extensionRequest` attribute carrying the SAN extension, if any.
fn request_attributes(sans: &[GeneralName]) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    if sans.is_empty() {
        return Ok(attributes);
    }

    let extension = Extension {
        extn_id: ID_CE_SUBJECT_ALT_NAME,
        critical: false,
        extn_value: OctetString::new(SubjectAltName(sans.to_vec()).to_der()?)?,
    };

    let mut values = SetOfVec::new();
    values.insert(Any::encode_from(&ExtensionReq(vec![extension]))?)?;
    attributes.insert(Attribute {
        oid: ID_EXTENSION_REQ,
        values,
    })?;
    Ok(attributes)
}

fn encode_pem(csr_der: &[u8]) -> Result<String> {
    der::pem::encode_string(PEM_LABEL, LineEnding::LF, csr_der)
        .map_err(|e| CaError::csr(e.to_string()))
}
