// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Signing authorities.
//!
//! An [`Issuer`] binds a [`Signer`] to the certificate that names it, the
//! chain up to (but excluding) the root, and the root bundle. Construction
//! runs four load stages in order; the first failure aborts with an error
//! naming the stage:
//!
//! | Stage | Error prefix |
//! |---|---|
//! | signer | `unable to create signer: ` |
//! | certificate | `failed to load cert: ` |
//! | CA bundle | `failed to load ca-bundle: ` |
//! | root bundle | `failed to load root-bundle: ` |

use std::collections::HashMap;
use std::fmt;

use der::pem::LineEnding;
use der::{Decode, EncodePem};
use tracing::{debug, info};
use x509_cert::Certificate;

use super::config::{AiaConfig, CertProfile, IssuerConfig};
use super::template::expand_issuer_id;
use crate::error::{CaError, Result};
use crate::hsm::{HashAlgorithm, ProviderRegistry, Signer};
use crate::loader::ByteSource;

/// An issuer certificate and its intermediate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    cert: Certificate,
    chain: Vec<Certificate>,
}

impl Bundle {
    /// Bundle of `cert` followed by `chain`.
    pub fn new(cert: Certificate, chain: Vec<Certificate>) -> Self {
        Self { cert, chain }
    }

    /// The issuer certificate.
    pub fn cert(&self) -> &Certificate {
        &self.cert
    }

    /// Intermediate certificates, nearest first.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// Leaf followed by the chain.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        std::iter::once(&self.cert).chain(self.chain.iter())
    }

    /// Number of certificates, leaf included.
    pub fn len(&self) -> usize {
        1 + self.chain.len()
    }

    /// Always false; a bundle holds at least the leaf.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Concatenated PEM of the leaf and chain.
    pub fn to_pem(&self) -> Result<String> {
        pem_chain(self.iter())
    }
}

/// A certificate authority that can sign with its bound key.
pub struct Issuer {
    label: String,
    disabled: bool,
    signer: Signer,
    bundle: Bundle,
    root_bundle: Vec<Certificate>,
    pem: String,
    skid: String,
    aia: AiaConfig,
    profiles: HashMap<String, CertProfile>,
}

impl Issuer {
    /// Construct an issuer from its configuration.
    ///
    /// Disabled configurations are accepted; excluding them is up to the
    /// registry.
    pub async fn new(
        config: &IssuerConfig,
        providers: &ProviderRegistry,
        source: &dyn ByteSource,
    ) -> Result<Self> {
        let signer = load_signer(config, providers, source)
            .await
            .map_err(CaError::signer_load)?;

        let cert = load_cert(source, &config.cert_file, &signer).map_err(CaError::cert_load)?;

        let chain = match &config.ca_bundle_file {
            Some(reference) => load_bundle(source, reference).map_err(CaError::ca_bundle_load)?,
            None => Vec::new(),
        };

        let root_bundle = match &config.root_bundle_file {
            Some(reference) => {
                load_bundle(source, reference).map_err(CaError::root_bundle_load)?
            }
            None => Vec::new(),
        };

        let pem = cert.to_pem(LineEnding::LF).map_err(|e| CaError::cert_load(e.into()))?;
        let skid = hex::encode(signer.subject_key_id());

        info!(
            label = %config.label,
            skid = %skid,
            key_id = %signer.key_id(),
            chain = chain.len(),
            roots = root_bundle.len(),
            disabled = config.disabled,
            "Loaded issuer"
        );

        Ok(Self {
            label: config.label.clone(),
            disabled: config.disabled,
            signer,
            bundle: Bundle::new(cert, chain),
            root_bundle,
            pem,
            skid,
            aia: config.aia.clone().unwrap_or_default(),
            profiles: config.profiles.clone(),
        })
    }

    /// Issuer certificate plus intermediate chain.
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Root certificates.
    pub fn root_bundle(&self) -> &[Certificate] {
        &self.root_bundle
    }

    /// The bound signing capability.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// The issuer certificate.
    pub fn certificate(&self) -> &Certificate {
        self.bundle.cert()
    }

    /// PEM encoding of the issuer certificate.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Configured label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the configuration marked this issuer disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Digest of the public key bits under `algorithm`.
    pub fn key_hash(&self, algorithm: HashAlgorithm) -> Vec<u8> {
        self.signer.key_hash(algorithm)
    }

    /// Profile by name; `None` for unknown names.
    pub fn profile(&self, name: &str) -> Option<&CertProfile> {
        self.profiles.get(name)
    }

    /// All profiles.
    pub fn profiles(&self) -> &HashMap<String, CertProfile> {
        &self.profiles
    }

    /// Hex subject key identifier.
    pub fn subject_kid(&self) -> &str {
        &self.skid
    }

    /// Configured URL templates, unexpanded.
    pub fn aia(&self) -> &AiaConfig {
        &self.aia
    }

    /// CA issuers URL with `${ISSUER_ID}` replaced.
    pub fn aia_url(&self) -> Option<String> {
        self.expand(self.aia.aia_url.as_deref())
    }

    /// OCSP URL with `${ISSUER_ID}` replaced.
    pub fn ocsp_url(&self) -> Option<String> {
        self.expand(self.aia.ocsp_url.as_deref())
    }

    /// CRL URL with `${ISSUER_ID}` replaced.
    pub fn crl_url(&self) -> Option<String> {
        self.expand(self.aia.crl_url.as_deref())
    }

    fn expand(&self, template: Option<&str>) -> Option<String> {
        template
            .filter(|t| !t.is_empty())
            .map(|t| expand_issuer_id(t, &self.skid))
    }
}

impl fmt::Debug for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issuer")
            .field("label", &self.label)
            .field("disabled", &self.disabled)
            .field("skid", &self.skid)
            .field("signer", &self.signer)
            .field("chain", &self.bundle.chain.len())
            .field("roots", &self.root_bundle.len())
            .finish()
    }
}

async fn load_signer(
    config: &IssuerConfig,
    providers: &ProviderRegistry,
    source: &dyn ByteSource,
) -> Result<Signer> {
    let key = source
        .read_bytes(&config.key_file)
        .map_err(CaError::load_key_file)?;
    providers.resolve_signer(&key).await
}

fn load_cert(source: &dyn ByteSource, reference: &str, signer: &Signer) -> Result<Certificate> {
    let cert = parse_certificates(&source.read_bytes(reference)?)?
        .into_iter()
        .next()
        .ok_or_else(|| CaError::invalid_pem("no certificates found"))?;

    let cert_key = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    if cert_key != signer.public_key_bytes() {
        return Err(CaError::KeyMismatch);
    }

    Ok(cert)
}

fn load_bundle(source: &dyn ByteSource, reference: &str) -> Result<Vec<Certificate>> {
    let certs = parse_certificates(&source.read_bytes(reference)?)?;
    if certs.is_empty() {
        return Err(CaError::invalid_pem("no certificates found"));
    }
    debug!(reference, count = certs.len(), "Loaded certificate bundle");
    Ok(certs)
}

/// Parse a PEM chain, or a single DER certificate.
///
/// Text around the PEM sections (comments, `subject=` lines) is ignored and
/// non-certificate sections are skipped. The input is read as DER only when
/// it holds no PEM section at all.
pub(crate) fn parse_certificates(bytes: &[u8]) -> Result<Vec<Certificate>> {
    let mut reader = bytes;
    let mut certs = Vec::new();
    let mut saw_pem = false;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::X509Certificate(der))) => {
                saw_pem = true;
                certs.push(Certificate::from_der(&der)?);
            }
            Ok(Some(_)) => {
                saw_pem = true;
                debug!("Skipping non-certificate PEM section");
            }
            Ok(None) => break,
            Err(e) => return Err(CaError::invalid_pem(format!("Failed to parse PEM: {e}"))),
        }
    }

    if saw_pem {
        Ok(certs)
    } else {
        Ok(vec![Certificate::from_der(bytes)?])
    }
}

fn pem_chain<'a>(certs: impl Iterator<Item = &'a Certificate>) -> Result<String> {
    let mut out = String::new();
    for cert in certs {
        out.push_str(&cert.to_pem(LineEnding::LF)?);
    }
    Ok(out)
}
