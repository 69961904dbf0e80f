//! Integration test utilities and helpers
//!
//! Provides a generated certificate hierarchy on disk:
//!
//! ```text
//! root.pem / root.key      self-signed, P-256
//! ca1.pem  / ca1.key       signed by root, P-384
//! ca2.pem  / ca2.key       signed by ca1, P-256
//! ```

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
    PKCS_ECDSA_P384_SHA384,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use usg_ca::authority::IssuerConfig;
use usg_ca::loader::FsByteSource;

/// AIA URL template used by the fixtures.
pub const AIA_URL: &str = "http://localhost:7880/v1/cert/${ISSUER_ID}";
/// CRL URL template used by the fixtures.
pub const CRL_URL: &str = "http://localhost:7880/v1/crl/${ISSUER_ID}";
/// OCSP URL used by the fixtures.
pub const OCSP_URL: &str = "http://localhost:7880/v1/ocsp";

/// A certificate hierarchy written to a temporary directory.
pub struct TestPki {
    dir: TempDir,
}

impl TestPki {
    /// Generate root, ca1 and ca2 and write them out.
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let root_key = KeyPair::generate().expect("root key");
        let root = ca_params("[TEST] Root CA")
            .self_signed(&root_key)
            .expect("root cert");

        let ca1_key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).expect("ca1 key");
        let ca1 = ca_params("[TEST] Issuing CA Level 1")
            .signed_by(&ca1_key, &root, &root_key)
            .expect("ca1 cert");

        let ca2_key = KeyPair::generate().expect("ca2 key");
        let ca2 = ca_params("[TEST] Issuing CA Level 2")
            .signed_by(&ca2_key, &ca1, &ca1_key)
            .expect("ca2 cert");

        write(dir.path(), "root", &root, &root_key);
        write(dir.path(), "ca1", &ca1, &ca1_key);
        write(dir.path(), "ca2", &ca2, &ca2_key);

        Self { dir }
    }

    /// Directory holding the fixtures.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Byte source resolving references under the fixture directory.
    pub fn source(&self) -> FsByteSource {
        FsByteSource::with_base_dir(self.dir.path())
    }

    /// Issuer configuration for `name` (one of `ca1`, `ca2`), with a bundle
    /// and root bundle that complete its chain.
    pub fn issuer_config(&self, label: &str, name: &str) -> IssuerConfig {
        let ca_bundle = match name {
            "ca2" => Some("ca1.pem".to_string()),
            _ => None,
        };
        IssuerConfig {
            label: label.to_string(),
            key_file: format!("{name}.key"),
            cert_file: format!("{name}.pem"),
            ca_bundle_file: ca_bundle,
            root_bundle_file: Some("root.pem".to_string()),
            aia: Some(usg_ca::authority::AiaConfig {
                aia_url: Some(AIA_URL.to_string()),
                ocsp_url: Some(OCSP_URL.to_string()),
                crl_url: Some(CRL_URL.to_string()),
            }),
            ..Default::default()
        }
    }

    /// A `ca-config.toml` describing TestCA1, TestCA2 and a disabled TestCA3.
    pub fn config_toml(&self) -> String {
        format!(
            r#"
[logging]
level = "debug"

[[authority.issuers]]
label = "TestCA1"
key_file = "ca1.key"
cert_file = "ca1.pem"
root_bundle_file = "root.pem"

[authority.issuers.aia]
aia_url = "{AIA_URL}"
ocsp_url = "{OCSP_URL}"
crl_url = "{CRL_URL}"

[authority.issuers.profiles.L1]
description = "intermediate issuance"
usages = ["cert sign", "crl sign"]
expiry = "43800h"
is_ca = true

[[authority.issuers]]
label = "TestCA2"
key_file = "ca2.key"
cert_file = "ca2.pem"
ca_bundle_file = "ca1.pem"
root_bundle_file = "root.pem"

[authority.issuers.aia]
aia_url = "{AIA_URL}"
crl_url = "{CRL_URL}"

[authority.issuers.profiles.server]
description = "server TLS"
usages = ["signing", "key encipherment", "server auth"]
expiry = "8760h"

[[authority.issuers]]
label = "TestCA3"
disabled = true
key_file = "not_found"
cert_file = "not_found"
"#
        )
    }
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

fn write(dir: &Path, name: &str, cert: &Certificate, key: &KeyPair) {
    fs::write(dir.join(format!("{name}.pem")), cert.pem()).expect("write cert");
    fs::write(dir.join(format!("{name}.key")), key.serialize_pem()).expect("write key");
}
