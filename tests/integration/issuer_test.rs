//! Integration tests for issuer construction

use crate::integration::TestPki;
use usg_ca::authority::{Issuer, IssuerConfig};
use usg_ca::hsm::{HashAlgorithm, ProviderRegistry};
use usg_ca::CaError;

#[tokio::test]
async fn test_new_issuer_with_chain() {
    let pki = TestPki::generate();
    let providers = ProviderRegistry::new();

    let issuer = Issuer::new(&pki.issuer_config("TestCA2", "ca2"), &providers, &pki.source())
        .await
        .expect("issuer should load");

    assert_eq!(issuer.label(), "TestCA2");
    assert!(!issuer.is_disabled());
    assert_eq!(issuer.bundle().len(), 2);
    assert_eq!(issuer.bundle().chain().len(), 1);
    assert_eq!(issuer.root_bundle().len(), 1);
    assert!(issuer.pem().starts_with("-----BEGIN CERTIFICATE-----"));

    let skid = issuer.subject_kid().to_string();
    assert_eq!(skid, hex::encode(issuer.key_hash(HashAlgorithm::Sha1)));
    assert_eq!(
        issuer.aia_url().unwrap(),
        format!("http://localhost:7880/v1/cert/{skid}")
    );
    assert_eq!(
        issuer.crl_url().unwrap(),
        format!("http://localhost:7880/v1/crl/{skid}")
    );
    assert_eq!(issuer.ocsp_url().unwrap(), "http://localhost:7880/v1/ocsp");
}

#[tokio::test]
async fn test_disabled_issuer_is_constructible() {
    let pki = TestPki::generate();
    let mut config = pki.issuer_config("TestCA1", "ca1");
    config.disabled = true;

    let issuer = Issuer::new(&config, &ProviderRegistry::new(), &pki.source())
        .await
        .expect("disabled issuer still loads");
    assert!(issuer.is_disabled());
}

#[tokio::test]
async fn test_key_file_not_found() {
    let pki = TestPki::generate();
    let config = IssuerConfig {
        key_file: "not_found".to_string(),
        ..Default::default()
    };

    let err = Issuer::new(&config, &ProviderRegistry::new(), &pki.source())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "unable to create signer: load key file: open not_found: file does not exist"
    );
}

#[tokio::test]
async fn test_cert_file_not_found() {
    let pki = TestPki::generate();
    let config = IssuerConfig {
        key_file: "ca1.key".to_string(),
        cert_file: "not_found".to_string(),
        ..Default::default()
    };

    let err = Issuer::new(&config, &ProviderRegistry::new(), &pki.source())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to load cert: open not_found: file does not exist"
    );
}

#[tokio::test]
async fn test_root_bundle_not_found() {
    let pki = TestPki::generate();
    let mut config = pki.issuer_config("TestCA2", "ca2");
    config.root_bundle_file = Some("not_found".to_string());

    let err = Issuer::new(&config, &ProviderRegistry::new(), &pki.source())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to load root-bundle: open not_found: file does not exist"
    );
}

#[tokio::test]
async fn test_ca_bundle_not_found() {
    let pki = TestPki::generate();
    let mut config = pki.issuer_config("TestCA2", "ca2");
    config.ca_bundle_file = Some("not_found".to_string());
    config.root_bundle_file = Some("not_found".to_string());

    // the ca-bundle stage runs before the root-bundle stage
    let err = Issuer::new(&config, &ProviderRegistry::new(), &pki.source())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to load ca-bundle: open not_found: file does not exist"
    );
}

#[tokio::test]
async fn test_cert_for_another_key() {
    let pki = TestPki::generate();
    let config = IssuerConfig {
        key_file: "ca1.key".to_string(),
        cert_file: "ca2.pem".to_string(),
        ..Default::default()
    };

    let err = Issuer::new(&config, &ProviderRegistry::new(), &pki.source())
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::CertLoad(ref inner) if matches!(**inner, CaError::KeyMismatch)));
}
