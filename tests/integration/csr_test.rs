//! Integration tests for CSR generation

use std::sync::Arc;

use async_trait::async_trait;
use der::Decode;
use spki::SubjectPublicKeyInfoOwned;
use usg_ca::csr::{CertificateRequest, CsrProvider, X509Name, default_sig_algo};
use usg_ca::hsm::{
    KeyAlgorithm, KeyHandle, KeyProvider, ProviderInfo, SignatureAlgorithm, SoftwareKeyProvider,
};
use usg_ca::{CaError, Result};
use x509_cert::request::CertReq;

/// Software keys whose signing operation always fails.
struct BrokenSigner(SoftwareKeyProvider);

#[async_trait]
impl KeyProvider for BrokenSigner {
    async fn generate_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        label: Option<&str>,
    ) -> Result<KeyHandle> {
        self.0.generate_key_pair(algorithm, label).await
    }

    async fn public_key(&self, handle: &KeyHandle) -> Result<SubjectPublicKeyInfoOwned> {
        self.0.public_key(handle).await
    }

    async fn sign(&self, _handle: &KeyHandle, _digest: &[u8]) -> Result<Vec<u8>> {
        Err(CaError::provider_io("token removed"))
    }

    async fn list_keys(&self) -> Result<Vec<KeyHandle>> {
        self.0.list_keys().await
    }

    async fn find_key(&self, label: &str) -> Result<Option<KeyHandle>> {
        self.0.find_key(label).await
    }

    async fn find_key_by_id(&self, id: &[u8]) -> Result<Option<KeyHandle>> {
        self.0.find_key_by_id(id).await
    }

    async fn delete_key(&self, handle: &KeyHandle) -> Result<()> {
        self.0.delete_key(handle).await
    }

    fn provider_info(&self) -> ProviderInfo {
        self.0.provider_info()
    }
}

fn names() -> Vec<X509Name> {
    vec![X509Name {
        organization: "org1".to_string(),
        organizational_unit: "unit1".to_string(),
        ..Default::default()
    }]
}

fn hosts() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "localhost".to_string()]
}

#[tokio::test]
async fn test_generate_key_and_request() {
    let provider = Arc::new(SoftwareKeyProvider::new());
    let csr = CsrProvider::new(provider.clone());

    for (algo, size, expected) in [
        ("RSA", 2048, SignatureAlgorithm::Sha256WithRsa),
        ("ECDSA", 256, SignatureAlgorithm::EcdsaWithSha256),
    ] {
        let request = csr.new_signing_certificate_request(
            "label",
            algo,
            size,
            "localhost",
            names(),
            hosts(),
        );

        let generated = csr
            .generate_key_and_request(&request)
            .await
            .expect("request should be generated");
        assert!(!generated.key_id.is_empty());
        assert_eq!(
            default_sig_algo(&generated.signer),
            request.key_request().unwrap().sig_algo().unwrap()
        );
        assert_eq!(default_sig_algo(&generated.signer), expected);

        let parsed = CertReq::from_der(&generated.csr_der).unwrap();
        assert_eq!(parsed.algorithm.oid, expected.oid());
        assert!(
            generated
                .csr_pem
                .starts_with("-----BEGIN CERTIFICATE REQUEST-----")
        );
    }

    assert_eq!(provider.list_keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_generate_without_key_request() {
    let csr = CsrProvider::new(Arc::new(SoftwareKeyProvider::new()));

    let err = csr
        .generate_key_and_request(&CertificateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid key request");
    assert!(err.orphaned_key_id().is_none());
}

#[tokio::test]
async fn test_create_request_and_export_key() {
    let csr = CsrProvider::new(Arc::new(SoftwareKeyProvider::new()));

    let empty = CertificateRequest::default();
    let cn_only = CertificateRequest {
        common_name: "localhost".to_string(),
        ..Default::default()
    };
    for request in [empty, cn_only] {
        let err = csr
            .create_request_and_export_key(&request)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "process request: invalid key request");
    }

    for (algo, size) in [("RSA", 2048), ("ECDSA", 256)] {
        let request = csr.new_signing_certificate_request(
            "label",
            algo,
            size,
            "localhost",
            names(),
            hosts(),
        );
        let exported = csr
            .create_request_and_export_key(&request)
            .await
            .expect("request should be generated");

        assert!(!exported.csr_der.is_empty());
        assert!(!exported.key_id.is_empty());
        assert!(exported.private_key.contains("PRIVATE KEY"));

        let parsed = CertReq::from_der(&exported.csr_der).unwrap();
        assert_eq!(parsed.info.public_key, exported.public_key);
    }
}

#[tokio::test]
async fn test_unsupported_key_request() {
    let provider = Arc::new(SoftwareKeyProvider::new());
    let csr = CsrProvider::new(provider.clone());

    let request =
        csr.new_signing_certificate_request("label", "RSA", 1024, "localhost", names(), hosts());
    let err = csr.generate_key_and_request(&request).await.unwrap_err();
    assert!(err.is_provider_error());
    assert!(provider.list_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_host_creates_no_key() {
    let provider = Arc::new(SoftwareKeyProvider::new());
    let csr = CsrProvider::new(provider.clone());

    let mut request =
        csr.new_signing_certificate_request("label", "ECDSA", 256, "localhost", names(), hosts());
    request.hosts.push("bücher.example".to_string());

    let err = csr.generate_key_and_request(&request).await.unwrap_err();
    assert!(matches!(err, CaError::Csr(_)));
    assert!(err.orphaned_key_id().is_none());
    assert!(provider.list_keys().await.unwrap().is_empty());

    let err = csr
        .create_request_and_export_key(&request)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("process request: CSR error: host"));
    assert!(provider.list_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_subject_creates_no_key() {
    let provider = Arc::new(SoftwareKeyProvider::new());
    let csr = CsrProvider::new(provider.clone());

    let mut request =
        csr.new_signing_certificate_request("label", "RSA", 2048, "localhost", names(), hosts());
    request.serial_number = Some("serial@42".to_string());

    assert!(csr.generate_key_and_request(&request).await.is_err());
    assert!(provider.list_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signing_failure_reports_orphaned_key() {
    let provider = Arc::new(BrokenSigner(SoftwareKeyProvider::new()));
    let csr = CsrProvider::new(provider.clone());

    let request =
        csr.new_signing_certificate_request("label", "ECDSA", 256, "localhost", names(), hosts());
    let err = csr.generate_key_and_request(&request).await.unwrap_err();
    assert!(matches!(err, CaError::RequestAssembly { .. }));

    let keys = provider.list_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(err.orphaned_key_id(), Some(keys[0].id_hex().as_str()));
    assert!(err.to_string().ends_with("provider I/O error: token removed"));
}
