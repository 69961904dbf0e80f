//! Integration tests for the issuer registry

use crate::integration::TestPki;
use usg_ca::authority::{Authority, AuthorityConfig, ConfigLoader};
use usg_ca::hsm::{HashAlgorithm, ProviderRegistry};

async fn load(pki: &TestPki) -> Authority {
    let config = ConfigLoader::new()
        .load_from_str(&pki.config_toml())
        .expect("config should parse");
    Authority::new(&config.authority, &ProviderRegistry::new(), &pki.source())
        .await
        .expect("authority should load")
}

#[tokio::test]
async fn test_disabled_issuers_are_excluded() {
    let pki = TestPki::generate();
    let authority = load(&pki).await;

    assert_eq!(authority.len(), 2);
    assert_eq!(
        authority.labels().collect::<Vec<_>>(),
        ["TestCA1", "TestCA2"]
    );
    assert!(authority.issuer("TestCA3").is_none());
    assert!(authority.issuers().all(|issuer| !issuer.is_disabled()));
}

#[tokio::test]
async fn test_key_hash_lookup() {
    let pki = TestPki::generate();
    let authority = load(&pki).await;

    for issuer in authority.issuers() {
        for algorithm in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
            let hash = issuer.key_hash(algorithm);
            // same input, same output
            assert_eq!(hash, issuer.key_hash(algorithm));
            assert_eq!(
                authority
                    .issuer_by_key_hash(algorithm, &hash)
                    .map(|i| i.label()),
                Some(issuer.label())
            );
        }
    }
    assert_ne!(
        authority.issuer("TestCA1").unwrap().key_hash(HashAlgorithm::Sha256),
        authority.issuer("TestCA2").unwrap().key_hash(HashAlgorithm::Sha256)
    );
}

#[tokio::test]
async fn test_profiles() {
    let pki = TestPki::generate();
    let authority = load(&pki).await;

    let ca1 = authority.issuer("TestCA1").unwrap();
    let l1 = ca1.profile("L1").expect("L1 profile");
    assert!(l1.is_ca);
    assert_eq!(l1.expiry.as_deref(), Some("43800h"));
    assert!(ca1.profile("unknown").is_none());

    assert_eq!(
        authority.issuer_by_profile("server").map(|i| i.label()),
        Some("TestCA2")
    );
    assert!(authority.issuer_by_profile("unknown").is_none());
}

#[tokio::test]
async fn test_urls_carry_subject_key_id() {
    let pki = TestPki::generate();
    let authority = load(&pki).await;

    for issuer in authority.issuers() {
        let skid = issuer.subject_kid();
        assert!(issuer.aia_url().unwrap().ends_with(skid));
        assert!(issuer.crl_url().unwrap().ends_with(skid));
        assert!(!issuer.aia_url().unwrap().contains("${"));
    }
    assert!(authority.issuer("TestCA2").unwrap().ocsp_url().is_none());
}

#[tokio::test]
async fn test_first_failure_aborts_load() {
    let pki = TestPki::generate();
    let mut broken = pki.issuer_config("TestCA2", "ca2");
    broken.cert_file = "not_found".to_string();

    let config = AuthorityConfig {
        issuers: vec![pki.issuer_config("TestCA1", "ca1"), broken],
    };
    let err = Authority::new(&config, &ProviderRegistry::new(), &pki.source())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "issuer \"TestCA2\": failed to load cert: open not_found: file does not exist"
    );
}

#[tokio::test]
async fn test_config_file_on_disk() {
    let pki = TestPki::generate();
    let path = pki.path().join("ca-config.toml");
    std::fs::write(&path, pki.config_toml()).unwrap();

    let config = ConfigLoader::new().with_path(&path).load().unwrap();
    assert_eq!(config.authority.issuers.len(), 3);
    assert_eq!(config.authority.active_issuers().count(), 2);
}
