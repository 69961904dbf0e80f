//! Integration tests for the provider registry and key references

use std::sync::Arc;

use crate::integration::TestPki;
use usg_ca::CaError;
use usg_ca::authority::{Authority, AuthorityConfig, Issuer};
use usg_ca::hsm::{
    KeyProvider, ProviderFactories, ProviderManifest, ProviderRegistry, SoftwareKeyProvider,
};
use usg_ca::loader::ByteSource;

const MANIFEST: &str = r#"{
    "default": "vault",
    "providers": [
        { "name": "vault", "kind": "preloaded", "manufacturer": "Acme" }
    ]
}"#;

/// A registry whose `vault` provider already holds ca2's key as `ca2-key`.
fn preloaded_registry(pki: &TestPki) -> ProviderRegistry {
    let source = pki.source();
    let vault = Arc::new(SoftwareKeyProvider::new());
    vault
        .import_pem(&source.read_bytes("ca2.key").unwrap(), Some("ca2-key"))
        .unwrap();

    source.write_bytes("providers.json", MANIFEST.as_bytes()).unwrap();
    let manifest = ProviderManifest::load(&source, "providers.json").unwrap();

    let factories = ProviderFactories::with_defaults()
        .register("preloaded", move |_| Ok(vault.clone() as Arc<dyn KeyProvider>));
    ProviderRegistry::load(&manifest, &factories).unwrap()
}

#[tokio::test]
async fn test_issuer_with_key_reference() {
    let pki = TestPki::generate();
    let providers = preloaded_registry(&pki);
    let source = pki.source();

    for (file, reference) in [
        ("by-name.ref", "pkcs11:token=vault;object=ca2-key"),
        ("by-manufacturer.ref", "pkcs11:token=Acme;object=ca2-key"),
    ] {
        source.write_bytes(file, reference.as_bytes()).unwrap();
        let mut config = pki.issuer_config("TestCA2", "ca2");
        config.key_file = file.to_string();

        let issuer = Issuer::new(&config, &providers, &source).await.unwrap();
        assert_eq!(issuer.signer().provider().manufacturer(), "usg-ca");
    }

    // only the preloaded key, nothing imported on the way
    let vault = providers.provider("vault").unwrap();
    assert_eq!(vault.list_keys().await.unwrap().len(), 1);
    assert!(providers.software().list_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_referenced_key() {
    let pki = TestPki::generate();
    let providers = preloaded_registry(&pki);
    let source = pki.source();

    source
        .write_bytes("missing.ref", b"pkcs11:token=vault;object=nope")
        .unwrap();
    let mut config = pki.issuer_config("TestCA2", "ca2");
    config.key_file = "missing.ref".to_string();

    let err = Authority::new(
        &AuthorityConfig {
            issuers: vec![config],
        },
        &providers,
        &source,
    )
    .await
    .unwrap_err();
    assert!(
        err.to_string()
            .starts_with("issuer \"TestCA2\": unable to create signer: key not found")
    );
}

#[test]
fn test_unknown_kind_fails_registry_load() {
    let manifest = ProviderManifest::from_json(
        br#"{ "providers": [
            { "name": "ok", "kind": "software" },
            { "name": "hsm", "kind": "nonexistent" }
        ] }"#,
    )
    .unwrap();

    let err = ProviderRegistry::load(&manifest, &ProviderFactories::with_defaults()).unwrap_err();
    assert!(matches!(err, CaError::ProviderInit { ref name, .. } if name == "hsm"));
    assert!(!err.is_provider_error());
}

#[test]
fn test_factory_failure_is_fatal() {
    let manifest =
        ProviderManifest::from_json(br#"{ "providers": [ { "name": "hsm", "kind": "flaky" } ] }"#)
            .unwrap();
    let factories = ProviderFactories::new()
        .register("flaky", |_| Err(CaError::provider_io("module not responding")));

    let err = ProviderRegistry::load(&manifest, &factories).unwrap_err();
    assert_eq!(
        err.to_string(),
        "unable to initialize provider \"hsm\": provider I/O error: module not responding"
    );
}
