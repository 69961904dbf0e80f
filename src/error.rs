//! Error types for the certificate authority core.
//!
//! This module defines every error that can surface while loading providers,
//! constructing issuers, or generating certificate requests. Stage wrappers
//! (`SignerLoad`, `CertLoad`, ...) prefix the underlying cause with a fixed
//! string; logging and diagnostics depend on that exact wording.

use thiserror::Error;

/// Result type alias using [`CaError`].
pub type Result<T> = std::result::Result<T, CaError>;

/// Errors that can occur during certificate authority operations.
#[derive(Debug, Error)]
pub enum CaError {
    /// Malformed or incomplete configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Issuer construction failed while resolving the signer.
    #[error("unable to create signer: {0}")]
    SignerLoad(#[source] Box<CaError>),

    /// Reading the issuer key file failed.
    #[error("load key file: {0}")]
    LoadKeyFile(#[source] Box<CaError>),

    /// Issuer construction failed while loading the leaf certificate.
    #[error("failed to load cert: {0}")]
    CertLoad(#[source] Box<CaError>),

    /// Issuer construction failed while loading the intermediate chain.
    #[error("failed to load ca-bundle: {0}")]
    CaBundleLoad(#[source] Box<CaError>),

    /// Issuer construction failed while loading the root bundle.
    #[error("failed to load root-bundle: {0}")]
    RootBundleLoad(#[source] Box<CaError>),

    /// A referenced byte source does not exist.
    #[error("open {0}: file does not exist")]
    NotFound(String),

    /// A declared crypto provider could not be initialized.
    #[error("unable to initialize provider {name:?}: {reason}")]
    ProviderInit {
        /// Provider name from the manifest.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// The requested key does not exist in the provider.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The provider (or the module behind it) failed or timed out.
    #[error("provider I/O error: {0}")]
    ProviderIo(String),

    /// The algorithm or key size is not offered by the provider.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The certificate request carries no key request.
    #[error("invalid key request")]
    InvalidKeyRequest,

    /// Failure on the CSR create-and-export path.
    #[error("process request: {0}")]
    ProcessRequest(#[source] Box<CaError>),

    /// Key generation succeeded but the request could not be assembled.
    ///
    /// The generated key is left in the provider; `key_id` identifies it
    /// so that the caller can delete it.
    #[error("build request for key {key_id}: {source}")]
    RequestAssembly {
        /// Hex-encoded identifier of the orphaned key.
        key_id: String,
        /// Underlying failure.
        #[source]
        source: Box<CaError>,
    },

    /// Registry load failed for a specific issuer.
    #[error("issuer {label:?}: {source}")]
    Issuer {
        /// Issuer label from the configuration.
        label: String,
        /// Underlying failure.
        #[source]
        source: Box<CaError>,
    },

    /// The certificate public key does not match the issuer key.
    #[error("certificate public key does not match the signer")]
    KeyMismatch,

    /// Invalid PEM data.
    #[error("invalid PEM data: {0}")]
    InvalidPem(String),

    /// Key material could not be parsed or used.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Failed to build or encode a CSR.
    #[error("CSR error: {0}")]
    Csr(String),

    /// Operation not supported by the provider.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl CaError {
    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider initialization error.
    pub fn provider_init(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::ProviderInit {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound(key.into())
    }

    /// Create a provider I/O error.
    pub fn provider_io(msg: impl Into<String>) -> Self {
        Self::ProviderIo(msg.into())
    }

    /// Create an unsupported algorithm error.
    pub fn unsupported_algorithm(msg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Create an invalid key error.
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create a CSR error with the given message.
    pub fn csr(msg: impl Into<String>) -> Self {
        Self::Csr(msg.into())
    }

    /// Create a not supported error.
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported(operation.into())
    }

    /// Wrap a signer-stage failure.
    pub fn signer_load(cause: CaError) -> Self {
        Self::SignerLoad(Box::new(cause))
    }

    /// Wrap a key file read failure.
    pub fn load_key_file(cause: CaError) -> Self {
        Self::LoadKeyFile(Box::new(cause))
    }

    /// Wrap a cert-stage failure.
    pub fn cert_load(cause: CaError) -> Self {
        Self::CertLoad(Box::new(cause))
    }

    /// Wrap a ca-bundle-stage failure.
    pub fn ca_bundle_load(cause: CaError) -> Self {
        Self::CaBundleLoad(Box::new(cause))
    }

    /// Wrap a root-bundle-stage failure.
    pub fn root_bundle_load(cause: CaError) -> Self {
        Self::RootBundleLoad(Box::new(cause))
    }

    /// Wrap a failure on the create-and-export path.
    pub fn process_request(cause: CaError) -> Self {
        Self::ProcessRequest(Box::new(cause))
    }

    /// Wrap a request assembly failure for a generated key.
    pub fn request_assembly(key_id: impl Into<String>, cause: CaError) -> Self {
        Self::RequestAssembly {
            key_id: key_id.into(),
            source: Box::new(cause),
        }
    }

    /// Wrap a registry load failure for the issuer with `label`.
    pub fn issuer(label: impl Into<String>, cause: CaError) -> Self {
        Self::Issuer {
            label: label.into(),
            source: Box::new(cause),
        }
    }

    /// Returns true for provider operation errors.
    ///
    /// These are reported to the immediate caller and are never fatal to
    /// the process.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound(_) | Self::ProviderIo(_) | Self::UnsupportedAlgorithm(_)
        )
    }

    /// Returns the identifier of a generated but orphaned key, if any.
    pub fn orphaned_key_id(&self) -> Option<&str> {
        match self {
            Self::RequestAssembly { key_id, .. } => Some(key_id),
            Self::ProcessRequest(inner) => inner.orphaned_key_id(),
            _ => None,
        }
    }
}
