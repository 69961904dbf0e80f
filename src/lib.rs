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

//! # usg-ca
//!
//! Certificate authority core: signing authorities whose keys may live in
//! process memory or in a hardware security module, and PKCS#10 request
//! generation against the same key abstraction.
//!
//! ## Features
//!
//! - **Provider abstraction**: one async [`hsm::KeyProvider`] trait over
//!   software keys and PKCS#11 modules
//! - **Issuer registry**: issuers loaded from TOML with staged, all-or-nothing
//!   construction and templated AIA/OCSP/CRL URLs
//! - **CSR generation**: keys generated in the provider, requests signed with
//!   the algorithm the key type dictates
//!
//! ## Quick Start
//!
//! ```no_run
//! use usg_ca::authority::{Authority, ConfigLoader};
//! use usg_ca::hsm::{ProviderFactories, ProviderManifest, ProviderRegistry};
//! use usg_ca::loader::FsByteSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     usg_ca::logging::init(&config.logging)?;
//!
//!     let source = FsByteSource::new();
//!     let manifest = ProviderManifest::load(&source, "/etc/ca/providers.json")?;
//!     let providers = ProviderRegistry::load(&manifest, &ProviderFactories::with_defaults())?;
//!
//!     let authority = Authority::new(&config.authority, &providers, &source).await?;
//!     for issuer in authority.issuers() {
//!         println!("{} {:?}", issuer.label(), issuer.crl_url());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Cargo Features
//!
//! - `pkcs11`: PKCS#11 provider built on `cryptoki`

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod authority;
pub mod csr;
pub mod error;
pub mod hsm;
pub mod loader;
pub mod logging;

pub use authority::{Authority, Bundle, Issuer};
pub use csr::{CertificateRequest, CsrProvider, KeyRequest, X509Name, default_sig_algo};
pub use error::{CaError, Result};
pub use hsm::{KeyProvider, ProviderRegistry, Signer};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
