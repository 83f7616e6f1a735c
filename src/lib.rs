pub mod auth;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod curve;
pub mod error;
pub mod keys;
pub mod provider;
pub mod signing;
pub mod store;
pub mod vault;

pub use auth::{AuthOutcome, Authenticator};
pub use codec::{EosioCodec, KeyCodec};
pub use config::VaultConfig;
pub use curve::EllipticCurveType;
pub use error::{ErrorKind, Result, VaultError};
pub use keys::vault_key::{Metadata, VaultKey};
pub use keys::BioPolicy;
pub use provider::{TransactionSignatureRequest, VaultSignatureProvider};
pub use signing::{RecoverableSignature, SigningEngine};
pub use vault::{Vault, VaultAction, VaultEvent};
