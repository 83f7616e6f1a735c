/// Storage collaborators the vault is built on.
///
/// - [`KeyStore`]: generates, imports, enumerates and signs with keys. Hardware
///   keys never leave it; their private material is an opaque handle.
/// - [`SecretStore`]: a generic secure key/value store, used only for key
///   metadata.
///
/// Both are assumed atomic per record. Platform implementations live outside
/// this crate; [`memory`] provides in-process ones.
pub mod memory;

use std::collections::HashMap;

use crate::curve::math::UNCOMPRESSED_LEN;
use crate::curve::EllipticCurveType;
use crate::error::Result;
use crate::keys::record::{KeyAttributes, KeyHandle};
use crate::keys::{AccessFlag, AccessibleProtection, BioPolicy, KeyTag};

/// Length of import material: uncompressed public key ‖ private scalar.
pub const IMPORT_MATERIAL_LEN: usize = UNCOMPRESSED_LEN + 32;

/// Parameters for generating or importing a key.
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub curve: EllipticCurveType,
    pub hardware_backed: bool,
    pub tag: Option<KeyTag>,
    pub label: Option<String>,
    /// Access group to file the key under; the store's own default when
    /// absent.
    pub access_group: Option<String>,
    pub protection: AccessibleProtection,
    pub access_flag: Option<AccessFlag>,
}

pub trait KeyStore: Send + Sync {
    /// Generate a new key. Hardware generation is only possible for curves
    /// that support it.
    fn generate(&self, spec: &KeySpec) -> Result<KeyAttributes>;

    /// Import `uncompressed public key ‖ scalar`. Fails with
    /// `VaultError::Duplicate` if the public key is already stored.
    fn import_raw(
        &self,
        material: &[u8; IMPORT_MATERIAL_LEN],
        spec: &KeySpec,
    ) -> Result<KeyAttributes>;

    /// All keys, or only those carrying exactly `tag`.
    fn enumerate(&self, tag: Option<&KeyTag>) -> Result<Vec<KeyAttributes>>;

    /// The key whose public key is `uncompressed_public_key`, if any.
    fn find(&self, uncompressed_public_key: &[u8; UNCOMPRESSED_LEN])
        -> Result<Option<KeyAttributes>>;

    fn delete(&self, handle: KeyHandle) -> Result<()>;

    fn update_label(&self, handle: KeyHandle, label: &str) -> Result<()>;

    /// ECDSA-SHA256 over `message` with the key behind `handle`, DER encoded.
    /// May block on an OS biometric prompt when the key's access flag asks
    /// for one, so async callers run it on a blocking thread.
    fn sign_with_handle(&self, handle: KeyHandle, message: &[u8]) -> Result<Vec<u8>>;
}

pub trait SecretStore: Send + Sync {
    /// Insert or replace a value. Returns false if the write failed.
    fn put(
        &self,
        name: &str,
        service: &str,
        value: &[u8],
        protection: AccessibleProtection,
        bio_policy: BioPolicy,
    ) -> bool;

    fn get(&self, name: &str, service: &str) -> Option<Vec<u8>>;

    fn get_all(&self, service: &str) -> HashMap<String, Vec<u8>>;

    /// Remove a value; absent names are ignored.
    fn delete(&self, name: &str, service: &str);
}
