/// Store-level key records.
///
/// A `KeyRecord` is built once from the attributes a key store returns and is
/// never mutated; a changed key is observed by querying the store again.
use std::fmt;

use uuid::Uuid;

use super::{AccessFlag, AccessibleProtection, BioPolicy, KeyRole, KeyTag};
use crate::crypto::sensitive::SecretScalar;
use crate::curve::math::{self, COMPRESSED_LEN, UNCOMPRESSED_LEN};
use crate::curve::EllipticCurveType;
use crate::error::{Result, VaultError};

/// Opaque reference to a key held by a key store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle(Uuid);

impl KeyHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for KeyHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Private key material as seen from outside the store.
#[derive(Debug, Clone)]
pub enum PrivateMaterial {
    /// A software key whose scalar can be read back.
    Exportable {
        handle: KeyHandle,
        scalar: SecretScalar,
    },
    /// A hardware key usable only through its handle.
    Opaque(KeyHandle),
}

impl PrivateMaterial {
    pub fn handle(&self) -> KeyHandle {
        match self {
            PrivateMaterial::Exportable { handle, .. } | PrivateMaterial::Opaque(handle) => *handle,
        }
    }

    pub fn scalar(&self) -> Option<&SecretScalar> {
        match self {
            PrivateMaterial::Exportable { scalar, .. } => Some(scalar),
            PrivateMaterial::Opaque(_) => None,
        }
    }
}

/// Raw attributes of one key, as returned by a store query.
#[derive(Debug, Clone)]
pub struct KeyAttributes {
    pub label: Option<String>,
    pub tag: Option<KeyTag>,
    pub access_group: String,
    pub protection: AccessibleProtection,
    /// OS-level user-presence requirement on the private key.
    pub access_flag: Option<AccessFlag>,
    pub is_hardware_backed: bool,
    pub private: PrivateMaterial,
    /// SEC1 public key, compressed or uncompressed.
    pub public_key: Vec<u8>,
}

/// One key as stored, with both public key encodings resolved.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    label: Option<String>,
    tag: Option<KeyTag>,
    access_group: String,
    protection: AccessibleProtection,
    access_flag: Option<AccessFlag>,
    is_hardware_backed: bool,
    private: PrivateMaterial,
    uncompressed_public_key: [u8; UNCOMPRESSED_LEN],
    compressed_public_key: [u8; COMPRESSED_LEN],
}

impl KeyRecord {
    /// Build a record from store attributes. Fails with `KeyManagement` if the
    /// stored public key is not a valid point on the record's curve.
    pub fn from_attributes(attributes: KeyAttributes) -> Result<Self> {
        let KeyAttributes {
            label,
            tag,
            access_group,
            protection,
            access_flag,
            is_hardware_backed,
            private,
            public_key,
        } = attributes;

        let curve = curve_for(is_hardware_backed, tag.as_ref());
        let uncompressed_public_key = math::decompress(&public_key, curve).map_err(|e| {
            VaultError::KeyManagement(format!("Cannot get public key representation: {e}"))
        })?;
        let compressed_public_key = math::compress(&uncompressed_public_key)
            .ok_or_else(|| VaultError::KeyManagement("Cannot get compressed public key".into()))?;

        Ok(Self {
            label,
            tag,
            access_group,
            protection,
            access_flag,
            is_hardware_backed,
            private,
            uncompressed_public_key,
            compressed_public_key,
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn tag(&self) -> Option<&KeyTag> {
        self.tag.as_ref()
    }

    pub fn access_group(&self) -> &str {
        &self.access_group
    }

    pub fn protection(&self) -> AccessibleProtection {
        self.protection
    }

    pub fn access_flag(&self) -> Option<AccessFlag> {
        self.access_flag
    }

    pub fn is_hardware_backed(&self) -> bool {
        self.is_hardware_backed
    }

    pub fn private(&self) -> &PrivateMaterial {
        &self.private
    }

    pub fn handle(&self) -> KeyHandle {
        self.private.handle()
    }

    pub fn uncompressed_public_key(&self) -> &[u8; UNCOMPRESSED_LEN] {
        &self.uncompressed_public_key
    }

    pub fn compressed_public_key(&self) -> &[u8; COMPRESSED_LEN] {
        &self.compressed_public_key
    }

    /// Hardware keys are always R1; software keys take the curve from their
    /// tag and default to R1.
    pub fn curve(&self) -> EllipticCurveType {
        curve_for(self.is_hardware_backed, self.tag.as_ref())
    }

    pub fn bio_policy(&self) -> BioPolicy {
        self.tag.map(|t| t.bio_policy).unwrap_or_default()
    }

    pub fn is_vault_identifier(&self) -> bool {
        matches!(self.tag, Some(KeyTag { role: KeyRole::VaultIdentifier, .. }))
    }
}

fn curve_for(is_hardware_backed: bool, tag: Option<&KeyTag>) -> EllipticCurveType {
    if is_hardware_backed {
        return EllipticCurveType::R1;
    }
    tag.map(|t| t.curve).unwrap_or(EllipticCurveType::R1)
}
