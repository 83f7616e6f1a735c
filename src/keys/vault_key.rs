/// The application-facing key: a key record (if one still exists) joined with
/// its metadata, identified by its wire-format public key string.
use serde_json::{Map, Value};

use super::record::KeyRecord;
use super::{BioPolicy, KeyTag};
use crate::codec::KeyCodec;
use crate::curve::math::{COMPRESSED_LEN, UNCOMPRESSED_LEN};
use crate::curve::EllipticCurveType;
use crate::error::{Result, VaultError};

/// Free-form JSON metadata stored alongside a key.
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct VaultKey {
    public_key: String,
    curve: EllipticCurveType,
    bio_policy: BioPolicy,
    is_hardware_backed: bool,
    /// Present unless the key is retired.
    record: Option<KeyRecord>,
    pub metadata: Metadata,
}

impl VaultKey {
    /// Project a live key record. When `expected_public_key` is given it must
    /// equal the string recomputed from the record's own public key.
    pub fn from_record(
        record: KeyRecord,
        expected_public_key: Option<&str>,
        metadata: Option<Metadata>,
        codec: &dyn KeyCodec,
    ) -> Result<Self> {
        let curve = record.curve();
        let public_key = codec.encode_public_key(record.compressed_public_key(), curve)?;

        if let Some(expected) = expected_public_key {
            if expected != public_key {
                return Err(VaultError::KeyManagement(format!(
                    "{expected} does not match stored key {public_key}"
                )));
            }
        }

        Ok(Self {
            public_key,
            curve,
            bio_policy: record.bio_policy(),
            is_hardware_backed: record.is_hardware_backed(),
            record: Some(record),
            metadata: metadata.unwrap_or_default(),
        })
    }

    /// A metadata-only entry whose key material no longer exists.
    pub fn retired(public_key: String, metadata: Metadata, codec: &dyn KeyCodec) -> Self {
        let curve = codec.curve_of(&public_key).unwrap_or(EllipticCurveType::R1);
        Self {
            public_key,
            curve,
            bio_policy: BioPolicy::None,
            is_hardware_backed: false,
            record: None,
            metadata,
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn curve(&self) -> EllipticCurveType {
        self.curve
    }

    pub fn bio_policy(&self) -> BioPolicy {
        self.bio_policy
    }

    pub fn is_hardware_backed(&self) -> bool {
        self.is_hardware_backed
    }

    pub fn is_retired(&self) -> bool {
        self.record.is_none()
    }

    pub fn record(&self) -> Option<&KeyRecord> {
        self.record.as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.record.as_ref().and_then(|r| r.label())
    }

    pub fn tag(&self) -> Option<&KeyTag> {
        self.record.as_ref().and_then(|r| r.tag())
    }

    pub fn access_group(&self) -> &str {
        self.record.as_ref().map(|r| r.access_group()).unwrap_or("")
    }

    pub fn uncompressed_public_key(&self) -> Option<&[u8; UNCOMPRESSED_LEN]> {
        self.record.as_ref().map(|r| r.uncompressed_public_key())
    }

    pub fn compressed_public_key(&self) -> Option<&[u8; COMPRESSED_LEN]> {
        self.record.as_ref().map(|r| r.compressed_public_key())
    }

    /// Wire-format private key, for software keys only.
    pub fn private_key_string(&self, codec: &dyn KeyCodec) -> Option<String> {
        let scalar = self.record.as_ref()?.private().scalar()?;
        codec.encode_private_key(scalar, self.curve).ok()
    }
}
