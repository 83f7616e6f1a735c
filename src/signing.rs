/// Curve-dispatching signer producing EOSIO recoverable signatures.
///
/// - R1: the key store signs through the key's handle (the key may be in
///   hardware) and returns DER. The recovery id is not reported by the store,
///   so it is searched for against the key's public key.
/// - K1: signed in software from the exportable scalar; the signer reports
///   the recovery id directly. Signing is repeated with fresh RFC6979 extra
///   data until the signature is canonical in the EOSIO sense.
///
/// Both produce `header ‖ r ‖ s` with `header = 27 + 4 + recid`, the `+4`
/// marking recovery to a compressed point.
use std::fmt;
use std::sync::Arc;

use k256::ecdsa::hazmat::SignPrimitive;
use tracing::debug;

use crate::codec::{KeyCodec, SIGNATURE_LEN};
use crate::crypto::sha256;
use crate::curve::recovery;
use crate::curve::EllipticCurveType;
use crate::error::{Result, VaultError};
use crate::keys::record::PrivateMaterial;
use crate::keys::vault_key::VaultKey;
use crate::store::KeyStore;

const HEADER_BASE: u8 = 27 + 4;

/// Attempts at a canonical K1 signature before giving up. Each attempt is
/// canonical with probability about one half.
const MAX_CANONICAL_ATTEMPTS: u32 = 64;

/// EOSIO canonical form: neither `r` nor `s` has its top bit set, and
/// neither carries a redundant leading zero byte.
pub fn is_canonical(compact: &[u8; 64]) -> bool {
    let (r, s) = compact.split_at(32);
    let canonical_half =
        |half: &[u8]| half[0] & 0x80 == 0 && !(half[0] == 0 && half[1] & 0x80 == 0);
    canonical_half(r) && canonical_half(s)
}

/// A signature that carries its recovery id, plus its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    curve: EllipticCurveType,
    bytes: [u8; SIGNATURE_LEN],
    encoded: String,
}

impl RecoverableSignature {
    pub fn new(
        curve: EllipticCurveType,
        recid: u8,
        compact: &[u8; 64],
        codec: &dyn KeyCodec,
    ) -> Result<Self> {
        if recid > 3 {
            return Err(VaultError::Signing(format!("{recid} is not a valid recovery id")));
        }
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[0] = HEADER_BASE + recid;
        bytes[1..].copy_from_slice(compact);
        let encoded = codec.encode_signature(&bytes, curve)?;
        Ok(Self {
            curve,
            bytes,
            encoded,
        })
    }

    pub fn curve(&self) -> EllipticCurveType {
        self.curve
    }

    /// `header ‖ r ‖ s`.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.bytes
    }

    pub fn recovery_id(&self) -> u8 {
        self.bytes[0] - HEADER_BASE
    }

    pub fn compact(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out.copy_from_slice(&self.bytes[1..]);
        out
    }

    /// Wire-format signature string.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Stateless signer over a key store and codec.
#[derive(Clone)]
pub struct SigningEngine {
    key_store: Arc<dyn KeyStore>,
    codec: Arc<dyn KeyCodec>,
}

impl SigningEngine {
    pub fn new(key_store: Arc<dyn KeyStore>, codec: Arc<dyn KeyCodec>) -> Self {
        Self { key_store, codec }
    }

    /// Sign `message` with `key`. R1 keys sign through the key store, which
    /// may block; call from a blocking context.
    pub fn sign(&self, message: &[u8], key: &VaultKey) -> Result<RecoverableSignature> {
        let record = key.record().ok_or_else(|| {
            VaultError::Signing(format!("{} is retired and cannot sign", key.public_key()))
        })?;

        match key.curve() {
            EllipticCurveType::R1 => {
                let der = self.key_store.sign_with_handle(record.handle(), message)?;
                let digest = sha256(message);
                let recid = recovery::find_recovery_id(
                    &der,
                    &digest,
                    record.uncompressed_public_key(),
                    EllipticCurveType::R1,
                )?;
                let compact = recovery::der_to_compact(&der, EllipticCurveType::R1)?;
                debug!(public_key = key.public_key(), recid, "signed with R1 handle");
                RecoverableSignature::new(
                    EllipticCurveType::R1,
                    recid,
                    &compact,
                    self.codec.as_ref(),
                )
            }
            EllipticCurveType::K1 => {
                let scalar = match record.private() {
                    PrivateMaterial::Exportable { scalar, .. } => scalar,
                    PrivateMaterial::Opaque(_) => {
                        return Err(VaultError::Signing(format!(
                            "Unable to get private key for {}",
                            key.public_key()
                        )))
                    }
                };
                let signing_key = k256::ecdsa::SigningKey::from_slice(scalar.as_ref())
                    .map_err(|e| VaultError::Signing(format!("invalid K1 private key: {e}")))?;
                let (compact, recid, attempts) =
                    sign_k1_canonical(&signing_key, &sha256(message))?;
                debug!(
                    public_key = key.public_key(),
                    recid,
                    attempts,
                    "signed with K1 scalar"
                );
                RecoverableSignature::new(
                    EllipticCurveType::K1,
                    recid,
                    &compact,
                    self.codec.as_ref(),
                )
            }
        }
    }
}

/// Low-S K1 signature over `digest` that is also canonical. The first attempt
/// is plain RFC6979; later ones mix a counter into the nonce derivation.
fn sign_k1_canonical(
    signing_key: &k256::ecdsa::SigningKey,
    digest: &[u8; 32],
) -> Result<([u8; 64], u8, u32)> {
    let secret: &k256::Scalar = signing_key.as_nonzero_scalar();
    let z = k256::FieldBytes::clone_from_slice(digest);

    for attempt in 0..MAX_CANONICAL_ATTEMPTS {
        let counter = attempt.to_be_bytes();
        let extra: &[u8] = if attempt == 0 { &[] } else { &counter };

        let (signature, recid) = secret
            .try_sign_prehashed_rfc6979::<sha2::Sha256>(&z, extra)
            .map_err(|e| VaultError::Signing(format!("K1 signing failed: {e}")))?;
        let recid = recid
            .ok_or_else(|| VaultError::Signing("K1 signer reported no recovery id".into()))?;

        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature.to_bytes());
        if is_canonical(&compact) {
            return Ok((compact, recid.to_byte(), attempt + 1));
        }
    }
    Err(VaultError::Signing(format!(
        "no canonical K1 signature after {MAX_CANONICAL_ATTEMPTS} attempts"
    )))
}
