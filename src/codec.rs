/// EOSIO wire-format strings for keys and signatures.
///
/// The vault only depends on the [`KeyCodec`] trait; [`EosioCodec`] is the
/// standard encoding:
///   PUB_<CURVE>_ / PVT_<CURVE>_ / SIG_<CURVE>_ + base58(payload ‖ checksum)
/// where checksum = RIPEMD160(payload ‖ "<CURVE>")[..4].
/// Legacy `EOS…` public keys and WIF private keys are accepted as K1 input.
use ripemd::{Digest, Ripemd160};

use crate::crypto::sensitive::SecretScalar;
use crate::crypto::sha256;
use crate::curve::math::COMPRESSED_LEN;
use crate::curve::EllipticCurveType;
use crate::error::{Result, VaultError};

const CHECKSUM_LEN: usize = 4;
const LEGACY_PUBLIC_PREFIX: &str = "EOS";
const WIF_VERSION: u8 = 0x80;

/// Length of a recoverable signature: header ‖ r ‖ s.
pub const SIGNATURE_LEN: usize = 65;

/// Conversion between raw key material and wire-format strings.
pub trait KeyCodec: Send + Sync {
    fn encode_public_key(
        &self,
        compressed: &[u8; COMPRESSED_LEN],
        curve: EllipticCurveType,
    ) -> Result<String>;

    fn decode_public_key(&self, s: &str) -> Result<(EllipticCurveType, [u8; COMPRESSED_LEN])>;

    fn encode_private_key(&self, scalar: &SecretScalar, curve: EllipticCurveType)
        -> Result<String>;

    fn decode_private_key(&self, s: &str) -> Result<(EllipticCurveType, SecretScalar)>;

    fn encode_signature(
        &self,
        signature: &[u8; SIGNATURE_LEN],
        curve: EllipticCurveType,
    ) -> Result<String>;

    fn decode_signature(&self, s: &str) -> Result<(EllipticCurveType, [u8; SIGNATURE_LEN])>;

    /// The curve tag carried by any key or signature string.
    fn curve_of(&self, s: &str) -> Result<EllipticCurveType>;
}

/// The standard EOSIO encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct EosioCodec;

#[derive(Clone, Copy)]
enum Kind {
    Public,
    Private,
    Signature,
}

impl Kind {
    fn prefix(self) -> &'static str {
        match self {
            Kind::Public => "PUB",
            Kind::Private => "PVT",
            Kind::Signature => "SIG",
        }
    }
}

fn ripemd_checksum(payload: &[u8], suffix: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Ripemd160::new();
    hasher.update(payload);
    hasher.update(suffix);
    let digest = hasher.finalize();
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn encode(kind: Kind, payload: &[u8], curve: EllipticCurveType) -> String {
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(payload);
    data.extend_from_slice(&ripemd_checksum(payload, curve.as_str().as_bytes()));
    format!(
        "{}_{}_{}",
        kind.prefix(),
        curve.as_str(),
        bs58::encode(data).into_string()
    )
}

fn base58_payload(encoded: &str, len: usize) -> Result<Vec<u8>> {
    let data = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| VaultError::Codec(format!("invalid base58: {e}")))?;
    if data.len() != len + CHECKSUM_LEN {
        return Err(VaultError::Codec(format!(
            "expected {} decoded bytes, found {}",
            len + CHECKSUM_LEN,
            data.len()
        )));
    }
    Ok(data)
}

/// Split `KIND_CURVE_data` into its curve and data parts.
fn split_prefixed(kind: Kind, s: &str) -> Option<(EllipticCurveType, &str)> {
    let rest = s.strip_prefix(kind.prefix())?.strip_prefix('_')?;
    let (curve, data) = rest.split_once('_')?;
    let curve = match curve {
        "R1" => EllipticCurveType::R1,
        "K1" => EllipticCurveType::K1,
        _ => return None,
    };
    Some((curve, data))
}

fn decode(kind: Kind, s: &str, len: usize) -> Result<(EllipticCurveType, Vec<u8>)> {
    let (curve, encoded) = split_prefixed(kind, s)
        .ok_or_else(|| VaultError::Codec(format!("{s} is not a valid {} string", kind.prefix())))?;
    let mut data = base58_payload(encoded, len)?;
    let checksum = data.split_off(len);
    if checksum != ripemd_checksum(&data, curve.as_str().as_bytes()) {
        return Err(VaultError::Codec(format!("checksum mismatch in {s}")));
    }
    Ok((curve, data))
}

impl EosioCodec {
    fn decode_legacy_public_key(&self, encoded: &str) -> Result<[u8; COMPRESSED_LEN]> {
        let mut data = base58_payload(encoded, COMPRESSED_LEN)?;
        let checksum = data.split_off(COMPRESSED_LEN);
        if checksum != ripemd_checksum(&data, &[]) {
            return Err(VaultError::Codec("legacy public key checksum mismatch".into()));
        }
        to_array(&data)
    }

    fn decode_wif(&self, s: &str) -> Result<SecretScalar> {
        let mut data = base58_payload(s, 33)?;
        let checksum = data.split_off(33);
        if data[0] != WIF_VERSION {
            return Err(VaultError::Codec("unknown WIF version byte".into()));
        }
        if checksum[..] != sha256(&sha256(&data))[..CHECKSUM_LEN] {
            return Err(VaultError::Codec("WIF checksum mismatch".into()));
        }
        SecretScalar::from_slice(&data[1..])
            .ok_or_else(|| VaultError::Codec("WIF payload too short".into()))
    }
}

fn to_array<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.try_into()
        .map_err(|_| VaultError::Codec(format!("expected {N} bytes, found {}", data.len())))
}

impl KeyCodec for EosioCodec {
    fn encode_public_key(
        &self,
        compressed: &[u8; COMPRESSED_LEN],
        curve: EllipticCurveType,
    ) -> Result<String> {
        Ok(encode(Kind::Public, compressed, curve))
    }

    fn decode_public_key(&self, s: &str) -> Result<(EllipticCurveType, [u8; COMPRESSED_LEN])> {
        if let Some(legacy) = s.strip_prefix(LEGACY_PUBLIC_PREFIX) {
            return Ok((EllipticCurveType::K1, self.decode_legacy_public_key(legacy)?));
        }
        let (curve, data) = decode(Kind::Public, s, COMPRESSED_LEN)?;
        Ok((curve, to_array(&data)?))
    }

    fn encode_private_key(
        &self,
        scalar: &SecretScalar,
        curve: EllipticCurveType,
    ) -> Result<String> {
        Ok(encode(Kind::Private, scalar.as_bytes(), curve))
    }

    fn decode_private_key(&self, s: &str) -> Result<(EllipticCurveType, SecretScalar)> {
        if !s.starts_with(Kind::Private.prefix()) {
            return Ok((EllipticCurveType::K1, self.decode_wif(s)?));
        }
        let (curve, data) = decode(Kind::Private, s, 32)?;
        let scalar = SecretScalar::from_slice(&data)
            .ok_or_else(|| VaultError::Codec("private key payload too short".into()))?;
        Ok((curve, scalar))
    }

    fn encode_signature(
        &self,
        signature: &[u8; SIGNATURE_LEN],
        curve: EllipticCurveType,
    ) -> Result<String> {
        Ok(encode(Kind::Signature, signature, curve))
    }

    fn decode_signature(&self, s: &str) -> Result<(EllipticCurveType, [u8; SIGNATURE_LEN])> {
        let (curve, data) = decode(Kind::Signature, s, SIGNATURE_LEN)?;
        Ok((curve, to_array(&data)?))
    }

    fn curve_of(&self, s: &str) -> Result<EllipticCurveType> {
        if s.starts_with(LEGACY_PUBLIC_PREFIX) {
            return Ok(EllipticCurveType::K1);
        }
        [Kind::Public, Kind::Private, Kind::Signature]
            .into_iter()
            .find_map(|kind| split_prefixed(kind, s).map(|(curve, _)| curve))
            .ok_or_else(|| VaultError::Codec(format!("{s} carries no curve tag")))
    }
}
