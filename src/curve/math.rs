/// Point compression and decompression over the R1 and K1 curves.
///
/// Decompression recomputes `y` from `x` directly:
///   y² = x³ + ax + b (mod p)
///   y  = (y²)^((p+1)/4) (mod p)
/// which is the modular square root because both primes are `3 mod 4`.
use k256::elliptic_curve::sec1::ToEncodedPoint;
use num_bigint::BigUint;

use super::EllipticCurveType;
use crate::error::{Result, VaultError};

pub const COMPRESSED_LEN: usize = 33;
pub const UNCOMPRESSED_LEN: usize = 65;

/// Decompress a SEC1 public key into its 65-byte `0x04 ‖ X ‖ Y` form.
///
/// An already uncompressed key is returned unchanged after its length is
/// checked.
pub fn decompress(data: &[u8], curve: EllipticCurveType) -> Result<[u8; UNCOMPRESSED_LEN]> {
    let first = *data
        .first()
        .ok_or_else(|| VaultError::InvalidKey("No key data provided".into()))?;

    match first {
        4 => {
            return data.try_into().map_err(|_| {
                VaultError::InvalidKey(format!(
                    "{} is not a valid public key. Expecting {UNCOMPRESSED_LEN} bytes",
                    hex::encode(data)
                ))
            });
        }
        2 | 3 => {}
        _ => {
            return Err(VaultError::InvalidKey(format!(
                "{} is not a valid public key",
                hex::encode(data)
            )))
        }
    }

    if data.len() != COMPRESSED_LEN {
        return Err(VaultError::InvalidKey(format!(
            "{} is not a valid public key. Expecting {COMPRESSED_LEN} bytes",
            hex::encode(data)
        )));
    }

    let params = curve.params();
    let p = BigUint::from_bytes_be(params.p);
    let x = BigUint::from_bytes_be(&data[1..]);
    if x >= p {
        return Err(VaultError::InvalidKey(format!(
            "x coordinate is not a {curve} field element"
        )));
    }

    let y = curve_y(&x, params.a, params.b, &p, first == 3)?;

    let mut out = [0u8; UNCOMPRESSED_LEN];
    out[0] = 4;
    out[1..33].copy_from_slice(&data[1..]);
    let y_bytes = y.to_bytes_be();
    // left-pad to 32 bytes
    out[UNCOMPRESSED_LEN - y_bytes.len()..].copy_from_slice(&y_bytes);
    Ok(out)
}

/// Solve the curve equation for `y` with the requested parity.
fn curve_y(x: &BigUint, a: &[u8; 32], b: &[u8; 32], p: &BigUint, odd: bool) -> Result<BigUint> {
    let a = BigUint::from_bytes_be(a);
    let b = BigUint::from_bytes_be(b);

    let y2 = (x.modpow(&BigUint::from(3u32), p) + &a * x + b) % p;
    let exp = (p + 1u32) >> 2;
    let mut y = y2.modpow(&exp, p);

    if (&y * &y) % p != y2 {
        return Err(VaultError::InvalidKey("point is not on the curve".into()));
    }
    if y.bit(0) != odd {
        y = p - y;
    }
    Ok(y)
}

/// Compress a 65-byte uncompressed public key to `flag ‖ X`, where the flag
/// is 2 for an even `y` and 3 for an odd one.
pub fn compress(uncompressed: &[u8]) -> Option<[u8; COMPRESSED_LEN]> {
    if uncompressed.len() != UNCOMPRESSED_LEN || uncompressed[0] != 4 {
        return None;
    }
    let mut out = [0u8; COMPRESSED_LEN];
    out[0] = 2 + (uncompressed[UNCOMPRESSED_LEN - 1] % 2);
    out[1..].copy_from_slice(&uncompressed[1..33]);
    Some(out)
}

/// Derive the uncompressed public key for a raw private scalar.
pub fn public_key_from_scalar(
    scalar: &[u8; 32],
    curve: EllipticCurveType,
) -> Result<[u8; UNCOMPRESSED_LEN]> {
    let invalid = |_| VaultError::InvalidKey(format!("not a valid {curve} private key"));
    let point = match curve {
        EllipticCurveType::R1 => p256::SecretKey::from_slice(scalar)
            .map_err(invalid)?
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec(),
        EllipticCurveType::K1 => k256::SecretKey::from_slice(scalar)
            .map_err(invalid)?
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec(),
    };
    point
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::InvalidKey("unexpected public key encoding".into()))
}
