/// ECDSA public-key recovery and recovery-id search.
///
/// Hardware signers return a plain DER `(r, s)` pair. EOSIO signatures carry a
/// recovery id, so it is recovered here by trying each candidate in order and
/// keeping the first that reproduces the signer's public key.
use ecdsa::RecoveryId;

use super::math::UNCOMPRESSED_LEN;
use super::EllipticCurveType;
use crate::error::{Result, VaultError};

/// Recover the uncompressed public key for a compact `r ‖ s` signature over a
/// 32-byte digest.
pub fn recover_public_key(
    signature: &[u8; 64],
    digest: &[u8; 32],
    recid: u8,
    curve: EllipticCurveType,
) -> Result<[u8; UNCOMPRESSED_LEN]> {
    let recovery_id = RecoveryId::from_byte(recid)
        .ok_or_else(|| VaultError::Signing(format!("{recid} is not a valid recovery id")))?;
    let failed = |e: ecdsa::Error| VaultError::Signing(format!("public key recovery failed: {e}"));

    let point = match curve {
        EllipticCurveType::R1 => {
            let sig = p256::ecdsa::Signature::from_slice(signature).map_err(failed)?;
            p256::ecdsa::VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
                .map_err(failed)?
                .to_encoded_point(false)
                .as_bytes()
                .to_vec()
        }
        EllipticCurveType::K1 => {
            let sig = k256::ecdsa::Signature::from_slice(signature).map_err(failed)?;
            k256::ecdsa::VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
                .map_err(failed)?
                .to_encoded_point(false)
                .as_bytes()
                .to_vec()
        }
    };

    point
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::Signing("unexpected recovered point encoding".into()))
}

/// Decode a DER signature into its compact `r ‖ s` form.
///
/// K1 signatures are normalized to low-S, since secp256k1 verification (and
/// therefore recovery) rejects the high-S form.
pub fn der_to_compact(signature_der: &[u8], curve: EllipticCurveType) -> Result<[u8; 64]> {
    let invalid = |e: ecdsa::Error| VaultError::Signing(format!("invalid DER signature: {e}"));
    let bytes = match curve {
        EllipticCurveType::R1 => p256::ecdsa::Signature::from_der(signature_der)
            .map_err(invalid)?
            .to_bytes(),
        EllipticCurveType::K1 => {
            let sig = k256::ecdsa::Signature::from_der(signature_der).map_err(invalid)?;
            sig.normalize_s().unwrap_or(sig).to_bytes()
        }
    };
    let mut out = [0u8; 64];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Find the recovery id (0..=3) under which `signature_der` over `digest`
/// recovers to `target_public_key`.
///
/// Candidates that fail to recover at all are skipped. Exhausting all four is
/// a [`VaultError::NoMatch`]: the signature and key do not belong together.
pub fn find_recovery_id(
    signature_der: &[u8],
    digest: &[u8; 32],
    target_public_key: &[u8],
    curve: EllipticCurveType,
) -> Result<u8> {
    let compact = der_to_compact(signature_der, curve)?;

    for recid in 0..4u8 {
        match recover_public_key(&compact, digest, recid, curve) {
            Ok(recovered) if recovered[..] == *target_public_key => return Ok(recid),
            Ok(_) => {}
            Err(e) => tracing::trace!(recid, error = %e, "recovery candidate rejected"),
        }
    }
    Err(VaultError::NoMatch)
}
