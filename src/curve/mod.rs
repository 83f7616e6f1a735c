/// Curve definitions for the two supported EOSIO key types.
///
/// R1 is NIST P-256 (the only curve the secure hardware supports), K1 is
/// secp256k1 (software only). Both primes satisfy `p ≡ 3 (mod 4)`, which the
/// point decompression in [`math`] relies on.
pub mod math;
pub mod recovery;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// P-256 field prime.
const R1_P: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

/// P-256 `a = -3`, stored as `p - 3`.
const R1_A: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC,
];

const R1_B: [u8; 32] = [
    0x5A, 0xC6, 0x35, 0xD8, 0xAA, 0x3A, 0x93, 0xE7, 0xB3, 0xEB, 0xBD, 0x55, 0x76, 0x98, 0x86, 0xBC,
    0x65, 0x1D, 0x06, 0xB0, 0xCC, 0x53, 0xB0, 0xF6, 0x3B, 0xCE, 0x3C, 0x3E, 0x27, 0xD2, 0x60, 0x4B,
];

/// secp256k1 field prime.
const K1_P: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xFC, 0x2F,
];

const K1_A: [u8; 32] = [0u8; 32];

const K1_B: [u8; 32] = {
    let mut b = [0u8; 32];
    b[31] = 7;
    b
};

/// Short Weierstrass parameters `y² = x³ + ax + b (mod p)`, big-endian.
/// `a` is already reduced into `[0, p)`.
#[derive(Debug, Clone, Copy)]
pub struct CurveParams {
    pub p: &'static [u8; 32],
    pub a: &'static [u8; 32],
    pub b: &'static [u8; 32],
}

/// The elliptic curve backing an EOSIO key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EllipticCurveType {
    R1,
    K1,
}

impl EllipticCurveType {
    /// Curve name as it appears in wire strings and legacy tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            EllipticCurveType::R1 => "R1",
            EllipticCurveType::K1 => "K1",
        }
    }

    pub fn params(&self) -> CurveParams {
        match self {
            EllipticCurveType::R1 => CurveParams {
                p: &R1_P,
                a: &R1_A,
                b: &R1_B,
            },
            EllipticCurveType::K1 => CurveParams {
                p: &K1_P,
                a: &K1_A,
                b: &K1_B,
            },
        }
    }

    /// Whether private keys on this curve can live in secure hardware.
    pub fn supports_hardware(&self) -> bool {
        matches!(self, EllipticCurveType::R1)
    }
}

impl fmt::Display for EllipticCurveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EllipticCurveType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "R1" => Ok(EllipticCurveType::R1),
            "K1" => Ok(EllipticCurveType::K1),
            other => Err(VaultError::InvalidKey(format!("{other} is not a valid curve"))),
        }
    }
}
