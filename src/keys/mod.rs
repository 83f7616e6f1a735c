/// Key descriptors: store-level records, the application-facing `VaultKey`
/// projection, and the policy attributes both carry.
pub mod record;
pub mod vault_key;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::curve::EllipticCurveType;
use crate::error::VaultError;

/// How strictly the OS enforces biometric presence before a key may sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BioPolicy {
    /// No OS gate. Callers may still ask for a one-off software check.
    #[default]
    None,
    /// Any enrolled biometric; survives re-enrollment.
    Flex,
    /// The currently enrolled biometric set; the key is lost on re-enrollment.
    Fixed,
}

impl BioPolicy {
    pub fn access_flag(&self) -> Option<AccessFlag> {
        match self {
            BioPolicy::None => None,
            BioPolicy::Flex => Some(AccessFlag::BiometryAny),
            BioPolicy::Fixed => Some(AccessFlag::BiometryCurrentSet),
        }
    }

    fn legacy_words(&self) -> Option<&'static str> {
        match self {
            BioPolicy::None => None,
            BioPolicy::Flex => Some("bio flex"),
            BioPolicy::Fixed => Some("bio fixed"),
        }
    }
}

/// OS-level access-control flag attached to a key at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessFlag {
    BiometryAny,
    BiometryCurrentSet,
}

/// When a stored item is readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessibleProtection {
    WhenUnlocked,
    AfterFirstUnlock,
    WhenPasscodeSetThisDeviceOnly,
    #[default]
    WhenUnlockedThisDeviceOnly,
    AfterFirstUnlockThisDeviceOnly,
}

/// What a stored key is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyRole {
    /// An EOSIO signing key exposed through the vault.
    Signing,
    /// The reserved device-identity key; never listed or used for signing.
    VaultIdentifier,
}

/// Structured key tag. Curve, policy and role are separate fields, so no
/// combination of values can be mistaken for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyTag {
    pub role: KeyRole,
    pub curve: EllipticCurveType,
    pub bio_policy: BioPolicy,
}

impl KeyTag {
    pub fn signing(curve: EllipticCurveType, bio_policy: BioPolicy) -> Self {
        Self {
            role: KeyRole::Signing,
            curve,
            bio_policy,
        }
    }

    pub fn vault_identifier() -> Self {
        Self {
            role: KeyRole::VaultIdentifier,
            curve: EllipticCurveType::R1,
            bio_policy: BioPolicy::None,
        }
    }
}

pub const VAULT_IDENTIFIER_TAG: &str = "__VAULT__";

/// Legacy space-separated form, e.g. `"K1 bio fixed"` or `"__VAULT__"`.
impl fmt::Display for KeyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.role == KeyRole::VaultIdentifier {
            return f.write_str(VAULT_IDENTIFIER_TAG);
        }
        f.write_str(self.curve.as_str())?;
        if let Some(words) = self.bio_policy.legacy_words() {
            write!(f, " {words}")?;
        }
        Ok(())
    }
}

/// Parses the legacy form by whole words. A curve name or policy word that
/// only appears inside a longer token is not a match.
impl FromStr for KeyTag {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        if words == [VAULT_IDENTIFIER_TAG] {
            return Ok(Self::vault_identifier());
        }

        let mut curve = EllipticCurveType::R1;
        let mut bio_policy = BioPolicy::None;
        let mut iter = words.iter();
        while let Some(word) = iter.next() {
            match *word {
                "R1" => curve = EllipticCurveType::R1,
                "K1" => curve = EllipticCurveType::K1,
                "bio" => {
                    bio_policy = match iter.next() {
                        Some(&"flex") => BioPolicy::Flex,
                        Some(&"fixed") => BioPolicy::Fixed,
                        other => {
                            return Err(VaultError::KeyManagement(format!(
                                "unknown bio policy {other:?} in tag {s:?}"
                            )))
                        }
                    }
                }
                other => {
                    return Err(VaultError::KeyManagement(format!(
                        "unknown word {other:?} in tag {s:?}"
                    )))
                }
            }
        }
        Ok(Self::signing(curve, bio_policy))
    }
}
