/// Private scalar material that is zeroized when dropped.
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A raw 32-byte private key scalar.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SecretScalar([u8; 32]);

impl SecretScalar {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Accepts exactly 32 bytes, or a longer ANSI X9.63 export whose last
    /// 32 bytes are the scalar.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() < 32 {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&slice[slice.len() - 32..]);
        Some(Self(bytes))
    }
}

impl AsRef<[u8]> for SecretScalar {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretScalar(..)")
    }
}
