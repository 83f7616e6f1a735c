/// In-process key and secret stores.
///
/// `MemoryKeyStore` keeps software keys exportable and simulates hardware keys
/// by never exposing their scalar: callers only ever see an opaque handle and
/// must sign through [`KeyStore::sign_with_handle`].
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use ecdsa::signature::Signer;
use rand::rngs::OsRng;
use tracing::debug;

use super::{KeySpec, KeyStore, SecretStore, IMPORT_MATERIAL_LEN};
use crate::crypto::sensitive::SecretScalar;
use crate::curve::math::UNCOMPRESSED_LEN;
use crate::curve::EllipticCurveType;
use crate::error::{Result, VaultError};
use crate::keys::record::{KeyAttributes, KeyHandle, PrivateMaterial};
use crate::keys::{AccessibleProtection, BioPolicy, KeyTag};

enum SigningKey {
    R1(p256::ecdsa::SigningKey),
    K1(k256::ecdsa::SigningKey),
}

impl SigningKey {
    fn generate(curve: EllipticCurveType) -> Self {
        match curve {
            EllipticCurveType::R1 => SigningKey::R1(p256::ecdsa::SigningKey::random(&mut OsRng)),
            EllipticCurveType::K1 => SigningKey::K1(k256::ecdsa::SigningKey::random(&mut OsRng)),
        }
    }

    fn from_scalar(scalar: &SecretScalar, curve: EllipticCurveType) -> Result<Self> {
        let invalid = |_| VaultError::InvalidKey(format!("not a valid {curve} private key"));
        Ok(match curve {
            EllipticCurveType::R1 => {
                SigningKey::R1(p256::ecdsa::SigningKey::from_slice(scalar.as_ref()).map_err(invalid)?)
            }
            EllipticCurveType::K1 => {
                SigningKey::K1(k256::ecdsa::SigningKey::from_slice(scalar.as_ref()).map_err(invalid)?)
            }
        })
    }

    fn scalar(&self) -> SecretScalar {
        let bytes = match self {
            SigningKey::R1(key) => key.to_bytes(),
            SigningKey::K1(key) => key.to_bytes(),
        };
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        SecretScalar::new(out)
    }

    fn uncompressed_public_key(&self) -> Vec<u8> {
        match self {
            SigningKey::R1(key) => key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            SigningKey::K1(key) => key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
        }
    }
}

struct StoredKey {
    attributes: KeyAttributes,
    signing_key: Option<SigningKey>,
}

/// Key store backed by process memory.
pub struct MemoryKeyStore {
    access_group: String,
    keys: Mutex<Vec<StoredKey>>,
}

impl MemoryKeyStore {
    pub fn new(access_group: impl Into<String>) -> Self {
        Self {
            access_group: access_group.into(),
            keys: Mutex::new(Vec::new()),
        }
    }

    fn keys(&self) -> Result<MutexGuard<'_, Vec<StoredKey>>> {
        self.keys
            .lock()
            .map_err(|_| VaultError::KeyManagement("key store lock poisoned".into()))
    }

    /// Store attributes verbatim with no usable signing key, the way a
    /// corrupted or foreign record would appear to the vault.
    pub fn insert_raw(&self, attributes: KeyAttributes) -> Result<()> {
        self.keys()?.push(StoredKey {
            attributes,
            signing_key: None,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, spec: &KeySpec, signing_key: SigningKey, hardware: bool) -> Result<KeyAttributes> {
        let handle = KeyHandle::new();
        let private = if hardware {
            PrivateMaterial::Opaque(handle)
        } else {
            PrivateMaterial::Exportable {
                handle,
                scalar: signing_key.scalar(),
            }
        };
        let attributes = KeyAttributes {
            label: spec.label.clone(),
            tag: spec.tag,
            access_group: spec
                .access_group
                .clone()
                .unwrap_or_else(|| self.access_group.clone()),
            protection: spec.protection,
            access_flag: spec.access_flag,
            is_hardware_backed: hardware,
            private,
            public_key: signing_key.uncompressed_public_key(),
        };
        self.keys()?.push(StoredKey {
            attributes: attributes.clone(),
            signing_key: Some(signing_key),
        });
        debug!(handle = %handle, curve = %spec.curve, hardware, "stored key");
        Ok(attributes)
    }
}

impl KeyStore for MemoryKeyStore {
    fn generate(&self, spec: &KeySpec) -> Result<KeyAttributes> {
        if spec.hardware_backed && !spec.curve.supports_hardware() {
            return Err(VaultError::KeyManagement(format!(
                "{} keys cannot be generated in hardware",
                spec.curve
            )));
        }
        self.store(spec, SigningKey::generate(spec.curve), spec.hardware_backed)
    }

    fn import_raw(
        &self,
        material: &[u8; IMPORT_MATERIAL_LEN],
        spec: &KeySpec,
    ) -> Result<KeyAttributes> {
        let (public_key, scalar) = material.split_at(UNCOMPRESSED_LEN);
        let scalar = SecretScalar::from_slice(scalar)
            .ok_or_else(|| VaultError::InvalidKey("private scalar must be 32 bytes".into()))?;

        let signing_key = SigningKey::from_scalar(&scalar, spec.curve)?;
        if signing_key.uncompressed_public_key() != public_key {
            return Err(VaultError::InvalidKey(
                "public key does not belong to the private key".into(),
            ));
        }

        let mut uncompressed = [0u8; UNCOMPRESSED_LEN];
        uncompressed.copy_from_slice(public_key);
        if self.find(&uncompressed)?.is_some() {
            return Err(VaultError::Duplicate(hex::encode(public_key)));
        }

        // imported keys never move into hardware
        self.store(spec, signing_key, false)
    }

    fn enumerate(&self, tag: Option<&KeyTag>) -> Result<Vec<KeyAttributes>> {
        Ok(self
            .keys()?
            .iter()
            .filter(|k| tag.is_none() || k.attributes.tag.as_ref() == tag)
            .map(|k| k.attributes.clone())
            .collect())
    }

    fn find(
        &self,
        uncompressed_public_key: &[u8; UNCOMPRESSED_LEN],
    ) -> Result<Option<KeyAttributes>> {
        Ok(self
            .keys()?
            .iter()
            .find(|k| k.attributes.public_key == uncompressed_public_key)
            .map(|k| k.attributes.clone()))
    }

    fn delete(&self, handle: KeyHandle) -> Result<()> {
        self.keys()?
            .retain(|k| k.attributes.private.handle() != handle);
        Ok(())
    }

    fn update_label(&self, handle: KeyHandle, label: &str) -> Result<()> {
        let mut keys = self.keys()?;
        let key = keys
            .iter_mut()
            .find(|k| k.attributes.private.handle() == handle)
            .ok_or_else(|| VaultError::NotFound(handle.to_string()))?;
        key.attributes.label = Some(label.to_string());
        Ok(())
    }

    fn sign_with_handle(&self, handle: KeyHandle, message: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys()?;
        let key = keys
            .iter()
            .find(|k| k.attributes.private.handle() == handle)
            .ok_or_else(|| VaultError::NotFound(handle.to_string()))?;

        match &key.signing_key {
            Some(SigningKey::R1(signing_key)) => {
                let signature: p256::ecdsa::Signature = signing_key.sign(message);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            Some(SigningKey::K1(_)) => Err(VaultError::Signing(
                "ECDSA-SHA256 message signing is not supported for K1 keys".into(),
            )),
            None => Err(VaultError::Signing(format!(
                "no usable private key behind handle {handle}"
            ))),
        }
    }
}

/// Secret store backed by process memory, keyed by `(service, name)`.
#[derive(Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<(String, String), Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail, as a full or locked store would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SecretStore for MemorySecretStore {
    fn put(
        &self,
        name: &str,
        service: &str,
        value: &[u8],
        _protection: AccessibleProtection,
        _bio_policy: BioPolicy,
    ) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut values) = self.values.lock() else {
            return false;
        };
        values.insert((service.to_string(), name.to_string()), value.to_vec());
        true
    }

    fn get(&self, name: &str, service: &str) -> Option<Vec<u8>> {
        let values = self.values.lock().ok()?;
        values
            .get(&(service.to_string(), name.to_string()))
            .cloned()
    }

    fn get_all(&self, service: &str) -> HashMap<String, Vec<u8>> {
        let Ok(values) = self.values.lock() else {
            return HashMap::new();
        };
        values
            .iter()
            .filter(|((s, _), _)| s == service)
            .map(|((_, name), value)| (name.clone(), value.clone()))
            .collect()
    }

    fn delete(&self, name: &str, service: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(&(service.to_string(), name.to_string()));
        }
    }
}
