/// Key registry.
///
/// Reconciles the key store's records with the metadata kept in the secret
/// store into one catalog of [`VaultKey`]s, keyed by public-key string:
/// - a record without metadata is listed with empty metadata;
/// - metadata without a record is listed as a retired key;
/// - a record whose point is malformed is dropped from listings.
///
/// Mutations are announced on a broadcast channel (see [`Vault::subscribe`]).
/// Signing of `BioPolicy::None` keys can be gated behind a one-off biometric
/// check; at most one such check is pending per vault.
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::{AuthOutcome, Authenticator, SessionSlot};
use crate::codec::{EosioCodec, KeyCodec};
use crate::config::VaultConfig;
use crate::crypto::sensitive::SecretScalar;
use crate::curve::math::{self, UNCOMPRESSED_LEN};
use crate::curve::EllipticCurveType;
use crate::error::{Result, VaultError};
use crate::keys::record::{KeyAttributes, KeyRecord};
use crate::keys::vault_key::{Metadata, VaultKey};
use crate::keys::{BioPolicy, KeyTag};
use crate::signing::{RecoverableSignature, SigningEngine};
use crate::store::{KeySpec, KeyStore, SecretStore, IMPORT_MATERIAL_LEN};

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultAction {
    #[serde(rename = "new")]
    New,
    #[serde(rename = "metadata update")]
    MetadataUpdate,
    #[serde(rename = "delete")]
    Delete,
}

impl VaultAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultAction::New => "new",
            VaultAction::MetadataUpdate => "metadata update",
            VaultAction::Delete => "delete",
        }
    }
}

impl fmt::Display for VaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted after every successful create, import, metadata update or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEvent {
    pub public_key: String,
    pub action: VaultAction,
}

pub struct Vault {
    key_store: Arc<dyn KeyStore>,
    secret_store: Arc<dyn SecretStore>,
    authenticator: Arc<dyn Authenticator>,
    codec: Arc<dyn KeyCodec>,
    config: VaultConfig,
    events: broadcast::Sender<VaultEvent>,
    sessions: SessionSlot,
}

impl Vault {
    pub fn new(
        key_store: Arc<dyn KeyStore>,
        secret_store: Arc<dyn SecretStore>,
        authenticator: Arc<dyn Authenticator>,
        config: VaultConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            key_store,
            secret_store,
            authenticator,
            codec: Arc::new(EosioCodec),
            config,
            events,
            sessions: SessionSlot::default(),
        }
    }

    /// Replace the wire codec.
    pub fn with_codec(mut self, codec: Arc<dyn KeyCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn codec(&self) -> &dyn KeyCodec {
        self.codec.as_ref()
    }

    /// Receive update events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    fn notify(&self, public_key: &str, action: VaultAction) {
        // no subscribers is fine
        let _ = self.events.send(VaultEvent {
            public_key: public_key.to_string(),
            action,
        });
    }

    /// The reserved device-identity key, created on first use.
    pub fn vault_identifier_key(&self) -> Result<KeyRecord> {
        let tag = KeyTag::vault_identifier();
        if let Some(attributes) = self.key_store.enumerate(Some(&tag))?.into_iter().next() {
            return KeyRecord::from_attributes(attributes);
        }

        info!("creating vault identifier key");
        let attributes = self.key_store.generate(&KeySpec {
            curve: EllipticCurveType::R1,
            hardware_backed: true,
            tag: Some(tag),
            label: None,
            access_group: self.access_group(),
            protection: self.config.protection,
            access_flag: None,
        })?;
        KeyRecord::from_attributes(attributes)
    }

    /// Hex of the identity key's uncompressed public key.
    pub fn vault_identifier(&self) -> Result<String> {
        Ok(hex::encode(
            self.vault_identifier_key()?.uncompressed_public_key(),
        ))
    }

    /// Decode a public-key string and decompress it on its own curve.
    pub fn uncompressed_public_key(&self, public_key: &str) -> Result<[u8; UNCOMPRESSED_LEN]> {
        let (curve, compressed) = self.codec.decode_public_key(public_key)?;
        math::decompress(&compressed, curve)
    }

    /// Canonical string and point for any accepted public-key spelling.
    fn resolve(&self, public_key: &str) -> Result<(String, [u8; UNCOMPRESSED_LEN])> {
        let (curve, compressed) = self.codec.decode_public_key(public_key)?;
        let uncompressed = math::decompress(&compressed, curve)?;
        let canonical = self.codec.encode_public_key(&compressed, curve)?;
        Ok((canonical, uncompressed))
    }

    fn find_record(&self, uncompressed: &[u8; UNCOMPRESSED_LEN]) -> Result<Option<KeyRecord>> {
        match self.key_store.find(uncompressed)? {
            Some(attributes) => {
                let record = KeyRecord::from_attributes(attributes)?;
                Ok((!record.is_vault_identifier()).then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Every key: live records joined with their metadata, then retired
    /// metadata-only entries.
    pub fn list_all(&self) -> Result<Vec<VaultKey>> {
        let mut metadata = self.get_all_metadata();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for attributes in self.key_store.enumerate(None)? {
            let mut key = match self.project(attributes) {
                Ok(Some(key)) => key,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "dropping malformed key record");
                    continue;
                }
            };
            if !seen.insert(key.public_key().to_string()) {
                debug!(public_key = key.public_key(), "skipping duplicate key record");
                continue;
            }
            key.metadata = metadata.remove(key.public_key()).unwrap_or_default();
            keys.push(key);
        }

        let live = keys.len();
        for (public_key, metadata) in metadata {
            keys.push(VaultKey::retired(public_key, metadata, self.codec.as_ref()));
        }
        debug!(live, retired = keys.len() - live, "listed vault keys");
        Ok(keys)
    }

    /// `None` for the identity key, which is never listed.
    fn project(&self, attributes: KeyAttributes) -> Result<Option<VaultKey>> {
        let record = KeyRecord::from_attributes(attributes)?;
        if record.is_vault_identifier() {
            return Ok(None);
        }
        VaultKey::from_record(record, None, None, self.codec.as_ref()).map(Some)
    }

    pub fn get(&self, public_key: &str) -> Result<VaultKey> {
        let (canonical, uncompressed) = self.resolve(public_key)?;
        let metadata = self.get_metadata(&canonical);

        match self.find_record(&uncompressed)? {
            Some(record) => {
                VaultKey::from_record(record, Some(&canonical), metadata, self.codec.as_ref())
            }
            None => match metadata {
                Some(metadata) => Ok(VaultKey::retired(canonical, metadata, self.codec.as_ref())),
                None => Err(VaultError::NotFound(public_key.to_string())),
            },
        }
    }

    /// Generate a key. The result is built from the generated record without
    /// reading the store back, which could itself raise a biometric prompt.
    pub fn create(
        &self,
        curve: EllipticCurveType,
        hardware_backed: bool,
        bio_policy: BioPolicy,
        metadata: Option<Metadata>,
    ) -> Result<VaultKey> {
        if hardware_backed && !curve.supports_hardware() {
            return Err(VaultError::KeyManagement(format!(
                "{curve} keys cannot be hardware backed"
            )));
        }

        let attributes = self
            .key_store
            .generate(&self.key_spec(curve, hardware_backed, bio_policy))?;
        let key = self.admit(attributes, metadata)?;
        info!(
            public_key = key.public_key(),
            curve = %curve,
            hardware_backed,
            "created key"
        );
        Ok(key)
    }

    pub fn create_hardware_key(
        &self,
        bio_policy: BioPolicy,
        metadata: Option<Metadata>,
    ) -> Result<VaultKey> {
        self.create(EllipticCurveType::R1, true, bio_policy, metadata)
    }

    /// Import a raw private scalar as a software key. Fails with
    /// `VaultError::Duplicate` if the key is already stored.
    pub fn import_raw(
        &self,
        scalar: &SecretScalar,
        curve: EllipticCurveType,
        bio_policy: BioPolicy,
        metadata: Option<Metadata>,
    ) -> Result<VaultKey> {
        let public_key = math::public_key_from_scalar(scalar.as_bytes(), curve)?;
        let mut material = Zeroizing::new([0u8; IMPORT_MATERIAL_LEN]);
        material[..UNCOMPRESSED_LEN].copy_from_slice(&public_key);
        material[UNCOMPRESSED_LEN..].copy_from_slice(scalar.as_bytes());

        let attributes = self
            .key_store
            .import_raw(&material, &self.key_spec(curve, false, bio_policy))?;
        let key = self.admit(attributes, metadata)?;
        info!(public_key = key.public_key(), curve = %curve, "imported key");
        Ok(key)
    }

    /// Import a wire-format private key; the curve comes from the string.
    pub fn import_external(
        &self,
        private_key: &str,
        bio_policy: BioPolicy,
        metadata: Option<Metadata>,
    ) -> Result<VaultKey> {
        let (curve, scalar) = self.codec.decode_private_key(private_key)?;
        self.import_raw(&scalar, curve, bio_policy, metadata)
    }

    fn key_spec(
        &self,
        curve: EllipticCurveType,
        hardware_backed: bool,
        bio_policy: BioPolicy,
    ) -> KeySpec {
        KeySpec {
            curve,
            hardware_backed,
            tag: Some(KeyTag::signing(curve, bio_policy)),
            label: None,
            access_group: self.access_group(),
            protection: self.config.protection,
            access_flag: bio_policy.access_flag(),
        }
    }

    /// The configured access group; empty leaves the store's default.
    fn access_group(&self) -> Option<String> {
        Some(self.config.access_group.clone()).filter(|g| !g.is_empty())
    }

    fn admit(&self, attributes: KeyAttributes, metadata: Option<Metadata>) -> Result<VaultKey> {
        let has_metadata = metadata.is_some();
        let record = KeyRecord::from_attributes(attributes)?;
        let key = VaultKey::from_record(record, None, metadata, self.codec.as_ref())?;

        if has_metadata && !self.save_metadata(key.public_key(), &key.metadata) {
            warn!(public_key = key.public_key(), "failed to save metadata for new key");
        }
        self.notify(key.public_key(), VaultAction::New);
        Ok(key)
    }

    /// Remove the key record and its metadata. Absent keys are not an error.
    pub fn delete(&self, public_key: &str) -> Result<()> {
        let (canonical, uncompressed) = self.resolve(public_key)?;
        let mut existed = false;

        if let Some(record) = self.find_record(&uncompressed)? {
            self.key_store.delete(record.handle())?;
            existed = true;
        }
        if self
            .secret_store
            .get(&canonical, &self.config.metadata_service)
            .is_some()
        {
            self.secret_store
                .delete(&canonical, &self.config.metadata_service);
            existed = true;
        }

        if existed {
            info!(public_key = canonical.as_str(), "deleted key");
            self.notify(&canonical, VaultAction::Delete);
        }
        Ok(())
    }

    /// Relabel the key record. Metadata is not touched.
    pub fn update_label(&self, public_key: &str, label: &str) -> Result<()> {
        let (_, uncompressed) = self.resolve(public_key)?;
        let record = self
            .find_record(&uncompressed)?
            .ok_or_else(|| VaultError::NotFound(public_key.to_string()))?;
        self.key_store.update_label(record.handle(), label)
    }

    /// Upsert a key's metadata. Returns false if it could not be stored.
    pub fn update_metadata(&self, public_key: &str, metadata: &Metadata) -> bool {
        let canonical = match self.resolve(public_key) {
            Ok((canonical, _)) => canonical,
            Err(e) => {
                warn!(public_key, error = %e, "cannot store metadata for invalid key");
                return false;
            }
        };
        if !self.save_metadata(&canonical, metadata) {
            warn!(public_key = canonical.as_str(), "failed to store metadata");
            return false;
        }
        self.notify(&canonical, VaultAction::MetadataUpdate);
        true
    }

    pub fn update(&self, key: &VaultKey) -> bool {
        self.update_metadata(key.public_key(), &key.metadata)
    }

    fn save_metadata(&self, public_key: &str, metadata: &Metadata) -> bool {
        let Ok(json) = serde_json::to_vec(metadata) else {
            return false;
        };
        self.secret_store.put(
            public_key,
            &self.config.metadata_service,
            &json,
            self.config.protection,
            BioPolicy::None,
        )
    }

    pub fn get_metadata(&self, public_key: &str) -> Option<Metadata> {
        let json = self
            .secret_store
            .get(public_key, &self.config.metadata_service)?;
        serde_json::from_slice(&json).ok()
    }

    /// All stored metadata by public-key string. Entries that are not JSON
    /// objects are skipped.
    pub fn get_all_metadata(&self) -> BTreeMap<String, Metadata> {
        self.secret_store
            .get_all(&self.config.metadata_service)
            .into_iter()
            .filter_map(|(public_key, json)| match serde_json::from_slice::<Metadata>(&json) {
                Ok(metadata) => Some((public_key, metadata)),
                Err(e) => {
                    warn!(public_key = public_key.as_str(), error = %e, "skipping unreadable metadata");
                    None
                }
            })
            .collect()
    }

    /// Sign `message` with the default prompt.
    pub async fn sign(
        &self,
        message: &[u8],
        public_key: &str,
        require_bio: bool,
    ) -> Result<RecoverableSignature> {
        self.sign_with_prompt(message, public_key, require_bio, &self.config.default_prompt)
            .await
    }

    /// Sign `message`. Keys with an OS-level bio policy are gated by the key
    /// store itself; `require_bio` adds a one-off check for keys without one.
    pub async fn sign_with_prompt(
        &self,
        message: &[u8],
        public_key: &str,
        require_bio: bool,
        prompt: &str,
    ) -> Result<RecoverableSignature> {
        let key = self.get(public_key)?;
        if require_bio && key.bio_policy() == BioPolicy::None {
            self.authenticate(prompt).await?;
        }
        debug!(public_key = key.public_key(), curve = %key.curve(), "signing");

        // the store may block on an OS prompt for bio-gated keys
        let engine = SigningEngine::new(Arc::clone(&self.key_store), Arc::clone(&self.codec));
        let message = message.to_vec();
        tokio::task::spawn_blocking(move || engine.sign(&message, &key))
            .await
            .map_err(|e| VaultError::Signing(format!("signing task failed: {e}")))?
    }

    async fn authenticate(&self, prompt: &str) -> Result<()> {
        if !self.authenticator.can_evaluate() {
            return Err(VaultError::AuthenticationUnavailable(
                "biometric authentication is not available".into(),
            ));
        }

        let mut ticket = self.sessions.begin();
        if ticket.superseded {
            self.authenticator.invalidate();
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut ticket.cancelled => AuthOutcome::Cancelled,
            outcome = self.authenticator.evaluate(prompt) => outcome,
        };
        drop(ticket);
        outcome.into_result()
    }

    /// Cancel the pending biometric check, if any.
    pub fn cancel_pending_signing_request(&self) -> bool {
        if self.sessions.cancel() {
            self.authenticator.invalidate();
            return true;
        }
        false
    }

    pub fn has_pending_signing_request(&self) -> bool {
        self.sessions.is_pending()
    }

    /// Sign in the background and hand the outcome to `completion`. A request
    /// that is superseded or cancelled never calls its completion.
    pub fn sign_with_completion<F>(
        self: &Arc<Self>,
        message: Vec<u8>,
        public_key: String,
        require_bio: bool,
        prompt: Option<String>,
        completion: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<RecoverableSignature>) + Send + 'static,
    {
        let vault = Arc::clone(self);
        tokio::spawn(async move {
            let prompt = prompt.unwrap_or_else(|| vault.config.default_prompt.clone());
            match vault
                .sign_with_prompt(&message, &public_key, require_bio, &prompt)
                .await
            {
                Err(VaultError::Cancelled) => {
                    debug!(public_key = public_key.as_str(), "signing request cancelled");
                }
                result => completion(result),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc as std_mpsc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::{mpsc, Notify};

    use super::*;
    use crate::auth::{AlwaysApprove, NoBiometrics};
    use crate::curve::recovery;
    use crate::error::ErrorKind;
    use crate::keys::record::{KeyHandle, PrivateMaterial};
    use crate::keys::{AccessFlag, AccessibleProtection};
    use crate::store::memory::{MemoryKeyStore, MemorySecretStore};

    const DEV_PRIVATE_KEY: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";
    const DEV_PUBLIC_KEY: &str = "EOS6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV";

    /// Holds every evaluation until released.
    struct GatedAuthenticator {
        gate: Notify,
        outcome: AuthOutcome,
        started: AtomicUsize,
        invalidated: AtomicUsize,
    }

    impl GatedAuthenticator {
        fn new(outcome: AuthOutcome) -> Self {
            Self {
                gate: Notify::new(),
                outcome,
                started: AtomicUsize::new(0),
                invalidated: AtomicUsize::new(0),
            }
        }

        async fn wait_started(&self, count: usize) {
            while self.started.load(Ordering::SeqCst) < count {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl Authenticator for GatedAuthenticator {
        fn can_evaluate(&self) -> bool {
            true
        }

        async fn evaluate(&self, _prompt: &str) -> AuthOutcome {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone()
        }

        fn invalidate(&self) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Key store whose handle signing blocks the calling thread until
    /// released, the way an OS biometric prompt does.
    struct PromptingKeyStore {
        inner: MemoryKeyStore,
        prompted: AtomicBool,
        release: Mutex<std_mpsc::Receiver<()>>,
    }

    impl KeyStore for PromptingKeyStore {
        fn generate(&self, spec: &KeySpec) -> Result<KeyAttributes> {
            self.inner.generate(spec)
        }

        fn import_raw(
            &self,
            material: &[u8; IMPORT_MATERIAL_LEN],
            spec: &KeySpec,
        ) -> Result<KeyAttributes> {
            self.inner.import_raw(material, spec)
        }

        fn enumerate(&self, tag: Option<&KeyTag>) -> Result<Vec<KeyAttributes>> {
            self.inner.enumerate(tag)
        }

        fn find(
            &self,
            uncompressed_public_key: &[u8; UNCOMPRESSED_LEN],
        ) -> Result<Option<KeyAttributes>> {
            self.inner.find(uncompressed_public_key)
        }

        fn delete(&self, handle: KeyHandle) -> Result<()> {
            self.inner.delete(handle)
        }

        fn update_label(&self, handle: KeyHandle, label: &str) -> Result<()> {
            self.inner.update_label(handle, label)
        }

        fn sign_with_handle(&self, handle: KeyHandle, message: &[u8]) -> Result<Vec<u8>> {
            self.prompted.store(true, Ordering::SeqCst);
            let _ = self.release.lock().unwrap().recv();
            self.inner.sign_with_handle(handle, message)
        }
    }

    struct Fixture {
        vault: Vault,
        key_store: Arc<MemoryKeyStore>,
        secret_store: Arc<MemorySecretStore>,
    }

    fn fixture(authenticator: Arc<dyn Authenticator>) -> Fixture {
        let key_store = Arc::new(MemoryKeyStore::new("test.group"));
        let secret_store = Arc::new(MemorySecretStore::new());
        let vault = Vault::new(
            key_store.clone(),
            secret_store.clone(),
            authenticator,
            VaultConfig::new("test.group"),
        );
        Fixture {
            vault,
            key_store,
            secret_store,
        }
    }

    fn metadata(name: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("name".into(), Value::from(name));
        metadata
    }

    fn assert_signed_by(signature: &RecoverableSignature, message: &[u8], key: &VaultKey) {
        let recovered = recovery::recover_public_key(
            &signature.compact(),
            &crate::crypto::sha256(message),
            signature.recovery_id(),
            signature.curve(),
        )
        .unwrap();
        assert_eq!(&recovered, key.uncompressed_public_key().unwrap());
    }

    #[test]
    fn test_list_all_merges_orphans() {
        let f = fixture(Arc::new(NoBiometrics));
        let live = f
            .vault
            .create(EllipticCurveType::R1, true, BioPolicy::None, None)
            .unwrap();

        // metadata whose key no longer exists
        let other = MemoryKeyStore::new("");
        let gone = Vault::new(
            Arc::new(other),
            Arc::new(MemorySecretStore::new()),
            Arc::new(NoBiometrics),
            VaultConfig::default(),
        )
        .create(EllipticCurveType::K1, false, BioPolicy::None, None)
        .unwrap();
        assert!(f.vault.update_metadata(gone.public_key(), &metadata("old")));

        let keys = f.vault.list_all().unwrap();
        assert_eq!(keys.len(), 2);

        let listed_live = keys
            .iter()
            .find(|k| k.public_key() == live.public_key())
            .unwrap();
        assert!(!listed_live.is_retired());
        assert!(listed_live.metadata.is_empty());

        let retired = keys
            .iter()
            .find(|k| k.public_key() == gone.public_key())
            .unwrap();
        assert!(retired.is_retired());
        assert_eq!(retired.curve(), EllipticCurveType::K1);
        assert_eq!(retired.metadata["name"], "old");
    }

    #[test]
    fn test_list_all_joins_metadata() {
        let f = fixture(Arc::new(NoBiometrics));
        let key = f
            .vault
            .create(EllipticCurveType::K1, false, BioPolicy::None, Some(metadata("main")))
            .unwrap();
        assert_eq!(key.metadata["name"], "main");

        let keys = f.vault.list_all().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].public_key(), key.public_key());
        assert_eq!(keys[0].metadata["name"], "main");
    }

    #[test]
    fn test_list_all_drops_malformed_records() {
        let f = fixture(Arc::new(NoBiometrics));
        f.vault
            .create(EllipticCurveType::R1, false, BioPolicy::None, None)
            .unwrap();

        let mut off_curve = vec![0x02];
        off_curve.extend_from_slice(&[0xFF; 32]);
        for public_key in [vec![0x02; 10], off_curve] {
            f.key_store
                .insert_raw(KeyAttributes {
                    label: None,
                    tag: None,
                    access_group: "test.group".into(),
                    protection: AccessibleProtection::default(),
                    access_flag: None,
                    is_hardware_backed: true,
                    private: PrivateMaterial::Opaque(KeyHandle::new()),
                    public_key,
                })
                .unwrap();
        }

        assert_eq!(f.key_store.len(), 3);
        assert_eq!(f.vault.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_vault_identifier_is_reserved() {
        let f = fixture(Arc::new(NoBiometrics));
        let identifier = f.vault.vault_identifier().unwrap();
        assert_eq!(identifier.len(), UNCOMPRESSED_LEN * 2);
        assert!(identifier.starts_with("04"));
        assert_eq!(f.vault.vault_identifier().unwrap(), identifier);
        assert_eq!(f.key_store.len(), 1);

        assert!(f.vault.list_all().unwrap().is_empty());

        let record = f.vault.vault_identifier_key().unwrap();
        let public_key = f
            .vault
            .codec()
            .encode_public_key(record.compressed_public_key(), EllipticCurveType::R1)
            .unwrap();
        assert!(matches!(
            f.vault.get(&public_key),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_and_uncompressed_public_key() {
        let f = fixture(Arc::new(NoBiometrics));
        let key = f
            .vault
            .create(EllipticCurveType::K1, false, BioPolicy::Flex, Some(metadata("k")))
            .unwrap();

        let fetched = f.vault.get(key.public_key()).unwrap();
        assert_eq!(fetched.public_key(), key.public_key());
        assert_eq!(fetched.bio_policy(), BioPolicy::Flex);
        assert_eq!(fetched.metadata["name"], "k");
        assert_eq!(
            &f.vault.uncompressed_public_key(key.public_key()).unwrap(),
            key.uncompressed_public_key().unwrap()
        );

        let err = f.vault.get("PUB_R1_garbage").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
    }

    #[test]
    fn test_create_passes_key_attributes_to_store() {
        let key_store = Arc::new(MemoryKeyStore::new("device.default"));
        let mut config = VaultConfig::new("team.wallet");
        config.protection = AccessibleProtection::AfterFirstUnlock;
        let vault = Vault::new(
            key_store.clone(),
            Arc::new(MemorySecretStore::new()),
            Arc::new(NoBiometrics),
            config,
        );

        for (bio_policy, access_flag) in [
            (BioPolicy::None, None),
            (BioPolicy::Flex, Some(AccessFlag::BiometryAny)),
            (BioPolicy::Fixed, Some(AccessFlag::BiometryCurrentSet)),
        ] {
            let key = vault.create_hardware_key(bio_policy, None).unwrap();
            let record = key.record().unwrap();
            assert_eq!(record.access_flag(), access_flag);
            assert_eq!(record.protection(), AccessibleProtection::AfterFirstUnlock);
            assert_eq!(record.access_group(), "team.wallet");
        }
        assert!(key_store
            .enumerate(None)
            .unwrap()
            .iter()
            .all(|a| a.access_group == "team.wallet"));

        let unscoped = Vault::new(
            key_store.clone(),
            Arc::new(MemorySecretStore::new()),
            Arc::new(NoBiometrics),
            VaultConfig::default(),
        );
        let key = unscoped
            .create(EllipticCurveType::K1, false, BioPolicy::None, None)
            .unwrap();
        assert_eq!(key.record().unwrap().access_group(), "device.default");
    }

    #[test]
    fn test_hardware_k1_rejected() {
        let f = fixture(Arc::new(NoBiometrics));
        let err = f
            .vault
            .create(EllipticCurveType::K1, true, BioPolicy::None, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyManagement);
        assert!(f.key_store.is_empty());
    }

    #[test]
    fn test_delete_removes_record_and_metadata() {
        let f = fixture(Arc::new(NoBiometrics));
        let mut events = f.vault.subscribe();
        let key = f
            .vault
            .create_hardware_key(BioPolicy::Fixed, Some(metadata("gone soon")))
            .unwrap();
        assert!(key.is_hardware_backed());

        f.vault.delete(key.public_key()).unwrap();
        assert!(f.key_store.is_empty());
        assert!(f.vault.get_metadata(key.public_key()).is_none());

        let err = f.vault.get(key.public_key()).unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert_eq!(err.kind(), ErrorKind::KeyManagement);

        // idempotent, and silent the second time
        f.vault.delete(key.public_key()).unwrap();

        assert_eq!(events.try_recv().unwrap().action, VaultAction::New);
        let deleted = events.try_recv().unwrap();
        assert_eq!(deleted.action, VaultAction::Delete);
        assert_eq!(deleted.public_key, key.public_key());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_import_twice_is_duplicate() {
        let f = fixture(Arc::new(NoBiometrics));
        let key = f
            .vault
            .import_external(DEV_PRIVATE_KEY, BioPolicy::None, Some(metadata("dev")))
            .unwrap();

        assert_eq!(key.curve(), EllipticCurveType::K1);
        assert!(!key.is_hardware_backed());
        let (_, legacy) = f.vault.codec().decode_public_key(DEV_PUBLIC_KEY).unwrap();
        assert_eq!(key.compressed_public_key().unwrap(), &legacy);

        let err = f
            .vault
            .import_external(DEV_PRIVATE_KEY, BioPolicy::None, Some(metadata("again")))
            .unwrap_err();
        assert!(matches!(err, VaultError::Duplicate(_)));
        assert_eq!(err.kind(), ErrorKind::KeyManagement);

        assert_eq!(f.key_store.len(), 1);
        assert_eq!(f.vault.get(key.public_key()).unwrap().metadata["name"], "dev");

        // the legacy spelling resolves to the same key
        assert_eq!(
            f.vault.get(DEV_PUBLIC_KEY).unwrap().public_key(),
            key.public_key()
        );
    }

    #[test]
    fn test_update_metadata_and_label() {
        let f = fixture(Arc::new(NoBiometrics));
        let mut events = f.vault.subscribe();
        let mut key = f
            .vault
            .create(EllipticCurveType::R1, false, BioPolicy::None, None)
            .unwrap();
        assert!(f.secret_store.get_all("EosioKeyMetadataService").is_empty());

        key.metadata = metadata("renamed");
        assert!(f.vault.update(&key));
        assert_eq!(
            f.vault.get_all_metadata()[key.public_key()]["name"],
            "renamed"
        );

        f.vault.update_label(key.public_key(), "savings").unwrap();
        assert_eq!(f.vault.get(key.public_key()).unwrap().label(), Some("savings"));
        assert_eq!(
            f.vault.get(key.public_key()).unwrap().metadata["name"],
            "renamed"
        );

        f.secret_store.set_fail_writes(true);
        assert!(!f.vault.update_metadata(key.public_key(), &metadata("lost")));
        assert!(!f.vault.update_metadata("not a key", &metadata("lost")));

        assert_eq!(events.try_recv().unwrap().action, VaultAction::New);
        assert_eq!(
            events.try_recv().unwrap().action,
            VaultAction::MetadataUpdate
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sign_r1_and_k1() {
        let f = fixture(Arc::new(NoBiometrics));
        let r1 = f.vault.create_hardware_key(BioPolicy::Flex, None).unwrap();
        let k1 = f
            .vault
            .create(EllipticCurveType::K1, false, BioPolicy::None, None)
            .unwrap();

        // an OS-level policy needs no software check
        let signature = f.vault.sign(b"r1 message", r1.public_key(), true).await.unwrap();
        assert!(signature.as_str().starts_with("SIG_R1_"));
        assert_signed_by(&signature, b"r1 message", &r1);

        let signature = f.vault.sign(b"k1 message", k1.public_key(), false).await.unwrap();
        assert!(signature.as_str().starts_with("SIG_K1_"));
        assert_signed_by(&signature, b"k1 message", &k1);
    }

    #[tokio::test]
    async fn test_sign_retired_key_fails() {
        let f = fixture(Arc::new(NoBiometrics));
        let key = f
            .vault
            .create(EllipticCurveType::K1, false, BioPolicy::None, None)
            .unwrap();
        f.key_store.delete(key.record().unwrap().handle()).unwrap();
        assert!(f.vault.update_metadata(key.public_key(), &metadata("kept")));

        assert!(f.vault.get(key.public_key()).unwrap().is_retired());
        let err = f.vault.sign(b"msg", key.public_key(), false).await.unwrap_err();
        assert!(matches!(err, VaultError::Signing(_)));
    }

    #[tokio::test]
    async fn test_software_bio_check() {
        let unavailable = fixture(Arc::new(NoBiometrics));
        let key = unavailable
            .vault
            .create(EllipticCurveType::R1, false, BioPolicy::None, None)
            .unwrap();
        let err = unavailable
            .vault
            .sign(b"msg", key.public_key(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationUnavailable(_)));
        assert!(unavailable.vault.sign(b"msg", key.public_key(), false).await.is_ok());

        let approved = fixture(Arc::new(AlwaysApprove));
        let key = approved
            .vault
            .create(EllipticCurveType::K1, false, BioPolicy::None, None)
            .unwrap();
        assert!(approved.vault.sign(b"msg", key.public_key(), true).await.is_ok());
        assert!(!approved.vault.has_pending_signing_request());
    }

    #[tokio::test]
    async fn test_denied_bio_check() {
        let authenticator = Arc::new(GatedAuthenticator::new(AuthOutcome::Denied(
            "fingerprint not recognized".into(),
        )));
        authenticator.gate.notify_one();
        let f = fixture(authenticator);
        let key = f
            .vault
            .create(EllipticCurveType::R1, false, BioPolicy::None, None)
            .unwrap();

        let err = f.vault.sign(b"msg", key.public_key(), true).await.unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationDenied(reason) if reason == "fingerprint not recognized"));
    }

    #[tokio::test]
    async fn test_new_request_supersedes_pending() {
        let authenticator = Arc::new(GatedAuthenticator::new(AuthOutcome::Approved));
        let f = fixture(authenticator.clone());
        let vault = Arc::new(f.vault);
        let key = vault
            .create(EllipticCurveType::R1, false, BioPolicy::None, None)
            .unwrap();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let first = vault.sign_with_completion(
            b"a".to_vec(),
            key.public_key().to_string(),
            true,
            None,
            move |result| {
                let _ = tx_a.send(result);
            },
        );
        authenticator.wait_started(1).await;
        assert!(vault.has_pending_signing_request());

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let second = vault.sign_with_completion(
            b"b".to_vec(),
            key.public_key().to_string(),
            true,
            Some("Approve transfer".into()),
            move |result| {
                let _ = tx_b.send(result);
            },
        );
        authenticator.wait_started(2).await;
        first.await.unwrap();
        assert_eq!(authenticator.invalidated.load(Ordering::SeqCst), 1);

        authenticator.gate.notify_one();
        second.await.unwrap();

        let signature = rx_b.try_recv().unwrap().unwrap();
        assert_signed_by(&signature, b"b", &key);
        assert!(rx_a.try_recv().is_err());
        assert!(!vault.has_pending_signing_request());
    }

    #[tokio::test]
    async fn test_cancel_pending_request() {
        let authenticator = Arc::new(GatedAuthenticator::new(AuthOutcome::Approved));
        let f = fixture(authenticator.clone());
        let vault = Arc::new(f.vault);
        let key = vault
            .create(EllipticCurveType::R1, false, BioPolicy::None, None)
            .unwrap();
        assert!(!vault.cancel_pending_signing_request());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = vault.sign_with_completion(
            b"msg".to_vec(),
            key.public_key().to_string(),
            true,
            None,
            move |result| {
                let _ = tx.send(result);
            },
        );
        authenticator.wait_started(1).await;

        assert!(vault.cancel_pending_signing_request());
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(authenticator.invalidated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completion_receives_errors() {
        let f = fixture(Arc::new(NoBiometrics));
        let vault = Arc::new(f.vault);
        let (tx, mut rx) = mpsc::unbounded_channel();
        vault
            .sign_with_completion(
                b"msg".to_vec(),
                "PUB_K1_unknown".into(),
                false,
                None,
                move |result| {
                    let _ = tx.send(result);
                },
            )
            .await
            .unwrap();
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[tokio::test]
    async fn test_dropped_request_releases_session() {
        let authenticator = Arc::new(GatedAuthenticator::new(AuthOutcome::Approved));
        let f = fixture(authenticator.clone());
        let vault = Arc::new(f.vault);
        let key = vault
            .create(EllipticCurveType::R1, false, BioPolicy::None, None)
            .unwrap();

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            vault.sign(b"msg", key.public_key(), true),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(authenticator.started.load(Ordering::SeqCst), 1);

        assert!(!vault.has_pending_signing_request());
        assert!(!vault.cancel_pending_signing_request());
        assert_eq!(authenticator.invalidated.load(Ordering::SeqCst), 0);

        // the next request starts fresh instead of superseding a ghost
        let signer = {
            let vault = Arc::clone(&vault);
            let public_key = key.public_key().to_string();
            tokio::spawn(async move { vault.sign(b"msg", &public_key, true).await })
        };
        authenticator.wait_started(2).await;
        assert_eq!(authenticator.invalidated.load(Ordering::SeqCst), 0);

        authenticator.gate.notify_one();
        let signature = signer.await.unwrap().unwrap();
        assert_signed_by(&signature, b"msg", &key);
        assert!(!vault.has_pending_signing_request());
    }

    #[tokio::test]
    async fn test_store_prompt_does_not_block_runtime() {
        let (release, released) = std_mpsc::channel();
        let key_store = Arc::new(PromptingKeyStore {
            inner: MemoryKeyStore::new(""),
            prompted: AtomicBool::new(false),
            release: Mutex::new(released),
        });
        let vault = Arc::new(Vault::new(
            key_store.clone(),
            Arc::new(MemorySecretStore::new()),
            Arc::new(NoBiometrics),
            VaultConfig::default(),
        ));
        let key = vault.create_hardware_key(BioPolicy::Flex, None).unwrap();

        let signer = {
            let vault = Arc::clone(&vault);
            let public_key = key.public_key().to_string();
            tokio::spawn(async move { vault.sign(b"msg", &public_key, false).await })
        };
        while !key_store.prompted.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        // other tasks still run while the store waits on the user
        let other = {
            let vault = Arc::clone(&vault);
            tokio::spawn(async move { vault.has_pending_signing_request() })
        };
        assert!(!other.await.unwrap());
        assert!(!signer.is_finished());

        release.send(()).unwrap();
        let signature = signer.await.unwrap().unwrap();
        assert_signed_by(&signature, b"msg", &key);
    }
}
