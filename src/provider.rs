/// Multi-key signing on top of the vault.
///
/// Keys are signed with one after another in the order given; the first
/// failure aborts the whole request and no partial list is returned.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::sha256;
use crate::error::{Result, VaultError};
use crate::signing::RecoverableSignature;
use crate::vault::Vault;

/// A transaction to be signed for one chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSignatureRequest {
    /// Hex chain id.
    pub chain_id: String,
    pub serialized_transaction: Vec<u8>,
    #[serde(default)]
    pub serialized_context_free_data: Vec<u8>,
    /// Signing keys, in the order their signatures must appear.
    pub public_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub signatures: Vec<String>,
    pub serialized_transaction: Vec<u8>,
    pub serialized_context_free_data: Vec<u8>,
}

pub struct VaultSignatureProvider {
    vault: Arc<Vault>,
    require_bio: bool,
}

impl VaultSignatureProvider {
    pub fn new(vault: Arc<Vault>, require_bio: bool) -> Self {
        Self { vault, require_bio }
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    /// Sign `message` with each key in turn. An empty key list yields an
    /// empty result.
    pub async fn sign_all(
        &self,
        message: &[u8],
        public_keys: &[String],
    ) -> Result<Vec<RecoverableSignature>> {
        let mut signatures = Vec::with_capacity(public_keys.len());
        for public_key in public_keys {
            let signature = self
                .vault
                .sign(message, public_key, self.require_bio)
                .await?;
            debug!(public_key = public_key.as_str(), index = signatures.len(), "collected signature");
            signatures.push(signature);
        }
        Ok(signatures)
    }

    pub async fn sign_transaction(
        &self,
        request: &TransactionSignatureRequest,
    ) -> Result<SignedTransaction> {
        if request.public_keys.is_empty() {
            return Err(VaultError::Signing("no public keys in request".into()));
        }
        let message = signing_message(request)?;
        let signatures = self.sign_all(&message, &request.public_keys).await?;
        info!(
            chain_id = request.chain_id.as_str(),
            signatures = signatures.len(),
            "signed transaction"
        );

        Ok(SignedTransaction {
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
            serialized_transaction: request.serialized_transaction.clone(),
            serialized_context_free_data: request.serialized_context_free_data.clone(),
        })
    }

    /// Public-key strings of every key that can still sign.
    pub fn available_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .vault
            .list_all()?
            .into_iter()
            .filter(|k| !k.is_retired())
            .map(|k| k.public_key().to_string())
            .collect())
    }
}

/// `chain id ‖ transaction ‖ sha256(context-free data)`, with 32 zero bytes
/// in place of the hash when there is no context-free data.
pub fn signing_message(request: &TransactionSignatureRequest) -> Result<Vec<u8>> {
    let chain_id = hex::decode(&request.chain_id)
        .map_err(|e| VaultError::Signing(format!("invalid chain id: {e}")))?;
    let context_free_hash = if request.serialized_context_free_data.is_empty() {
        [0u8; 32]
    } else {
        sha256(&request.serialized_context_free_data)
    };

    let mut message =
        Vec::with_capacity(chain_id.len() + request.serialized_transaction.len() + 32);
    message.extend_from_slice(&chain_id);
    message.extend_from_slice(&request.serialized_transaction);
    message.extend_from_slice(&context_free_hash);
    Ok(message)
}
