use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eosio_vault::auth::AlwaysApprove;
use eosio_vault::crypto::sha256;
use eosio_vault::curve::{math, recovery};
use eosio_vault::store::memory::{MemoryKeyStore, MemorySecretStore};
use eosio_vault::{
    BioPolicy, EllipticCurveType, EosioCodec, KeyCodec, Metadata, Result, Vault, VaultConfig,
    VaultError, VaultSignatureProvider,
};

#[derive(Parser)]
#[command(name = "eosio-vault")]
#[command(about = "EOSIO key vault for R1 and K1 keys")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Access group for keys created by this process
    #[arg(long, env = "EOSIO_VAULT_ACCESS_GROUP", default_value = "")]
    access_group: String,

    /// Biometric prompt shown when signing
    #[arg(long, env = "EOSIO_VAULT_PROMPT")]
    prompt: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress an uncompressed SEC1 public key (hex)
    Compress { public_key: String },
    /// Decompress a compressed SEC1 public key (hex)
    Decompress {
        public_key: String,
        #[arg(long, default_value = "R1")]
        curve: EllipticCurveType,
    },
    /// Find the recovery id of a DER signature
    RecoverId {
        /// DER signature (hex)
        #[arg(long)]
        signature: String,
        /// Signed message; hashed with SHA-256
        #[arg(long)]
        message: String,
        /// Signer's public key (hex, compressed or uncompressed)
        #[arg(long)]
        public_key: String,
        #[arg(long, default_value = "R1")]
        curve: EllipticCurveType,
    },
    /// Decode a wire-format key or signature
    Inspect { value: String },
    /// Create keys in memory, sign with them and list the registry
    Demo {
        #[arg(long, default_value = "hello eosio")]
        message: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x")).map_err(|e| VaultError::InvalidKey(e.to_string()))
}

fn compress(public_key: &str) -> Result<()> {
    let compressed = math::compress(&decode_hex(public_key)?)
        .ok_or_else(|| VaultError::InvalidKey("expected a 65-byte uncompressed key".into()))?;
    println!("{}", hex::encode(compressed));
    Ok(())
}

fn decompress(public_key: &str, curve: EllipticCurveType) -> Result<()> {
    let uncompressed = math::decompress(&decode_hex(public_key)?, curve)?;
    println!("{}", hex::encode(uncompressed));
    Ok(())
}

fn recover_id(
    signature: &str,
    message: &str,
    public_key: &str,
    curve: EllipticCurveType,
) -> Result<()> {
    let target = math::decompress(&decode_hex(public_key)?, curve)?;
    let digest = sha256(message.as_bytes());
    let recid = recovery::find_recovery_id(&decode_hex(signature)?, &digest, &target, curve)?;
    println!("{recid}");
    Ok(())
}

fn inspect(value: &str) -> Result<()> {
    let codec = EosioCodec;

    let report = if let Ok((curve, compressed)) = codec.decode_public_key(value) {
        json!({
            "type": "public_key",
            "curve": curve,
            "public_key": codec.encode_public_key(&compressed, curve)?,
            "compressed": hex::encode(compressed),
            "uncompressed": hex::encode(math::decompress(&compressed, curve)?),
        })
    } else if let Ok((curve, bytes)) = codec.decode_signature(value) {
        json!({
            "type": "signature",
            "curve": curve,
            "recovery_id": bytes[0].wrapping_sub(31),
            "r": hex::encode(&bytes[1..33]),
            "s": hex::encode(&bytes[33..]),
        })
    } else {
        let (curve, scalar) = codec.decode_private_key(value)?;
        let uncompressed = math::public_key_from_scalar(scalar.as_bytes(), curve)?;
        let compressed = math::compress(&uncompressed)
            .ok_or_else(|| VaultError::InvalidKey("cannot compress derived key".into()))?;
        json!({
            "type": "private_key",
            "curve": curve,
            "public_key": codec.encode_public_key(&compressed, curve)?,
        })
    };

    let pretty = serde_json::to_string_pretty(&report)
        .map_err(|e| VaultError::Serialization(e.to_string()))?;
    println!("{pretty}");
    Ok(())
}

async fn demo(config: VaultConfig, message: &str) -> Result<()> {
    let vault = Arc::new(Vault::new(
        Arc::new(MemoryKeyStore::new(config.access_group.clone())),
        Arc::new(MemorySecretStore::new()),
        Arc::new(AlwaysApprove),
        config,
    ));
    let mut events = vault.subscribe();

    let identifier = vault.vault_identifier()?;
    info!(identifier = identifier.as_str(), "vault ready");

    let mut metadata = Metadata::new();
    metadata.insert("name".into(), "device key".into());
    let r1 = vault.create_hardware_key(BioPolicy::None, Some(metadata))?;
    let k1 = vault.create(EllipticCurveType::K1, false, BioPolicy::None, None)?;

    let provider = VaultSignatureProvider::new(Arc::clone(&vault), true);
    let public_keys = vec![r1.public_key().to_string(), k1.public_key().to_string()];
    for (public_key, signature) in public_keys
        .iter()
        .zip(provider.sign_all(message.as_bytes(), &public_keys).await?)
    {
        println!("{public_key}  {signature}");
    }

    vault.delete(k1.public_key())?;
    for key in vault.list_all()? {
        println!(
            "{} curve={} hardware={} retired={} metadata={}",
            key.public_key(),
            key.curve(),
            key.is_hardware_backed(),
            key.is_retired(),
            serde_json::Value::Object(key.metadata.clone()),
        );
    }

    while let Ok(event) = events.try_recv() {
        info!(public_key = event.public_key.as_str(), action = %event.action, "vault event");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut config = VaultConfig::new(cli.access_group);
    if let Some(prompt) = cli.prompt {
        config.default_prompt = prompt;
    }

    let result = match cli.command {
        Commands::Compress { public_key } => compress(&public_key),
        Commands::Decompress { public_key, curve } => decompress(&public_key, curve),
        Commands::RecoverId {
            signature,
            message,
            public_key,
            curve,
        } => recover_id(&signature, &message, &public_key, curve),
        Commands::Inspect { value } => inspect(&value),
        Commands::Demo { message } => demo(config, &message).await,
    };

    if let Err(e) = result {
        error!(kind = ?e.kind(), "{e}");
        std::process::exit(1);
    }
}
