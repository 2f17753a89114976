use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use confidential_inference_client::model;
use confidential_inference_client::tensor::codec::{decode_tensor_file, encode_tensor_file};
use confidential_inference_client::tensor::json::{tensor_map_from_json, tensor_map_to_json};
use confidential_inference_client::{HttpSession, SessionConfig, TensorMap};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "confonnx", about = "Confidential inference client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run inference on the enclave.
    Predict {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Inputs as a JSON tensor map
        #[arg(long, conflicts_with = "tensor_in")]
        json_in: Option<PathBuf>,

        /// Write outputs as a JSON tensor map (default: stdout)
        #[arg(long)]
        json_out: Option<PathBuf>,

        /// Binary tensor input, NAME=PATH (can be repeated)
        #[arg(long, value_parser = parse_tensor_in)]
        tensor_in: Vec<(String, PathBuf)>,

        /// Write each output as a binary tensor file into this directory
        #[arg(long)]
        tensor_out: Option<PathBuf>,
    },

    /// Send the model decryption key to the enclave.
    ProvisionModelKey {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Model key, hex
        #[arg(long, conflicts_with = "model_key_file", required_unless_present = "model_key_file")]
        model_key: Option<String>,

        /// File holding the hex model key
        #[arg(long)]
        model_key_file: Option<PathBuf>,
    },

    /// Print the SHA-256 of a model file (the enclave's service identifier).
    HashModel { model: PathBuf },

    /// Encrypt a model file, generating the key file if it does not exist.
    EncryptModel {
        model: PathBuf,

        /// Hex key file (created if missing)
        #[arg(long)]
        key: PathBuf,

        /// Encrypted model output path
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Args)]
struct ConnectionArgs {
    /// Server base URL
    #[arg(long, env = "CONFONNX_URL", default_value = "http://localhost:8888")]
    url: String,

    /// Bearer token
    #[arg(long, env = "CONFONNX_AUTH_KEY", conflicts_with = "auth_user")]
    auth_key: Option<String>,

    /// HTTP basic auth user
    #[arg(long, requires = "auth_pass")]
    auth_user: Option<String>,

    /// HTTP basic auth password
    #[arg(long, env = "CONFONNX_AUTH_PASS")]
    auth_pass: Option<String>,

    /// Expected enclave signer, hex
    #[arg(long)]
    enclave_signing_key: Option<String>,

    /// Expected enclave measurement, hex
    #[arg(long)]
    enclave_hash: Option<String>,

    /// Expected model hash, hex
    #[arg(long, conflicts_with = "enclave_model_hash_file")]
    enclave_model_hash: Option<String>,

    /// File holding the expected model hash
    #[arg(long)]
    enclave_model_hash_file: Option<PathBuf>,

    /// Accept enclaves running in debug mode
    #[arg(long)]
    enclave_allow_debug: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

impl ConnectionArgs {
    fn session(&self) -> Result<HttpSession> {
        let mut builder = SessionConfig::builder()
            .url(&self.url)
            .allow_debug(self.enclave_allow_debug)
            .request_timeout(Duration::from_secs(self.timeout_secs));

        if let Some(token) = &self.auth_key {
            builder = builder.bearer_token(token);
        }
        if let Some(user) = &self.auth_user {
            builder = builder.basic_auth(user, self.auth_pass.clone().unwrap_or_default());
        }
        if let Some(signer) = &self.enclave_signing_key {
            builder = builder.expected_signer(signer);
        }
        if let Some(hash) = &self.enclave_hash {
            builder = builder.expected_enclave_hash(hash);
        }
        let model_hash = match (&self.enclave_model_hash, &self.enclave_model_hash_file) {
            (Some(hash), _) => Some(hash.clone()),
            (None, Some(path)) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("reading model hash from {}", path.display()))?,
            ),
            (None, None) => None,
        };
        if let Some(hash) = model_hash {
            builder = builder.expected_model_hash(hash);
        }

        let config = builder.build().context("invalid session configuration")?;
        Ok(HttpSession::from_config(&config)?)
    }
}

fn parse_tensor_in(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got {s:?}")),
    }
}

fn read_inputs(json_in: Option<&Path>, tensor_in: &[(String, PathBuf)]) -> Result<TensorMap> {
    if let Some(path) = json_in {
        let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let value: serde_json::Value =
            serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))?;
        return Ok(tensor_map_from_json(&value)?);
    }

    let mut inputs = TensorMap::new();
    for (name, path) in tensor_in {
        let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let (_, tensor) = decode_tensor_file(Bytes::from(raw))
            .with_context(|| format!("decoding tensor file {}", path.display()))?;
        inputs.insert(name.clone(), tensor);
    }
    if inputs.is_empty() {
        bail!("no inputs given: use --json-in or --tensor-in");
    }
    Ok(inputs)
}

fn write_outputs(
    outputs: &TensorMap,
    json_out: Option<&Path>,
    tensor_out: Option<&Path>,
) -> Result<()> {
    if let Some(dir) = tensor_out {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        for (name, tensor) in outputs {
            let path = dir.join(format!("{name}.tensor"));
            fs::write(&path, encode_tensor_file(name, tensor)?)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }

    let rendered = serde_json::to_string_pretty(&tensor_map_to_json(outputs)?)?;
    match json_out {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?
        }
        None if tensor_out.is_none() => println!("{rendered}"),
        None => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Predict {
            conn,
            json_in,
            json_out,
            tensor_in,
            tensor_out,
        } => {
            let inputs = read_inputs(json_in.as_deref(), &tensor_in)?;
            let session = conn.session()?;
            let outputs = session.predict(&inputs).await?;
            write_outputs(&outputs, json_out.as_deref(), tensor_out.as_deref())?;

            let stats = session.stats();
            tracing::info!(
                rollover_count = stats.key_rollover_count,
                invalid_count = stats.key_invalid_count,
                "prediction complete"
            );
        }
        Command::ProvisionModelKey {
            conn,
            model_key,
            model_key_file,
        } => {
            let key = match (model_key, model_key_file) {
                (Some(hex_key), _) => model::parse_model_key(&hex_key)?,
                (None, Some(path)) => model::read_model_key_file(&path)
                    .with_context(|| format!("reading model key from {}", path.display()))?,
                (None, None) => bail!("--model-key or --model-key-file is required"),
            };
            let session = conn.session()?;
            session.provision_model_key(&key[..]).await?;
            println!("Model key provisioned");
        }
        Command::HashModel { model: path } => {
            let hash = model::hash_model_file(&path)
                .with_context(|| format!("hashing {}", path.display()))?;
            println!("{hash}");
        }
        Command::EncryptModel { model: path, key, out } => {
            let info = model::encrypt_model_file(&path, &out, &key)
                .with_context(|| format!("encrypting {}", path.display()))?;
            if info.key_generated {
                println!("Generated model key: {}", key.display());
            }
            println!("Encrypted model written to {}", out.display());
            println!("Model hash: {}", info.model_hash);
        }
    }
    Ok(())
}
