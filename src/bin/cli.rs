//! KVD CLI Client
//!
//! Command-line interface for talking to a KVD service.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kvd_client::{ClientConfig, KvdClient, KvdError, Payload, Reply, SigType};
use tracing_subscriber::{fmt, EnvFilter};

/// KVD CLI
#[derive(Parser, Debug)]
#[command(name = "kvd-cli")]
#[command(about = "CLI for the KVD key-value service")]
#[command(version)]
struct Args {
    /// Service host name or address [default: 127.0.0.1 without --config]
    #[arg(short, long)]
    remote: Option<String>,

    /// Service UDP port [default: 1080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Initial retry timeout in milliseconds (get uses a quarter of it)
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Transmissions per request before giving up
    #[arg(long)]
    retries: Option<u32>,

    /// JSON config file; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,

        /// Bucket to look the key up in
        #[arg(short, long)]
        bucket: Option<String>,
    },

    /// Create a value; prints the key the service assigned
    Create {
        /// Value to store (parsed as JSON when it starts with '{')
        payload: String,
    },

    /// Update the value of a key
    Update {
        /// The key to update
        key: String,

        /// New value (parsed as JSON when it starts with '{')
        payload: String,
    },

    /// Delete a key
    #[command(visible_alias = "delete")]
    Del {
        /// The key to delete
        key: String,
    },

    /// Ask the service to verify a signature
    Checksig {
        /// hmac-sha1, hmac-sha256, rsa-sha1 or rsa-sha256
        #[arg(long)]
        sig_type: SigType,

        /// Identity that produced the signature
        #[arg(long)]
        subject: String,

        /// File holding the raw signature bytes
        #[arg(long)]
        signature_file: PathBuf,

        /// File holding the signed data
        #[arg(long)]
        data_file: PathBuf,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvd_client=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> kvd_client::Result<()> {
    let config = build_config(&args)?;
    tracing::debug!(
        "kvd-cli v{} talking to {}:{}",
        kvd_client::VERSION,
        config.remote_address,
        config.remote_port
    );

    let client = KvdClient::connect(config)?;
    let call = match args.command {
        Commands::Get { key, bucket } => match bucket {
            Some(bucket) => client.get_in_bucket(&key, bucket)?,
            None => client.get(&key)?,
        },
        Commands::Create { payload } => client.create(parse_payload(&payload)?)?,
        Commands::Update { key, payload } => client.update(&key, parse_payload(&payload)?)?,
        Commands::Del { key } => client.delete(&key)?,
        Commands::Checksig {
            sig_type,
            subject,
            signature_file,
            data_file,
        } => {
            let signature = std::fs::read(&signature_file)?;
            let data = std::fs::read(&data_file)?;
            client.check_signature(sig_type, &subject, signature, data)?
        }
    };

    let reply = call.wait()?;
    print_reply(&reply);
    client.close();
    Ok(())
}

/// Default service host when neither a flag nor a config file names one
const DEFAULT_REMOTE: &str = "127.0.0.1";

fn build_config(args: &Args) -> kvd_client::Result<ClientConfig> {
    let file = match &args.config {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    resolve_config(args, file.as_deref())
}

/// Layer command-line flags over the config file (or the defaults), then validate once
fn resolve_config(args: &Args, file: Option<&str>) -> kvd_client::Result<ClientConfig> {
    let mut config = match file {
        Some(json) => serde_json::from_str::<ClientConfig>(json)
            .map_err(|e| KvdError::Config(format!("invalid config document: {}", e)))?,
        None => ClientConfig {
            remote_address: DEFAULT_REMOTE.to_string(),
            ..ClientConfig::default()
        },
    };
    if let Some(remote) = &args.remote {
        config.remote_address = remote.clone();
    }
    if let Some(port) = args.port {
        config.remote_port = port;
    }
    if let Some(ms) = args.timeout_ms {
        config.default_timeout_ms = ms;
        config.get_timeout_ms = (ms / 4).max(1);
        config.max_backoff_ms = config.max_backoff_ms.max(ms);
    }
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    config.validate()?;
    Ok(config)
}

fn parse_payload(raw: &str) -> kvd_client::Result<Payload> {
    if raw.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| KvdError::Encoding(format!("invalid JSON value: {}", e)))?;
        Ok(Payload::Json(value))
    } else {
        Ok(Payload::Text(raw.to_string()))
    }
}

fn print_reply(reply: &Reply) {
    match &reply.payload {
        Some(Payload::Text(text)) => println!("{}: {}", reply.kind, text),
        Some(Payload::Json(value)) => println!("{}: {}", reply.kind, value),
        Some(Payload::Bytes(bytes)) => println!("{}: {:02x?}", reply.kind, bytes.as_ref()),
        Some(Payload::CheckSig(record)) => println!("{}: {:?}", reply.kind, record),
        None => println!("{}", reply.kind),
    }
}
