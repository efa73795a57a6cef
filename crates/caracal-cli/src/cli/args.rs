use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "caracal", version, about = "Caracal authority service admin CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate an ECDSA-P256 signing keypair
    Keygen(KeygenArgs),
    /// Sign a mandate content file
    Sign(SignArgs),
    /// Verify a signed mandate
    Verify(VerifyArgs),
    /// Policy spec validation and migration
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Rewind and drain a consumer group over the event bus
    Replay(ReplayArgs),
    /// Boot the gateway and its background consumers
    Serve(ServeArgs),
    /// Query and export ledger events
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Print matching events as JSON, CSV, or syslog to stdout
    Export(AuditExportArgs),
    /// Translate metering events into `{agent_id, resource_type, cost}` records
    Metering(AuditMeteringArgs),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum AuditFormat {
    Json,
    Csv,
    Syslog,
}

#[derive(Args, Debug)]
pub struct AuditExportArgs {
    /// Ledger database
    #[arg(long)]
    pub db: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    pub format: AuditFormat,

    /// Only events for this principal
    #[arg(long)]
    pub principal: Option<String>,

    /// Only events for this mandate
    #[arg(long)]
    pub mandate: Option<String>,

    /// Only events of this kind (`mandate_issued`, `mandate_delegated`,
    /// `mandate_revoked`, `authority_decision`, `metering`)
    #[arg(long)]
    pub kind: Option<String>,

    /// Only events sharing this correlation id
    #[arg(long)]
    pub correlation_id: Option<String>,

    /// Most events to return, newest first
    #[arg(long, default_value_t = 1000)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct AuditMeteringArgs {
    /// Ledger database
    #[arg(long)]
    pub db: PathBuf,

    /// Only events for this principal
    #[arg(long)]
    pub principal: Option<String>,

    /// Most events to scan, newest first
    #[arg(long, default_value_t = 1000)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    Validate(PolicyValidateArgs),
    Migrate(PolicyMigrateArgs),
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Output directory for the keypair files
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Overwrite existing key files
    #[arg(long, short)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Mandate content file (JSON, `MandateContent` shape)
    pub content: PathBuf,

    /// Issuer's private key file (PKCS#8 PEM)
    #[arg(long, short)]
    pub key: PathBuf,

    /// Output file for the signed mandate
    #[arg(long, short)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Signed mandate file (JSON)
    pub mandate: PathBuf,

    /// Issuer's public key file (SPKI PEM)
    #[arg(long)]
    pub pubkey: PathBuf,

    /// Suppress human-readable output; only the exit code signals the result
    #[arg(long, short)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct PolicyValidateArgs {
    /// Policy spec file (YAML or JSON)
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct PolicyMigrateArgs {
    /// Legacy v0.1 policy file: one canonical JSON record per line
    pub input: PathBuf,

    /// Policy store database to migrate into
    #[arg(long)]
    pub db: PathBuf,

    /// Who to record as the author of the migrated policies
    #[arg(long, default_value = "migration")]
    pub created_by: String,

    /// Parse and report without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Event bus database
    #[arg(long)]
    pub db: PathBuf,

    /// Consumer group to rewind
    #[arg(long)]
    pub group: String,

    /// Topics to rewind, comma-separated (default: all)
    #[arg(long, value_delimiter = ',')]
    pub topics: Vec<String>,

    /// Offset to rewind to (default: the very start)
    #[arg(long)]
    pub from_offset: Option<i64>,

    /// Drain the rewound range immediately, printing each event and
    /// committing as it goes, instead of only rewinding the bookmark
    #[arg(long)]
    pub drain: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Mandate store database
    #[arg(long)]
    pub mandate_db: PathBuf,

    /// Policy + principal store database
    #[arg(long)]
    pub policy_db: PathBuf,

    /// Event bus database
    #[arg(long)]
    pub bus_db: PathBuf,

    /// Ledger database
    #[arg(long)]
    pub ledger_db: PathBuf,

    /// Trusted issuer public keys, `key_id=path/to/public.pem`, repeatable
    #[arg(long = "trusted-key", value_parser = parse_trusted_key)]
    pub trusted_keys: Vec<(String, PathBuf)>,

    /// Ledger batch signing key (PKCS#8 PEM)
    #[arg(long)]
    pub signing_key: PathBuf,

    /// Ledger batch signer key id, recorded on every signed batch
    #[arg(long)]
    pub signer_key_id: String,

    /// Address to bind the gateway's HTTP surface to
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Outbound forward timeout, in seconds
    #[arg(long, default_value_t = 30)]
    pub forward_timeout_seconds: u64,
}

fn parse_trusted_key(raw: &str) -> Result<(String, PathBuf), String> {
    let (key_id, path) = raw
        .split_once('=')
        .ok_or_else(|| "expected key_id=path/to/public.pem".to_string())?;
    Ok((key_id.to_string(), PathBuf::from(path)))
}
