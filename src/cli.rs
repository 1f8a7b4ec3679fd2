//! CLI argument parsing for the TestFlight release helper.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "tfpilot",
    version,
    about = "Carry uploaded builds through TestFlight processing, compliance, and beta review",
    after_help = "Commands:\n  submit [VERSION]   Wait for VERSION (or take the latest VALID builds) and submit to the public group\n  builds             List recent builds and their processing state\n  groups             List beta groups and the public one the workflow uses\n  certificate        Provision a signing certificate and install it in the keychain\n\nExamples:\n  tfpilot submit 1.2.3\n  tfpilot submit --max-wait-minutes 45 1.2.3\n  tfpilot submit\n  tfpilot builds --limit 20\n  tfpilot certificate --email dev@example.com --common-name \"Example Dev\"",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Config file (defaults to $TFPILOT_CONFIG or <config dir>/tfpilot/config.json)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// App Store Connect app id (overrides config and ASC_APP_ID)
    #[arg(long, value_name = "ID", global = true)]
    pub app_id: Option<String>,

    /// Emit debug diagnostics on stderr
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Emit diagnostics as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Submit(SubmitArgs),
    Builds(BuildsArgs),
    Groups,
    Certificate(CertificateArgs),
}

/// Release workflow inputs.
#[derive(Parser, Debug)]
#[command(about = "Submit builds to the public TestFlight group and beta review")]
pub struct SubmitArgs {
    /// Build version to wait for; omit to submit the latest VALID builds
    #[arg(value_name = "VERSION")]
    pub version: Option<String>,

    /// Seconds between processing checks
    #[arg(long, value_name = "SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Give up waiting for processing after this many minutes
    #[arg(long, value_name = "MINUTES")]
    pub max_wait_minutes: Option<u64>,
}

#[derive(Parser, Debug)]
#[command(about = "List builds with platform, processing state, and compliance")]
pub struct BuildsArgs {
    /// Number of recent builds to list
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Only builds with this version
    #[arg(long, value_name = "VERSION", conflicts_with = "limit")]
    pub version: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Provision a signing certificate and install it into the login keychain")]
pub struct CertificateArgs {
    /// Certificate type, e.g. DEVELOPER_ID_APPLICATION
    #[arg(long = "type", value_name = "TYPE")]
    pub certificate_type: Option<String>,

    /// Email address for a new certificate signing request
    #[arg(long, value_name = "EMAIL")]
    pub email: Option<String>,

    /// Common name for a new certificate signing request
    #[arg(long, value_name = "NAME")]
    pub common_name: Option<String>,

    /// Directory for the private key and certificate (default ~/.private_keys)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Write the certificate without importing it into the keychain
    #[arg(long)]
    pub skip_keychain: bool,
}
