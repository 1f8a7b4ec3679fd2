use anyhow::{anyhow, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::Level;

mod api;
mod certificate;
mod cli;
mod config;
mod credential;
mod locator;
mod model;
mod pipeline;
mod poller;
mod telemetry;
#[cfg(test)]
mod test_support;
mod workflow;

use api::HttpClient;
use cli::{BuildsArgs, CertificateArgs, Command, RootArgs, SubmitArgs};
use config::Config;
use credential::SigningKey;
use locator::BuildLocator;
use poller::SystemClock;
use workflow::{Mode, ReleaseWorkflow};

fn main() -> ExitCode {
    let args = RootArgs::parse();
    let level = if args.global.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    telemetry::init_tracing(args.global.log_json, level);

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: RootArgs) -> Result<u8> {
    let mut config = config::load_config(args.global.config.as_deref())?;
    if let Some(app_id) = args.global.app_id {
        config.app_id = app_id;
    }

    match args.command {
        Command::Submit(submit) => cmd_submit(config, submit),
        Command::Builds(builds) => cmd_builds(&config, builds).map(|()| 0),
        Command::Groups => cmd_groups(&config).map(|()| 0),
        Command::Certificate(certificate) => cmd_certificate(&config, certificate).map(|()| 0),
    }
}

fn api_client(config: &Config) -> Result<HttpClient<SigningKey>> {
    let key = SigningKey::load(
        &config.issuer_id,
        &config.key_id,
        &config.resolved_key_path(),
    )?;
    Ok(HttpClient::new(
        &config.api_base_url,
        config.request_timeout(),
        key,
    ))
}

fn cmd_submit(mut config: Config, args: SubmitArgs) -> Result<u8> {
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    if let Some(minutes) = args.max_wait_minutes {
        config.max_wait_minutes = minutes;
    }
    config::validate_release_config(&config)?;
    let client = api_client(&config)?;

    let mode = match args.version {
        Some(version) => Mode::Targeted { version },
        None => Mode::Latest {
            limit: config.recent_build_limit,
        },
    };
    println!("{}", "=".repeat(60));
    println!("TESTFLIGHT RELEASE (app {})", config.app_id);
    println!("{}", "=".repeat(60));

    let clock = SystemClock;
    let workflow = ReleaseWorkflow::new(&client, &clock, &config.app_id, config.poll_settings());
    let report = workflow.run(mode)?;
    println!();
    print!("{}", report.render());
    Ok(report.exit_code())
}

fn cmd_builds(config: &Config, args: BuildsArgs) -> Result<()> {
    config::validate_release_config(config)?;
    let client = api_client(config)?;
    let locator = BuildLocator::new(&client, &config.app_id);
    let builds = match &args.version {
        Some(version) => locator.list_builds_by_version(version)?,
        None => locator.list_recent_builds(args.limit.unwrap_or(config.recent_build_limit))?,
    };
    if builds.is_empty() {
        println!("No builds found");
        return Ok(());
    }
    println!("Found {} builds:", builds.len());
    for build in &builds {
        let compliance = match build.uses_non_exempt_encryption {
            Some(value) => format!("usesNonExemptEncryption={value}"),
            None => "compliance not declared".to_string(),
        };
        println!(
            "  - {} {:<8} {:<12} {} uploaded {} [{}]",
            build.version,
            build.platform,
            build.state,
            compliance,
            build.uploaded_date.as_deref().unwrap_or("?"),
            build.id
        );
    }
    Ok(())
}

fn cmd_groups(config: &Config) -> Result<()> {
    config::validate_release_config(config)?;
    let client = api_client(config)?;
    let locator = BuildLocator::new(&client, &config.app_id);
    let groups = locator.list_beta_groups()?;
    if groups.is_empty() {
        println!("No beta groups found");
    }
    for group in &groups {
        let marker = if group.public_link_enabled { "*" } else { " " };
        println!(
            "{marker} {} ({}) publicLink={}",
            group.name, group.id, group.public_link_enabled
        );
    }
    match locator::select_public_group(&groups)? {
        Some(group) => println!("\nThe release workflow will use: {}", group.name),
        None => println!("\nNo public beta group; enable a public link in TestFlight first"),
    }
    Ok(())
}

fn cmd_certificate(config: &Config, args: CertificateArgs) -> Result<()> {
    config::validate_config(config)?;
    let client = api_client(config)?;
    let defaults = &config.certificate;
    let output_dir = match args.output_dir.or_else(|| defaults.output_dir.clone()) {
        Some(dir) => config::expand_home(&dir),
        None => dirs::home_dir()
            .map(|home| home.join(".private_keys"))
            .ok_or_else(|| anyhow!("cannot resolve home directory; pass --output-dir"))?,
    };
    let request = certificate::CertificateRequest {
        certificate_type: args
            .certificate_type
            .unwrap_or_else(|| defaults.certificate_type.clone()),
        email: args.email.or_else(|| defaults.email.clone()),
        common_name: args.common_name.or_else(|| defaults.common_name.clone()),
        country: defaults.country.clone(),
        output_dir,
        install: !args.skip_keychain,
    };
    let tools = certificate::SystemTools::new()?;
    let report = certificate::provision_certificate(&client, &tools, &request)?;

    println!();
    println!(
        "Certificate {} {}",
        report.certificate_id,
        if report.reused { "reused" } else { "created" }
    );
    println!("  file: {}", report.certificate_path.display());
    if let Some(key_path) = &report.key_path {
        println!("  private key: {}", key_path.display());
    }
    match (&report.identity, report.installed) {
        (Some(identity), _) => println!("  identity: {identity}"),
        (None, true) => println!("  identity: not listed yet"),
        (None, false) if report.needs_manual_import => {
            println!("  keychain: import manually in Keychain Access")
        }
        (None, false) => println!("  keychain import skipped"),
    }
    Ok(())
}
