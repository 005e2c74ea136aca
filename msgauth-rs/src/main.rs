//! Command line front-end
//!
//! ```bash
//! # Verify the DKIM signatures of a stored message
//! msgauth verify message.eml --authserv-id mx.example.org
//!
//! # Authenticated lookups
//! msgauth lookup mx example.org
//! msgauth lookup ptr 192.0.2.1
//! msgauth lookup tlsa mail.example.org --service smtp --network tcp
//! ```

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use msgauth_rs::check::authres::format_auth_results;
use msgauth_rs::check::dkim::DkimCheck;
use msgauth_rs::check::Check;
use msgauth_rs::config::Config;
use msgauth_rs::context::Context;
use msgauth_rs::dkim::MailAuthVerifier;
use msgauth_rs::dns::{ClientConfig, ExtResolver};
use msgauth_rs::message::{split_message, MsgMetadata};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "msgauth")]
#[command(about = "DNSSEC-aware lookups and DKIM verification", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "msgauth.toml")]
    config: PathBuf,

    /// Overall deadline in seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify DKIM signatures of a message file
    Verify {
        /// Message file (header block, blank line, body)
        file: PathBuf,
        /// Identifier used in the Authentication-Results header
        #[arg(long, default_value = "localhost")]
        authserv_id: String,
    },
    /// Run an authenticated DNS lookup
    Lookup {
        kind: LookupKind,
        /// Name or address to look up
        subject: String,
        /// TLSA only: service name or port
        #[arg(long, default_value = "smtp")]
        service: String,
        /// TLSA only: tcp, udp or sctp
        #[arg(long, default_value = "tcp")]
        network: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LookupKind {
    Ptr,
    Ip,
    Mx,
    Txt,
    Tlsa,
}

#[derive(Serialize)]
struct Verdict<'a> {
    reject: bool,
    quarantine: bool,
    reason: Option<String>,
    authentication_results: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    };

    msgauth_rs::logging::init(&config.logging)?;
    if !cli.config.exists() {
        info!("No config file found, using defaults");
    }

    let ctx = Context::background().with_timeout(Duration::from_secs(cli.timeout));

    match cli.command {
        Commands::Verify { file, authserv_id } => verify(&ctx, &config, &file, &authserv_id).await,
        Commands::Lookup {
            kind,
            subject,
            service,
            network,
        } => lookup(&ctx, &config, kind, &subject, &service, &network).await,
    }
}

async fn verify(ctx: &Context, config: &Config, file: &Path, authserv_id: &str) -> anyhow::Result<()> {
    let raw = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let (header, body) = split_message(&raw);
    debug!("Parsed {} header fields, {} body bytes", header.len(), body.len());

    let verifier = Arc::new(MailAuthVerifier::new()?);
    let check = DkimCheck::init("verify_dkim", &config.dkim, verifier)?;
    let state = check.check_state_for_msg(MsgMetadata::new(file.display().to_string()));
    let result = state.check_body(ctx, &header, &body).await;

    let auth_results = format_auth_results(authserv_id, &result.auth_result);
    let verdict = Verdict {
        reject: result.reject,
        quarantine: result.quarantine,
        reason: result.reason.as_ref().map(|r| r.to_string()),
        authentication_results: &auth_results,
    };
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    if result.reject {
        std::process::exit(1);
    }
    Ok(())
}

async fn lookup(
    ctx: &Context,
    config: &Config,
    kind: LookupKind,
    subject: &str,
    service: &str,
    network: &str,
) -> anyhow::Result<()> {
    let client = ClientConfig::from_config(&config.dns)?;
    debug!(
        "Using DNS servers {:?}",
        client.server_addrs().collect::<Vec<_>>()
    );
    let resolver = ExtResolver::new(client);

    let output = match kind {
        LookupKind::Ptr => serde_json::to_string_pretty(&resolver.lookup_addr(ctx, subject).await?)?,
        LookupKind::Ip => serde_json::to_string_pretty(&resolver.lookup_ip_addr(ctx, subject).await?)?,
        LookupKind::Mx => serde_json::to_string_pretty(&resolver.lookup_mx(ctx, subject).await?)?,
        LookupKind::Txt => serde_json::to_string_pretty(&resolver.lookup_txt(ctx, subject).await?)?,
        LookupKind::Tlsa => serde_json::to_string_pretty(
            &resolver.lookup_tlsa(ctx, service, network, subject).await?,
        )?,
    };
    println!("{}", output);

    Ok(())
}
