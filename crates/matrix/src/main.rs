use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::time::Duration;
use tracing::info;

use crosswire_matrix::{
    validate, MatrixConfig, MatrixRunner, RuntimeSpec,
};
use crosswire_wire_protocol::{CryptoConfig, TlsMode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install crypto provider"))?;

    let app = Command::new("crosswire-matrix")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Cross-runtime conformance matrix for the crosswire KV probe protocol")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run the conformance matrix")
                .arg(
                    Arg::new("server-cmd")
                        .long("server-cmd")
                        .value_name("COMMAND")
                        .help("Native server harness command")
                        .default_value("crosswire-server"),
                )
                .arg(
                    Arg::new("runtime")
                        .long("runtime")
                        .value_name("NAME=COMMAND")
                        .help("Additional server runtime under test (repeatable)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("client-runtime")
                        .long("client-runtime")
                        .value_name("NAME=COMMAND")
                        .help("External client harness under test (repeatable)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("crypto")
                        .long("crypto")
                        .value_name("ID")
                        .help("Crypto config to exercise, e.g. ec-p256 (repeatable; default: all)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("tls-mode")
                        .long("tls-mode")
                        .value_name("MODE")
                        .help("Channel mode for every cell")
                        .default_value("auto"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .value_name("N")
                        .help("Concurrent cells")
                        .default_value("4"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Attempt cells the validator marks unsupported")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("startup-timeout")
                        .long("startup-timeout")
                        .value_name("SECS")
                        .help("Per-server handshake timeout")
                        .default_value("10"),
                )
                .arg(
                    Arg::new("suite-timeout")
                        .long("suite-timeout")
                        .value_name("SECS")
                        .help("Whole-suite budget")
                        .default_value("600"),
                ),
        )
        .subcommand(
            Command::new("validate-connection")
                .about("Pre-flight check of one runtime pairing")
                .arg(
                    Arg::new("client")
                        .long("client")
                        .value_name("RUNTIME")
                        .required(true),
                )
                .arg(
                    Arg::new("server")
                        .long("server")
                        .value_name("RUNTIME")
                        .required(true),
                )
                .arg(
                    Arg::new("crypto")
                        .long("crypto")
                        .value_name("ID")
                        .help("Crypto config id")
                        .default_value("ec-p256"),
                ),
        );

    match app.get_matches().subcommand() {
        Some(("run", matches)) => run_matrix(matches).await,
        Some(("validate-connection", matches)) => validate_connection(matches),
        _ => unreachable!("subcommand required"),
    }
}

async fn run_matrix(matches: &clap::ArgMatches) -> Result<()> {
    let server_cmd = shell_words(matches.get_one::<String>("server-cmd").expect("defaulted"));

    let mut servers = vec![RuntimeSpec::native(server_cmd.clone())];
    for spec in matches.get_many::<String>("runtime").into_iter().flatten() {
        let (name, command) = parse_runtime_spec(spec)?;
        servers.push(RuntimeSpec {
            name,
            server_command: command,
            client_command: None,
        });
    }

    let mut clients = vec![RuntimeSpec::native(server_cmd)];
    for spec in matches
        .get_many::<String>("client-runtime")
        .into_iter()
        .flatten()
    {
        let (name, command) = parse_runtime_spec(spec)?;
        clients.push(RuntimeSpec {
            name,
            server_command: Vec::new(),
            client_command: Some(command),
        });
    }

    let cryptos = match matches.get_many::<String>("crypto") {
        Some(ids) => ids
            .map(|id| id.parse::<CryptoConfig>())
            .collect::<Result<Vec<_>, _>>()?,
        None => CryptoConfig::all().to_vec(),
    };

    let mut config = MatrixConfig::new(clients, servers);
    config.cryptos = cryptos;
    config.tls_mode = matches
        .get_one::<String>("tls-mode")
        .expect("defaulted")
        .parse::<TlsMode>()
        .map_err(|e| anyhow::anyhow!(e))?;
    config.workers = matches
        .get_one::<String>("workers")
        .expect("defaulted")
        .parse()?;
    config.force = matches.get_flag("force");
    config.startup_timeout = Duration::from_secs(
        matches
            .get_one::<String>("startup-timeout")
            .expect("defaulted")
            .parse()?,
    );
    config.suite_timeout = Duration::from_secs(
        matches
            .get_one::<String>("suite-timeout")
            .expect("defaulted")
            .parse()?,
    );

    info!(
        servers = config.servers.len(),
        clients = config.clients.len(),
        cryptos = config.cryptos.len(),
        "configured matrix"
    );

    let report = MatrixRunner::new(config).run().await;
    print!("{}", report.render());

    if report.any_failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_connection(matches: &clap::ArgMatches) -> Result<()> {
    let client = matches.get_one::<String>("client").expect("required");
    let server = matches.get_one::<String>("server").expect("required");
    let crypto: CryptoConfig = matches
        .get_one::<String>("crypto")
        .expect("defaulted")
        .parse()?;

    let validation = validate(client, server, &crypto);
    if validation.supported {
        println!("supported: {client} -> {server} [{crypto}]");
        if let Some(reason) = validation.reason {
            println!("  {reason}");
        }
        Ok(())
    } else {
        println!("unsupported: {client} -> {server} [{crypto}]");
        if let Some(reason) = validation.reason {
            println!("  reason: {reason}");
        }
        if !validation.suggested_alternatives.is_empty() {
            println!(
                "  alternatives: {}",
                validation.suggested_alternatives.join(", ")
            );
        }
        std::process::exit(1);
    }
}

/// Split a `name=command with args` runtime definition.
fn parse_runtime_spec(spec: &str) -> Result<(String, Vec<String>)> {
    let (name, command) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("runtime spec must be NAME=COMMAND: {spec}"))?;
    let command = shell_words(command);
    if command.is_empty() {
        return Err(anyhow::anyhow!("empty command in runtime spec: {spec}"));
    }
    Ok((name.to_string(), command))
}

/// Whitespace splitting; quoting is intentionally out of scope for harness
/// command lines.
fn shell_words(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}
