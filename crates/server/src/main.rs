use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::info;

use crosswire_server::{check_cookie, KvProbeServer, ListenSpec, ManualTlsPaths, ServerError};
use crosswire_wire_protocol::{
    CryptoConfig, HandshakeConfig, TlsMode, AUTO_TLS_DIR_ENV, STORAGE_ROOT_ENV, TLS_CURVE_ENV,
    TLS_KEY_TYPE_ENV, TLS_MODE_ENV, TLS_RSA_BITS_ENV,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for the handshake line.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install crypto provider"))?;

    let app = Command::new("crosswire-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Crosswire KV probe server - handshake-launched conformance plugin")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("TCP port to bind (0 for an ephemeral port)")
                .default_value("0"),
        )
        .arg(
            Arg::new("socket")
                .long("socket")
                .value_name("PATH")
                .help("Serve on a Unix socket at PATH instead of TCP"),
        )
        .arg(
            Arg::new("tls-mode")
                .long("tls-mode")
                .value_name("MODE")
                .help("TLS mode: disabled, auto, or manual"),
        )
        .arg(
            Arg::new("tls-key-type")
                .long("tls-key-type")
                .value_name("TYPE")
                .help("Key type for auto TLS: rsa or ec"),
        )
        .arg(
            Arg::new("tls-curve")
                .long("tls-curve")
                .value_name("CURVE")
                .help("Named curve for EC keys (secp256r1, secp384r1, secp521r1)"),
        )
        .arg(
            Arg::new("tls-rsa-bits")
                .long("tls-rsa-bits")
                .value_name("BITS")
                .help("Modulus size for RSA keys (2048 or 4096)"),
        )
        .arg(
            Arg::new("tls-cert")
                .long("tls-cert")
                .value_name("FILE")
                .help("Server certificate PEM (manual mode)"),
        )
        .arg(
            Arg::new("tls-key")
                .long("tls-key")
                .value_name("FILE")
                .help("Server private key PEM (manual mode)"),
        )
        .arg(
            Arg::new("tls-ca")
                .long("tls-ca")
                .value_name("FILE")
                .help("CA certificate PEM for client verification (manual mode)"),
        )
        .arg(
            Arg::new("storage-root")
                .long("storage-root")
                .value_name("DIRECTORY")
                .help("KV storage directory")
                .default_value("./crosswire-kv-data"),
        )
        .arg(
            Arg::new("no-enrichment")
                .long("no-enrichment")
                .help("Disable metadata enrichment of structured payloads")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cookie-key")
                .long("cookie-key")
                .value_name("NAME")
                .help("Name of the launch cookie environment variable"),
        )
        .arg(
            Arg::new("cookie-value")
                .long("cookie-value")
                .value_name("VALUE")
                .help("Expected launch cookie value"),
        );

    let matches = app.get_matches();

    let mut handshake = HandshakeConfig::default();
    if let Some(key) = matches.get_one::<String>("cookie-key") {
        handshake.cookie_key = key.clone();
    }
    if let Some(value) = matches.get_one::<String>("cookie-value") {
        handshake.cookie_value = value.clone();
    }

    // Validate the cookie before touching anything else. On mismatch we must
    // exit non-zero without writing a single byte to stdout.
    if let Err(e) = check_cookie(&handshake) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let listen = match matches.get_one::<String>("socket") {
        Some(path) => ListenSpec::LocalSocket {
            path: PathBuf::from(path),
        },
        None => {
            let port: u16 = matches
                .get_one::<String>("port")
                .map(String::as_str)
                .unwrap_or("0")
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid port: {e}"))?;
            ListenSpec::Tcp { port }
        }
    };

    let tls_mode = flag_or_env(&matches, "tls-mode", TLS_MODE_ENV)
        .map(|mode| mode.parse::<TlsMode>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?
        .unwrap_or(TlsMode::Disabled);

    let key_type = flag_or_env(&matches, "tls-key-type", TLS_KEY_TYPE_ENV)
        .unwrap_or_else(|| "ec".to_string());
    let curve = flag_or_env(&matches, "tls-curve", TLS_CURVE_ENV);
    let rsa_bits = flag_or_env(&matches, "tls-rsa-bits", TLS_RSA_BITS_ENV)
        .map(|bits| bits.parse::<u32>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid RSA bits: {e}"))?;
    let crypto = CryptoConfig::from_selectors(&key_type, rsa_bits, curve.as_deref())?;

    let manual_tls = match (
        matches.get_one::<String>("tls-cert"),
        matches.get_one::<String>("tls-key"),
    ) {
        (Some(cert), Some(key)) => Some(ManualTlsPaths {
            cert: PathBuf::from(cert),
            key: PathBuf::from(key),
            ca: matches.get_one::<String>("tls-ca").map(PathBuf::from),
        }),
        (None, None) => None,
        _ => {
            return Err(anyhow::anyhow!(
                "manual TLS requires both --tls-cert and --tls-key"
            ))
        }
    };

    let storage_root = std::env::var(STORAGE_ROOT_ENV)
        .ok()
        .or_else(|| matches.get_one::<String>("storage-root").cloned())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./crosswire-kv-data"));

    let auto_tls_dir = std::env::var(AUTO_TLS_DIR_ENV).ok().map(PathBuf::from);

    let server = KvProbeServer {
        handshake,
        listen,
        tls_mode,
        crypto,
        manual_tls,
        auto_tls_dir,
        storage_root: storage_root.clone(),
        enrichment_enabled: !matches.get_flag("no-enrichment"),
    };

    info!(storage_root = %storage_root.display(), tls_mode = %tls_mode, crypto = %crypto, "starting crosswire server");

    if let Err(e) = server.run().await {
        // Cookie failures were already handled above; anything here is a
        // configuration or runtime failure.
        eprintln!("{e}");
        let code = match e {
            ServerError::CookieValidation { .. } => 1,
            _ => 2,
        };
        std::process::exit(code);
    }

    Ok(())
}

fn flag_or_env(matches: &clap::ArgMatches, flag: &str, env: &str) -> Option<String> {
    matches
        .get_one::<String>(flag)
        .cloned()
        .or_else(|| std::env::var(env).ok())
}
