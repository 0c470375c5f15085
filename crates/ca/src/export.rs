//! Exporting a bundle to disk for a spawned server process.
//!
//! The launcher owns the CA session; a server it spawns has no way to reach
//! into that session's memory. In auto mode the launcher writes the bundle
//! into the cell's working directory and points the server at it through
//! `CROSSWIRE_AUTO_TLS_DIR`, so both ends chain to the same CA.
//!
//! Like the session cache itself, exported material is conformance-only and
//! lives in a per-cell temporary directory.

use std::path::{Path, PathBuf};

use crate::error::{CaError, Result};
use crate::issuer::CertificateBundle;

pub const CA_CERT_FILE: &str = "ca.pem";
pub const SERVER_CERT_FILE: &str = "server.pem";
pub const SERVER_KEY_FILE: &str = "server.key";
pub const CLIENT_CERT_FILE: &str = "client.pem";
pub const CLIENT_KEY_FILE: &str = "client.key";

/// Paths of an exported bundle.
#[derive(Debug, Clone)]
pub struct ExportedBundle {
    pub dir: PathBuf,
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

/// Write a bundle's PEM material into `dir`.
pub fn write_bundle_files(bundle: &CertificateBundle, dir: &Path) -> Result<ExportedBundle> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CaError::Generation(format!("creating export dir: {e}")))?;

    let write = |name: &str, contents: &str| -> Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, contents)
            .map_err(|e| CaError::Generation(format!("writing {}: {e}", path.display())))?;
        Ok(path)
    };

    Ok(ExportedBundle {
        dir: dir.to_path_buf(),
        ca_cert: write(CA_CERT_FILE, &bundle.ca_cert_pem)?,
        server_cert: write(SERVER_CERT_FILE, &bundle.server.cert_pem)?,
        server_key: write(SERVER_KEY_FILE, &bundle.server.key_pem)?,
        client_cert: write(CLIENT_CERT_FILE, &bundle.client.cert_pem)?,
        client_key: write(CLIENT_KEY_FILE, &bundle.client.key_pem)?,
    })
}
