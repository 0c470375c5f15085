//! Certificate bundle issuance.
//!
//! One bundle per crypto config: a self-signed CA plus server and client
//! leaf certificates chained to it. The server leaf carries the loopback
//! names in its SAN so hostname verification against `localhost` succeeds.

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crosswire_wire_protocol::{CertFingerprint, CryptoConfig, EcCurve, KeyAlgorithm};

use crate::error::{CaError, Result};

/// Validity period for session certificates (days). Bundles never outlive a
/// conformance session, so the window only needs to cover clock skew.
const CERT_VALIDITY_DAYS: i64 = 7;

/// A leaf certificate together with its private key.
#[derive(Debug, Clone)]
pub struct CertifiedIdentity {
    pub cert_pem: String,
    pub cert_der: Vec<u8>,
    pub key_pem: String,
    /// PKCS#8 DER encoding of the private key.
    pub key_der: Vec<u8>,
}

impl CertifiedIdentity {
    /// SHA-256 fingerprint of the certificate.
    pub fn fingerprint(&self) -> CertFingerprint {
        CertFingerprint::of_der(&self.cert_der)
    }
}

/// Ephemeral CA plus leaf identities for one crypto config.
///
/// Immutable once issued. The session cache owns the only copy of the
/// private key material; it is never written to disk by this crate.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub config_id: String,
    pub ca_cert_pem: String,
    pub ca_cert_der: Vec<u8>,
    pub server: CertifiedIdentity,
    pub client: CertifiedIdentity,
}

fn compute_validity() -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    // Back-date slightly so a peer with a trailing clock accepts the cert.
    (
        now - time::Duration::hours(1),
        now + time::Duration::days(CERT_VALIDITY_DAYS),
    )
}

fn unsupported(config: &CryptoConfig, err: impl std::fmt::Display) -> CaError {
    CaError::UnsupportedAlgorithm {
        config_id: config.id(),
        detail: err.to_string(),
    }
}

/// Generate a key pair for the given crypto config.
///
/// ECDSA keys come straight from rcgen. RSA keys are generated with the
/// `rsa` crate and imported, since rcgen only signs with existing RSA keys.
fn generate_key(config: &CryptoConfig) -> Result<KeyPair> {
    match config.algorithm {
        KeyAlgorithm::Ecdsa { curve } => {
            let alg = match curve {
                EcCurve::P256 => &rcgen::PKCS_ECDSA_P256_SHA256,
                EcCurve::P384 => &rcgen::PKCS_ECDSA_P384_SHA384,
                EcCurve::P521 => &rcgen::PKCS_ECDSA_P521_SHA512,
            };
            KeyPair::generate_for(alg).map_err(|e| unsupported(config, e))
        }
        KeyAlgorithm::Rsa { bits } => {
            let private_key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), bits as usize)
                .map_err(|e| CaError::KeyGeneration(format!("RSA-{bits} keygen: {e}")))?;
            let key_pem = private_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| CaError::KeyGeneration(format!("RSA PKCS#8 encoding: {e}")))?;
            KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256)
                .map_err(|e| unsupported(config, e))
        }
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.into()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("Crosswire Conformance Harness".into()),
    );
    dn
}

fn loopback_sans() -> Result<Vec<SanType>> {
    let localhost = Ia5String::try_from("localhost".to_string())
        .map_err(|e| CaError::Generation(format!("invalid DNS name: {e}")))?;
    Ok(vec![
        SanType::DnsName(localhost),
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ])
}

/// Issue a complete bundle for one crypto config.
///
/// Fails with [`CaError::UnsupportedAlgorithm`] when the environment cannot
/// generate or sign with the requested primitive.
pub fn issue_bundle(config: &CryptoConfig) -> Result<CertificateBundle> {
    let config_id = config.id();
    tracing::debug!(config = %config_id, "issuing certificate bundle");

    // Self-signed CA
    let ca_key = generate_key(config)?;
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name(&format!("crosswire test CA ({config_id})"));
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let (not_before, not_after) = compute_validity();
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;

    let ca_cert = ca_params
        .self_signed(&ca_key)
        .map_err(|e| CaError::Generation(format!("CA cert for {config_id}: {e}")))?;
    let ca_cert_pem = ca_cert.pem();
    let ca_cert_der = ca_cert.der().as_ref().to_vec();

    let server = issue_leaf(config, &ca_cert_pem, &ca_key, "crosswire server", LeafRole::Server)?;
    let client = issue_leaf(config, &ca_cert_pem, &ca_key, "crosswire client", LeafRole::Client)?;

    tracing::debug!(
        config = %config_id,
        server_fingerprint = %server.fingerprint(),
        "certificate bundle issued"
    );

    Ok(CertificateBundle {
        config_id,
        ca_cert_pem,
        ca_cert_der,
        server,
        client,
    })
}

enum LeafRole {
    Server,
    Client,
}

fn issue_leaf(
    config: &CryptoConfig,
    ca_cert_pem: &str,
    ca_key: &KeyPair,
    common_name: &str,
    role: LeafRole,
) -> Result<CertifiedIdentity> {
    let key = generate_key(config)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = match role {
        LeafRole::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
        // Client leafs keep ServerAuth too so one bundle can drive either
        // direction of a cross-runtime pairing.
        LeafRole::Client => vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ],
    };
    params.subject_alt_names = loopback_sans()?;
    let (not_before, not_after) = compute_validity();
    params.not_before = not_before;
    params.not_after = not_after;

    let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
        .map_err(|e| CaError::Parse(format!("CA issuer: {e}")))?;
    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| CaError::Generation(format!("{common_name} cert: {e}")))?;

    Ok(CertifiedIdentity {
        cert_pem: cert.pem(),
        cert_der: cert.der().as_ref().to_vec(),
        key_pem: key.serialize_pem(),
        key_der: key.serialize_der(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn parse_cert(der: &[u8]) -> X509Certificate<'_> {
        X509Certificate::from_der(der).unwrap().1
    }

    #[test]
    fn ec_bundle_chains_to_one_ca() {
        let bundle = issue_bundle(&CryptoConfig::EC_P256).unwrap();
        let ca = parse_cert(&bundle.ca_cert_der);
        let server = parse_cert(&bundle.server.cert_der);
        let client = parse_cert(&bundle.client.cert_der);

        assert!(ca.is_ca());
        assert_eq!(server.issuer(), ca.subject());
        assert_eq!(client.issuer(), ca.subject());
        assert_ne!(bundle.server.fingerprint(), bundle.client.fingerprint());
    }

    #[test]
    fn server_leaf_covers_loopback() {
        let bundle = issue_bundle(&CryptoConfig::EC_P384).unwrap();
        let server = parse_cert(&bundle.server.cert_der);
        let san = server
            .subject_alternative_name()
            .unwrap()
            .expect("server cert has a SAN extension");
        let has_localhost = san.value.general_names.iter().any(
            |name| matches!(name, GeneralName::DNSName(dns) if *dns == "localhost"),
        );
        assert!(has_localhost, "SAN must include localhost");
    }

    #[test]
    fn rsa_bundle_uses_rsa_keys() {
        let bundle = issue_bundle(&CryptoConfig::RSA_2048).unwrap();
        assert!(bundle.server.key_pem.contains("PRIVATE KEY"));
        let server = parse_cert(&bundle.server.cert_der);
        // 1.2.840.113549.1.1.1 = rsaEncryption
        assert_eq!(
            server.public_key().algorithm.algorithm.to_id_string(),
            "1.2.840.113549.1.1.1"
        );
    }
}
