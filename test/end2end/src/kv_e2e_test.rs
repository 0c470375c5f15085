//! End-to-end KV probe tests over real channels.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use serial_test::serial;

use crate::infra::TestInfrastructure;
use crosswire_client::{ClientError, Establisher, HandshakePhase, TlsChannelConfig};
use crosswire_wire_protocol::{CryptoConfig, KvError, TlsMode, METADATA_FIELD};

#[tokio::test]
#[serial]
async fn plaintext_channel_round_trip() -> Result<()> {
    let infra =
        TestInfrastructure::setup(TlsMode::Disabled, CryptoConfig::EC_P256, false).await?;
    let kv = infra.connect().await?;

    let health = kv.health_check().await?;
    assert_eq!(health.status, "healthy");

    kv.put("greeting", b"hello".to_vec()).await?;
    assert_eq!(kv.get_required("greeting").await?, b"hello");

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn auto_mtls_put_get_on_p256() -> Result<()> {
    let infra = TestInfrastructure::setup(TlsMode::Auto, CryptoConfig::EC_P256, false).await?;
    // The handshake line advertises a certificate in auto mode.
    assert!(!infra.handshake.cert_b64.is_empty());

    let kv = infra.connect().await?;
    kv.put("greeting", b"hello".to_vec()).await?;
    assert_eq!(kv.get_required("greeting").await?, b"hello");

    kv.delete("greeting").await?;
    assert_eq!(kv.get("greeting").await?, None);

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn auto_mtls_put_get_on_rsa_2048() -> Result<()> {
    let infra = TestInfrastructure::setup(TlsMode::Auto, CryptoConfig::RSA_2048, false).await?;
    let kv = infra.connect().await?;
    kv.put("rsa-key", b"rsa value".to_vec()).await?;
    assert_eq!(kv.get_required("rsa-key").await?, b"rsa value");
    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn manual_tls_round_trip() -> Result<()> {
    let infra = TestInfrastructure::setup(TlsMode::Manual, CryptoConfig::EC_P384, false).await?;
    // Manual mode advertises no certificate in the handshake line.
    assert!(infra.handshake.cert_b64.is_empty());

    let kv = infra.connect().await?;
    kv.put("manual", b"mode".to_vec()).await?;
    assert_eq!(kv.get_required("manual").await?, b"mode");
    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn enrichment_attaches_metadata_superset() -> Result<()> {
    let infra = TestInfrastructure::setup(TlsMode::Auto, CryptoConfig::EC_P256, true).await?;
    let kv = infra.connect().await?;

    kv.put("structured", br#"{"name":"probe","count":3}"#.to_vec())
        .await?;
    let stored = kv.get_required("structured").await?;
    let value: Value = serde_json::from_slice(&stored)?;

    // Strict superset: original fields survive.
    assert_eq!(value["name"], "probe");
    assert_eq!(value["count"], 3);

    // Plus channel metadata, including the serving certificate fingerprint.
    let meta = value[METADATA_FIELD]
        .as_object()
        .expect("metadata object attached");
    assert_eq!(meta["tls_mode"], "auto");
    assert_eq!(meta["crypto_config"], "ec-p256");
    let expected_fp = infra
        .handshake
        .server_cert_fingerprint()
        .expect("advertised fingerprint")
        .to_string();
    assert_eq!(meta["cert_fingerprint"], expected_fp.as_str());

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn opaque_payloads_stay_byte_exact_even_with_enrichment() -> Result<()> {
    let infra = TestInfrastructure::setup(TlsMode::Auto, CryptoConfig::EC_P256, true).await?;
    let kv = infra.connect().await?;

    let binary: Vec<u8> = (0..=255).collect();
    kv.put("binary", binary.clone()).await?;
    assert_eq!(kv.get_required("binary").await?, binary);

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn enrichment_disabled_is_byte_exact_for_structured_values() -> Result<()> {
    let infra = TestInfrastructure::setup(TlsMode::Auto, CryptoConfig::EC_P256, false).await?;
    let kv = infra.connect().await?;

    let original = br#"{"name":"probe"}"#.to_vec();
    kv.put("structured", original.clone()).await?;
    assert_eq!(kv.get_required("structured").await?, original);

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn invalid_key_is_rejected_and_creates_nothing() -> Result<()> {
    let infra =
        TestInfrastructure::setup(TlsMode::Disabled, CryptoConfig::EC_P256, false).await?;
    let kv = infra.connect().await?;

    let err = kv.put("../escape", b"x".to_vec()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Kv(KvError::InvalidKey { key }) if key == "../escape"
    ));
    assert_eq!(kv.get("../escape").await?, None);
    assert!(kv.list().await?.is_empty());

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn pinned_fingerprint_mismatch_fails_server_auth() -> Result<()> {
    let infra = TestInfrastructure::setup(TlsMode::Auto, CryptoConfig::EC_P256, false).await?;

    // Pin a fingerprint that cannot match the presented leaf: the client
    // certificate of the same bundle.
    let bundle = infra.ca_session.issue(&infra.crypto).await?;
    let wrong_pin = bundle.client.fingerprint();
    let config = TlsChannelConfig::auto(infra.crypto, Some(wrong_pin));

    let establisher = Establisher::new(Arc::clone(&infra.ca_session));
    let err = establisher
        .connect(&infra.handshake.endpoint(), &config)
        .await
        .unwrap_err();
    match err {
        ClientError::TlsHandshake { phase, .. } => {
            assert_eq!(phase, HandshakePhase::ServerAuth);
        }
        other => panic!("unexpected error: {other}"),
    }

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn concurrent_clients_share_the_store() -> Result<()> {
    let infra =
        TestInfrastructure::setup(TlsMode::Disabled, CryptoConfig::EC_P256, false).await?;
    let kv1 = infra.connect().await?;
    let kv2 = infra.connect().await?;

    let (a, b) = tokio::join!(
        kv1.put("from-one", b"1".to_vec()),
        kv2.put("from-two", b"2".to_vec())
    );
    a?;
    b?;

    // Each client observes the other's write.
    assert_eq!(kv2.get_required("from-one").await?, b"1");
    assert_eq!(kv1.get_required("from-two").await?, b"2");

    infra.cleanup().await;
    Ok(())
}
