//! Process-level handshake tests using shell stand-ins for foreign-runtime
//! servers.

use std::time::Duration;

use anyhow::Result;

use crosswire_client::{ClientError, PluginProcess, SpawnOptions};
use crosswire_wire_protocol::{HandshakeConfig, Network, DEFAULT_COOKIE_KEY, DEFAULT_COOKIE_VALUE};

fn sh_server(script: &str) -> SpawnOptions {
    let mut options = SpawnOptions::new(vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        script.to_string(),
    ]);
    options.startup_timeout = Duration::from_secs(5);
    options
}

#[tokio::test]
async fn cookie_reaches_the_spawned_server() -> Result<()> {
    // The stand-in validates the cookie exactly like a real server: missing
    // or wrong value means exit 1 before any handshake output.
    let script = format!(
        "[ \"${DEFAULT_COOKIE_KEY}\" = \"{DEFAULT_COOKIE_VALUE}\" ] || exit 1; \
         echo '1|1|tcp|127.0.0.1:1234|tarpc-postcard|'; sleep 5"
    );
    let mut process = PluginProcess::spawn(sh_server(&script))?;
    let handshake = process.await_handshake().await?;
    assert_eq!(handshake.network, Network::Tcp);
    assert_eq!(handshake.address, "127.0.0.1:1234");
    process.shutdown(Duration::from_millis(200)).await;
    Ok(())
}

#[tokio::test]
async fn cookie_mismatch_exits_nonzero_without_handshake() -> Result<()> {
    // The spawner is configured with a different cookie value than the
    // server expects, mirroring a server launched by the wrong parent.
    let script = format!(
        "[ \"${DEFAULT_COOKIE_KEY}\" = \"{DEFAULT_COOKIE_VALUE}\" ] || {{ echo 'refusing: bad cookie' >&2; exit 1; }}; \
         echo '1|1|tcp|127.0.0.1:1234|tarpc-postcard|'"
    );
    let mut options = sh_server(&script);
    options.handshake = HandshakeConfig::new(DEFAULT_COOKIE_KEY, "wrong-value");

    let mut process = PluginProcess::spawn(options)?;
    let err = process.await_handshake().await.unwrap_err();
    match err {
        ClientError::ProcessExited { code, output } => {
            assert_eq!(code, Some(1));
            assert!(output.contains("bad cookie"), "output: {output}");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn log_noise_before_handshake_is_skipped() -> Result<()> {
    let script = "echo 'booting'; \
         echo 'almost|but|not|a|handshake'; \
         echo 'fields|but|bad|versions|here|x|y'; \
         echo '1|1|local-socket|/tmp/cw-test.sock|tarpc-postcard|'; sleep 5";
    let mut process = PluginProcess::spawn(sh_server(script))?;
    let handshake = process.await_handshake().await?;
    assert_eq!(handshake.network, Network::LocalSocket);
    assert_eq!(handshake.address, "/tmp/cw-test.sock");
    process.shutdown(Duration::from_millis(200)).await;
    Ok(())
}

#[tokio::test]
async fn handshake_timeout_error_is_diagnostic_rich() -> Result<()> {
    // A server from an incompatible runtime family: prints logs forever,
    // never a handshake.
    let mut options = sh_server("echo 'warming up'; echo 'still warming'; sleep 30");
    options.startup_timeout = Duration::from_millis(400);

    let mut process = PluginProcess::spawn(options)?;
    let err = process.await_handshake().await.unwrap_err();
    match err {
        ClientError::HandshakeTimeout { output, .. } => {
            assert!(output.contains("warming up"), "output: {output}");
        }
        other => panic!("unexpected error: {other}"),
    }
    process.shutdown(Duration::from_millis(100)).await;
    Ok(())
}
