use std::sync::Arc;

use crate::suite::transactions::TestService;
use crate::suite::transactions::test_broker;
use crate::suite::transactions::transact;
use pretty_assertions::assert_eq;
use privd_compat::COMPAT_API_VERSION;
use privd_compat::CompatBackend;
use privd_compat::Transaction;
use privd_core::Broker;
use privd_core::BrokerConfig;
use privd_core::PackageIndex;
use privd_core::PermissionStore;
use tempfile::TempDir;
use tokio::net::UnixStream;

fn broker_with_external(dir: &TempDir, external: Option<std::path::PathBuf>) -> Arc<Broker> {
    let store = PermissionStore::open(dir.path().join("grants.json")).expect("store");
    let config = BrokerConfig {
        external_broker_socket: external,
        ..BrokerConfig::default()
    };
    Broker::with_parts(config, store, PackageIndex::default())
}

#[tokio::test]
async fn probe_stays_local_when_no_external_broker_answers() {
    let dir = TempDir::new().expect("tempdir");
    let broker = broker_with_external(&dir, Some(dir.path().join("absent.sock")));
    let backend = CompatBackend::probe(broker).await;
    assert!(matches!(backend, CompatBackend::Hosted { .. }));
}

#[tokio::test]
async fn probe_without_configuration_stays_local() {
    let dir = TempDir::new().expect("tempdir");
    let broker = broker_with_external(&dir, None);
    let backend = CompatBackend::probe(broker).await;
    assert!(matches!(backend, CompatBackend::Hosted { .. }));
}

#[tokio::test]
async fn transactions_relay_to_an_answering_external_broker() {
    // The "external broker" is a second hosted service on its own socket.
    let external_dir = TempDir::new().expect("tempdir");
    let external = TestService::start(
        CompatBackend::Hosted {
            broker: test_broker(&external_dir),
        },
        &external_dir,
    );

    let relay_dir = TempDir::new().expect("tempdir");
    let broker = broker_with_external(&relay_dir, Some(external.socket.clone()));
    let backend = CompatBackend::probe(broker).await;
    assert!(matches!(backend, CompatBackend::External { .. }));
    let relay = TestService::start(backend, &relay_dir);

    let mut stream = UnixStream::connect(&relay.socket).await.expect("connect");
    let mut reply = transact(&mut stream, Transaction::GetVersion).await;
    assert_eq!(reply.read_i32(), Ok(COMPAT_API_VERSION));

    relay.stop().await;
    external.stop().await;
}

#[tokio::test]
async fn relay_failure_comes_back_as_an_exception() {
    let dir = TempDir::new().expect("tempdir");
    let gone = dir.path().join("gone.sock");
    let relay = TestService::start(CompatBackend::External { socket: gone }, &dir);

    let mut stream = UnixStream::connect(&relay.socket).await.expect("connect");
    let (code, request) = Transaction::GetVersion.encode();
    privd_compat::send_request(&mut stream, code, &request.into_bytes())
        .await
        .expect("send");
    let mut reply =
        privd_compat::Parcel::from_bytes(privd_compat::read_reply(&mut stream).await.expect("reply"));
    let header = reply.read_exception().expect("header");
    assert!(matches!(header, Err((-1, _))));

    relay.stop().await;
}
