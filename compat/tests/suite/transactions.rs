use std::path::PathBuf;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use privd_compat::COMPAT_API_VERSION;
use privd_compat::COMPAT_PATCH_VERSION;
use privd_compat::CompatBackend;
use privd_compat::CompatService;
use privd_compat::PERMISSION_DENIED;
use privd_compat::PERMISSION_GRANTED;
use privd_compat::Parcel;
use privd_compat::Transaction;
use privd_compat::read_reply;
use privd_compat::send_request;
use privd_core::Broker;
use privd_core::BrokerConfig;
use privd_core::PackageIndex;
use privd_core::PackageRecord;
use privd_core::PermissionStore;
use privd_protocol::ELEVATE_PERMISSION;
use privd_protocol::GrantFlags;
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PKG: &str = "com.example.app";

pub fn test_broker(dir: &TempDir) -> Arc<Broker> {
    let store = PermissionStore::open(dir.path().join("grants.json")).expect("store");
    let packages = PackageIndex::from_records(vec![PackageRecord {
        name: PKG.to_string(),
        uid: 0, // overwritten per test; grants are seeded directly
        permissions: vec![ELEVATE_PERMISSION.to_string()],
    }]);
    Broker::with_parts(BrokerConfig::default(), store, packages)
}

pub struct TestService {
    pub socket: PathBuf,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestService {
    pub fn start(backend: CompatBackend, dir: &TempDir) -> Self {
        let socket = dir.path().join("ipc.sock");
        let shutdown = CancellationToken::new();
        let service =
            CompatService::bind(backend, &socket, shutdown.clone()).expect("bind socket");
        let task = tokio::spawn(service.run());
        Self {
            socket,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.expect("service task").expect("service run");
    }
}

/// Sends one transaction and returns the reply parcel positioned after the
/// no-exception marker.
pub async fn transact(stream: &mut UnixStream, transaction: Transaction) -> Parcel {
    let (code, request) = transaction.encode();
    send_request(stream, code, &request.into_bytes())
        .await
        .expect("send");
    let reply = read_reply(stream).await.expect("reply");
    let mut parcel = Parcel::from_bytes(reply);
    assert_eq!(parcel.read_exception().expect("header"), Ok(()));
    parcel
}

#[tokio::test]
async fn get_uid_reports_the_daemon_uid() {
    let dir = TempDir::new().expect("tempdir");
    let broker = test_broker(&dir);
    let expected = broker.uid() as i32;
    let service = TestService::start(CompatBackend::Hosted { broker }, &dir);

    let mut stream = UnixStream::connect(&service.socket).await.expect("connect");
    let mut reply = transact(&mut stream, Transaction::GetUid).await;
    assert_eq!(reply.read_i32(), Ok(expected));

    service.stop().await;
}

#[tokio::test]
async fn version_and_patch_version_are_fixed() {
    let dir = TempDir::new().expect("tempdir");
    let broker = test_broker(&dir);
    let service = TestService::start(CompatBackend::Hosted { broker }, &dir);

    let mut stream = UnixStream::connect(&service.socket).await.expect("connect");
    let mut reply = transact(&mut stream, Transaction::GetVersion).await;
    assert_eq!(reply.read_i32(), Ok(COMPAT_API_VERSION));
    let mut reply = transact(&mut stream, Transaction::GetServerPatchVersion).await;
    assert_eq!(reply.read_i32(), Ok(COMPAT_PATCH_VERSION));

    service.stop().await;
}

#[tokio::test]
async fn check_permission_answers_from_the_shared_store() {
    let dir = TempDir::new().expect("tempdir");
    let broker = test_broker(&dir);
    // The test client connects as the daemon's own uid; key the grant to it
    // so the peer-credential lookup finds it.
    let own_uid = broker.uid();
    let service = TestService::start(
        CompatBackend::Hosted {
            broker: Arc::clone(&broker),
        },
        &dir,
    );

    let mut stream = UnixStream::connect(&service.socket).await.expect("connect");
    let mut reply = transact(
        &mut stream,
        Transaction::CheckPermission {
            permission: ELEVATE_PERMISSION.to_string(),
        },
    )
    .await;
    assert_eq!(reply.read_i32(), Ok(PERMISSION_DENIED));

    broker.store().grant(PKG, own_uid, false).expect("grant");
    // Never diverges from the text protocol's answer for the same key.
    assert!(broker.store().is_granted(PKG, own_uid));

    let mut reply = transact(
        &mut stream,
        Transaction::CheckPermission {
            permission: ELEVATE_PERMISSION.to_string(),
        },
    )
    .await;
    assert_eq!(reply.read_i32(), Ok(PERMISSION_GRANTED));

    // A foreign permission string is denied regardless of grants.
    let mut reply = transact(
        &mut stream,
        Transaction::CheckPermission {
            permission: "com.other.permission.THING".to_string(),
        },
    )
    .await;
    assert_eq!(reply.read_i32(), Ok(PERMISSION_DENIED));

    service.stop().await;
}

#[tokio::test]
async fn flag_updates_go_through_the_store() {
    let dir = TempDir::new().expect("tempdir");
    let broker = test_broker(&dir);
    broker.store().grant(PKG, 10042, false).expect("grant");
    let service = TestService::start(
        CompatBackend::Hosted {
            broker: Arc::clone(&broker),
        },
        &dir,
    );

    let mut stream = UnixStream::connect(&service.socket).await.expect("connect");
    let mut reply = transact(
        &mut stream,
        Transaction::GetFlagsForUid {
            uid: 10042,
            mask: u32::MAX,
        },
    )
    .await;
    assert_eq!(reply.read_i32(), Ok(GrantFlags::ALLOWED.bits() as i32));

    transact(
        &mut stream,
        Transaction::UpdateFlagsForUid {
            uid: 10042,
            mask: (GrantFlags::ALLOWED | GrantFlags::DENIED).bits(),
            value: GrantFlags::DENIED.bits(),
        },
    )
    .await;
    assert!(!broker.store().is_granted(PKG, 10042));

    let mut reply = transact(
        &mut stream,
        Transaction::GetFlagsForUid {
            uid: 10042,
            mask: u32::MAX,
        },
    )
    .await;
    assert_eq!(reply.read_i32(), Ok(GrantFlags::DENIED.bits() as i32));

    service.stop().await;
}

#[tokio::test]
async fn exit_is_ignored_by_a_hosted_instance() {
    let dir = TempDir::new().expect("tempdir");
    let broker = test_broker(&dir);
    let service = TestService::start(CompatBackend::Hosted { broker }, &dir);

    let mut stream = UnixStream::connect(&service.socket).await.expect("connect");
    transact(&mut stream, Transaction::Exit).await;
    // Still serving on the same connection afterwards.
    let mut reply = transact(&mut stream, Transaction::GetVersion).await;
    assert_eq!(reply.read_i32(), Ok(COMPAT_API_VERSION));

    service.stop().await;
}

#[tokio::test]
async fn unknown_codes_come_back_as_exceptions() {
    let dir = TempDir::new().expect("tempdir");
    let broker = test_broker(&dir);
    let service = TestService::start(CompatBackend::Hosted { broker }, &dir);

    let mut stream = UnixStream::connect(&service.socket).await.expect("connect");
    let mut request = Parcel::new();
    request.write_interface_token(privd_compat::SERVICE_DESCRIPTOR);
    send_request(&mut stream, 99, &request.into_bytes())
        .await
        .expect("send");
    let mut reply = Parcel::from_bytes(read_reply(&mut stream).await.expect("reply"));
    let header = reply.read_exception().expect("header");
    assert!(matches!(header, Err((-1, _))));

    service.stop().await;
}
