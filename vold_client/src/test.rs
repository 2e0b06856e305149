use crate::*;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

static_assertions::assert_impl_all!(VolumeManager: Send, Sync, Clone);
static_assertions::assert_impl_all!(VolumeInfo: Send, Sync);

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(path: &Path) -> SessionConfig {
    SessionConfig {
        socket_path: path.to_path_buf(),
        reconnect_delay_ms: 20,
        ..Default::default()
    }
}

enum Reply {
    Lines(Vec<&'static str>),
    Close,
}

fn vold_reply(cmd: &str) -> Reply {
    Reply::Lines(match cmd {
        "volume list" => vec!["110 sdcard /mnt/sdcard 1", "200 Volumes listed."],
        "volume mount sdcard" => vec![
            "605 Volume sdcard /mnt/sdcard state changed from 1 (Idle-Unmounted) to 3 (Checking)",
            "605 Volume sdcard /mnt/sdcard state changed from 3 (Checking) to 4 (Mounted)",
            "200 volume operation succeeded",
        ],
        "volume unmount sdcard force" => vec![
            "605 Volume sdcard /mnt/sdcard state changed from 4 (Mounted) to 5 (Unmounting)",
            "605 Volume sdcard /mnt/sdcard state changed from 5 (Unmounting) to 1 (Idle-Unmounted)",
            "200 volume operation succeeded",
        ],
        "volume format sdcard" => vec![],
        _ => vec!["500 Command not recognized"],
    })
}

/// Accepts connections one after the other and answers NUL terminated
/// commands through `handler(connection_index, command)`.
async fn fake_vold<F>(listener: UnixListener, mut handler: F)
where
    F: FnMut(usize, &str) -> Reply + Send + 'static,
{
    let mut conn = 0;
    while let Ok((stream, _)) = listener.accept().await {
        let (rd, mut wr) = stream.into_split();
        let mut rd = BufReader::new(rd);
        loop {
            let mut record = Vec::new();
            match rd.read_until(0, &mut record).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if record.last() == Some(&0) {
                record.pop();
            }
            let cmd = String::from_utf8_lossy(&record).into_owned();
            match handler(conn, &cmd) {
                Reply::Lines(lines) => {
                    let mut payload = Vec::new();
                    for line in lines {
                        payload.extend_from_slice(line.as_bytes());
                        payload.push(0);
                    }
                    if wr.write_all(&payload).await.is_err() {
                        break;
                    }
                }
                Reply::Close => break,
            }
        }
        conn += 1;
    }
}

async fn ready(manager: &VolumeManager) {
    tokio::time::timeout(WAIT, manager.wait_ready())
        .await
        .expect("session did not become ready")
        .unwrap();
}

#[tokio::test]
async fn test_mount_and_unmount() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vold");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(fake_vold(listener, |_, cmd| vold_reply(cmd)));

    let (manager, _task) = VolumeManager::spawn(config(&path)).unwrap();
    let mut changes = manager.subscribe_volumes();
    ready(&manager).await;
    assert_eq!(manager.state(), ConnectionState::Ready);

    let volumes = manager.volumes().await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].name, "sdcard");
    assert_eq!(volumes[0].mount_point.as_deref(), Some("/mnt/sdcard"));
    assert_eq!(volumes[0].state, VolumeState::Idle);

    let response = manager.mount("sdcard").await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.code, ResponseCode::COMMAND_OKAY);
    assert_eq!(response.message, "volume operation succeeded");

    let sdcard = manager.volume("sdcard").await.unwrap().unwrap();
    assert_eq!(sdcard.state, VolumeState::Mounted);
    assert_eq!(sdcard.mount_generation, 1);

    let seen: Vec<VolumeState> = (0..3).map(|_| changes.try_recv().unwrap().state).collect();
    assert_eq!(
        seen,
        vec![VolumeState::Idle, VolumeState::Checking, VolumeState::Mounted]
    );

    let response = manager.unmount("sdcard", true).await.unwrap();
    assert!(response.is_success());
    assert_eq!(
        manager.volume("sdcard").await.unwrap().unwrap().state,
        VolumeState::Idle
    );

    let response = manager.call("volume frobnicate").await.unwrap();
    assert_eq!(response.code, ResponseCode::COMMAND_SYNTAX_ERROR);
    assert!(!response.is_success());

    assert_eq!(manager.volume("emmc").await.unwrap(), None);
}

#[tokio::test]
async fn test_call_timeout() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vold");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(fake_vold(listener, |_, cmd| vold_reply(cmd)));

    let (manager, _task) = VolumeManager::spawn(config(&path)).unwrap();
    ready(&manager).await;

    // vold never answers a format here
    let r = manager
        .call_timeout(VolumeCommand::format("sdcard"), Duration::from_millis(100))
        .await;
    assert_eq!(r, Err(Error::Timeout));
}

#[tokio::test]
async fn test_daemon_drops_connection() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vold");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(fake_vold(listener, |conn, cmd| {
        if conn == 0 && cmd == "volume mount sdcard" {
            Reply::Close
        } else {
            vold_reply(cmd)
        }
    }));

    let (manager, _task) = VolumeManager::spawn(config(&path)).unwrap();
    ready(&manager).await;

    match manager.mount("sdcard").await {
        Err(Error::CommandAbandoned(text)) => assert_eq!(text, "volume mount sdcard"),
        other => panic!("Unexpected {:?}", other),
    }

    // the session lists the volumes again on the new connection
    ready(&manager).await;
    let response = manager.mount("sdcard").await.unwrap();
    assert!(response.is_success());

    let sdcard = manager.volume("sdcard").await.unwrap().unwrap();
    assert_eq!(sdcard.state, VolumeState::Mounted);
    assert_eq!(sdcard.mount_generation, 1);
}

#[tokio::test]
async fn test_daemon_starts_late() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vold");

    let (manager, _task) = VolumeManager::spawn(config(&path)).unwrap();

    // posted while vold is still missing
    let caller = manager.clone();
    let pending = tokio::spawn(async move { caller.mount("sdcard").await });
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    let commands = Arc::new(Mutex::new(Vec::new()));
    let log = commands.clone();
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(fake_vold(listener, move |_, cmd| {
        log.lock().unwrap().push(cmd.to_string());
        vold_reply(cmd)
    }));

    ready(&manager).await;
    let response = tokio::time::timeout(WAIT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(response.is_success());
    assert_eq!(
        *commands.lock().unwrap(),
        vec!["volume list".to_string(), "volume mount sdcard".to_string()]
    );
}

#[tokio::test]
async fn test_state_observer() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vold");
    let listener = UnixListener::bind(&path).unwrap();

    let (manager, _task) = VolumeManager::spawn(config(&path)).unwrap();

    let states = Arc::new(Mutex::new(Vec::new()));
    let log = states.clone();
    let id = manager
        .add_observer(Box::new(move |e: &StateChangedEvent| {
            log.lock().unwrap().push(e.state());
        }))
        .await
        .unwrap();

    // nothing is answered before the observer is in place
    tokio::spawn(fake_vold(listener, |conn, cmd| {
        if conn == 0 && cmd == "volume share sdcard ums" {
            Reply::Close
        } else {
            vold_reply(cmd)
        }
    }));
    ready(&manager).await;

    assert!(manager.share("sdcard").await.is_err());
    ready(&manager).await;
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Ready,
            ConnectionState::Connecting,
            ConnectionState::Ready
        ]
    );

    manager.remove_observer(id).await.unwrap();
    manager.volumes().await.unwrap();
    manager.shutdown().await.unwrap();
    assert_eq!(states.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_shutdown() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vold");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(fake_vold(listener, |_, cmd| vold_reply(cmd)));

    let (manager, task) = VolumeManager::spawn(config(&path)).unwrap();
    ready(&manager).await;

    manager.shutdown().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

    // teardown is silent, the last reported state stays
    assert_eq!(manager.state(), ConnectionState::Ready);
    assert_eq!(manager.call("volume list").await, Err(Error::SessionClosed));
    assert_eq!(manager.volumes().await, Err(Error::SessionClosed));
    // a second shutdown is harmless
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropping_handles_stops_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vold");

    let (manager, task) = VolumeManager::spawn(config(&path)).unwrap();
    drop(manager);
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[test]
fn test_spawn_rejects_bad_config() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let r = VolumeManager::spawn(SessionConfig {
            channel_capacity: 0,
            ..Default::default()
        });
        assert!(matches!(r, Err(Error::Config(_))));
    });
}
