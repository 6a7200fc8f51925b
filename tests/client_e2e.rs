mod common;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use common::{write_file, TestServer};
use netvfs::auth::StaticCredentials;
use netvfs::checksum::{strong_checksum, HashAlgorithm};
use netvfs::client::{ConnectOptions, Endpoint, NodeEvent, RemoteFileSystem};
use netvfs::logger::{AuditEvent, JsonLogger};
use netvfs::protocol::{greeting_line, verb};
use netvfs::protocol_core::CommandLine;
use netvfs::tls;
use netvfs::transport::Transport;
use netvfs::vfs::{FileAccess, FileShare, OpenMode, StopSignal};
use netvfs::VfsError;
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

enum Step {
    /// Read one line, which must start with this verb
    Expect(&'static str),
    /// Write one line
    Reply(&'static str),
}

/// One-connection server that greets, accepts LOGIN, then plays `steps`.
async fn scripted_server(steps: Vec<Step>) -> Result<(u16, JoinHandle<Result<()>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut io = Transport::new(Box::new(stream))?;
        io.write_line(&greeting_line()).await?;
        io.write_line("READY").await?;
        assert!(io.expect_line().await?.starts_with("LOGIN"));
        io.write_line("OK").await?;
        for step in steps {
            match step {
                Step::Expect(expected) => {
                    let line = io.expect_line().await?;
                    assert!(line.starts_with(expected), "expected {}, got {}", expected, line);
                }
                Step::Reply(line) => io.write_line(line).await?,
            }
        }
        Ok::<_, anyhow::Error>(())
    });
    Ok((port, task))
}

fn remote_at(port: u16) -> RemoteFileSystem {
    RemoteFileSystem::new(
        Endpoint::new("127.0.0.1", port, ConnectOptions::default()),
        Duration::from_secs(60),
        Duration::from_secs(5),
    )
}

/// Run a copy that is stopped before the server answers; the server replies
/// `reply` and, if `answers_cancel_later`, treats the CANCEL as a command.
/// Returns the copy result once a following NOOP went through in step.
async fn stopped_copy_against(reply: &'static str, answers_cancel_later: bool) -> Result<netvfs::Result<u64>> {
    use Step::*;
    let mut steps = vec![Reply("READY"), Expect("COPY"), Expect("CANCEL"), Reply(reply)];
    if answers_cancel_later {
        steps.extend([Reply("READY"), Reply("OK")]);
    }
    steps.extend([Reply("READY"), Expect("NOOP"), Reply("OK")]);
    let (port, script) = scripted_server(steps).await?;
    let fs = remote_at(port);

    let stop = StopSignal::new();
    stop.stop();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        let result = fs.copy("/a", "/b", false, &stop).await;
        assert_eq!(fs.control_pool().idle_count(), 1);
        let mut lease = fs.control_pool().acquire().await?;
        lease.command(&CommandLine::new(verb::NOOP)).await?;
        Ok::<_, anyhow::Error>(result)
    })
    .await??;
    script.await??;
    Ok(result)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_stream_does_not_block_control_commands() -> Result<()> {
    let srv = TestServer::start().await?;
    write_file(&srv.path("a.bin"), 1000)?;
    let fs = srv.remote();

    let mut stream = fs
        .open("/a.bin", OpenMode::Open, FileAccess::Read, FileShare::Read)
        .await?;
    let mut head = [0u8; 10];
    assert_eq!(stream.read(&mut head).await?, 10);

    // The stream's connection sits in RandomAccess; LIST needs another one
    let names: Vec<_> = fs.list("/").await?.into_iter().map(|n| n.name).collect();
    assert_eq!(names, vec!["a.bin"]);
    assert_eq!(fs.control_pool().idle_count(), 1);
    assert_eq!(fs.binary_pool().idle_count(), 0);

    stream.close().await?;
    assert_eq!(fs.binary_pool().idle_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_stream_discards_its_connection() -> Result<()> {
    let srv = TestServer::start().await?;
    write_file(&srv.path("a.bin"), 10)?;
    let fs = srv.remote();
    let stream = fs
        .open("/a.bin", OpenMode::Open, FileAccess::Read, FileShare::None)
        .await?;
    drop(stream);
    assert_eq!(fs.binary_pool().idle_count(), 0);

    // A fresh connection is opened for the next stream
    let mut again = fs
        .open("/a.bin", OpenMode::Open, FileAccess::Read, FileShare::None)
        .await?;
    assert_eq!(again.length().await?, 10);
    again.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_write_seek_and_truncate() -> Result<()> {
    let srv = TestServer::start().await?;
    let fs = srv.remote();

    let mut stream = fs
        .open("/s.txt", OpenMode::Create, FileAccess::ReadWrite, FileShare::None)
        .await?;
    stream.write_all(b"hello world").await?;
    assert_eq!(stream.position().await?, 11);
    assert_eq!(stream.seek(SeekFrom::Start(6)).await?, 6);
    let mut word = [0u8; 5];
    assert_eq!(stream.read(&mut word).await?, 5);
    assert_eq!(&word, b"world");
    assert_eq!(stream.seek(SeekFrom::End(-5)).await?, 6);
    stream.set_length(5).await?;
    assert_eq!(stream.length().await?, 5);
    stream.set_position(0).await?;
    let mut all = Vec::new();
    stream.read_to_end(&mut all).await?;
    assert_eq!(all, b"hello");
    stream.flush().await?;
    stream.close().await?;

    assert_eq!(std::fs::read(srv.path("s.txt"))?, b"hello");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_only_stream_refuses_writes() -> Result<()> {
    let srv = TestServer::start().await?;
    write_file(&srv.path("ro.bin"), 4)?;
    let fs = srv.remote();
    let mut stream = fs
        .open("/ro.bin", OpenMode::Open, FileAccess::Read, FileShare::None)
        .await?;
    assert!(matches!(stream.write_all(b"x").await, Err(VfsError::Unauthorized(_))));
    // Still usable after the refusal
    assert_eq!(stream.length().await?, 4);
    stream.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_then_download_ranges() -> Result<()> {
    let srv = TestServer::start().await?;
    let fs = srv.remote();
    let data: Vec<u8> = (0..(3 * 1024 * 1024 + 17)).map(|i| (i % 239) as u8).collect();

    let n = fs.upload("/big.bin", &mut data.as_slice()).await?;
    assert_eq!(n, data.len() as u64);
    assert_eq!(std::fs::read(srv.path("big.bin"))?, data);

    assert_eq!(fs.download("/big.bin").await?, data);
    let mut part = Vec::new();
    let got = fs.download_to("/big.bin", &mut part, 100, Some(50)).await?;
    assert_eq!(got, 50);
    assert_eq!(part, &data[100..150]);

    assert!(matches!(fs.download("/nope").await, Err(VfsError::FileNotFound(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn node_operations_round_trip() -> Result<()> {
    let srv = TestServer::start().await?;
    let data = write_file(&srv.path("src.bin"), 5000)?;
    let fs = srv.remote();

    fs.create_directory("/deep/er", true).await?;
    assert!(srv.path("deep/er").is_dir());
    fs.create_file("/deep/empty.txt").await?;
    assert_eq!(std::fs::metadata(srv.path("deep/empty.txt"))?.len(), 0);

    let copied = fs
        .copy("/src.bin", "/deep/copy.bin", false, &StopSignal::new())
        .await?;
    assert_eq!(copied, 5000);
    assert_eq!(std::fs::read(srv.path("deep/copy.bin"))?, data);
    assert!(matches!(
        fs.copy("/src.bin", "/deep/copy.bin", false, &StopSignal::new()).await,
        Err(VfsError::AlreadyExists(_))
    ));

    fs.rename("/deep/copy.bin", "/moved.bin", false).await?;
    assert!(!srv.path("deep/copy.bin").exists());
    assert!(srv.path("moved.bin").exists());

    let digest = fs
        .compute_hash("/moved.bin", HashAlgorithm::Sha256, 0, None)
        .await?;
    assert_eq!(digest, hex::encode(strong_checksum(&data, HashAlgorithm::Sha256)));
    let partial = fs
        .compute_hash("/moved.bin", HashAlgorithm::Md5, 10, Some(20))
        .await?;
    assert_eq!(partial, hex::encode(strong_checksum(&data[10..30], HashAlgorithm::Md5)));

    let stamp = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    fs.set_modified("/moved.bin", stamp).await?;
    assert_eq!(fs.attributes("/moved.bin").await?.modified, Some(stamp));

    assert!(fs.delete("/deep", false).await.is_err());
    fs.delete("/deep", true).await?;
    assert!(!srv.path("deep").exists());
    assert!(!fs.attributes("/deep").await?.exists);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_copy_leaves_connection_in_sync() -> Result<()> {
    let srv = TestServer::start().await?;
    write_file(&srv.path("src.bin"), 64 * 1024)?;
    let fs = srv.remote();

    let stop = StopSignal::new();
    stop.stop();
    match fs.copy("/src.bin", "/dst.bin", false, &stop).await {
        Ok(n) => assert_eq!(n, 64 * 1024),
        Err(VfsError::Cancelled) => {}
        Err(e) => panic!("unexpected copy failure: {}", e),
    }

    // The pooled connection answers the next command in step
    assert_eq!(fs.control_pool().idle_count(), 1);
    let names: Vec<_> = fs.list("/").await?.into_iter().map(|n| n.name).collect();
    assert!(names.contains(&"src.bin".to_string()));
    assert!(fs.attributes("/src.bin").await?.exists);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn copy_finished_before_cancel_reads_the_cancel_answer() -> Result<()> {
    assert_eq!(stopped_copy_against("OK BYTES=7", true).await?.unwrap(), 7);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn copy_reporting_ignored_cancel_needs_no_extra_reply() -> Result<()> {
    assert_eq!(stopped_copy_against("OK BYTES=7 CANCEL=IGNORED", false).await?.unwrap(), 7);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_copy_reply_ends_the_exchange() -> Result<()> {
    let result = stopped_copy_against("ERROR CODE=CANCELLED MESSAGE=stopped", false).await?;
    assert!(matches!(result, Err(VfsError::Cancelled)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_copy_with_ignored_cancel_ends_the_exchange() -> Result<()> {
    let result = stopped_copy_against(
        "ERROR CODE=ALREADY_EXISTS MESSAGE=exists DETAILS=CANCEL_IGNORED",
        false,
    )
    .await?;
    assert!(matches!(result, Err(VfsError::AlreadyExists(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn copy_failed_before_cancel_reads_the_cancel_answer() -> Result<()> {
    let result = stopped_copy_against("ERROR CODE=ALREADY_EXISTS MESSAGE=exists", true).await?;
    assert!(matches!(result, Err(VfsError::AlreadyExists(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_random_access_reply_discards_the_connection() -> Result<()> {
    use Step::*;
    let (port, script) = scripted_server(vec![
        Reply("READY"),
        Expect("RANDOMACCESS"),
        Reply("OK POSITION=0"),
    ])
    .await?;
    let fs = remote_at(port);
    let opened = fs
        .open("/a.bin", OpenMode::Open, FileAccess::Read, FileShare::None)
        .await;
    assert!(matches!(opened, Err(VfsError::Protocol(_))));
    assert_eq!(fs.binary_pool().idle_count(), 0);
    script.await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_completes_while_an_upload_waits_on_its_source() -> Result<()> {
    let srv = TestServer::start().await?;
    write_file(&srv.path("here.txt"), 1)?;
    let fs = srv.remote();

    let (mut feed, mut source) = tokio::io::duplex(64);
    feed.write_all(b"first").await?;
    let upload = fs.upload("/up.bin", &mut source);
    tokio::pin!(upload);

    let names = tokio::select! {
        r = &mut upload => panic!("upload ended while its source was open: {:?}", r),
        names = async {
            // The first block has reached the server; the upload now waits on `feed`
            let target = srv.path("up.bin");
            tokio::time::timeout(Duration::from_secs(10), async {
                while std::fs::metadata(&target).map(|m| m.len()).unwrap_or(0) < 5 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await?;
            Ok::<_, anyhow::Error>(fs.list("/").await?)
        } => names?,
    };
    let mut names: Vec<_> = names.into_iter().map(|n| n.name).collect();
    names.sort();
    assert_eq!(names, vec!["here.txt", "up.bin"]);
    assert_eq!(fs.binary_pool().idle_count(), 0);

    feed.write_all(b" second").await?;
    drop(feed);
    assert_eq!(upload.await?, 12);
    assert_eq!(std::fs::read(srv.path("up.bin"))?, b"first second");
    assert_eq!(fs.binary_pool().idle_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_completes_while_a_download_waits_on_its_sink() -> Result<()> {
    let srv = TestServer::start().await?;
    let data = write_file(&srv.path("big.bin"), 256 * 1024)?;
    let fs = srv.remote();

    // A 16 byte pipe nobody drains stalls the download mid-payload
    let (mut sink, mut drain) = tokio::io::duplex(16);
    let download = fs.download_to("/big.bin", &mut sink, 0, None);
    tokio::pin!(download);

    let names = tokio::select! {
        r = &mut download => panic!("download ended while its sink was full: {:?}", r),
        names = async {
            let mut first = [0u8; 1];
            drain.read_exact(&mut first).await?;
            assert_eq!(first[0], data[0]);
            Ok::<_, anyhow::Error>(fs.list("/").await?)
        } => names?,
    };
    assert_eq!(names.len(), 1);

    let mut rest = vec![0u8; data.len() - 1];
    let (got, drained) = tokio::join!(download, drain.read_exact(&mut rest));
    assert_eq!(got?, data.len() as u64);
    drained?;
    assert_eq!(rest, &data[1..]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_cache_follows_local_changes() -> Result<()> {
    let srv = TestServer::start().await?;
    write_file(&srv.path("one.txt"), 1)?;
    let fs = srv.remote();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let id = fs.observers().subscribe(move |e| sink.lock().push(e.clone()));

    assert_eq!(fs.list("/").await?.len(), 1);
    let generation = fs.directory_cache().generation("/");

    // Changes made behind the client's back are not seen until invalidated
    write_file(&srv.path("two.txt"), 2)?;
    assert_eq!(fs.list("/").await?.len(), 1);

    fs.create_file("/three.txt").await?;
    assert!(fs.directory_cache().needs_refresh("/"));
    assert_eq!(fs.list("/").await?.len(), 3);
    assert!(fs.directory_cache().generation("/") > generation);

    fs.rename("/three.txt", "/four.txt", false).await?;
    fs.delete("/one.txt", false).await?;
    let names: Vec<_> = fs.list("/").await?.into_iter().map(|n| n.name).collect();
    assert_eq!(names, vec!["four.txt", "two.txt"]);

    assert!(fs.observers().unsubscribe(id));
    fs.delete("/two.txt", false).await?;
    assert_eq!(
        *events.lock(),
        vec![
            NodeEvent::Created("/three.txt".into()),
            NodeEvent::Moved {
                from: "/three.txt".into(),
                to: "/four.txt".into()
            },
            NodeEvent::Deleted("/one.txt".into()),
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn credentials_are_checked() -> Result<()> {
    let creds = StaticCredentials::new().with_password("alice", "secret");
    let srv = TestServer::start_with(|ctx| ctx.with_authenticator(Arc::new(creds))).await?;

    let denied = srv.remote_with(ConnectOptions::default().with_login("alice", "wrong"));
    assert!(matches!(denied.list("/").await, Err(VfsError::Unauthorized(_))));
    let anonymous = srv.remote();
    assert!(matches!(anonymous.list("/").await, Err(VfsError::Unauthorized(_))));

    let allowed = srv.remote_with(ConnectOptions::default().with_login("alice", "secret"));
    assert!(allowed.list("/").await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tls_upgrade_pins_the_server_certificate() -> Result<()> {
    let keys = tempfile::tempdir()?;
    let config = tls::load_or_generate_server_config(
        Some(keys.path().join("cert.pem")),
        Some(keys.path().join("key.pem")),
    )?;
    let srv = TestServer::start_with(|ctx| ctx.with_tls(config)).await?;
    write_file(&srv.path("secret.bin"), 2048)?;

    let known_hosts = keys.path().join("known_hosts");
    let fs = srv.remote_with(ConnectOptions::default().with_tls(Some(known_hosts.clone())));
    assert_eq!(fs.list("/").await?.len(), 1);
    assert!(known_hosts.exists());

    let mut stream = fs
        .open("/secret.bin", OpenMode::Open, FileAccess::Read, FileShare::None)
        .await?;
    let mut buf = Vec::new();
    assert_eq!(stream.read_to_end(&mut buf).await?, 2048);
    stream.close().await?;

    // Second session trusts the pinned certificate
    let client = fs.endpoint().connect().await?;
    assert!(client.is_encrypted());
    client.quit().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn json_audit_log_records_session_events() -> Result<()> {
    let logs = tempfile::tempdir()?;
    let log_path = logs.path().join("audit.jsonl");
    let logger = Arc::new(JsonLogger::new(&log_path)?);
    let srv = TestServer::start_with(|ctx| ctx.with_logger(logger)).await?;
    write_file(&srv.path("f.bin"), 100)?;

    let fs = srv.remote();
    assert_eq!(fs.download("/f.bin").await?.len(), 100);
    fs.delete("/f.bin", false).await?;

    let records = JsonLogger::read_log(&log_path)?;
    let events: Vec<_> = records.into_iter().map(|r| r.event).collect();
    assert!(events.contains(&AuditEvent::Login {
        user: "anonymous".into(),
        accepted: true
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        AuditEvent::Download { path, length: 100, .. } if path == "/f.bin"
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, AuditEvent::Claim { accepted: true, .. })));
    assert!(events.contains(&AuditEvent::Delete {
        path: "/f.bin".into()
    }));
    Ok(())
}
