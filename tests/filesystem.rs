use std::io::Cursor;

use bytes::BytesMut;
use ssh2_client::{
    client::fs::{DEFAULT_CHUNK_SIZE, DEFAULT_DIR_MODE, DEFAULT_MAX_DEPTH},
    transport::memory::{MemoryHost, MemoryTransport},
    Error, SessionClient,
};

async fn session(host: &MemoryHost) -> anyhow::Result<SessionClient<MemoryTransport>> {
    let _ = env_logger::builder().is_test(true).try_init();
    host.add_user("deploy", "hunter2");

    let mut session = SessionClient::connect(&host.connector(), "localhost", 22).await?;
    assert!(session.auth_by_password("deploy", "hunter2").await);
    Ok(session)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn write_then_read_returns_same_bytes() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;
    let fs = session.fs();

    for len in [0, 1, 2 * DEFAULT_CHUNK_SIZE + 17] {
        let data = pattern(len);
        let path = format!("/tmp/blob-{len}");

        assert_eq!(fs.write(&path, &data).await?, len as u64);
        assert_eq!(fs.read_all(&path).await?, data);
    }
    Ok(())
}

#[tokio::test]
async fn zero_byte_write_is_distinct_from_failure() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    host.create_dir("/srv/readonly", 0o555);
    let session = session(&host).await?;
    let fs = session.fs();

    assert_eq!(fs.write("/tmp/empty", b"").await?, 0);

    let err = fs.write("/srv/readonly/file", b"").await.unwrap_err();
    assert!(err.is_permission_denied());
    Ok(())
}

#[tokio::test]
async fn read_chunked_matches_read_all() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;
    let fs = session.fs();
    let data = pattern(DEFAULT_CHUNK_SIZE + 4097);
    let _ = fs.write("/tmp/large", &data).await?;

    let mut received = BytesMut::new();
    let mut chunks = 0;
    let total = fs
        .read_chunked(
            "/tmp/large",
            |chunk| {
                chunks += 1;
                received.extend_from_slice(&chunk);
            },
            64 * 1024,
        )
        .await?;

    assert_eq!(total, received.len() as u64);
    assert_eq!(received.freeze(), fs.read_all("/tmp/large").await?);
    assert_eq!(chunks, 17);
    Ok(())
}

#[tokio::test]
async fn oversized_chunk_size_reads_whole_file() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;
    let fs = session.fs();
    let _ = fs.write("/tmp/small", b"abc").await?;

    let mut chunks = Vec::new();
    let total = fs
        .read_chunked("/tmp/small", |chunk| chunks.push(chunk), usize::MAX)
        .await?;

    assert_eq!(total, 3);
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0][..], b"abc");
    Ok(())
}

#[tokio::test]
async fn write_from_stream_crosses_chunks() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;
    let fs = session.fs();
    let data = pattern(3 * DEFAULT_CHUNK_SIZE / 2);

    let mut reader = Cursor::new(data.clone());
    reader.set_position(data.len() as u64);
    assert_eq!(fs.write_from("upload.bin", &mut reader).await?, data.len() as u64);

    assert_eq!(host.contents("/home/deploy/upload.bin"), Some(data));
    Ok(())
}

#[tokio::test]
async fn directory_and_link_stats() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;
    let fs = session.fs();

    fs.make_dir("/tmp/project", DEFAULT_DIR_MODE).await?;
    let dir = fs.stat("/tmp/project").await?;
    assert!(dir.is_dir);
    assert!(!dir.is_link);
    assert_eq!(dir.name, "project");

    fs.make_dir("project", 0o700).await?;
    fs.make_link("project", "/tmp/latest").await?;
    let link = fs.stat("/tmp/latest").await?;
    assert!(link.is_link);
    assert!(!link.is_dir);
    assert_eq!(fs.read_link("/tmp/latest").await?, "/home/deploy/project");
    assert_eq!(fs.realpath("project").await?, "/home/deploy/project");
    Ok(())
}

#[tokio::test]
async fn stat_of_missing_path_is_not_found() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;

    let err = session.fs().stat("/tmp/absent").await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn list_root_with_stats() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;

    let entries = session.fs().list_directory("/", true).await?;
    assert!(entries.iter().all(|entry| entry.name != "." && entry.name != ".."));

    let tmp = entries
        .iter()
        .find(|entry| entry.name == "tmp")
        .ok_or_else(|| anyhow::anyhow!("no /tmp entry"))?;
    assert_eq!(tmp.path, "/tmp");
    assert!(tmp.is_dir());
    Ok(())
}

#[tokio::test]
async fn list_without_stats_has_no_attributes() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    host.create_file("/home/deploy/a.txt", b"a", 0o644);
    let session = session(&host).await?;

    let entries = session.fs().list_directory(".", false).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "/home/deploy/a.txt");
    assert!(entries[0].attributes.is_none());
    Ok(())
}

#[tokio::test]
async fn unlink_rename_and_chmod() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;
    let fs = session.fs();

    let _ = fs.write("draft.txt", b"v1").await?;
    fs.rename("draft.txt", "/tmp/final.txt").await?;
    fs.chmod("/tmp/final.txt", 0o600).await?;
    assert_eq!(fs.stat("/tmp/final.txt").await?.permissions(), 0o600);

    fs.unlink("/tmp/final.txt").await?;
    assert!(!fs.try_exists("/tmp/final.txt").await?);
    assert!(fs.unlink("/tmp/final.txt").await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn remove_tree_clears_everything() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    let session = session(&host).await?;
    let fs = session.fs();

    for dir in ["build", "build/empty", "build/out", "build/out/bin", "build/out/lib"] {
        fs.make_dir(dir, DEFAULT_DIR_MODE).await?;
    }
    for file in ["build/log.txt", "build/out/bin/app", "build/out/lib/libapp.so"] {
        let _ = fs.write(file, file.as_bytes()).await?;
    }

    fs.remove_tree("build", DEFAULT_MAX_DEPTH).await?;
    assert!(fs.stat("build").await.unwrap_err().is_not_found());
    assert!(fs.try_exists(".").await?);
    Ok(())
}

#[tokio::test]
async fn remove_tree_stops_at_first_failure() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    host.create_dir("/tmp/tree/locked", 0o755);
    host.create_file("/tmp/tree/locked/pinned", b"x", 0o644);
    host.create_dir("/tmp/tree/other", 0o755);
    host.create_file("/tmp/tree/other/file", b"y", 0o644);
    let session = session(&host).await?;
    let fs = session.fs();
    fs.chmod("/tmp/tree/locked", 0o555).await?;

    let err = fs.remove_tree("/tmp/tree", DEFAULT_MAX_DEPTH).await.unwrap_err();
    assert!(err.is_permission_denied());
    assert!(host.exists("/tmp/tree/locked/pinned"));
    assert!(host.exists("/tmp/tree"));
    Ok(())
}

#[tokio::test]
async fn remove_tree_reports_depth_limit() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    host.create_dir("/tmp/a/b/c/d", 0o755);
    let session = session(&host).await?;

    let err = session.fs().remove_tree("/tmp/a", 3).await.unwrap_err();
    assert!(matches!(err, Error::DepthExceeded { max_depth: 3, .. }));
    assert!(host.exists("/tmp/a/b/c/d"));
    Ok(())
}

#[tokio::test]
async fn missing_subsystem_fails_every_operation() -> anyhow::Result<()> {
    let host = MemoryHost::new();
    host.set_subsystem_available(false);
    let session = session(&host).await?;
    let fs = session.fs();

    assert!(matches!(fs.stat("/").await, Err(Error::SubsystemUnavailable(_))));
    assert!(matches!(
        fs.read_chunked("/etc/hostname", |_| {}, 0).await,
        Err(Error::SubsystemUnavailable(_))
    ));
    assert!(matches!(
        fs.make_dir("/tmp/x", DEFAULT_DIR_MODE).await,
        Err(Error::SubsystemUnavailable(_))
    ));
    assert!(matches!(
        fs.remove_tree("/tmp", DEFAULT_MAX_DEPTH).await,
        Err(Error::SubsystemUnavailable(_))
    ));

    // exec does not need the subsystem
    assert_eq!(session.execute("whoami", None).await?, "deploy");
    Ok(())
}
