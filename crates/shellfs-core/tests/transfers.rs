//! Content movement: streams, write-back, staging and commit.

use std::sync::Arc;

use shellfs_client::{MemoryTransport, RemoteTransport};
use shellfs_core::{FsConfig, FsError, LocalFile, RemoteFileSystem, RemotePath};
use tempfile::TempDir;

struct Fixture {
    host: Arc<MemoryTransport>,
    fs: Arc<RemoteFileSystem>,
    staging: TempDir,
}

fn setup(root: &str) -> Fixture {
    let host = Arc::new(MemoryTransport::new());
    let staging = TempDir::new().unwrap();
    let mut config = FsConfig::new("memory", root);
    config.staging_dir = Some(staging.path().to_path_buf());
    let transport: Arc<dyn RemoteTransport> = host.clone();
    let fs = Arc::new(RemoteFileSystem::with_transport(transport, &config).unwrap());
    Fixture { host, fs, staging }
}

fn uploads(host: &MemoryTransport) -> usize {
    host.transfers().iter().filter(|t| t.starts_with("upload ")).count()
}

// ============================================================================
// Streams
// ============================================================================

#[tokio::test]
async fn test_read_whole_file() {
    let fx = setup("/home/u");
    fx.host.write_file("/home/u/a.txt", "hello world");

    let data = fx.fs.read_to_vec(&RemotePath::from("a.txt")).await.unwrap();
    assert_eq!(data, b"hello world");

    let mut sink: Vec<u8> = Vec::new();
    fx.fs
        .to_output_stream(&RemotePath::from("a.txt"), &mut sink)
        .await
        .unwrap();
    assert_eq!(sink, b"hello world");

    let mut reader = fx.fs.open_reader(&RemotePath::from("a.txt")).await.unwrap();
    let mut text = String::new();
    std::io::Read::read_to_string(&mut reader, &mut text).unwrap();
    assert_eq!(text, "hello world");
}

#[tokio::test]
async fn test_read_directory_is_rejected() {
    let fx = setup("/");
    fx.host.mkdir("/var/log");

    let err = fx.fs.read_to_vec(&RemotePath::from("/var/log")).await.unwrap_err();
    assert!(matches!(err, FsError::IsADirectory(ref p) if p == "/var/log"));
    assert!(fx.host.transfers().is_empty());
}

#[tokio::test]
async fn test_input_stream_keeps_mode_of_existing_file() {
    let fx = setup("/");
    fx.host.write_file("/etc/app.conf", "old");
    fx.host.set_mode("/etc/app.conf", 0o600);

    let mut source: &[u8] = b"key = value\n";
    fx.fs
        .from_input_stream(&RemotePath::from("/etc/app.conf"), &mut source, 12)
        .await
        .unwrap();
    assert_eq!(fx.host.read_file("/etc/app.conf").unwrap(), b"key = value\n");
    assert_eq!(fx.host.mode("/etc/app.conf"), Some(0o600));
    assert_eq!(fx.host.command_count("touch"), 0);
}

#[tokio::test]
async fn test_input_stream_creates_missing_file() {
    let fx = setup("/");
    fx.host.mkdir("/tmp");

    let mut source: &[u8] = b"abc";
    fx.fs
        .from_input_stream(&RemotePath::from("/tmp/fresh"), &mut source, 3)
        .await
        .unwrap();
    assert_eq!(fx.host.read_file("/tmp/fresh").unwrap(), b"abc");
    assert_eq!(fx.host.command_count("touch"), 1);
}

// ============================================================================
// Write-back stream
// ============================================================================

#[tokio::test]
async fn test_write_back_replaces_whole_content() {
    let fx = setup("/data");
    fx.host.mkdir("/data");
    let mut stream = fx.fs.output_stream(&RemotePath::from("out.bin"));

    stream.write(b"0123456789").unwrap();
    assert_eq!(uploads(&fx.host), 0);
    stream.flush().await.unwrap();
    assert_eq!(fx.host.read_file("/data/out.bin").unwrap().len(), 10);

    stream.write(b"abc").unwrap();
    stream.flush().await.unwrap();
    assert_eq!(fx.host.read_file("/data/out.bin").unwrap(), b"0123456789abc");
    assert_eq!(uploads(&fx.host), 2);
    assert_eq!(fx.host.command_count("touch"), 1);
}

#[tokio::test]
async fn test_write_back_close() {
    let fx = setup("/");
    fx.host.mkdir("/tmp");
    let mut stream = fx.fs.output_stream(&RemotePath::from("/tmp/log"));

    stream.write(b"line\n").unwrap();
    stream.close().await.unwrap();
    assert_eq!(fx.host.read_file("/tmp/log").unwrap(), b"line\n");

    stream.close().await.unwrap();
    assert_eq!(uploads(&fx.host), 1);
    assert!(matches!(stream.write(b"more"), Err(FsError::Io(_))));
}

// ============================================================================
// Staging and commit
// ============================================================================

#[tokio::test]
async fn test_localize_mirrors_remote_layout() {
    let fx = setup("/home/u");
    fx.host.write_file("/home/u/docs/plan.md", "# plan");

    let local = fx.fs.localize(&RemotePath::from("docs/plan.md")).await.unwrap();
    assert_eq!(local, fx.staging.path().join("home/u/docs/plan.md"));
    assert_eq!(std::fs::read(&local).unwrap(), b"# plan");
    assert_eq!(local, fx.fs.staging_path(&RemotePath::from("/home/u/docs/plan.md")));
}

#[tokio::test]
async fn test_localize_downloads_normalized_path() {
    let fx = setup("/");
    fx.host.write_file("/a/x", "x");
    fx.host.mkdir("/a/b");

    let local = fx.fs.localize(&RemotePath::from("/a/b/..")).await.unwrap();
    assert_eq!(local, fx.staging.path().join("a"));
    assert_eq!(fx.host.transfers(), vec!["download /a".to_string()]);
    assert_eq!(std::fs::read(local.join("x")).unwrap(), b"x");
}

#[tokio::test]
async fn test_localize_missing_is_not_found() {
    let fx = setup("/");
    let err = fx.fs.localize(&RemotePath::from("/nope")).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound { .. }));
    assert!(fx.host.transfers().is_empty());
}

#[tokio::test]
async fn test_commit_file() {
    let fx = setup("/");
    fx.host.write_file("/srv/index.html", "v1");

    let local = fx.fs.localize(&RemotePath::from("/srv/index.html")).await.unwrap();
    std::fs::write(&local, "v2").unwrap();
    fx.fs
        .commit_file_to(&RemotePath::from("/srv/index.html"), &local)
        .await
        .unwrap();
    assert_eq!(fx.host.read_file("/srv/index.html").unwrap(), b"v2");
}

#[tokio::test]
async fn test_commit_folder_requires_recursive() {
    let fx = setup("/");
    fx.host.write_file("/proj/src/lib.rs", "pub fn x() {}");

    let file = LocalFile::open(Arc::clone(&fx.fs), &RemotePath::from("/proj"))
        .await
        .unwrap();
    assert!(file.local_path().join("src/lib.rs").is_file());

    std::fs::write(file.local_path().join("README"), "read me").unwrap();
    assert!(matches!(file.commit(false).await, Err(FsError::IllegalArgument(_))));
    file.commit(true).await.unwrap();
    assert_eq!(fx.host.read_file("/proj/README").unwrap(), b"read me");
    assert_eq!(fx.host.read_file("/proj/src/lib.rs").unwrap(), b"pub fn x() {}");
}

// ============================================================================
// Local file adapter
// ============================================================================

#[tokio::test]
async fn test_local_file_writer_commits_on_close() {
    let fx = setup("/home/u");
    fx.host.write_file("/home/u/todo.txt", "old");

    let file = LocalFile::open(Arc::clone(&fx.fs), &RemotePath::from("todo.txt"))
        .await
        .unwrap();
    assert_eq!(file.remote(), &RemotePath::from("/home/u/todo.txt"));

    let writer = file.open_writer(false).await.unwrap();
    writer.write_all(b"new ").await.unwrap();
    writer.write_all(b"list").await.unwrap();
    assert_eq!(fx.host.read_file("/home/u/todo.txt").unwrap(), b"old");

    writer.close().await.unwrap();
    assert_eq!(fx.host.read_file("/home/u/todo.txt").unwrap(), b"new list");

    writer.close().await.unwrap();
    assert_eq!(uploads(&fx.host), 1);
    assert!(matches!(writer.write_all(b"late").await, Err(FsError::Io(_))));
}

#[tokio::test]
async fn test_local_file_writer_append() {
    let fx = setup("/");
    fx.host.write_file("/var/log/app.log", "one\n");

    let file = LocalFile::open(Arc::clone(&fx.fs), &RemotePath::from("/var/log/app.log"))
        .await
        .unwrap();
    let writer = file.open_writer(true).await.unwrap();
    writer.write_all(b"two\n").await.unwrap();
    writer.close().await.unwrap();
    assert_eq!(fx.host.read_file("/var/log/app.log").unwrap(), b"one\ntwo\n");
}

#[tokio::test]
async fn test_staged_file_creates_remote_on_close() {
    let fx = setup("/");
    fx.host.mkdir("/out");

    let file = LocalFile::staged(Arc::clone(&fx.fs), &RemotePath::from("/out/report.csv"));
    assert!(fx.host.transfers().is_empty());

    let writer = file.open_writer(false).await.unwrap();
    writer.write_all(b"a,b\n1,2\n").await.unwrap();
    writer.close().await.unwrap();
    assert_eq!(fx.host.read_file("/out/report.csv").unwrap(), b"a,b\n1,2\n");
}

#[tokio::test]
async fn test_failed_commit_is_retried_by_next_close() {
    let fx = setup("/");
    fx.host.write_file("/f", "old");

    let file = LocalFile::open(Arc::clone(&fx.fs), &RemotePath::from("/f"))
        .await
        .unwrap();
    let writer = file.open_writer(false).await.unwrap();
    writer.write_all(b"new").await.unwrap();

    fx.host.fail_next(1);
    let err = writer.close().await.unwrap_err();
    assert!(matches!(err, FsError::Transport(_)), "got {err:?}");
    assert_eq!(fx.host.read_file("/f").unwrap(), b"old");
    assert!(matches!(writer.write_all(b"late").await, Err(FsError::Io(_))));

    writer.close().await.unwrap();
    assert_eq!(fx.host.read_file("/f").unwrap(), b"new");
    assert_eq!(uploads(&fx.host), 1);

    writer.close().await.unwrap();
    assert_eq!(uploads(&fx.host), 1);
}

#[tokio::test]
async fn test_concurrent_close_commits_once() {
    let fx = setup("/");
    fx.host.write_file("/f", "");

    let file = LocalFile::open(Arc::clone(&fx.fs), &RemotePath::from("/f"))
        .await
        .unwrap();
    let writer = Arc::new(file.open_writer(false).await.unwrap());
    writer.write_all(b"payload").await.unwrap();

    let (a, b) = tokio::join!(writer.close(), writer.close());
    a.unwrap();
    b.unwrap();
    assert_eq!(uploads(&fx.host), 1);
    assert_eq!(fx.host.read_file("/f").unwrap(), b"payload");
}
