//! Orchestrator behavior against an in-memory remote host.
//!
//! Every test drives a [`RemoteFileSystem`] over a [`MemoryTransport`] and
//! checks both the results and the commands that reached the "remote" side.

use std::sync::Arc;

use shellfs_client::{ExecOutput, MemoryTransport, RemoteTransport, TransportError};
use shellfs_core::{FsConfig, FsError, PrincipalKind, RemoteFileSystem, RemotePath};

// ============================================================================
// Shared test setup
// ============================================================================

fn setup(root: &str) -> (Arc<MemoryTransport>, RemoteFileSystem) {
    let host = Arc::new(MemoryTransport::new());
    let transport: Arc<dyn RemoteTransport> = host.clone();
    let config = FsConfig::new("memory", root);
    let fs = RemoteFileSystem::with_transport(transport, &config).expect("valid config");
    (host, fs)
}

fn failed(status: u32, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
        exit_status: Some(status),
    }
}

// ============================================================================
// Attributes and cache
// ============================================================================

#[tokio::test]
async fn test_attributes_of_regular_file() {
    let (host, fs) = setup("/home/alice");
    host.write_file("/home/alice/notes.txt", "twelve bytes");
    host.set_owner("/home/alice/notes.txt", "alice", "staff");
    host.set_mode("/home/alice/notes.txt", 0o640);

    let attrs = fs.attributes(&RemotePath::from("notes.txt")).await.unwrap();
    assert!(attrs.is_regular_file());
    assert_eq!(attrs.size(), 12);
    assert_eq!(attrs.owner(), "alice");
    assert_eq!(attrs.group(), "staff");
    assert_eq!(attrs.permissions().mode(), 0o640);
    assert!(attrs.creation_time().is_none());

    assert_eq!(host.command_count("ls"), 2);
    assert!(fs.attr_cache().contains("/home/alice/notes.txt"));
}

#[tokio::test]
async fn test_cached_attributes_skip_remote() {
    let (host, fs) = setup("/");
    host.mkdir("/srv");
    let path = RemotePath::from("/srv");

    let first = fs.attributes(&path).await.unwrap();
    let second = fs.attributes(&path).await.unwrap();
    assert!(first.is_directory());
    assert_eq!(first, second);
    assert_eq!(host.command_count("ls"), 2);
}

#[tokio::test]
async fn test_symlink_reported_not_followed() {
    let (host, fs) = setup("/");
    host.write_file("/data/real", "x");
    host.symlink("/data/link", "/data/real");

    let attrs = fs.attributes(&RemotePath::from("/data/link")).await.unwrap();
    assert!(attrs.is_symbolic_link());
}

#[tokio::test]
async fn test_short_listing_is_format_error_and_not_cached() {
    let (host, fs) = setup("/");
    host.write_file("/f", "");
    host.script(
        "ls -ld ",
        ExecOutput::stdout("-rw-r--r-- 1 root 0 2024-01-01 12:00:00 /f\n"),
    );

    let err = fs.attributes(&RemotePath::from("/f")).await.unwrap_err();
    assert!(matches!(err, FsError::Format { .. }), "got {err:?}");
    assert!(fs.attr_cache().is_empty());
}

#[tokio::test]
async fn test_missing_without_create_is_not_found() {
    let (host, fs) = setup("/");
    let err = fs.attributes(&RemotePath::from("/ghost")).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound { ref path } if path == "/ghost"));
    assert_eq!(host.command_count("touch"), 0);
    assert!(!fs.exists(&RemotePath::from("/ghost")).await.unwrap());
}

#[tokio::test]
async fn test_create_if_missing_touches_once() {
    let (host, fs) = setup("/");
    host.mkdir("/tmp");

    let attrs = fs
        .get_file_attributes(&RemotePath::from("/tmp/new"), true)
        .await
        .unwrap();
    assert!(attrs.is_regular_file());
    assert_eq!(attrs.size(), 0);
    assert_eq!(host.command_count("touch"), 1);
    assert!(host.exists("/tmp/new"));
}

#[tokio::test]
async fn test_create_if_missing_second_miss_fails() {
    let (host, fs) = setup("/");

    let err = fs
        .get_file_attributes(&RemotePath::from("/no/parent/file"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound { .. }));
    assert_eq!(host.command_count("touch"), 1);
    assert_eq!(host.command_count("ls"), 2);
}

// ============================================================================
// Principals
// ============================================================================

#[tokio::test]
async fn test_lookup_user_via_id() {
    let (host, fs) = setup("/");
    host.add_user("alice", 1000, 1000);

    let alice = fs.lookup_user("alice").await.unwrap();
    assert_eq!(alice.id(), 1000);
    assert_eq!(alice.name(), "alice");
    assert_eq!(alice.kind(), PrincipalKind::User);
    assert_eq!(host.command_count("getent"), 0);
}

#[tokio::test]
async fn test_lookup_user_falls_back_to_passwd() {
    let (host, fs) = setup("/");
    host.script("id root", failed(1, "id: cannot run\n"));

    let root = fs.lookup_user("root").await.unwrap();
    assert_eq!(root.id(), 0);
    assert_eq!(host.command_count("getent"), 1);
}

#[tokio::test]
async fn test_lookup_unknown_principals() {
    let (host, fs) = setup("/");
    host.add_group("wheel", 10);

    assert!(matches!(
        fs.lookup_user("ghost").await,
        Err(FsError::PrincipalNotFound { ref name }) if name == "ghost"
    ));
    assert!(matches!(
        fs.lookup_group("nogroup").await,
        Err(FsError::PrincipalNotFound { .. })
    ));
    let wheel = fs.lookup_group("wheel").await.unwrap();
    assert_eq!(wheel.id(), 10);
    assert_eq!(wheel.kind(), PrincipalKind::Group);
}

// ============================================================================
// Remote commands
// ============================================================================

#[tokio::test]
async fn test_md5_parses_digest() {
    let (host, fs) = setup("/");
    host.write_file("/empty", "");
    host.script(
        "md5sum ",
        ExecOutput::stdout("d41d8cd98f00b204e9800998ecf8427e  /empty\n"),
    );

    let digest = fs.md5(&RemotePath::from("/empty")).await.unwrap();
    assert_eq!(digest, "d41d8cd98f00b204e9800998ecf8427e");
}

#[tokio::test]
async fn test_md5_errors() {
    let (host, fs) = setup("/");
    host.mkdir("/dir");

    assert!(matches!(
        fs.md5(&RemotePath::from("/dir")).await,
        Err(FsError::IsADirectory(_))
    ));
    assert!(matches!(
        fs.md5(&RemotePath::from("/missing")).await,
        Err(FsError::NotFound { .. })
    ));

    host.script("md5sum ", ExecOutput::stdout("d41d8cd98f00b204e9800998ecf8427e\n"));
    assert!(matches!(
        fs.md5(&RemotePath::from("/dir")).await,
        Err(FsError::Format { .. })
    ));
}

#[tokio::test]
async fn test_copy_and_move() {
    let (host, fs) = setup("/work");
    host.write_file("/work/a.txt", "alpha");
    host.mkdir("/work/out");

    fs.copy(&RemotePath::from("a.txt"), &RemotePath::from("out"))
        .await
        .unwrap();
    assert_eq!(host.read_file("/work/out/a.txt").unwrap(), b"alpha");

    fs.move_path(&RemotePath::from("a.txt"), &RemotePath::from("b.txt"))
        .await
        .unwrap();
    assert!(!host.exists("/work/a.txt"));
    assert_eq!(host.read_file("/work/b.txt").unwrap(), b"alpha");

    let err = fs
        .copy(&RemotePath::from("missing"), &RemotePath::from("out"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Command { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_real_path_follow_links() {
    let (host, fs) = setup("/");
    host.write_file("/srv/real/f", "1");
    host.symlink("/srv/alias", "real");

    let real = fs
        .to_real_path(&RemotePath::from("/srv/alias/f"), true)
        .await
        .unwrap();
    assert_eq!(real, RemotePath::from("/srv/real/f"));

    assert!(matches!(
        fs.to_real_path(&RemotePath::from("/srv/alias/none"), true).await,
        Err(FsError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_real_path_without_following() {
    let (host, fs) = setup("/home/u");
    host.write_file("/home/u/docs/a", "1");
    host.write_file("/home/u/b", "2");

    let real = fs
        .to_real_path(&RemotePath::from("./docs/../b"), false)
        .await
        .unwrap();
    assert_eq!(real, RemotePath::from("/home/u/b"));
    assert_eq!(host.command_count("readlink"), 0);

    assert!(matches!(
        fs.to_real_path(&RemotePath::from("docs/../nothing"), false).await,
        Err(FsError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_mount_entries_and_file_stores() {
    let (host, fs) = setup("/");
    let stores = fs.file_stores().await.unwrap();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].dir, "/");
    assert_eq!(stores[0].fstype, "ext4");

    host.script(
        "cat /proc/self/mountinfo",
        ExecOutput::stdout(
            "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n40 22 0:45 / /proc rw - proc proc rw,ignore\n",
        ),
    );
    assert_eq!(fs.mount_entries().await.unwrap().len(), 2);
    assert_eq!(fs.file_stores().await.unwrap().len(), 1);
}

// ============================================================================
// Path-level surface
// ============================================================================

#[tokio::test]
async fn test_path_surface_needs_no_remote() {
    let (host, fs) = setup("/home/u");

    assert_eq!(fs.get_path("a", &["b", "c"]), RemotePath::from("a/b/c"));
    assert_eq!(fs.root_directories(), vec![RemotePath::root()]);
    assert_eq!(fs.separator(), "/");
    assert!(!fs.is_read_only());
    assert!(fs.supported_file_attribute_views().contains(&"posix"));
    assert_eq!(
        fs.to_absolute_path(&RemotePath::from("x")),
        RemotePath::from("/home/u/x")
    );

    let matcher = fs.path_matcher("glob:/home/**.txt").unwrap();
    assert!(matcher.matches(&RemotePath::from("/home/u/a.txt")));
    assert!(host.commands().is_empty());
}

#[tokio::test]
async fn test_relative_root_rejected() {
    let host: Arc<dyn RemoteTransport> = Arc::new(MemoryTransport::new());
    let config = FsConfig::new("memory", "home/u");
    assert!(matches!(
        RemoteFileSystem::with_transport(host, &config),
        Err(FsError::Configuration(_))
    ));
}

// ============================================================================
// Transport failures and lifecycle
// ============================================================================

#[tokio::test]
async fn test_transport_failure_propagates() {
    let (host, fs) = setup("/");
    host.write_file("/f", "x");
    host.fail_next(1);

    let err = fs.attributes(&RemotePath::from("/f")).await.unwrap_err();
    assert!(matches!(err, FsError::Transport(TransportError::ChannelFailed(_))));
    assert!(fs.attr_cache().is_empty());

    assert!(fs.attributes(&RemotePath::from("/f")).await.is_ok());
}

#[tokio::test]
async fn test_close() {
    let (_host, fs) = setup("/");
    assert!(fs.is_open());
    fs.close().await.unwrap();
    assert!(!fs.is_open());
    fs.close().await.unwrap();

    let err = fs.attributes(&RemotePath::from("/")).await.unwrap_err();
    assert!(matches!(err, FsError::Transport(TransportError::Closed)));
}
