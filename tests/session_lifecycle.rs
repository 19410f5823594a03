//! A whole session: the daemon compiles the rule tree on INIT, mapping
//! processes open it read-only, and vperm overrides are shared through the
//! daemon.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vroot_core::{
    DaemonState, InterfaceClass, MapFlags, RpcClient, RpcServer, Session, SessionConfig,
    VpermFields,
};

const RULES: &str = r#"
[[rules]]
name = "etc-overlay"
dir = "/etc"
map_to = "/tmp/vroot-overlay"
readonly = true

[[rules]]
dir = "/"
use_orig_path = true
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_init_then_map_from_compiled_tree() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let config = SessionConfig::new(dir.path()).with_binary_name("make");
    std::fs::write(config.rules_path(), RULES)?;

    let server = RpcServer::bind(DaemonState::new(config.clone()))?;
    let socket = server.socket_path().to_path_buf();
    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(server.run(shutdown.clone()));

    let status = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let mut client = RpcClient::connect(&socket, Some(Duration::from_secs(5)))?;
        let status = client.init()?;
        client.vperm_set_mode(3, 9, 0o100644, 0o100600, 0)?;
        Ok(status)
    })
    .await??;
    assert!(status.contains("2 rules"));

    // a second process of the same session
    let session = Arc::new(Session::open(config.clone())?);
    assert!(session.tree().is_read_only());

    let result = session.map_path("open", "/etc/passwd", MapFlags::empty(), InterfaceClass::OPEN);
    assert_eq!(result.host_path.as_deref(), Some("/tmp/vroot-overlay/etc/passwd"));
    assert!(result.readonly);
    assert_eq!(result.rule_name.as_deref(), Some("etc-overlay"));

    let socket = config.socket_path();
    let info = tokio::task::spawn_blocking(move || {
        RpcClient::connect(&socket, Some(Duration::from_secs(5)))?.get_file_info(3, 9)
    })
    .await??;
    let info = info.expect("override recorded");
    assert_eq!(info.active, VpermFields::MODE);
    assert_eq!(info.virt_mode, 0o100600);

    shutdown.cancel();
    daemon.await??;
    Ok(())
}

#[test]
fn test_chroot_survives_into_child_config() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let jail = dir.path().join("jail");
    std::fs::create_dir_all(jail.join("var"))?;
    let config = SessionConfig::new(dir.path());
    std::fs::write(config.rules_path(), RULES)?;
    vroot_core::compile_rules_file(&config.rules_path(), &config.rule_tree_path())?;

    let parent = Session::open(config.clone())?;
    parent.chroot(&jail.to_string_lossy())?;
    let inherited = parent.chroot_path().expect("chroot active");

    // a child process restores the chroot from its configuration
    let child = Session::open(config.with_chroot(inherited))?;
    let host = child
        .map_path("stat", "/var", MapFlags::empty(), InterfaceClass::STAT)
        .into_result()?;
    assert_eq!(host, format!("{}/var", jail.display()));
    Ok(())
}
