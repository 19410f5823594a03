//! `vroot ctl`: one-shot commands against a running daemon

use crate::args::{CtlAction, SessionArgs};
use crate::console::CliConsole;
use anyhow::Context;
use std::time::Duration;
use vroot_core::{InodeSimu, RpcClient, SessionConfig};

pub async fn run(args: &SessionArgs, timeout_ms: u64, action: CtlAction) -> anyhow::Result<()> {
    let socket = SessionConfig::new(&args.session).socket_path();
    let timeout = Some(Duration::from_millis(timeout_ms));

    // the client is blocking
    tokio::task::spawn_blocking(move || {
        let mut client = RpcClient::connect(&socket, timeout)
            .with_context(|| format!("No daemon at {}", socket.display()))?;
        execute(&mut client, &action)
    })
    .await?
}

fn execute(client: &mut RpcClient, action: &CtlAction) -> anyhow::Result<()> {
    let console = CliConsole::default();
    match *action {
        CtlAction::Ping => {
            client.ping()?;
            console.success("pong");
        }
        CtlAction::Init => {
            let status = client.init()?;
            console.success(&status);
        }
        CtlAction::Get { dev, ino } => match client.get_file_info(dev, ino)? {
            Some(info) => {
                console.print_header(&format!("inode {}:{}", dev, ino));
                console.print_fields(&describe(&info));
            }
            None => console.warn(&format!("No overrides for inode {}:{}", dev, ino)),
        },
        CtlAction::Clear { dev, ino } => {
            client.vperm_clear(dev, ino)?;
            console.success(&format!("Cleared inode {}:{}", dev, ino));
        }
        CtlAction::SetIds { dev, ino, uid, gid } => {
            if uid.is_none() && gid.is_none() {
                anyhow::bail!("set-ids needs --uid, --gid or both");
            }
            client.vperm_set_ids(dev, ino, uid, gid)?;
            console.success(&format!("Updated owner of inode {}:{}", dev, ino));
        }
        CtlAction::ReleaseIds { dev, ino } => {
            client.vperm_release_ids(dev, ino)?;
            console.success(&format!("Released owner of inode {}:{}", dev, ino));
        }
    }
    Ok(())
}

/// Active override fields of a record, for display
fn describe(info: &InodeSimu) -> Vec<(&'static str, String)> {
    use vroot_core::VpermFields;

    let mut fields = Vec::new();
    if info.active.contains(VpermFields::UID) {
        fields.push(("uid", info.uid.to_string()));
    }
    if info.active.contains(VpermFields::GID) {
        fields.push(("gid", info.gid.to_string()));
    }
    if info.active.contains(VpermFields::MODE) {
        fields.push(("mode", format!("{:o} (real {:o})", info.virt_mode, info.real_mode)));
        fields.push(("suid/sgid", format!("{:o}", info.suid_sgid)));
    }
    if info.active.contains(VpermFields::DEV_NODE) {
        fields.push(("device", format!("type {:o} rdev {:#x}", info.devnode_type, info.rdev)));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lists_active_fields_only() {
        let info = InodeSimu::new(1, 2).with_ids(Some(0), None);
        assert_eq!(describe(&info), vec![("uid", "0".to_string())]);

        let info = info.with_dev_node(0o020000, 0x0103);
        let fields = describe(&info);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1], ("device", "type 20000 rdev 0x103".to_string()));
    }
}
