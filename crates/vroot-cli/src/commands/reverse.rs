//! `vroot reverse`: map host paths back to virtual paths

use super::{call_classes, open_session};
use crate::args::ReverseArgs;
use crate::console::CliConsole;
use serde_json::json;

/// Printed when no virtual path maps to a host path
const NO_MAPPING: &str = "<none>";

pub fn run(args: &ReverseArgs) -> anyhow::Result<()> {
    let session = open_session(&args.mapping)?;
    let class = call_classes(&args.mapping.classes, &args.func)?;
    let console = CliConsole::default();

    for path in &args.paths {
        let found = session.reverse_path_with(&args.func, path, class, !args.keep_chroot_prefix);
        if args.mapping.json {
            console.print_json(&json!({ "host": path, "virtual": found }));
        } else {
            console.print_mapping(path, found.as_deref().unwrap_or(NO_MAPPING), &[]);
        }
    }
    Ok(())
}
