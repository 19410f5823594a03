//! `vroot map`: forward-map virtual paths

use super::{call_classes, open_session};
use crate::args::MapArgs;
use crate::console::CliConsole;
use anyhow::bail;
use serde_json::json;
use vroot_core::error::UnifiedError;
use vroot_core::{MapFlags, MappingResult};

pub fn run(args: &MapArgs) -> anyhow::Result<()> {
    let session = open_session(&args.mapping)?;
    let class = call_classes(&args.mapping.classes, &args.func)?;
    let flags = if args.no_follow {
        MapFlags::DONT_RESOLVE_FINAL_SYMLINK
    } else {
        MapFlags::empty()
    };

    let console = CliConsole::default();
    let mut failed = 0;
    for path in &args.paths {
        let result = session.map_path(&args.func, path, flags, class);
        if !result.is_ok() {
            failed += 1;
        }
        if args.mapping.json {
            console.print_json(&result_json(&result));
        } else {
            print_result(&console, &result);
        }
    }

    if failed > 0 {
        bail!("{} of {} paths could not be mapped", failed, args.paths.len());
    }
    Ok(())
}

fn print_result(console: &CliConsole, result: &MappingResult) {
    if let Some(error) = &result.error {
        console.error(&format!("{}: {}", result.virtual_path, error));
        return;
    }
    let host = result.host_path.as_deref().unwrap_or(&result.virtual_path);
    console.print_mapping(&result.virtual_path, host, &notes(result));
}

fn notes(result: &MappingResult) -> Vec<String> {
    let mut notes = Vec::new();
    if result.readonly {
        notes.push("readonly".to_string());
    }
    if let Some(policy) = &result.exec_policy {
        notes.push(format!("policy={}", policy));
    }
    if let Some(rule) = &result.rule_name {
        notes.push(format!("rule={}", rule));
    }
    notes
}

fn result_json(result: &MappingResult) -> serde_json::Value {
    json!({
        "virtual": result.virtual_path,
        "host": result.host_path,
        "readonly": result.readonly,
        "exec_policy": result.exec_policy,
        "rule": result.rule_name,
        "virtual_cwd": result.virtual_cwd,
        "error": result.error.as_ref().map(|e| e.error_code()),
        "errno": result.errno(),
    })
}
