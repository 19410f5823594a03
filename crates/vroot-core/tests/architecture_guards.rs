//! Source-level rules vroot-core keeps:
//! - every error enum derives `thiserror::Error` and implements `UnifiedError`
//! - failures are typed, never `Result<_, String>`
//! - locks come from parking_lot
//! - library code propagates instead of calling `unwrap()`/`expect()`

use std::fs;
use std::path::{Path, PathBuf};

/// Production part of one vroot-core source file
struct Source {
    path: String,
    lines: Vec<String>,
}

impl Source {
    /// Lines outside comments, paired with their 1-based number
    fn code(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.starts_with("//"))
    }
}

fn src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("src")
}

fn rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        if path.is_dir() {
            rust_files(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            out.push(path);
        }
    }
}

/// Every non-test source file, cut at its `#[cfg(test)]` module
fn production_sources() -> Vec<Source> {
    let root = src_dir();
    let mut files = Vec::new();
    rust_files(&root, &mut files);
    files.sort();

    files
        .into_iter()
        .filter(|p| !p.to_string_lossy().ends_with("tests.rs"))
        .map(|p| {
            let text = fs::read_to_string(&p).unwrap();
            let lines = text
                .lines()
                .take_while(|l| l.trim() != "#[cfg(test)]")
                .map(str::to_string)
                .collect();
            Source {
                path: p.strip_prefix(&root).unwrap().to_string_lossy().into_owned(),
                lines,
            }
        })
        .collect()
}

fn report(rule: &str, hint: &str, hits: &[String]) {
    if !hits.is_empty() {
        panic!("\n[{}] {}\n\n  {}\n", rule, hint, hits.join("\n  "));
    }
}

#[test]
fn test_sources_are_found() {
    let sources = production_sources();
    for expected in ["lib.rs", "error/types.rs", "mapping/resolver.rs", "rpc/server.rs"] {
        assert!(
            sources.iter().any(|s| s.path == expected),
            "{} not scanned",
            expected
        );
    }
}

#[test]
fn test_error_enums_derive_thiserror_and_unify() {
    let sources = production_sources();
    let mut hits = Vec::new();

    for source in &sources {
        let lines: Vec<(usize, &str)> = source.code().collect();
        for (idx, (number, line)) in lines.iter().enumerate() {
            if line.starts_with("impl") && line.contains("Display for") && line.contains("Error") {
                hits.push(format!("{}:{} hand-written Display: {}", source.path, number, line));
            }
            let Some(name) = line
                .strip_prefix("pub enum ")
                .and_then(|rest| rest.split_whitespace().next())
                .filter(|name| name.ends_with("Error"))
            else {
                continue;
            };
            let derived = idx > 0 && lines[idx - 1].1.contains("derive(Error");
            if !derived {
                hits.push(format!("{}:{} {} lacks #[derive(Error)]", source.path, number, name));
            }
            let unified = format!("impl UnifiedError for {} ", name);
            if !sources
                .iter()
                .any(|s| s.code().any(|(_, l)| l.starts_with(&unified)))
            {
                hits.push(format!("{}:{} {} has no UnifiedError impl", source.path, number, name));
            }
        }
    }
    report(
        "errors",
        "Error enums derive thiserror::Error and implement UnifiedError (error_code, errno).",
        &hits,
    );
}

#[test]
fn test_no_string_errors() {
    let mut hits = Vec::new();
    for source in production_sources() {
        for (number, line) in source.code() {
            let stringly = line
                .match_indices("Result<")
                .any(|(at, _)| line[at..].contains(", String>"));
            if stringly {
                hits.push(format!("{}:{} {}", source.path, number, line));
            }
        }
    }
    report("errors", "Use VrootResult or a typed error instead of String.", &hits);
}

#[test]
fn test_locks_come_from_parking_lot() {
    let mut hits = Vec::new();
    for source in production_sources() {
        for (number, line) in source.code() {
            let std_lock = ["std::sync::Mutex", "std::sync::RwLock", "sync::{Mutex", "sync::{RwLock"]
                .iter()
                .any(|pattern| line.contains(pattern));
            if std_lock {
                hits.push(format!("{}:{} {}", source.path, number, line));
            }
        }
    }
    report("locks", "Use parking_lot::Mutex / parking_lot::RwLock.", &hits);
}

#[test]
fn test_library_code_does_not_panic_on_errors() {
    let mut hits = Vec::new();
    for source in production_sources() {
        for (number, line) in source.code() {
            if line.contains(".unwrap()") || line.contains(".expect(") {
                hits.push(format!("{}:{} {}", source.path, number, line));
            }
        }
    }
    report("panics", "Propagate with `?` instead of unwrap()/expect().", &hits);
}
