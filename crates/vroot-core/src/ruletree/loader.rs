//! Compile a TOML rules file into a rule tree file

use super::RuleTree;
use super::layout::DEFAULT_CAPACITY;
use crate::config::RuleSetDef;
use crate::error::VrootResult;
use std::path::Path;
use tracing::info;

/// Parse `rules_path` and write a fresh tree to `tree_path`.
///
/// Returns the number of top-level rules stored. The tree is written to a
/// temporary file next to `tree_path` and renamed into place, so readers
/// never map a half-built tree.
pub fn compile_rules_file(rules_path: &Path, tree_path: &Path) -> VrootResult<usize> {
    let specs = RuleSetDef::from_file(rules_path)?.to_specs()?;

    let staging = tree_path.with_extension("bin.tmp");
    {
        let mut tree = RuleTree::create(&staging, DEFAULT_CAPACITY)?;
        tree.load_rules(&specs)?;
        tree.flush()?;
    }
    std::fs::rename(&staging, tree_path)?;

    info!(
        "Compiled {} rules from {} into {}",
        specs.len(),
        rules_path.display(),
        tree_path.display()
    );
    Ok(specs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compile_and_open() {
        let dir = TempDir::new().unwrap();
        let rules = dir.path().join("rules.toml");
        std::fs::write(
            &rules,
            "[[rules]]\ndir = \"/usr\"\nmap_to = \"/opt/t\"\n\n[[rules]]\ndir = \"/\"\nuse_orig_path = true\n",
        )
        .unwrap();
        let tree_path = dir.path().join("RuleTree.bin");

        assert_eq!(compile_rules_file(&rules, &tree_path).unwrap(), 2);
        assert!(!dir.path().join("RuleTree.bin.tmp").exists());

        let tree = RuleTree::open_read_only(&tree_path).unwrap();
        let stored = tree.rules(tree.root_list()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].action_path, Some("/opt/t"));
    }

    #[test]
    fn test_invalid_rules_leave_no_tree() {
        let dir = TempDir::new().unwrap();
        let rules = dir.path().join("rules.toml");
        std::fs::write(&rules, "[[rules]]\ndir = \"/usr\"\n").unwrap();
        let tree_path = dir.path().join("RuleTree.bin");

        assert!(compile_rules_file(&rules, &tree_path).is_err());
        assert!(!tree_path.exists());
    }
}
