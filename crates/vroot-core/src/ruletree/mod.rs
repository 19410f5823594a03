//! Offset-addressed rule tree shared by every process of a session
//!
//! The tree lives in a fixed-size memory-mapped region. Objects are appended
//! and never moved or freed, so any offset handed out stays valid for the
//! lifetime of the session. A single writer (the session daemon) appends;
//! other processes map the region read-only and read it without locking.
//!
//! Publication order: an object is fully written before the list slot that
//! references it, and a list's `count` is stored with release ordering after
//! the slot. Readers load `count` with acquire ordering, so they never see a
//! partially written rule.

pub mod layout;
pub mod loader;
pub mod rule;

use crate::error::RuleTreeError;
use crate::mapping::InterfaceClass;
use layout::*;
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use loader::compile_rules_file;
pub use rule::{Action, ActionKind, FsRule, RuleFlags, RuleSpec, SelectorKind};

/// Result alias for rule tree operations
pub type TreeResult<T> = Result<T, RuleTreeError>;

enum Region {
    ReadOnly(Mmap),
    Writable(MmapMut),
}

impl Region {
    fn bytes(&self) -> &[u8] {
        match self {
            Region::ReadOnly(map) => &map[..],
            Region::Writable(map) => &map[..],
        }
    }
}

/// A memory-mapped rule tree
pub struct RuleTree {
    region: Region,
    backing: Option<PathBuf>,
}

impl std::fmt::Debug for RuleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTree")
            .field("backing", &self.backing)
            .field("read_only", &self.is_read_only())
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("rules", &self.rule_count())
            .finish()
    }
}

impl RuleTree {
    /// Create an in-memory tree not backed by a file
    pub fn create_anonymous(capacity: usize) -> TreeResult<Self> {
        let capacity = checked_capacity(capacity)?;
        let map = MmapMut::map_anon(capacity)?;
        let mut tree = Self {
            region: Region::Writable(map),
            backing: None,
        };
        tree.init_header(capacity)?;
        Ok(tree)
    }

    /// Create (or truncate) a file-backed tree opened for writing
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> TreeResult<Self> {
        let path = path.as_ref();
        let capacity = checked_capacity(capacity)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity as u64)?;
        // SAFETY: the file was just created and sized by us; other processes
        // only ever map it read-only and rely on the publication protocol.
        let map = unsafe { MmapMut::map_mut(&file) }?;
        let mut tree = Self {
            region: Region::Writable(map),
            backing: Some(path.to_path_buf()),
        };
        tree.init_header(capacity)?;
        tree.flush()?;
        debug!("Created rule tree {} ({} bytes)", path.display(), capacity);
        Ok(tree)
    }

    /// Map an existing tree read-only
    pub fn open_read_only(path: impl AsRef<Path>) -> TreeResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the region is append-only; bytes below `used` are never rewritten.
        let map = unsafe { Mmap::map(&file) }?;
        let tree = Self {
            region: Region::ReadOnly(map),
            backing: Some(path.to_path_buf()),
        };
        tree.validate_header()?;
        Ok(tree)
    }

    /// Map an existing tree for appending
    pub fn open_writable(path: impl AsRef<Path>) -> TreeResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: see `create`.
        let map = unsafe { MmapMut::map_mut(&file) }?;
        let tree = Self {
            region: Region::Writable(map),
            backing: Some(path.to_path_buf()),
        };
        tree.validate_header()?;
        Ok(tree)
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.region, Region::ReadOnly(_))
    }

    pub fn backing_file(&self) -> Option<&Path> {
        self.backing.as_deref()
    }

    pub fn capacity(&self) -> u32 {
        read_u32(self.bytes(), HDR_CAPACITY)
    }

    /// Bytes in use, header included
    pub fn used(&self) -> u32 {
        load_u32(self.bytes(), HDR_USED)
    }

    /// Offset of the top-level rule list, 0 if no rule was added yet
    pub fn root_list(&self) -> u32 {
        load_u32(self.bytes(), HDR_ROOT_LIST)
    }

    pub fn rule_count(&self) -> u32 {
        load_u32(self.bytes(), HDR_RULE_COUNT)
    }

    /// Flush a file-backed writable map to disk
    pub fn flush(&self) -> TreeResult<()> {
        if let Region::Writable(map) = &self.region {
            if self.backing.is_some() {
                map.flush()?;
            }
        }
        Ok(())
    }

    // ---- writer side ----

    /// Store a string, returning its offset
    pub fn add_string(&mut self, value: &str) -> TreeResult<u32> {
        let (offset, payload) = self.alloc(ObjectKind::String, value.len())?;
        let bytes = self.bytes_mut()?;
        bytes[payload..payload + value.len()].copy_from_slice(value.as_bytes());
        Ok(offset)
    }

    /// Create an empty rule list chunk with room for `capacity` entries
    pub fn new_list(&mut self, capacity: u32) -> TreeResult<u32> {
        let capacity = capacity.max(1);
        let (offset, payload) =
            self.alloc(ObjectKind::RuleList, LIST_SLOTS + 4 * capacity as usize)?;
        let bytes = self.bytes_mut()?;
        write_u32(bytes, payload + LIST_CAPACITY, capacity);
        Ok(offset)
    }

    /// Append `item` to a list, chaining a new chunk when the last one is full
    pub fn list_append(&mut self, list: u32, item: u32) -> TreeResult<()> {
        let mut chunk = list;
        for _ in 0..self.max_chain() {
            let (payload, _) = self.object(chunk, ObjectKind::RuleList)?;
            let capacity = read_u32(self.bytes(), payload + LIST_CAPACITY);
            let count = load_u32(self.bytes(), payload + LIST_COUNT);
            if count < capacity {
                let bytes = self.bytes_mut()?;
                write_u32(bytes, payload + LIST_SLOTS + 4 * count as usize, item);
                store_u32(bytes, payload + LIST_COUNT, count + 1);
                return Ok(());
            }
            let next = load_u32(self.bytes(), payload + LIST_NEXT);
            chunk = if next == 0 {
                let fresh = self.new_list(capacity)?;
                store_u32(self.bytes_mut()?, payload + LIST_NEXT, fresh);
                fresh
            } else {
                next
            };
        }
        Err(RuleTreeError::Corrupt(format!(
            "rule list at offset {} does not terminate",
            list
        )))
    }

    /// Store a rule (and any nested subtree) without linking it into a list
    pub fn add_rule(&mut self, spec: &RuleSpec) -> TreeResult<u32> {
        let selector = self.add_string(&spec.selector)?;
        let action_arg = match &spec.action {
            Action::UseOrigPath | Action::Deny => 0,
            Action::MapTo(p)
            | Action::ReplaceBy(p)
            | Action::SetPath(p)
            | Action::IfExistsThenMapTo(p)
            | Action::IfExistsThenReplaceBy(p) => self.add_string(p)?,
            Action::Subtree(children) => {
                let list = self.new_list(children.len() as u32)?;
                for child in children {
                    let child_offset = self.add_rule(child)?;
                    self.list_append(list, child_offset)?;
                }
                list
            }
        };
        let exec_policy = self.add_optional_string(spec.exec_policy.as_deref())?;
        let binary_name = self.add_optional_string(spec.binary_name.as_deref())?;
        let name = self.add_optional_string(spec.name.as_deref())?;

        let (offset, payload) = self.alloc(ObjectKind::Rule, RULE_RECORD_SIZE)?;
        let bytes = self.bytes_mut()?;
        write_u32(bytes, payload + RULE_SELECTOR_KIND, spec.selector_kind as u32);
        write_u32(bytes, payload + RULE_SELECTOR, selector);
        write_u32(bytes, payload + RULE_ACTION, spec.action.kind() as u32);
        write_u32(bytes, payload + RULE_ACTION_ARG, action_arg);
        write_u32(bytes, payload + RULE_FLAGS, spec.flags.bits());
        write_u32(bytes, payload + RULE_CLASSES, spec.classes.bits());
        write_u32(bytes, payload + RULE_EXEC_POLICY, exec_policy);
        write_u32(bytes, payload + RULE_BINARY_NAME, binary_name);
        write_u32(bytes, payload + RULE_NAME, name);
        let count = load_u32(bytes, HDR_RULE_COUNT);
        store_u32(bytes, HDR_RULE_COUNT, count + 1);
        Ok(offset)
    }

    /// Store a rule and append it to the top-level list
    pub fn append_rule(&mut self, spec: &RuleSpec) -> TreeResult<u32> {
        let root = self.ensure_root_list()?;
        let offset = self.add_rule(spec)?;
        self.list_append(root, offset)?;
        Ok(offset)
    }

    /// Append every rule in order; returns how many were added
    pub fn load_rules(&mut self, specs: &[RuleSpec]) -> TreeResult<usize> {
        for spec in specs {
            self.append_rule(spec)?;
        }
        Ok(specs.len())
    }

    // ---- reader side ----

    /// Read a string object
    pub fn get_string(&self, offset: u32) -> TreeResult<&str> {
        let (payload, len) = self.object(offset, ObjectKind::String)?;
        std::str::from_utf8(&self.bytes()[payload..payload + len as usize])
            .map_err(|_| RuleTreeError::Corrupt(format!("string at {} is not UTF-8", offset)))
    }

    /// Entries of a rule list in insertion order, following chained chunks
    pub fn list_items(&self, list: u32) -> TreeResult<Vec<u32>> {
        let mut items = Vec::new();
        let mut chunk = list;
        for _ in 0..self.max_chain() {
            if chunk == 0 {
                return Ok(items);
            }
            let (payload, _) = self.object(chunk, ObjectKind::RuleList)?;
            let bytes = self.bytes();
            let capacity = read_u32(bytes, payload + LIST_CAPACITY);
            let count = load_u32(bytes, payload + LIST_COUNT).min(capacity);
            for slot in 0..count as usize {
                items.push(read_u32(bytes, payload + LIST_SLOTS + 4 * slot));
            }
            chunk = load_u32(bytes, payload + LIST_NEXT);
        }
        Err(RuleTreeError::Corrupt(format!(
            "rule list at offset {} does not terminate",
            list
        )))
    }

    /// Decode the rule stored at `offset`
    pub fn get_rule(&self, offset: u32) -> TreeResult<FsRule<'_>> {
        let (payload, _) = self.object(offset, ObjectKind::Rule)?;
        let bytes = self.bytes();
        let field = |at: usize| read_u32(bytes, payload + at);

        let selector_kind = SelectorKind::from_raw(field(RULE_SELECTOR_KIND)).ok_or_else(|| {
            RuleTreeError::Corrupt(format!("rule at {} has an unknown selector kind", offset))
        })?;
        let action = ActionKind::from_raw(field(RULE_ACTION)).ok_or_else(|| {
            RuleTreeError::Corrupt(format!("rule at {} has an unknown action", offset))
        })?;
        let action_arg = field(RULE_ACTION_ARG);
        let (action_path, subtree) = if action.takes_path() {
            (Some(self.get_string(action_arg)?), 0)
        } else if action == ActionKind::Subtree {
            (None, action_arg)
        } else {
            (None, 0)
        };

        Ok(FsRule {
            offset,
            selector_kind,
            selector: self.get_string(field(RULE_SELECTOR))?,
            action,
            action_path,
            subtree,
            raw_flags: field(RULE_FLAGS),
            classes: InterfaceClass::from_bits_retain(field(RULE_CLASSES)),
            exec_policy: self.get_optional_string(field(RULE_EXEC_POLICY))?,
            binary_name: self.get_optional_string(field(RULE_BINARY_NAME))?,
            name: self.get_optional_string(field(RULE_NAME))?,
        })
    }

    /// Decode every rule of a list in order
    pub fn rules(&self, list: u32) -> TreeResult<Vec<FsRule<'_>>> {
        self.list_items(list)?
            .into_iter()
            .map(|offset| self.get_rule(offset))
            .collect()
    }

    // ---- internals ----

    fn bytes(&self) -> &[u8] {
        self.region.bytes()
    }

    fn bytes_mut(&mut self) -> TreeResult<&mut [u8]> {
        match &mut self.region {
            Region::Writable(map) => Ok(&mut map[..]),
            Region::ReadOnly(_) => Err(RuleTreeError::ReadOnly),
        }
    }

    fn init_header(&mut self, capacity: usize) -> TreeResult<()> {
        let bytes = self.bytes_mut()?;
        bytes[HDR_MAGIC..HDR_MAGIC + MAGIC.len()].copy_from_slice(&MAGIC);
        write_u32(bytes, HDR_VERSION, FORMAT_VERSION);
        write_u32(bytes, HDR_CAPACITY, capacity as u32);
        write_u32(bytes, HDR_ROOT_LIST, 0);
        write_u32(bytes, HDR_RULE_COUNT, 0);
        store_u32(bytes, HDR_USED, HEADER_SIZE as u32);
        Ok(())
    }

    fn validate_header(&self) -> TreeResult<()> {
        let bytes = self.bytes();
        if bytes.len() < HEADER_SIZE || bytes[HDR_MAGIC..HDR_MAGIC + MAGIC.len()] != MAGIC {
            return Err(RuleTreeError::BadMagic);
        }
        let version = read_u32(bytes, HDR_VERSION);
        if version != FORMAT_VERSION {
            return Err(RuleTreeError::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        let capacity = read_u32(bytes, HDR_CAPACITY) as usize;
        if capacity > bytes.len() || (self.used() as usize) > capacity {
            return Err(RuleTreeError::Corrupt(format!(
                "header claims {} bytes, region has {}",
                capacity,
                bytes.len()
            )));
        }
        Ok(())
    }

    /// Reserve an object; returns (object offset, payload byte index)
    fn alloc(&mut self, kind: ObjectKind, payload_len: usize) -> TreeResult<(u32, usize)> {
        let capacity = self.capacity() as usize;
        let used = self.used() as usize;
        let needed = OBJ_HEADER_SIZE + align4(payload_len);
        if used + needed > capacity {
            return Err(RuleTreeError::Full {
                needed,
                available: capacity - used,
            });
        }
        let bytes = self.bytes_mut()?;
        write_u32(bytes, used, kind as u32);
        write_u32(bytes, used + 4, payload_len as u32);
        store_u32(bytes, HDR_USED, (used + needed) as u32);
        Ok((used as u32, used + OBJ_HEADER_SIZE))
    }

    /// Bounds- and kind-check an object; returns (payload byte index, payload length)
    fn object(&self, offset: u32, expected: ObjectKind) -> TreeResult<(usize, u32)> {
        let used = self.used();
        let start = offset as usize;
        if offset == 0 || offset % 4 != 0 || start + OBJ_HEADER_SIZE > used as usize {
            return Err(RuleTreeError::OutOfBounds {
                offset,
                capacity: used,
            });
        }
        let bytes = self.bytes();
        let raw_kind = read_u32(bytes, start);
        let len = read_u32(bytes, start + 4);
        match ObjectKind::from_raw(raw_kind) {
            Some(kind) if kind == expected => {}
            Some(kind) => {
                return Err(RuleTreeError::WrongKind {
                    offset,
                    found: kind.as_str(),
                    expected: expected.as_str(),
                });
            }
            None => {
                return Err(RuleTreeError::Corrupt(format!(
                    "unknown object kind {} at {}",
                    raw_kind, offset
                )));
            }
        }
        let payload = start + OBJ_HEADER_SIZE;
        if payload + len as usize > used as usize {
            return Err(RuleTreeError::OutOfBounds {
                offset,
                capacity: used,
            });
        }
        Ok((payload, len))
    }

    fn ensure_root_list(&mut self) -> TreeResult<u32> {
        let root = self.root_list();
        if root != 0 {
            return Ok(root);
        }
        let list = self.new_list(DEFAULT_LIST_CAPACITY)?;
        store_u32(self.bytes_mut()?, HDR_ROOT_LIST, list);
        Ok(list)
    }

    fn add_optional_string(&mut self, value: Option<&str>) -> TreeResult<u32> {
        match value {
            Some(value) => self.add_string(value),
            None => Ok(0),
        }
    }

    fn get_optional_string(&self, offset: u32) -> TreeResult<Option<&str>> {
        if offset == 0 {
            Ok(None)
        } else {
            self.get_string(offset).map(Some)
        }
    }

    /// Upper bound on list chunks, used to reject cyclic chains
    fn max_chain(&self) -> usize {
        self.capacity() as usize / (OBJ_HEADER_SIZE + LIST_SLOTS) + 1
    }
}

fn checked_capacity(capacity: usize) -> TreeResult<usize> {
    let capacity = align4(capacity);
    if capacity < HEADER_SIZE || capacity > u32::MAX as usize {
        return Err(RuleTreeError::Corrupt(format!(
            "invalid rule tree capacity {}",
            capacity
        )));
    }
    Ok(capacity)
}
