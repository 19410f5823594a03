//! On-disk layout of the rule tree region
//!
//! Little-endian, every object 4-byte aligned. The header sits at offset 0,
//! so an offset of 0 means "none" everywhere else in the region.
//!
//! ```text
//! header (64 bytes)
//!   0  magic        [u8; 8]  "VRTREE\0\0"
//!   8  version      u32
//!   12 capacity     u32
//!   16 used         u32      next free offset, published with release
//!   20 root_list    u32      published with release
//!   24 rule_count   u32
//! object
//!   0  kind         u32
//!   4  payload_len  u32
//!   8  payload, padded to 4
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

pub const MAGIC: [u8; 8] = *b"VRTREE\0\0";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;

pub const HDR_MAGIC: usize = 0;
pub const HDR_VERSION: usize = 8;
pub const HDR_CAPACITY: usize = 12;
pub const HDR_USED: usize = 16;
pub const HDR_ROOT_LIST: usize = 20;
pub const HDR_RULE_COUNT: usize = 24;

pub const OBJ_HEADER_SIZE: usize = 8;

/// Rule list payload: capacity, count, next chunk, then `capacity` slots
pub const LIST_CAPACITY: usize = 0;
pub const LIST_COUNT: usize = 4;
pub const LIST_NEXT: usize = 8;
pub const LIST_SLOTS: usize = 12;

/// Rule record payload, one u32 per field
pub const RULE_SELECTOR_KIND: usize = 0;
pub const RULE_SELECTOR: usize = 4;
pub const RULE_ACTION: usize = 8;
pub const RULE_ACTION_ARG: usize = 12;
pub const RULE_FLAGS: usize = 16;
pub const RULE_CLASSES: usize = 20;
pub const RULE_EXEC_POLICY: usize = 24;
pub const RULE_BINARY_NAME: usize = 28;
pub const RULE_NAME: usize = 32;
pub const RULE_RECORD_SIZE: usize = 36;

/// Default region size for a session
pub const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

/// Slots per rule list chunk
pub const DEFAULT_LIST_CAPACITY: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectKind {
    String = 1,
    RuleList = 2,
    Rule = 3,
}

impl ObjectKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::String),
            2 => Some(Self::RuleList),
            3 => Some(Self::Rule),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::RuleList => "rule list",
            Self::Rule => "rule",
        }
    }
}

pub fn align4(n: usize) -> usize {
    (n + 3) & !3
}

pub fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Acquire-load of a published field
pub fn load_u32(bytes: &[u8], offset: usize) -> u32 {
    assert!(offset % 4 == 0 && offset + 4 <= bytes.len());
    // SAFETY: the region base is page aligned and `offset` is 4-aligned and in
    // bounds, so the pointer is valid and aligned for AtomicU32, which has the
    // same size and layout as u32.
    let cell = unsafe { &*(bytes.as_ptr().add(offset) as *const AtomicU32) };
    u32::from_le(cell.load(Ordering::Acquire))
}

/// Release-store publishing a field to concurrent readers
pub fn store_u32(bytes: &mut [u8], offset: usize, value: u32) {
    assert!(offset % 4 == 0 && offset + 4 <= bytes.len());
    // SAFETY: as in `load_u32`; the pointer comes from a unique borrow.
    let cell = unsafe { &*(bytes.as_mut_ptr().add(offset) as *const AtomicU32) };
    cell.store(value.to_le(), Ordering::Release);
}
