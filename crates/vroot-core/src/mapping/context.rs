//! Per-call bookkeeping storage and the mapping context handed to the engine
//!
//! Call state normally lives in a thread-local slot. When thread-local
//! storage cannot be used (a call made during thread teardown, or a caller
//! that explicitly selects it) the engine falls back to one process-wide slot
//! behind a mutex. In that mode every thread shares the same state, so a
//! thread that disables mapping disables it for all threads until it restores
//! it. The fallback is logged when it first happens.

use super::InterfaceClass;
use crate::ruletree::RuleTree;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::warn;

/// Where per-call state is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStateStrategy {
    ThreadLocal,
    ProcessWide,
}

/// State carried across nested engine calls on one thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallState {
    /// Map nothing; used while the engine does its own bookkeeping I/O
    pub mapping_disabled: bool,
    /// Nesting level of `without_mapping` sections
    pub depth: u32,
}

thread_local! {
    static CALL_STATE: RefCell<CallState> = RefCell::new(CallState::default());
}

static PROCESS_STATE: Lazy<Mutex<CallState>> = Lazy::new(|| Mutex::new(CallState::default()));

const STRATEGY_THREAD_LOCAL: u8 = 0;
const STRATEGY_PROCESS_WIDE: u8 = 1;
static STRATEGY: AtomicU8 = AtomicU8::new(STRATEGY_THREAD_LOCAL);

/// The strategy currently in effect
pub fn active_strategy() -> CallStateStrategy {
    match STRATEGY.load(Ordering::Acquire) {
        STRATEGY_PROCESS_WIDE => CallStateStrategy::ProcessWide,
        _ => CallStateStrategy::ThreadLocal,
    }
}

/// Select a strategy explicitly
pub fn set_strategy(strategy: CallStateStrategy) {
    let raw = match strategy {
        CallStateStrategy::ThreadLocal => STRATEGY_THREAD_LOCAL,
        CallStateStrategy::ProcessWide => STRATEGY_PROCESS_WIDE,
    };
    STRATEGY.store(raw, Ordering::Release);
}

fn fall_back_to_process_wide() {
    let previous = STRATEGY.swap(STRATEGY_PROCESS_WIDE, Ordering::AcqRel);
    if previous != STRATEGY_PROCESS_WIDE {
        warn!(
            "Thread-local storage unavailable, call state now shared by all threads through one process-wide slot"
        );
    }
}

/// Run `f` with mutable access to the caller's call state
pub fn with_call_state<R>(f: impl FnOnce(&mut CallState) -> R) -> R {
    if active_strategy() == CallStateStrategy::ThreadLocal {
        if CALL_STATE.try_with(|_| ()).is_ok() {
            return CALL_STATE.with(|cell| f(&mut cell.borrow_mut()));
        }
        fall_back_to_process_wide();
    }
    f(&mut PROCESS_STATE.lock())
}

pub fn mapping_disabled() -> bool {
    with_call_state(|state| state.mapping_disabled)
}

pub fn call_depth() -> u32 {
    with_call_state(|state| state.depth)
}

/// Run `f` with mapping disabled, restoring the previous setting afterwards
pub fn without_mapping<R>(f: impl FnOnce() -> R) -> R {
    let previous = with_call_state(|state| {
        state.depth += 1;
        std::mem::replace(&mut state.mapping_disabled, true)
    });
    let result = f();
    with_call_state(|state| {
        state.depth = state.depth.saturating_sub(1);
        state.mapping_disabled = previous;
    });
    result
}

/// Active simulated chroot: its virtual path and the host path it maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChrootRoot {
    pub virtual_path: String,
    pub host_path: String,
}

/// Everything one mapping call needs, borrowed from the session.
///
/// Built per call and never shared between threads.
#[derive(Debug, Clone, Copy)]
pub struct MappingContext<'a> {
    pub tree: &'a RuleTree,
    /// Rule list to match against
    pub rule_list: u32,
    pub binary_name: &'a str,
    pub func_name: &'a str,
    pub class: InterfaceClass,
    pub chroot: Option<&'a ChrootRoot>,
    /// Current virtual working directory, used for relative paths
    pub virtual_cwd: Option<&'a str>,
    pub exec_policy: Option<&'a str>,
    pub mapping_disabled: bool,
}

impl<'a> MappingContext<'a> {
    /// Context over the tree's root rule list with no chroot and no cwd
    pub fn new(tree: &'a RuleTree, func_name: &'a str, class: InterfaceClass) -> Self {
        Self {
            tree,
            rule_list: tree.root_list(),
            binary_name: "",
            func_name,
            class,
            chroot: None,
            virtual_cwd: None,
            exec_policy: None,
            mapping_disabled: false,
        }
    }

    pub fn with_binary(mut self, binary_name: &'a str) -> Self {
        self.binary_name = binary_name;
        self
    }

    pub fn with_chroot(mut self, chroot: Option<&'a ChrootRoot>) -> Self {
        self.chroot = chroot;
        self
    }

    pub fn with_cwd(mut self, cwd: Option<&'a str>) -> Self {
        self.virtual_cwd = cwd;
        self
    }

    pub fn with_class(mut self, class: InterfaceClass) -> Self {
        self.class = class;
        self
    }
}
