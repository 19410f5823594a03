//! vperm: simulated file identity and permission overrides
//!
//! Records live in the session daemon; processes reach them through
//! [`crate::rpc::RpcClient`].

mod record;
mod store;

pub use record::{InodeSimu, VpermFields, INODE_SIMU_SIZE};
pub use store::VpermStore;
