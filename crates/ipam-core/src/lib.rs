//! # IPAM Core
//!
//! Allocation engine for the trench IPAM.
//!
//! This crate provides:
//! - **CIDR arithmetic**: Validity, overlap, next block and last address
//! - **Allocation**: Lowest-free-block allocation, verified against concurrent writers
//! - **Hierarchy**: Trench → Conduit → Node wrappers with fixed lengths per level
//! - **Conduit watcher**: Mirrors an external conduit stream into the trenches
//! - **Service**: Allocate/Release entry points with request validation and deadlines
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     IpamService      │  ConduitWatcher  │
//! ├─────────────────────────────────────────┤
//! │       Trench  →  Conduit  →  Node       │
//! ├─────────────────────────────────────────┤
//! │      allocate  (write, verify, undo)    │
//! ├─────────────────────────────────────────┤
//! │          ipam_store::Storage            │
//! └─────────────────────────────────────────┘
//! ```

pub mod allocate;
pub mod cidr;
pub mod conduit;
pub mod error;
pub mod node;
pub mod service;
pub mod trench;
pub mod types;
pub mod watcher;

pub use allocate::{allocate, allocate_with_blocklist};
pub use cidr::Cidr;
pub use conduit::Conduit;
pub use error::{IpamError, Result};
pub use node::Node;
pub use service::{AllocatedBlock, Child, ConduitRef, IpamService, ServiceConfig, Subnet, TrenchRef};
pub use trench::Trench;
pub use types::{trench_name_for, IpFamily, PrefixLengths, TrenchPool};
pub use watcher::{
    set_conduits, ChannelConduitSource, ConduitSender, ConduitSource, ConduitStream, ConduitWatcher,
    TrenchWatcher, WatcherConfig,
};
