//! # trench-ipam
//!
//! Hierarchical CIDR address management: a trench's root pool is carved
//! into conduit prefixes, those into per-node prefixes, and those into
//! single addresses for the node's interfaces.
//!
//! - [`ipam_store`]: prefix storage (memory, SQLite) and expiry sweeping
//! - [`ipam_core`]: CIDR arithmetic, allocation, the domain hierarchy and the service facade
//! - [`ipam_server`]: HTTP API, conduit watch client and the `ipam` binary

pub use ipam_core;
pub use ipam_server;
pub use ipam_store;
