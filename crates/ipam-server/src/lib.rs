//! # IPAM server
//!
//! Process surface of the trench IPAM.
//!
//! This crate provides:
//! - **HTTP API**: JSON Allocate/Release endpoints over axum
//! - **Conduit watch**: streaming client for the configuration-distribution service
//! - **Lifecycle**: background watcher and garbage collector, graceful shutdown
//!
//! ## Endpoints
//!
//! | Method | Path | Body | Response |
//! |---|---|---|---|
//! | `POST` | `/api/v1/allocate` | `Child` | `AllocatedBlock` |
//! | `POST` | `/api/v1/release` | `Child` | `204 No Content` |
//! | `GET` | `/health` | | `OK` |

pub mod conduits;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use conduits::HttpConduitSource;
pub use config::IpamConfig;
pub use error::ApiError;
pub use server::{run_server, run_server_with_shutdown, serve};
pub use state::AppState;
