//! examdesk-client — Session service backends.
//!
//! Implements the `SessionService` and `GraderService` traits over HTTP and
//! in memory, plus configuration loading and a backend factory.

pub mod config;
pub mod error;
pub mod http;
pub mod memory;

pub use config::{create_backend, load_config, Backend, ExamdeskConfig, ServiceConfig};
pub use http::HttpExamService;
pub use memory::InMemoryBackend;
