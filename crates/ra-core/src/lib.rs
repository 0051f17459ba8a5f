//! rusty-agora/crates/ra-core/src/lib.rs
//!
//! Domain models, port traits and errors shared by the engine and plugins.

pub mod error;
pub mod models;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;
