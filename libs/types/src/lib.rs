//! Types library for the fixture feed adapter
//!
//! Core type definitions shared between the stream listener, the work
//! queue and the downstream connector.
//!
//! # Modules
//! - `ids`: Identifiers (FixtureId, UpdateId)
//! - `fixture`: Fixture state, match status, epoch change reasons
//! - `market`: Opaque market state collections
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod fixture;
pub mod market;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::fixture::*;
    pub use crate::market::*;
    pub use crate::errors::*;
}
