//! Test support utilities for the apply-core workspace.
//!
//! Provides fixtures for building log entries and database images, plus
//! property-based generators for wire records.

pub mod fixtures;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::proptest_generators::*;
}
