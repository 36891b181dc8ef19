//! # Tablet Testkit
//!
//! Test utilities for the tablet core.
//!
//! This crate provides:
//! - Writer fixtures over in-memory and temporary on-disk directories
//! - Property-based test generators using proptest
//! - Cross-module scenarios (fencing, interrupted publishes, dump failures)
//! - Concurrency stress utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tablet_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_tablet() {
//!     with_memory_tablet(|tablet| {
//!         let segment = tablet.build_segment(1).unwrap();
//!         assert!(tablet.commit().unwrap().has_segment(segment));
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scenarios;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scenarios::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use scenarios::*;
pub use stress::*;
