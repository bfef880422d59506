//! Metaform Core - Foundation Layer for the Metaform Training Substrate
//!
//! This crate provides the pieces every other Metaform crate builds on:
//! the unified error type and the explicit memory accounting context that
//! replaces process-wide allocation tracking.
//!
//! # Key Features
//! - One `Error` enum covering shape, linear-algebra, transport and state failures
//! - `MemoryTracker` passed explicitly to the components that account memory
//!
//! # Example
//! ```rust
//! use metaform_core::{Error, MemoryTracker};
//!
//! let tracker = MemoryTracker::new();
//! tracker.record_alloc(1024);
//! assert_eq!(tracker.bytes_in_use(), 1024);
//!
//! let err = Error::shape("ragged batch slice");
//! assert!(err.is_shape());
//! ```
//!
//! @version 0.1.0
//! @author Metaform Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod memory;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{Error, Result};
pub use memory::{MemorySnapshot, MemoryTracker};
