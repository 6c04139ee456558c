//! Run-time support consumed by generated helper stubs.
//!
//! - Generic-virtual-method resolution and descriptor interning
//! - Jump-stub materialization for out-of-range call targets
//!
//! The stub heap requires executable memory and is only compiled when the
//! `stub-heap` feature is enabled.

pub mod gvm;
#[cfg(feature = "stub-heap")]
pub mod stubs;
