//! HTTP binding of the TestDeck backend endpoints used by the
//! orchestration layer.
//!
//! [`api::TestDeckApi`] implements the remote traits from
//! [`testdeck_core::remote`] over [`reqwest`].

pub mod api;

pub use api::TestDeckApi;
