//! bluegreen-state: embedded record store for the deployment controller.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the persisted view of
//! every deployment (its latest status snapshot) and the ordered list of
//! state changes it went through.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! History keys are `{deployment_id}:{seq:010}` so a prefix scan returns
//! transitions in order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared between the control loop and API handlers.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
