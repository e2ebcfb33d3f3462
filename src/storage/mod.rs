pub mod engine;
pub mod layout;
#[cfg(feature = "redb")]
pub mod redb_types;

pub use engine::*;
pub use layout::{StoredPlan, LAYOUT_VERSION};

pub use crate::core::error::StorageError;
