pub mod cli;
pub mod config;
pub mod model;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use model::CollectionName;
pub use store::{Document, DocumentStore, StoreError};
