pub mod error;
pub mod store;

pub use error::StateError;
pub use store::{HistoryQuery, StateStore};
