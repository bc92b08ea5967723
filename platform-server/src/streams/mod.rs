mod store;

pub use store::{StoreError, StreamStore};
