pub mod client;
pub mod error;

pub use client::StateStore;
pub use error::{StoreError, is_already_exists, is_not_found};
