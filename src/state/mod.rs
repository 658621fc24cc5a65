pub mod container;
pub mod models;

pub use container::{StateContainer, StateError};
