pub mod config;
pub mod detect;
pub mod error;
pub mod ids;
pub mod model;
pub mod shape;
pub mod time;
pub mod tree;

pub use error::{Result, ScryError};
