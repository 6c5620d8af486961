pub mod discover;
pub mod error;
pub mod grid;
pub mod history;
pub mod normalize;
pub mod sink;
pub mod table;

pub use error::NormalizeError;
