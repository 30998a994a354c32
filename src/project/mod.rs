pub mod imports;
pub mod loader;
pub mod schema;

pub use loader::{load, LoadResult, RawDoc};
