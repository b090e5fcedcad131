pub mod catalog;
pub mod schema;
pub mod store;

pub use catalog::ModelCatalog;
pub use store::SqliteStore;
