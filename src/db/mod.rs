// Re-export the Database struct and other public items
pub mod article;
pub mod core;
mod encoding;
pub mod issue;
mod schema;

// Re-export Database and essential traits
pub use self::core::Database;
pub use self::core::DbLockErrorExt;
pub use self::encoding::{dense_from_blob, dense_to_blob};
pub use sqlx::Row;
