mod categories;
mod entries;
mod schema;
mod types;

pub use schema::Database;
pub use types::{Category, CategoryUpdate, DatabaseError, Entry, EntryCover, NewCategory};
