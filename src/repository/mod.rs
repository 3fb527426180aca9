pub mod cursor_repository;
pub mod database;
pub mod holder_repository;
pub mod models;

pub use cursor_repository::CursorRepository;
pub use database::Database;
pub use holder_repository::{HolderOrder, HolderRepository, SortDirection};
pub use models::Holder;
