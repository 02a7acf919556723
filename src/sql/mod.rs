mod entity_sql;
mod finder;
mod mapping;
mod repository;
mod select;
mod session;

pub use finder::{Finder, InnerQuery};
pub use mapping::MappingTool;
pub use repository::Repository;
pub use session::SqlSession;
