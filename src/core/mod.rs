pub mod error;
pub mod naming;
pub mod value;

pub use error::{PersistError, Result};
pub use value::{SqlParam, SqlType, SqlValue};

/// One result row as returned by a driver, column values in select-list order.
pub type Row = Vec<SqlValue>;
