use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::core::{PersistError, Result};

/// A single SQL parameter or result value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Date(_) => "DATE",
            Self::Bytes(_) => "BYTES",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(ts) => write!(f, "{}", ts),
            Self::Date(d) => write!(f, "{}", d),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i16> for SqlValue {
    fn from(i: i16) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<i32> for SqlValue {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f32> for SqlValue {
    fn from(f: f32) -> Self {
        Self::Float(f as f64)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// The declared SQL type of a column, used when rendering DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Boolean,
    Text,
    Timestamp,
    Date,
    Bytes,
}

impl SqlType {
    /// Render the column type, applying length and scale overrides where they apply.
    pub fn ddl(&self, length: u16, scale: u16) -> String {
        match self {
            Self::SmallInt => "smallint".to_string(),
            Self::Integer => "integer".to_string(),
            Self::BigInt => "bigint".to_string(),
            Self::Real => "real".to_string(),
            Self::Double if scale > 0 => format!("numeric({}, {})", length, scale),
            Self::Double => "double precision".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Text => format!("varchar({})", length),
            Self::Timestamp => "timestamp".to_string(),
            Self::Date => "date".to_string(),
            Self::Bytes => "bytea".to_string(),
        }
    }

    /// The serial counterpart used for database-generated identity columns.
    pub fn serial_ddl(&self) -> Option<&'static str> {
        match self {
            Self::Integer => Some("serial"),
            Self::BigInt => Some("bigserial"),
            _ => None,
        }
    }

    /// The unbounded form used for large-object columns.
    pub fn lob_ddl(&self) -> &'static str {
        match self {
            Self::Bytes => "bytea",
            _ => "text",
        }
    }
}

/// A Rust value that can be bound as a SQL parameter and read back from a result row.
pub trait SqlParam: Sized + Send + Sync + 'static {
    const SQL_TYPE: SqlType;

    fn to_sql(&self) -> SqlValue;

    fn from_sql(value: SqlValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &SqlValue) -> Result<T> {
    Err(PersistError::TypeMismatch(format!(
        "expected {}, got {}",
        expected,
        value.type_name()
    )))
}

impl SqlParam for i16 {
    const SQL_TYPE: SqlType = SqlType::SmallInt;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Integer(*self as i64)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Integer(i) => i
                .try_into()
                .map_err(|_| PersistError::TypeMismatch(format!("value {} out of range for i16", i))),
            other => mismatch("INTEGER", &other),
        }
    }
}

impl SqlParam for i32 {
    const SQL_TYPE: SqlType = SqlType::Integer;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Integer(*self as i64)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Integer(i) => i
                .try_into()
                .map_err(|_| PersistError::TypeMismatch(format!("value {} out of range for i32", i))),
            other => mismatch("INTEGER", &other),
        }
    }
}

impl SqlParam for i64 {
    const SQL_TYPE: SqlType = SqlType::BigInt;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Integer(i) => Ok(i),
            other => mismatch("INTEGER", &other),
        }
    }
}

impl SqlParam for f32 {
    const SQL_TYPE: SqlType = SqlType::Real;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Float(*self as f64)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Float(f) => Ok(f as f32),
            SqlValue::Integer(i) => Ok(i as f32),
            other => mismatch("FLOAT", &other),
        }
    }
}

impl SqlParam for f64 {
    const SQL_TYPE: SqlType = SqlType::Double;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Float(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Float(f) => Ok(f),
            SqlValue::Integer(i) => Ok(i as f64),
            other => mismatch("FLOAT", &other),
        }
    }
}

impl SqlParam for bool {
    const SQL_TYPE: SqlType = SqlType::Boolean;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Boolean(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Boolean(b) => Ok(b),
            other => mismatch("BOOLEAN", &other),
        }
    }
}

impl SqlParam for String {
    const SQL_TYPE: SqlType = SqlType::Text;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Text(s) => Ok(s),
            other => mismatch("TEXT", &other),
        }
    }
}

impl SqlParam for DateTime<Utc> {
    const SQL_TYPE: SqlType = SqlType::Timestamp;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Timestamp(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Timestamp(ts) => Ok(ts),
            other => mismatch("TIMESTAMP", &other),
        }
    }
}

impl SqlParam for NaiveDate {
    const SQL_TYPE: SqlType = SqlType::Date;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Date(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Date(d) => Ok(d),
            other => mismatch("DATE", &other),
        }
    }
}

impl SqlParam for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Bytes;

    fn to_sql(&self) -> SqlValue {
        SqlValue::Bytes(self.clone())
    }

    fn from_sql(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Bytes(b) => Ok(b),
            other => mismatch("BYTES", &other),
        }
    }
}
