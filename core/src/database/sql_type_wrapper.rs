use std::fmt;

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type as PgType};

use crate::schema::ColumnType;

/// A typed, nullable warehouse value bound to one of the declared [`ColumnType`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(Option<String>),
    Decimal(Option<Decimal>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
}

impl SqlValue {
    pub fn null_for(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Varchar(_) => SqlValue::Text(None),
            ColumnType::Numeric { .. } => SqlValue::Decimal(None),
            ColumnType::Date => SqlValue::Date(None),
            ColumnType::Timestamp => SqlValue::Timestamp(None),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Text(value) => value.is_none(),
            SqlValue::Decimal(value) => value.is_none(),
            SqlValue::Date(value) => value.is_none(),
            SqlValue::Timestamp(value) => value.is_none(),
        }
    }

    /// String form used to match merge keys, `None` for nulls.
    pub fn as_key(&self) -> Option<String> {
        if self.is_null() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

pub fn column_type_to_pg_type(column_type: &ColumnType) -> PgType {
    match column_type {
        ColumnType::Varchar(_) => PgType::VARCHAR,
        ColumnType::Numeric { .. } => PgType::NUMERIC,
        ColumnType::Date => PgType::DATE,
        ColumnType::Timestamp => PgType::TIMESTAMP,
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(Some(value)) => f.write_str(value),
            SqlValue::Decimal(Some(value)) => write!(f, "{}", value),
            SqlValue::Date(Some(value)) => write!(f, "{}", value.format("%Y-%m-%d")),
            SqlValue::Timestamp(Some(value)) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
            _ => Ok(()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Text(value) => value.to_sql(ty, out),
            SqlValue::Decimal(value) => value.to_sql(ty, out),
            SqlValue::Date(value) => value.to_sql(ty, out),
            SqlValue::Timestamp(value) => value.to_sql(ty, out),
        }
    }

    fn accepts(ty: &PgType) -> bool {
        <Option<String> as ToSql>::accepts(ty) ||
            <Option<Decimal> as ToSql>::accepts(ty) ||
            <Option<NaiveDate> as ToSql>::accepts(ty) ||
            <Option<NaiveDateTime> as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_null_for_matches_column_type() {
        assert_eq!(SqlValue::null_for(&ColumnType::money()), SqlValue::Decimal(None));
        assert_eq!(SqlValue::null_for(&ColumnType::Varchar(Some(3))), SqlValue::Text(None));
        assert!(SqlValue::null_for(&ColumnType::Date).is_null());
    }

    #[test]
    fn test_display_and_key() {
        let amount = SqlValue::Decimal(Decimal::from_str("250.00").ok());
        assert_eq!(amount.to_string(), "250.00");
        assert_eq!(SqlValue::Text(Some("CLM001".to_string())).as_key(), Some("CLM001".to_string()));
        assert_eq!(SqlValue::Text(None).as_key(), None);

        let date = SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(date.to_string(), "2024-02-29");
    }

    #[test]
    fn test_accepts_declared_types() {
        for column_type in
            [ColumnType::Varchar(None), ColumnType::money(), ColumnType::Date, ColumnType::Timestamp]
        {
            assert!(<SqlValue as ToSql>::accepts(&column_type_to_pg_type(&column_type)));
        }
        assert!(!<SqlValue as ToSql>::accepts(&PgType::BOOL));
    }
}
