use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    database::sql_type_wrapper::SqlValue,
    schema::{ColumnDefinition, ColumnType},
    transform::{parse_date, parse_datetime, parse_decimal},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CastError {
    #[error("null value in non-nullable column")]
    NullValue,

    #[error("value is {actual} characters, column allows {max}")]
    TooLong { max: u32, actual: usize },

    #[error("invalid byte sequence for encoding \"UTF8\": 0x00")]
    NulByte,

    #[error("invalid input syntax for type numeric")]
    NotANumber,

    #[error("numeric field overflow, NUMERIC({precision},{scale}) allows {allowed} integer digits")]
    NumericOverflow { precision: u32, scale: u32, allowed: u32 },

    #[error("invalid input syntax for type date")]
    NotADate,

    #[error("invalid input syntax for type timestamp")]
    NotATimestamp,
}

fn integer_digits(value: &Decimal) -> u32 {
    let integer_part = value.abs().trunc();
    if integer_part.is_zero() {
        0
    } else {
        integer_part.to_string().len() as u32
    }
}

fn cast_numeric(raw: &str, precision: u32, scale: u32) -> Result<Decimal, CastError> {
    let value = parse_decimal(raw).ok_or(CastError::NotANumber)?;
    let rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);

    let allowed = precision.saturating_sub(scale);
    if integer_digits(&rounded) > allowed {
        return Err(CastError::NumericOverflow { precision, scale, allowed });
    }
    Ok(rounded)
}

/// Casts one staged cell to its declared column type. Empty cells are null.
pub fn cast_value(column: &ColumnDefinition, raw: Option<&str>) -> Result<SqlValue, CastError> {
    let raw = match raw.filter(|value| !value.is_empty()) {
        Some(raw) => raw,
        None if column.nullable => return Ok(SqlValue::null_for(&column.column_type)),
        None => return Err(CastError::NullValue),
    };

    match column.column_type {
        ColumnType::Varchar(_) if raw.contains('\0') => Err(CastError::NulByte),
        ColumnType::Varchar(Some(max)) => {
            let actual = raw.chars().count();
            if actual > max as usize {
                return Err(CastError::TooLong { max, actual });
            }
            Ok(SqlValue::Text(Some(raw.to_string())))
        }
        ColumnType::Varchar(None) => Ok(SqlValue::Text(Some(raw.to_string()))),
        ColumnType::Numeric { precision, scale } => {
            cast_numeric(raw, precision, scale).map(|value| SqlValue::Decimal(Some(value)))
        }
        ColumnType::Date => {
            parse_date(raw).map(|value| SqlValue::Date(Some(value))).ok_or(CastError::NotADate)
        }
        ColumnType::Timestamp => parse_datetime(raw)
            .map(|value| SqlValue::Timestamp(Some(value)))
            .ok_or(CastError::NotATimestamp),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::NaiveDate;

    use super::*;

    fn column(column_type: ColumnType) -> ColumnDefinition {
        ColumnDefinition::new("C", column_type)
    }

    #[test]
    fn test_empty_is_null_unless_required() {
        assert_eq!(cast_value(&column(ColumnType::Date), Some("")), Ok(SqlValue::Date(None)));
        assert_eq!(cast_value(&column(ColumnType::money()), None), Ok(SqlValue::Decimal(None)));

        let key = ColumnDefinition { nullable: false, ..column(ColumnType::Varchar(Some(20))) };
        assert_eq!(cast_value(&key, None), Err(CastError::NullValue));
    }

    #[test]
    fn test_varchar_length() {
        let code = column(ColumnType::Varchar(Some(2)));
        assert_eq!(cast_value(&code, Some("CA")), Ok(SqlValue::Text(Some("CA".to_string()))));
        assert_eq!(cast_value(&code, Some("CAL")), Err(CastError::TooLong { max: 2, actual: 3 }));
    }

    #[test]
    fn test_text_with_nul_byte_is_rejected() {
        assert_eq!(
            cast_value(&column(ColumnType::Varchar(Some(25))), Some("Op\0en")),
            Err(CastError::NulByte)
        );
        assert_eq!(cast_value(&column(ColumnType::Varchar(None)), Some("\0")), Err(CastError::NulByte));
    }

    #[test]
    fn test_numeric_rounding_and_overflow() {
        let money = column(ColumnType::money());
        assert_eq!(
            cast_value(&money, Some("100.005")),
            Ok(SqlValue::Decimal(Decimal::from_str("100.01").ok()))
        );
        assert_eq!(
            cast_value(&money, Some("9999999999.99")),
            Ok(SqlValue::Decimal(Decimal::from_str("9999999999.99").ok()))
        );
        assert!(matches!(
            cast_value(&money, Some("10000000000")),
            Err(CastError::NumericOverflow { allowed: 10, .. })
        ));
        assert_eq!(cast_value(&money, Some("abc")), Err(CastError::NotANumber));
    }

    #[test]
    fn test_temporal_types() {
        assert_eq!(
            cast_value(&column(ColumnType::Date), Some("2023-01-05")),
            Ok(SqlValue::Date(NaiveDate::from_ymd_opt(2023, 1, 5)))
        );
        assert_eq!(cast_value(&column(ColumnType::Date), Some("soon")), Err(CastError::NotADate));
        assert_eq!(
            cast_value(&column(ColumnType::Timestamp), Some("2023-01-05 10:11:12")),
            Ok(SqlValue::Timestamp(
                NaiveDate::from_ymd_opt(2023, 1, 5).and_then(|d| d.and_hms_opt(10, 11, 12))
            ))
        );
    }
}
