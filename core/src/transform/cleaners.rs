use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;

pub const UNKNOWN_PHONE: &str = "000-000-0000";

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

pub fn title_case(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut start_of_word = true;
    for c in value.chars() {
        if c.is_alphabetic() {
            if start_of_word {
                result.extend(c.to_uppercase());
            } else {
                result.extend(c.to_lowercase());
            }
            start_of_word = false;
        } else {
            result.push(c);
            start_of_word = true;
        }
    }
    result
}

pub fn format_phone(value: Option<&str>) -> String {
    let digits: String = value.unwrap_or_default().chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..])
    } else {
        UNKNOWN_PHONE.to_string()
    }
}

pub fn normalize_gender(value: Option<&str>) -> String {
    match value.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
        Some("MALE") | Some("M") => "M".to_string(),
        Some("FEMALE") | Some("F") => "F".to_string(),
        _ => "O".to_string(),
    }
}

pub fn normalize_zip_code(value: &str) -> String {
    let padded = format!("{:0>5}", value);
    padded.chars().take(5).collect()
}

pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed)).ok()
}

/// Accepts plain dates and timestamps, keeping only the date part of the latter.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .or_else(|| parse_datetime(trimmed).map(|dt| dt.date()))
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .or_else(|| chrono::DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("mARY o'neil"), "Mary O'Neil");
        assert_eq!(title_case("123 main st"), "123 Main St");
    }

    #[test]
    fn test_format_phone() {
        assert_eq!(format_phone(Some("(555)-123-4567")), "555-123-4567");
        assert_eq!(format_phone(Some("12345")), UNKNOWN_PHONE);
        assert_eq!(format_phone(None), UNKNOWN_PHONE);
    }

    #[test]
    fn test_normalize_gender() {
        assert_eq!(normalize_gender(Some(" female ")), "F");
        assert_eq!(normalize_gender(Some("m")), "M");
        assert_eq!(normalize_gender(Some("x")), "O");
        assert_eq!(normalize_gender(None), "O");
    }

    #[test]
    fn test_normalize_zip_code() {
        assert_eq!(normalize_zip_code("501"), "00501");
        assert_eq!(normalize_zip_code("941071234"), "94107");
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 3, 9);
        assert_eq!(parse_date("2023-03-09"), expected);
        assert_eq!(parse_date("2023/03/09"), expected);
        assert_eq!(parse_date("03/09/2023"), expected);
        assert_eq!(parse_date("2023-03-09 14:22:01"), expected);
        assert_eq!(parse_date("2023-02-30"), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(" 100.50 "), Decimal::from_str("100.50").ok());
        assert_eq!(parse_decimal("1e3"), Decimal::from_str("1000").ok());
        assert_eq!(parse_decimal("abc"), None);
    }
}
