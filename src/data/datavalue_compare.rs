use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::data::datatable::{DataValue, SortType};
use crate::data::sort_engine::SortOrder;

/// Where blank cells (null, empty, unparseable) land when sorting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlankPolicy {
    /// Blanks compare below every value, so direction flips them
    #[default]
    Low,
    /// Blanks always first regardless of direction
    First,
    /// Blanks always last regardless of direction
    Last,
}

/// A cell reduced to what its column's comparator needs
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Blank,
    Number(f64),
    Text(String),
    Timestamp(i64),
    Raw(DataValue),
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y", "%b %d, %Y"];

/// Parse a date or datetime string into milliseconds since the epoch
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis());
        }
    }

    None
}

fn parse_number(s: &str) -> SortValue {
    match s.trim().parse::<f64>() {
        Ok(n) if !n.is_nan() => SortValue::Number(n),
        _ => SortValue::Blank,
    }
}

/// Reduce a cell to a sort value for the given comparator family
pub fn sort_value(value: &DataValue, sort_type: &SortType) -> SortValue {
    if value.is_null() {
        return SortValue::Blank;
    }

    match sort_type {
        SortType::Numeric => match value {
            DataValue::Integer(i) => SortValue::Number(*i as f64),
            DataValue::Float(f) if !f.is_nan() => SortValue::Number(*f),
            DataValue::String(s) => parse_number(s),
            _ => SortValue::Blank,
        },
        SortType::Date => match value {
            DataValue::Integer(ms) => SortValue::Timestamp(*ms),
            DataValue::DateTime(s) | DataValue::String(s) => {
                parse_timestamp(s).map_or(SortValue::Blank, SortValue::Timestamp)
            }
            _ => SortValue::Blank,
        },
        SortType::String => {
            let text = value.to_string();
            if text.trim().is_empty() {
                SortValue::Blank
            } else {
                SortValue::Text(text.to_lowercase())
            }
        }
        SortType::Custom(_) => SortValue::Raw(value.clone()),
    }
}

fn blank_ordering(order: SortOrder, blanks: BlankPolicy) -> Ordering {
    match blanks {
        BlankPolicy::Low => order.apply(Ordering::Less),
        BlankPolicy::First => Ordering::Less,
        BlankPolicy::Last => Ordering::Greater,
    }
}

/// Compare two sort values of the same column, direction applied
pub fn compare_sort_values(
    a: &SortValue,
    b: &SortValue,
    sort_type: &SortType,
    order: SortOrder,
    blanks: BlankPolicy,
) -> Ordering {
    let cmp = match (a, b) {
        (SortValue::Blank, SortValue::Blank) => return Ordering::Equal,
        (SortValue::Blank, _) => return blank_ordering(order, blanks),
        (_, SortValue::Blank) => return blank_ordering(order, blanks).reverse(),
        (SortValue::Number(x), SortValue::Number(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (SortValue::Text(x), SortValue::Text(y)) => x.cmp(y),
        (SortValue::Timestamp(x), SortValue::Timestamp(y)) => x.cmp(y),
        (SortValue::Raw(x), SortValue::Raw(y)) => match sort_type {
            SortType::Custom(comparator) => comparator.compare(x, y),
            _ => Ordering::Equal,
        },
        _ => Ordering::Equal,
    };
    order.apply(cmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::datatable::CustomComparator;

    fn cmp(a: &SortValue, b: &SortValue, order: SortOrder, blanks: BlankPolicy) -> Ordering {
        compare_sort_values(a, b, &SortType::Numeric, order, blanks)
    }

    #[test]
    fn test_numeric_values() {
        assert_eq!(
            sort_value(&DataValue::Integer(3), &SortType::Numeric),
            SortValue::Number(3.0)
        );
        assert_eq!(
            sort_value(&DataValue::String(" 2.5 ".into()), &SortType::Numeric),
            SortValue::Number(2.5)
        );
        assert_eq!(
            sort_value(&DataValue::String("n/a".into()), &SortType::Numeric),
            SortValue::Blank
        );
        assert_eq!(sort_value(&DataValue::Null, &SortType::Numeric), SortValue::Blank);
    }

    #[test]
    fn test_string_values_are_case_insensitive() {
        let a = sort_value(&DataValue::from("apple"), &SortType::String);
        let b = sort_value(&DataValue::from("Banana"), &SortType::String);
        assert_eq!(
            compare_sort_values(&a, &b, &SortType::String, SortOrder::Ascending, BlankPolicy::Low),
            Ordering::Less
        );
    }

    #[test]
    fn test_date_values() {
        let early = sort_value(&DataValue::DateTime("2024-01-01".into()), &SortType::Date);
        let late = sort_value(
            &DataValue::String("2024-03-05T10:00:00Z".into()),
            &SortType::Date,
        );
        assert!(matches!(early, SortValue::Timestamp(_)));
        assert_eq!(
            compare_sort_values(&early, &late, &SortType::Date, SortOrder::Ascending, BlankPolicy::Low),
            Ordering::Less
        );
        assert_eq!(
            sort_value(&DataValue::from("not a date"), &SortType::Date),
            SortValue::Blank
        );
    }

    #[test]
    fn test_blank_policies() {
        let blank = SortValue::Blank;
        let one = SortValue::Number(1.0);

        assert_eq!(cmp(&blank, &one, SortOrder::Ascending, BlankPolicy::Low), Ordering::Less);
        assert_eq!(cmp(&blank, &one, SortOrder::Descending, BlankPolicy::Low), Ordering::Greater);
        assert_eq!(cmp(&blank, &one, SortOrder::Descending, BlankPolicy::First), Ordering::Less);
        assert_eq!(cmp(&blank, &one, SortOrder::Ascending, BlankPolicy::Last), Ordering::Greater);
        assert_eq!(cmp(&one, &blank, SortOrder::Ascending, BlankPolicy::Last), Ordering::Less);
        assert_eq!(cmp(&blank, &blank, SortOrder::Ascending, BlankPolicy::Last), Ordering::Equal);
    }

    #[test]
    fn test_custom_comparator() {
        // Order by string length
        let sort_type = SortType::Custom(CustomComparator::new(|a, b| {
            a.to_string().len().cmp(&b.to_string().len())
        }));
        let long = sort_value(&DataValue::from("aaaa"), &sort_type);
        let short = sort_value(&DataValue::from("zz"), &sort_type);
        assert_eq!(
            compare_sort_values(&long, &short, &sort_type, SortOrder::Ascending, BlankPolicy::Low),
            Ordering::Greater
        );
        assert_eq!(
            compare_sort_values(&long, &short, &sort_type, SortOrder::Descending, BlankPolicy::Low),
            Ordering::Less
        );
    }
}
