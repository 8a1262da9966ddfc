//! Output dataset contract
//!
//! The harvested dataset is a wide table: fixed identity columns, static property
//! columns, then one `value_<year>` column per valuation year observed anywhere in the
//! corpus, sorted ascending. Readers (REST endpoints, map exports) depend only on the
//! names and types defined here.

use crate::Address;
use std::collections::BTreeMap;

pub const POSTAL_CODE_COLUMN: &str = "postal_code";
pub const HOUSE_NUMBER_COLUMN: &str = "house_number";
pub const HOUSE_LETTER_COLUMN: &str = "house_letter";
pub const CANONICAL_ID_COLUMN: &str = "canonical_id";
pub const CONSTRUCTION_YEAR_COLUMN: &str = "construction_year";
pub const FLOOR_AREA_COLUMN: &str = "floor_area";
pub const MUNICIPALITY_CODE_COLUMN: &str = "municipality_code";

/// Prefix of the per-year value columns
pub const VALUE_COLUMN_PREFIX: &str = "value_";

/// Identity and static columns, in on-disk order
pub const FIXED_COLUMNS: [&str; 7] = [
    POSTAL_CODE_COLUMN,
    HOUSE_NUMBER_COLUMN,
    HOUSE_LETTER_COLUMN,
    CANONICAL_ID_COLUMN,
    CONSTRUCTION_YEAR_COLUMN,
    FLOOR_AREA_COLUMN,
    MUNICIPALITY_CODE_COLUMN,
];

/// Column name for a valuation year (`2024` → `value_2024`)
pub fn value_column(year: i32) -> String {
    format!("{}{}", VALUE_COLUMN_PREFIX, year)
}

/// Parse the year out of a value column name, `None` for any other column
///
/// Inverse of [`value_column`] for every `i32`; only the canonical spelling is
/// accepted (`value_0999` and `value_+5` are not value columns).
pub fn year_of_column(name: &str) -> Option<i32> {
    let year: i32 = name.strip_prefix(VALUE_COLUMN_PREFIX)?.parse().ok()?;
    (value_column(year) == name).then_some(year)
}

/// Static attributes of the valued property
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyInfo {
    /// Canonical identifier used by the valuation service
    pub canonical_id: String,
    pub construction_year: Option<i32>,
    /// Usable floor area in square metres
    pub floor_area: Option<i64>,
    /// Four-digit municipality code (e.g. `0363`)
    pub municipality_code: Option<String>,
}

/// One address's valuation history in sparse form (year → value)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub address: Address,
    pub info: PropertyInfo,
    pub values: BTreeMap<i32, i64>,
}

impl OutputRow {
    pub fn value_for(&self, year: i32) -> Option<i64> {
        self.values.get(&year).copied()
    }

    /// Years with a value, ascending
    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.values.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_column_roundtrip() {
        assert_eq!(value_column(2024), "value_2024");
        assert_eq!(year_of_column("value_2024"), Some(2024));
    }

    #[test]
    fn test_non_value_columns_have_no_year() {
        assert_eq!(year_of_column("postal_code"), None);
        assert_eq!(year_of_column("value_"), None);
        assert_eq!(year_of_column("value_20x4"), None);
        assert_eq!(year_of_column("value_+2024"), None);
        assert_eq!(year_of_column("value_02024"), None);
    }

    #[test]
    fn test_value_column_roundtrip_outside_four_digits() {
        for year in [999, 12_345, 0, -5, i32::MIN, i32::MAX] {
            assert_eq!(year_of_column(&value_column(year)), Some(year), "{year}");
        }
    }

    #[test]
    fn test_fixed_columns_are_not_value_columns() {
        for column in FIXED_COLUMNS {
            assert!(year_of_column(column).is_none(), "{column}");
        }
    }

    #[test]
    fn test_output_row_years_sorted() {
        let row = OutputRow {
            address: Address::new("1012JS", 1, None).unwrap(),
            info: PropertyInfo::default(),
            values: [(2024, 3), (2020, 1), (2022, 2)].into_iter().collect(),
        };
        assert_eq!(row.years().collect::<Vec<_>>(), vec![2020, 2022, 2024]);
        assert_eq!(row.value_for(2022), Some(2));
        assert_eq!(row.value_for(2021), None);
    }
}
