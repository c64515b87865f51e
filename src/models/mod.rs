use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Property type tab on the transaction portal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Apartment,
    RowHouse,
    Detached,
    Officetel,
    Land,
    PresaleRight,
    Commercial,
    Factory,
}

impl Category {
    /// All categories in the order the portal shows them
    pub const ALL: [Category; 8] = [
        Category::Apartment,
        Category::RowHouse,
        Category::Detached,
        Category::Officetel,
        Category::Land,
        Category::PresaleRight,
        Category::Commercial,
        Category::Factory,
    ];

    /// Tab text as it appears on the portal
    pub fn label(self) -> &'static str {
        match self {
            Category::Apartment => "아파트",
            Category::RowHouse => "연립/다세대",
            Category::Detached => "단독/다가구",
            Category::Officetel => "오피스텔",
            Category::Land => "토지",
            Category::PresaleRight => "분양/입주권",
            Category::Commercial => "상업/업무용",
            Category::Factory => "공장/창고 등",
        }
    }

    /// Label with path separators removed, safe for folder and file names
    pub fn folder_name(self) -> String {
        self.label().replace('/', "")
    }

    /// Look up a category by tab label or folder name
    pub fn from_label(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label() == s || c.folder_name() == s)
    }

    /// File name of the downloaded spreadsheet for a month
    pub fn file_name(self, ym: YearMonth, ext: &str) -> String {
        format!("{} {}.{}", self.folder_name(), ym, ext)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s).with_context(|| format!("Unknown property category: {s}"))
    }
}

/// Calendar month, displayed as `YYYYMM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            bail!("Month out of range: {month}");
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn first_day(self) -> NaiveDate {
        // month is validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    /// Every month from `self` up to and including `end`
    pub fn iter_until(self, end: YearMonth) -> impl Iterator<Item = YearMonth> {
        std::iter::successors(Some(self), move |ym| Some(ym.next()))
            .take_while(move |ym| *ym <= end)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s.trim().chars().filter(|c| *c != '-' && *c != '.').collect();
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
            bail!("Expected YYYYMM, got '{s}'");
        }
        let year = digits[..4].parse()?;
        let month = digits[4..].parse()?;
        Self::new(year, month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive date range entered into the portal's search form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    pub month: YearMonth,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl MonthRange {
    /// Range for a whole month, with the end clipped to `today` for the current month
    pub fn for_month(month: YearMonth, today: NaiveDate) -> Result<Self> {
        if month > YearMonth::of(today) {
            bail!("Month {month} is in the future");
        }
        let to = month.last_day().min(today);
        Ok(Self {
            month,
            from: month.first_day(),
            to,
        })
    }
}

/// Months from `start` through the month containing `today`
pub fn months_to_fetch(start: YearMonth, today: NaiveDate) -> Vec<YearMonth> {
    start.iter_until(YearMonth::of(today)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn category_names_are_path_safe() {
        assert_eq!(Category::RowHouse.folder_name(), "연립다세대");
        assert_eq!(Category::Factory.folder_name(), "공장창고 등");
        assert_eq!(Category::from_label("연립/다세대"), Some(Category::RowHouse));
        assert_eq!(Category::from_label("연립다세대"), Some(Category::RowHouse));
        assert!("빌라".parse::<Category>().is_err());
        assert_eq!(
            Category::Apartment.file_name(YearMonth::new(2024, 3).unwrap(), "xlsx"),
            "아파트 202403.xlsx"
        );
    }

    #[test]
    fn year_month_parsing() {
        let ym: YearMonth = "202412".parse().unwrap();
        assert_eq!(ym, YearMonth { year: 2024, month: 12 });
        assert_eq!("2024-01".parse::<YearMonth>().unwrap().to_string(), "202401");
        assert!("202413".parse::<YearMonth>().is_err());
        assert!("2024".parse::<YearMonth>().is_err());
        assert_eq!(ym.next().to_string(), "202501");
    }

    #[test]
    fn month_range_clips_to_today() {
        let feb = YearMonth::new(2024, 2).unwrap();
        let range = MonthRange::for_month(feb, date(2024, 6, 1)).unwrap();
        assert_eq!(range.from, date(2024, 2, 1));
        assert_eq!(range.to, date(2024, 2, 29));

        let current = MonthRange::for_month(YearMonth::new(2024, 6).unwrap(), date(2024, 6, 14)).unwrap();
        assert_eq!(current.to, date(2024, 6, 14));

        assert!(MonthRange::for_month(YearMonth::new(2024, 7).unwrap(), date(2024, 6, 14)).is_err());
    }

    #[test]
    fn months_cross_year_boundary() {
        let months = months_to_fetch(YearMonth::new(2023, 11).unwrap(), date(2024, 2, 3));
        let names: Vec<String> = months.iter().map(|m| m.to_string()).collect();
        assert_eq!(names, vec!["202311", "202312", "202401", "202402"]);
    }
}
