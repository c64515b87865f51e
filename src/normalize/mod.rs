//! Reshapes the portal's transaction spreadsheets into tidy tables.
//!
//! Every transform is a pure function of the table it is given, so the whole
//! pipeline can be exercised without a browser.

mod xlsx;

pub use xlsx::{read_table, write_csv};

use anyhow::{bail, Result};
use regex::Regex;
use std::sync::OnceLock;

pub const SIGUNGU: &str = "시군구";
pub const CONTRACT_YYMM: &str = "계약년월";

pub const SIDO: &str = "시도";
pub const SIGUNGU_NAME: &str = "시군구명";
pub const EUPMYEONDONG: &str = "읍면동";
pub const RI: &str = "리";
pub const CONTRACT_YEAR: &str = "계약년";
pub const CONTRACT_MONTH: &str = "계약월";

/// Columns derived by the transforms, in the order they lead the output
pub const DERIVED_COLUMNS: [&str; 6] = [SIDO, SIGUNGU_NAME, EUPMYEONDONG, RI, CONTRACT_YEAR, CONTRACT_MONTH];

/// Running row number the portal prepends; meaningless after filtering
const ROW_NUMBER: &str = "NO";

const AMOUNT_COLUMNS: [&str; 3] = ["거래금액(만원)", "보증금(만원)", "월세금(만원)"];
const AREA_COLUMNS: [&str; 6] = [
    "전용면적(㎡)",
    "대지면적(㎡)",
    "연면적(㎡)",
    "계약면적(㎡)",
    "대지권면적(㎡)",
    "건물면적(㎡)",
];

/// In-memory sheet: one header row, string cells
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table from raw sheet rows. The portal puts a notice block above
    /// the data, so the header is the first row holding a `시군구` cell.
    pub fn from_raw_rows(raw: Vec<Vec<String>>) -> Result<Self> {
        let Some(header_idx) = raw
            .iter()
            .position(|row| row.iter().any(|c| c.trim() == SIGUNGU))
        else {
            bail!("No header row with a '{SIGUNGU}' column");
        };

        let mut raw = raw.into_iter().skip(header_idx);
        let headers: Vec<String> = raw
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.split_whitespace().collect::<Vec<_>>().join(""))
            .collect();
        let width = headers.len();

        let rows = raw
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .map(|mut row| {
                row.resize(width, String::new());
                row.into_iter().map(|c| c.trim().to_string()).collect()
            })
            .collect();

        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    #[cfg(test)]
    pub fn values(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Append a column, or overwrite it when it already exists
    fn set_column(&mut self, name: &str, values: Vec<String>) {
        match self.column(name) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.headers.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
    }
}

/// Run every transform in order
pub fn normalize(table: &Table) -> Table {
    let table = split_sigungu(table);
    let table = split_yymm(&table);
    let table = normalize_numbers(&table);
    reorder_columns(&table)
}

/// Split the `시군구` address into `시도`, `시군구명`, `읍면동` and `리`
pub fn split_sigungu(table: &Table) -> Table {
    let mut out = table.clone();
    let Some(idx) = table.column(SIGUNGU) else {
        return out;
    };

    let parts: Vec<[String; 4]> = table.rows.iter().map(|r| split_address(&r[idx])).collect();
    for (slot, name) in [SIDO, SIGUNGU_NAME, EUPMYEONDONG, RI].into_iter().enumerate() {
        out.set_column(name, parts.iter().map(|p| p[slot].clone()).collect());
    }
    out
}

/// Positional split on whitespace: province, city/district, town, then
/// everything left over joined into the village slot.
/// `"경기도 성남시 분당구 정자동"` → `["경기도", "성남시", "분당구", "정자동"]`.
fn split_address(addr: &str) -> [String; 4] {
    let mut tokens = addr.split_whitespace();
    let mut out: [String; 4] = Default::default();
    for slot in out.iter_mut().take(3) {
        match tokens.next() {
            Some(t) => *slot = t.to_string(),
            None => return out,
        }
    }
    out[3] = tokens.collect::<Vec<_>>().join(" ");
    out
}

/// Split `계약년월` (`YYYYMM`) into `계약년` and `계약월`
pub fn split_yymm(table: &Table) -> Table {
    let mut out = table.clone();
    let Some(idx) = table.column(CONTRACT_YYMM) else {
        return out;
    };

    let (years, months): (Vec<String>, Vec<String>) = table
        .rows
        .iter()
        .map(|r| match yymm_regex().captures(r[idx].trim()) {
            Some(c) => {
                let month: u32 = c[2].parse().unwrap_or(0);
                if (1..=12).contains(&month) {
                    (c[1].to_string(), month.to_string())
                } else {
                    (String::new(), String::new())
                }
            }
            None => (String::new(), String::new()),
        })
        .unzip();

    out.set_column(CONTRACT_YEAR, years);
    out.set_column(CONTRACT_MONTH, months);
    out
}

/// Strip thousands separators from amounts and canonicalize areas
pub fn normalize_numbers(table: &Table) -> Table {
    let mut out = table.clone();
    for name in AMOUNT_COLUMNS {
        if let Some(idx) = out.column(name) {
            for row in &mut out.rows {
                row[idx] = normalize_amount(&row[idx]);
            }
        }
    }
    for name in AREA_COLUMNS {
        if let Some(idx) = out.column(name) {
            for row in &mut out.rows {
                row[idx] = normalize_area(&row[idx]);
            }
        }
    }
    out
}

fn normalize_amount(v: &str) -> String {
    let cleaned: String = v.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    match cleaned.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => match cleaned.parse::<f64>() {
            Ok(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => v.to_string(),
        },
    }
}

fn normalize_area(v: &str) -> String {
    let cleaned: String = v.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    match cleaned.parse::<f64>() {
        Ok(f) if f.is_finite() => format!("{f}"),
        _ => v.to_string(),
    }
}

/// Derived columns first, then the remaining columns in their original order.
/// The portal's row-number column is dropped.
pub fn reorder_columns(table: &Table) -> Table {
    let mut order: Vec<usize> = DERIVED_COLUMNS
        .iter()
        .filter_map(|name| table.column(name))
        .collect();
    order.extend(
        table
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !DERIVED_COLUMNS.contains(&h.as_str()) && h.as_str() != ROW_NUMBER)
            .map(|(i, _)| i),
    );

    Table {
        headers: order.iter().map(|&i| table.headers[i].clone()).collect(),
        rows: table
            .rows
            .iter()
            .map(|r| order.iter().map(|&i| r[i].clone()).collect())
            .collect(),
    }
}

fn yymm_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})(\d{2})$").expect("valid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn sample() -> Table {
        Table::from_raw_rows(raw(&[
            &["□ 본 서비스에서 제공하는 정보는 참고용입니다."],
            &[""],
            &["NO", "시군구", "단지명", "전용면적(㎡)", "계약년월", "계약일", "거래금액(만원)"],
            &["1", "서울특별시 강남구 개포동", "개포자이", "84.9700", "202401", "15", "245,000"],
            &["2", "경기도 성남시 분당구 정자동", "느티마을", "59", "202401", "3", " 98,500 "],
            &["", "", "", "", "", "", ""],
            &["3", "경기도 화성시 봉담읍 상리", "신창", "-", "2024-1", "9", "미상"],
        ]))
        .unwrap()
    }

    #[test]
    fn finds_header_below_notice_block() {
        let t = sample();
        assert_eq!(t.headers[0], "NO");
        assert_eq!(t.rows.len(), 3);
        assert_eq!(t.rows[1][6], "98,500");
    }

    #[test]
    fn missing_header_is_an_error() {
        assert!(Table::from_raw_rows(raw(&[&["a", "b"], &["1", "2"]])).is_err());
    }

    #[test]
    fn splits_addresses_by_position() {
        assert_eq!(split_address("서울특별시 강남구 개포동"), ["서울특별시", "강남구", "개포동", ""]);
        assert_eq!(
            split_address("경기도 성남시 분당구 정자동"),
            ["경기도", "성남시", "분당구", "정자동"]
        );
        assert_eq!(split_address("경기도 화성시 봉담읍 상리"), ["경기도", "화성시", "봉담읍", "상리"]);
        assert_eq!(
            split_address("세종특별자치시 조치원읍 신안리"),
            ["세종특별자치시", "조치원읍", "신안리", ""]
        );
        assert_eq!(
            split_address("경기도 용인시 수지구 풍덕천동 산 12"),
            ["경기도", "용인시", "수지구", "풍덕천동 산 12"]
        );
        assert_eq!(split_address("서울특별시 강남구"), ["서울특별시", "강남구", "", ""]);
        assert_eq!(split_address(""), ["", "", "", ""]);
    }

    #[test]
    fn splits_contract_month() {
        let t = split_yymm(&sample());
        assert_eq!(t.values(CONTRACT_YEAR).unwrap(), vec!["2024", "2024", ""]);
        assert_eq!(t.values(CONTRACT_MONTH).unwrap(), vec!["1", "1", ""]);
    }

    #[test]
    fn cleans_numbers_and_keeps_garbage() {
        let t = normalize_numbers(&sample());
        assert_eq!(t.values("거래금액(만원)").unwrap(), vec!["245000", "98500", "미상"]);
        assert_eq!(t.values("전용면적(㎡)").unwrap(), vec!["84.97", "59", "-"]);
    }

    #[test]
    fn full_pipeline_orders_columns() {
        let t = normalize(&sample());
        assert_eq!(
            t.headers,
            vec![
                "시도", "시군구명", "읍면동", "리", "계약년", "계약월", "시군구", "단지명",
                "전용면적(㎡)", "계약년월", "계약일", "거래금액(만원)",
            ]
        );
        assert_eq!(t.rows[1][..6], ["경기도", "성남시", "분당구", "정자동", "2024", "1"]);
        assert!(t.rows.iter().all(|r| r.len() == t.headers.len()));
    }

    #[test]
    fn normalize_is_deterministic() {
        let input = sample();
        assert_eq!(normalize(&input), normalize(&input));
        assert_eq!(normalize(&input), normalize(&input.clone()));
    }
}
