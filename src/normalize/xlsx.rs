use super::Table;
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Reader};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Read the first worksheet of an `.xlsx`/`.xls` export into a [`Table`]
pub fn read_table(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open spreadsheet {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .context("Spreadsheet has no worksheets")?
        .with_context(|| format!("Failed to read first worksheet of {}", path.display()))?;

    let raw: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    debug!(file = %path.display(), rows = raw.len(), "Read worksheet");

    Table::from_raw_rows(raw).with_context(|| format!("Unexpected layout in {}", path.display()))
}

/// Write a table as UTF-8 CSV with a byte-order mark so Excel picks the right encoding
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all("\u{feff}".as_bytes())?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn csv_has_bom_and_quotes_commas() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("아파트 202401.csv");
        let table = Table {
            headers: vec!["시군구".into(), "거래금액(만원)".into()],
            rows: vec![vec!["서울특별시 강남구".into(), "1,000".into()]],
        };
        write_csv(&table, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert_eq!(text, "시군구,거래금액(만원)\n서울특별시 강남구,\"1,000\"\n");
    }

    #[test]
    fn reads_portal_export_below_notice_block() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/apartment_202401.xlsx");
        let table = read_table(&path).unwrap();

        assert_eq!(table.headers[..3], ["NO", "시군구", "번지"]);
        assert_eq!(table.headers.len(), 10);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.values("계약년월").unwrap(), vec!["202401"; 3]);
        assert_eq!(table.values("거래금액(만원)").unwrap(), vec!["245,000", "98,500", "31,200"]);
        assert_eq!(table.values("시군구").unwrap()[1], "경기도 성남시 분당구 정자동");
    }

    #[test]
    fn unreadable_spreadsheet_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        assert!(read_table(&path).is_err());
    }
}
