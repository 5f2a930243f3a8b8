// 📄 CSV file as a spreadsheet
//
// Every cell reads back as text; fingerprint normalization makes "34" and 34
// (or "TRUE" and true) compare equal, so a round-trip through the file is not
// an edit.

use super::{cell_text, Row, SheetHost};
use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CsvSheet {
    path: PathBuf,
}

impl CsvSheet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvSheet { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_records<I>(&self, records: I) -> SyncResult<()>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);

        for record in records {
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl SheetHost for CsvSheet {
    async fn clear(&self) -> SyncResult<()> {
        fs::write(&self.path, "")?;
        Ok(())
    }

    async fn write_header(&self, header: &[String]) -> SyncResult<()> {
        self.append_records(std::iter::once(header.to_vec()))
    }

    async fn append_rows(&self, rows: &[Row]) -> SyncResult<()> {
        self.append_records(rows.iter().map(|row| row.iter().map(cell_text).collect()))
    }

    async fn read_all(&self) -> SyncResult<Vec<Row>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(|cell| Value::String(cell.to_string())).collect());
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = CsvSheet::new(dir.path().join("mualaf.csv"));

        sheet.clear().await.unwrap();
        sheet
            .write_header(&["id".to_string(), "name".to_string(), "active".to_string()])
            .await
            .unwrap();
        sheet
            .append_rows(&[
                vec![json!("1"), json!("Siti, Nur"), json!(true)],
                vec![json!("2"), json!(""), json!(false)],
            ])
            .await
            .unwrap();

        let rows = sheet.read_all().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec![json!("1"), json!("Siti, Nur"), json!("true")]);
        assert_eq!(rows[2][1], json!(""));
    }

    #[tokio::test]
    async fn test_clear_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = CsvSheet::new(dir.path().join("sheet.csv"));

        sheet.write_header(&["id".to_string()]).await.unwrap();
        sheet.clear().await.unwrap();

        assert!(sheet.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = CsvSheet::new(dir.path().join("absent.csv"));
        assert!(sheet.read_all().await.unwrap().is_empty());
    }
}
