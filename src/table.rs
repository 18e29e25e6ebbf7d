//! HTML table to CSV export.
//!
//! Takes the first `<table>` of a document, uses its first row as the
//! header, drops the leading column (usually a row number or checkbox),
//! and writes every non-blank row as comma-separated values.

use scraper::{ElementRef, Html, Selector};

use crate::error::{Error, Result};

/// Default name of the exported file.
pub const DEFAULT_OUTPUT: &str = "data.csv";

/// One body row as an ordered header→cell mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(Vec<(String, String)>);

impl Record {
    /// Cell under `header`, if the table has such a column.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, cell)| cell.as_str())
    }

    pub fn cells(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, cell)| cell.as_str())
    }

    fn is_blank(&self) -> bool {
        self.cells().all(str::is_empty)
    }
}

/// A scraped table, first column already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

impl Table {
    /// Serialize as CSV, header line first.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for record in &self.records {
            writer.write_record(record.cells())?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Other(format!("cannot finish CSV: {e}")))?;
        String::from_utf8(bytes).map_err(|e| Error::Other(format!("CSV is not UTF-8: {e}")))
    }
}

/// Scrape the first table in `html`.
///
/// Fails with [`Error::TargetStructureMissing`] when there is no table or it has no rows.
pub fn scrape_table(html: &str) -> Result<Table> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;

    let table = document
        .select(&table_sel)
        .next()
        .ok_or_else(|| Error::TargetStructureMissing("no <table> in document".to_string()))?;

    let mut rows = table.select(&row_sel).map(|row| row_cells(&row));

    let header_row = rows
        .next()
        .ok_or_else(|| Error::TargetStructureMissing("table has no rows".to_string()))?;
    let headers: Vec<String> = header_row.into_iter().skip(1).collect();

    let records = rows
        .map(|cells| {
            let mut cells = cells.into_iter().skip(1);
            Record(
                headers
                    .iter()
                    .map(|h| (h.clone(), cells.next().unwrap_or_default()))
                    .collect(),
            )
        })
        .filter(|record| !record.is_blank())
        .collect();

    Ok(Table { headers, records })
}

/// Load a page from a URL or a local file.
pub async fn load_source(client: &reqwest::Client, source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        crate::index::fetch_text(client, source).await
    } else {
        Ok(tokio::fs::read_to_string(source).await?)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Other(format!("bad selector {css:?}: {e:?}")))
}

/// Text of each direct `th`/`td` child, whitespace collapsed.
fn row_cells(row: &ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "th" | "td"))
        .map(|cell| {
            cell.text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}
