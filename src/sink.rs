//! CSV output for drive listings.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::models::DriveItem;
use crate::pager::ItemPager;

/// Column names, in output order.
pub const CSV_HEADER: [&str; 9] = [
    "Id",
    "Name",
    "MimeType",
    "Size",
    "Created Time",
    "Modified Time",
    "ParentId",
    "Shortcut Target Id",
    "Shortcut Target MimeType",
];

/// One flattened output row. Absent values become empty cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: Option<u64>,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub parent_id: Option<String>,
    pub shortcut_target_id: Option<String>,
    pub shortcut_target_mime_type: Option<String>,
}

impl From<&DriveItem> for CsvRecord {
    fn from(item: &DriveItem) -> Self {
        let shortcut = item.shortcut_details.as_ref();
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            mime_type: item.mime_type.clone(),
            size: item.size,
            created_time: item.created_time.clone(),
            modified_time: item.modified_time.clone(),
            parent_id: item.parent_id().map(String::from),
            shortcut_target_id: shortcut.and_then(|s| s.target_id.clone()),
            shortcut_target_mime_type: shortcut.and_then(|s| s.target_mime_type.clone()),
        }
    }
}

impl CsvRecord {
    pub fn to_row(&self) -> [String; 9] {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        [
            self.id.clone(),
            self.name.clone(),
            self.mime_type.clone(),
            self.size.map(|s| s.to_string()).unwrap_or_default(),
            opt(&self.created_time),
            opt(&self.modified_time),
            opt(&self.parent_id),
            opt(&self.shortcut_target_id),
            opt(&self.shortcut_target_mime_type),
        ]
    }
}

/// Writes the header on creation, then one row per item.
pub struct RecordSink<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> RecordSink<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(CSV_HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write(&mut self, item: &DriveItem) -> Result<()> {
        self.writer.write_record(CsvRecord::from(item).to_row())?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| std::io::Error::new(e.error().kind(), e.error().to_string()).into())
    }
}

/// Drain `pager` into a CSV file at `path`, truncating it first.
///
/// Rows already written are flushed even when the listing fails, and the
/// partial file is left in place. Returns the number of rows written.
pub async fn write_csv(pager: &mut ItemPager<'_>, path: &Path) -> Result<usize> {
    let mut sink = RecordSink::new(File::create(path)?)?;

    let outcome = loop {
        match pager.next_item().await {
            Ok(Some(item)) => {
                if let Err(e) = sink.write(&item) {
                    break Err(e);
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    let flushed = sink.flush();
    outcome?;
    flushed?;

    info!(
        "Wrote {} rows from {} page(s) to {:?}",
        sink.rows(),
        pager.pages_fetched(),
        path
    );
    Ok(sink.rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ShortcutDetails;

    fn item(id: &str) -> DriveItem {
        DriveItem {
            id: id.to_string(),
            name: "Doc".to_string(),
            mime_type: "text/plain".to_string(),
            size: Some(10),
            created_time: Some("t1".to_string()),
            modified_time: Some("t2".to_string()),
            parents: vec!["root".to_string()],
            shortcut_details: None,
        }
    }

    fn render(items: &[DriveItem]) -> String {
        let mut sink = RecordSink::new(Vec::new()).unwrap();
        for i in items {
            sink.write(i).unwrap();
        }
        String::from_utf8(sink.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_header_only() {
        assert_eq!(
            render(&[]),
            "Id,Name,MimeType,Size,Created Time,Modified Time,ParentId,Shortcut Target Id,Shortcut Target MimeType\n"
        );
    }

    #[test]
    fn test_absent_fields_are_empty_cells() {
        let mut folder = item("f");
        folder.mime_type = "application/vnd.google-apps.folder".to_string();
        folder.size = None;
        folder.parents.clear();

        let out = render(&[folder]);
        let row = out.lines().nth(1).unwrap();
        assert_eq!(row, "f,Doc,application/vnd.google-apps.folder,,t1,t2,,,");
        assert!(!out.contains("None"));
        assert!(!out.contains("null"));
    }

    #[test]
    fn test_shortcut_columns() {
        let mut shortcut = item("s");
        shortcut.shortcut_details = Some(ShortcutDetails {
            target_id: Some("target".to_string()),
            target_mime_type: Some("application/pdf".to_string()),
        });

        let out = render(&[shortcut]);
        assert!(out.lines().nth(1).unwrap().ends_with(",root,target,application/pdf"));
    }

    #[test]
    fn test_names_with_delimiters_are_quoted() {
        let mut tricky = item("q");
        tricky.name = "Budget, \"final\"".to_string();

        let out = render(&[tricky]);
        assert!(out.contains("\"Budget, \"\"final\"\"\""));
    }

    #[test]
    fn test_rows_keep_input_order() {
        let out = render(&[item("b"), item("a"), item("c")]);
        let ids: Vec<&str> = out
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
