//! CSV report writer.

use crate::error::{AffilError, Result};
use crate::merge::MergedRow;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// CSV column order for the report
pub const REPORT_COLUMNS: &[&str] = &["author", "affiliation", "doi", "title"];

/// Write the report to `path`, replacing any existing file.
///
/// The header row is written even when there are no rows.
///
/// # Errors
///
/// [`AffilError::Write`] if the file cannot be created or written.
pub fn write_report(path: &Path, rows: &[MergedRow]) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| AffilError::Write(format!("cannot create {}: {}", path.display(), e)))?;

    write_rows(file, rows)
        .map_err(|e| AffilError::Write(format!("cannot write {}: {}", path.display(), e)))?;

    info!(path = %path.display(), rows = rows.len(), "Report written");
    Ok(())
}

/// Write header and rows as CSV to any writer.
pub fn write_rows<W: Write>(writer: W, rows: &[MergedRow]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    wtr.write_record(REPORT_COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(author: &str, affiliation: &str, doi: &str, title: &str) -> MergedRow {
        MergedRow {
            author: author.to_string(),
            affiliation: affiliation.to_string(),
            doi: doi.to_string(),
            title: title.to_string(),
        }
    }

    fn render(rows: &[MergedRow]) -> String {
        let mut buf = Vec::new();
        write_rows(&mut buf, rows).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_header_only_when_empty() {
        assert_eq!(render(&[]), "author,affiliation,doi,title\n");
    }

    #[test]
    fn test_quotes_commas_and_quotes() {
        let out = render(&[row(
            "Smith, John",
            "Dept. of \"Applied\" Physics",
            "10.1/abc",
            "Plain",
        )]);
        assert_eq!(
            out,
            "author,affiliation,doi,title\n\"Smith, John\",\"Dept. of \"\"Applied\"\" Physics\",10.1/abc,Plain\n"
        );
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_report(&path, &[row("J. Smith", "MIT", "10.1/abc", "T")]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "author,affiliation,doi,title\nJ. Smith,MIT,10.1/abc,T\n");
    }

    #[test]
    fn test_unwritable_destination_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.csv");
        let err = write_report(&path, &[]).unwrap_err();
        assert!(matches!(err, AffilError::Write(_)));
        assert!(err.is_fatal());
    }
}
