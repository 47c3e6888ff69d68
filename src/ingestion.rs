use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::records::Category;

const TITLE_HEADERS: &[&str] = &["タイトル", "Title", "title", "name"];
const COMMENT_HEADERS: &[&str] = &["メモ", "Note", "Comment", "コメント"];

/// One row of a curated source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEntry {
    pub name: String,
    pub comment: String,
}

/// A source list file and the category its entries belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputList {
    pub category: Category,
    pub path: PathBuf,
}

impl FromStr for InputList {
    type Err = AppError;

    /// Parses `<category>=<path>`, e.g. `2=terrace.csv`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (category, path) = value.split_once('=').ok_or_else(|| {
            AppError::Parse(format!("expected <category>=<csv path>, got {value}"))
        })?;
        let path = path.trim();
        if path.is_empty() {
            return Err(AppError::Parse(format!("missing csv path in {value}")));
        }
        Ok(Self {
            category: category.parse()?,
            path: PathBuf::from(path),
        })
    }
}

pub fn read_input_entries(path: &Path) -> AppResult<Vec<InputEntry>> {
    let file = File::open(path)
        .map_err(|err| AppError::Path(format!("{}: {err}", path.display())))?;
    parse_input_entries(file)
}

pub fn parse_input_entries<R: std::io::Read>(reader: R) -> AppResult<Vec<InputEntry>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let title_index = find_column(&headers, TITLE_HEADERS).ok_or_else(|| {
        AppError::Parse(format!(
            "no title column found (expected one of {})",
            TITLE_HEADERS.join(", ")
        ))
    })?;
    let comment_index = find_column(&headers, COMMENT_HEADERS);

    let mut entries = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(line = line + 2, error = %err, "skipping malformed list row");
                continue;
            }
        };
        let name = record.get(title_index).unwrap_or_default().trim();
        if name.is_empty() {
            debug!(line = line + 2, "skipping list row without a title");
            continue;
        }
        let comment = comment_index
            .and_then(|index| record.get(index))
            .unwrap_or_default()
            .trim();
        entries.push(InputEntry {
            name: name.to_string(),
            comment: comment.to_string(),
        });
    }
    Ok(entries)
}

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|wanted| {
        headers
            .iter()
            .position(|header| header.trim_start_matches('\u{feff}') == *wanted)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    pub location_name: String,
    pub comment: String,
    pub url: String,
    pub category: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    pub location_name: String,
    pub place_id: String,
    pub display_name: String,
    pub reason: String,
}

/// CSV sink written row by row; every append is flushed.
pub struct ListWriter {
    writer: csv::Writer<Box<dyn Write + Send>>,
    path: PathBuf,
}

impl ListWriter {
    pub fn create(path: &Path, header: &[&str]) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file: Box<dyn Write + Send> = Box::new(File::create(path)?);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(header)?;
        writer.flush()?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn output(path: &Path) -> AppResult<Self> {
        Self::create(path, &["location_name", "comment", "url", "category"])
    }

    pub fn rejected(path: &Path) -> AppResult<Self> {
        Self::create(path, &["location_name", "place_id", "display_name", "reason"])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&mut self, row: &T) -> AppResult<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reads_japanese_takeout_headers() {
        let csv = "タイトル,メモ,URL,コメント\n\
                   Café Example,テラス席あり,https://maps.google.com/?q=1,\n\
                   ,empty title,,\n\
                   \"Quoted, Name\",,,\n";
        let entries = parse_input_entries(csv.as_bytes()).unwrap();
        assert_eq!(
            entries,
            vec![
                InputEntry {
                    name: "Café Example".into(),
                    comment: "テラス席あり".into(),
                },
                InputEntry {
                    name: "Quoted, Name".into(),
                    comment: String::new(),
                },
            ]
        );
    }

    #[test]
    fn reads_english_headers_and_short_rows() {
        let csv = "\u{feff}Title,Note,URL\nBakery,\"great bread\",u\nShort\n";
        let entries = parse_input_entries(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].comment, "great bread");
        assert_eq!(entries[1].name, "Short");
        assert_eq!(entries[1].comment, "");
    }

    #[test]
    fn missing_title_column_is_an_error() {
        let err = parse_input_entries("URL,Note\nx,y\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn parses_input_list_arguments() {
        let list: InputList = "2=lists/terrace.csv".parse().unwrap();
        assert_eq!(list.category, Category::TerraceOk);
        assert_eq!(list.path, PathBuf::from("lists/terrace.csv"));
        assert!("terrace.csv".parse::<InputList>().is_err());
        assert!("9=terrace.csv".parse::<InputList>().is_err());
        assert!("1=".parse::<InputList>().is_err());
    }

    #[test]
    fn writes_header_and_flushes_each_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("output.csv");
        let mut writer = ListWriter::output(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "location_name,comment,url,category\n"
        );

        writer
            .append(&OutputRow {
                location_name: "Café Example".into(),
                comment: "nice, quiet".into(),
                url: "https://maps.google.com/?cid=1".into(),
                category: 1,
            })
            .unwrap();
        let contents = std::fs::read_to_string(writer.path()).unwrap();
        assert_eq!(
            contents,
            "location_name,comment,url,category\nCafé Example,\"nice, quiet\",https://maps.google.com/?cid=1,1\n"
        );
    }
}
