use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IngestError, IngestResult};
use crate::parser::{self, Record, FILE_COLUMN};
use crate::schema::TabularSchema;
use crate::store::{insert_records, quote_ident, replace_table, Store};

pub const OUTPUT_SUFFIX: &str = ".out";
pub const DATA_TABLE: &str = "data";
pub const HEADERS_TABLE: &str = "headers";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IngestStrategy {
    #[default]
    Flat,
    Tabular(TabularSchema),
}

impl IngestStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStrategy::Flat => "flat",
            IngestStrategy::Tabular(_) => "tabular",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub id: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub mode: &'static str,
    pub files_found: usize,
    pub files_skipped: usize,
    pub header_rows: usize,
    pub data_rows: usize,
    #[serde(rename = "store")]
    pub store_path: PathBuf,
}

/// Parse the id out of an output file name: `007.out` is task 7.
pub fn file_id(path: &Path) -> IngestResult<u64> {
    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(OUTPUT_SUFFIX))
        .unwrap_or_default();
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IngestError::ValueMalformed {
            path: path.to_path_buf(),
            reason: format!("file name '{}' does not encode an integer task id", stem),
        });
    }
    // Ids are stored in an SQLite INTEGER column, which is a signed 64-bit value.
    stem.parse::<i64>()
        .ok()
        .and_then(|id| u64::try_from(id).ok())
        .ok_or_else(|| IngestError::ValueMalformed {
            path: path.to_path_buf(),
            reason: format!("task id '{}' is out of range", stem),
        })
}

pub fn scan_output_paths(directory: &Path) -> IngestResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| {
            let not_found = err
                .io_error()
                .map(|e| e.kind() == ErrorKind::NotFound)
                .unwrap_or(false);
            if not_found {
                IngestError::NotFound {
                    directory: directory.to_path_buf(),
                }
            } else {
                let path = err.path().unwrap_or(directory).to_path_buf();
                IngestError::io(path, err.into())
            }
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let is_output = entry
            .file_name()
            .to_str()
            .map(|n| n.ends_with(OUTPUT_SUFFIX))
            .unwrap_or(false);
        if is_output {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// Output files of `directory` in ascending id order. Fails with `NotFound`
/// when there are none.
pub fn output_files(directory: &Path) -> IngestResult<Vec<OutputFile>> {
    let mut files = scan_output_paths(directory)?
        .into_iter()
        .map(|path| Ok(OutputFile { id: file_id(&path)?, path }))
        .collect::<IngestResult<Vec<_>>>()?;
    if files.is_empty() {
        return Err(IngestError::NotFound {
            directory: directory.to_path_buf(),
        });
    }
    files.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));
    for pair in files.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(IngestError::DuplicateFileId {
                id: pair[0].id,
                first: pair[0].path.clone(),
                second: pair[1].path.clone(),
            });
        }
    }
    Ok(files)
}

#[derive(Default)]
struct Batch {
    headers: Vec<Record>,
    data: Vec<Record>,
    skipped: usize,
}

fn read_batch(files: &[OutputFile], strategy: &IngestStrategy) -> IngestResult<Batch> {
    let mut batch = Batch::default();
    for file in files {
        let text = fs::read_to_string(&file.path).map_err(|e| IngestError::io(&file.path, e))?;
        debug!(file = file.id, path = %file.path.display(), "scanning output file");
        match strategy {
            IngestStrategy::Flat => match parser::parse_flat(&text, file.id)
                .map_err(|e| e.at(&file.path))?
            {
                Some(out) => {
                    batch.headers.push(out.header);
                    batch.data.push(out.data);
                }
                None => batch.skipped += 1,
            },
            IngestStrategy::Tabular(schema) => match parser::parse_tabular(&text, file.id, schema)
                .map_err(|e| e.at(&file.path))?
            {
                Some(out) => {
                    batch.headers.push(out.header);
                    batch.data.extend(out.rows);
                }
                None => batch.skipped += 1,
            },
        }
    }
    if batch.skipped > 0 {
        warn!(skipped = batch.skipped, "skipped empty output files");
    }
    Ok(batch)
}

pub fn ingest(directory: &Path, strategy: &IngestStrategy) -> IngestResult<IngestSummary> {
    ingest_into(directory, &Store::in_directory(directory), strategy)
}

/// Ingest `directory` into `store`, replacing the tables the strategy owns.
pub fn ingest_into(
    directory: &Path,
    store: &Store,
    strategy: &IngestStrategy,
) -> IngestResult<IngestSummary> {
    if let IngestStrategy::Tabular(schema) = strategy {
        schema.validate()?;
    }
    info!(
        directory = %directory.display(),
        mode = strategy.as_str(),
        "reading all output data into results store"
    );
    let files = output_files(directory)?;
    let batch = read_batch(&files, strategy)?;

    store.with_session(|conn| {
        let tx = conn.transaction()?;
        match strategy {
            IngestStrategy::Flat => {
                replace_table(&tx, DATA_TABLE, &batch.data, Some(FILE_COLUMN))?;
            }
            IngestStrategy::Tabular(schema) => {
                tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(DATA_TABLE)), [])?;
                tx.execute(&schema.create_table_sql(DATA_TABLE), [])?;
                replace_table(&tx, HEADERS_TABLE, &batch.headers, None)?;
                insert_records(&tx, DATA_TABLE, &schema.table_columns(), &batch.data)?;
            }
        }
        tx.commit()?;
        Ok(())
    })?;

    let summary = IngestSummary {
        mode: strategy.as_str(),
        files_found: files.len(),
        files_skipped: batch.skipped,
        header_rows: batch.headers.len(),
        data_rows: batch.data.len(),
        store_path: store.path().to_path_buf(),
    };
    info!(
        files = summary.files_found,
        data_rows = summary.data_rows,
        store = %summary.store_path.display(),
        "ingestion complete"
    );
    Ok(summary)
}
