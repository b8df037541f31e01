//! Chunked reader for delimited source files
//!
//! [`ChunkReader`] streams a header-bearing CSV (optionally gzip-compressed)
//! as a lazy, forward-only sequence of [`Chunk`]s of at most `batch_size`
//! rows. Only one chunk is held in memory at a time.
//!
//! Malformed records (wrong field count, invalid UTF-8) do not end the
//! stream: the reader still consumes the whole `batch_size` window they fall
//! in and yields that window as [`ReadError::Malformed`], so the following
//! chunks keep their boundaries. I/O failures end the stream.

use flate2::read::GzDecoder;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Cell values treated as absent, in addition to blank cells
pub const DEFAULT_NULL_MARKERS: &[&str] = &[
    "NA", "N/A", "n/a", "NaN", "nan", "NULL", "null", "None", "#N/A", "<NA>",
];

/// Ordered, bounded slice of the source processed as one unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<R> {
    /// 0-based position of the chunk in the stream
    pub index: usize,
    /// 0-based ordinal of the chunk's first data record in the source
    pub first_record: u64,
    pub rows: Vec<R>,
}

impl<R> Chunk<R> {
    pub fn new(index: usize, first_record: u64, rows: Vec<R>) -> Self {
        Self {
            index,
            first_record,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column names of the source, as found in its header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHeader {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl SourceHeader {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // First occurrence wins for duplicated header names
            positions.entry(name.clone()).or_insert(i);
        }
        Self { names, positions }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A source row before any coercion
///
/// Cells are keyed by the shared [`SourceHeader`]; blank cells and null
/// markers are stored as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    header: Arc<SourceHeader>,
    values: Vec<Option<String>>,
}

impl RawRow {
    pub fn new(header: Arc<SourceHeader>, values: Vec<Option<String>>) -> Self {
        Self { header, values }
    }

    pub fn header(&self) -> &Arc<SourceHeader> {
        &self.header
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// Value at a source position, `None` when absent
    pub fn value_at(&self, position: usize) -> Option<&str> {
        self.values.get(position).and_then(|v| v.as_deref())
    }

    /// Value of a named column, `None` when absent or unknown
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header.position(column).and_then(|i| self.value_at(i))
    }
}

/// Cell values that read as null
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullMarkers(HashSet<String>);

impl NullMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(markers.into_iter().map(Into::into).collect())
    }

    /// Blank (after trimming) or equal to a marker
    pub fn is_null(&self, cell: &str) -> bool {
        let trimmed = cell.trim();
        trimmed.is_empty() || self.0.contains(trimmed)
    }
}

impl Default for NullMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_NULL_MARKERS.iter().copied())
    }
}

/// Options for [`ChunkReader::open`]
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub batch_size: usize,
    pub delimiter: u8,
    pub null_markers: NullMarkers,
}

impl ReaderOptions {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_null_markers(mut self, null_markers: NullMarkers) -> Self {
        self.null_markers = null_markers;
        self
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            delimiter: b',',
            null_markers: NullMarkers::default(),
        }
    }
}

/// A chunk window containing at least one unparseable record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "chunk {chunk_index} has {malformed} malformed of {records} records (first at line {}): {message}",
    .line.map_or_else(|| "?".to_string(), |l| l.to_string())
)]
pub struct MalformedChunk {
    pub chunk_index: usize,
    /// Records consumed for this window, valid and malformed
    pub records: usize,
    pub malformed: usize,
    /// Source line of the first malformed record
    pub line: Option<u64>,
    pub message: String,
}

/// Errors produced while opening or streaming the source
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("source file not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    #[error("failed to open source {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid header in {}: {reason}", .path.display())]
    Header { path: PathBuf, reason: String },

    #[error(transparent)]
    Malformed(MalformedChunk),

    #[error("I/O error while reading chunk {chunk_index}")]
    Io {
        chunk_index: usize,
        #[source]
        source: csv::Error,
    },
}

impl ReadError {
    /// Whether the error is confined to a single chunk
    pub fn is_chunk_scoped(&self) -> bool {
        matches!(self, ReadError::Malformed(_))
    }
}

/// Fail with [`ReadError::SourceNotFound`] unless `path` is an existing file
pub fn ensure_source_exists(path: &Path) -> Result<(), ReadError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(ReadError::Open {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ReadError::SourceNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ReadError::Open {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Lazy, finite, non-restartable sequence of raw chunks
///
/// Implements `Iterator<Item = Result<Chunk<RawRow>, ReadError>>`. Once it
/// returns `None`, or after an I/O error, it stays exhausted; re-reading the
/// source requires a new [`ChunkReader::open`].
pub struct ChunkReader {
    path: PathBuf,
    records: Option<csv::StringRecordsIntoIter<Box<dyn Read + Send>>>,
    header: Arc<SourceHeader>,
    options: ReaderOptions,
    next_index: usize,
    records_read: u64,
}

impl ChunkReader {
    /// Open `path` and read its header row
    ///
    /// No data rows are read until the first call to `next`.
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self, ReadError> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReadError::SourceNotFound { path: path.clone() }
            } else {
                ReadError::Open {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        let input: Box<dyn Read + Send> = if is_gzip(&path) {
            debug!(path = %path.display(), "Reading gzip-compressed source");
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(file)
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(options.delimiter)
            .flexible(false)
            .from_reader(input);

        let header = reader.headers().map_err(|e| ReadError::Header {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if header.is_empty() || header.iter().all(|h| h.trim().is_empty()) {
            return Err(ReadError::Header {
                path,
                reason: "source has no header row".to_string(),
            });
        }

        let header = Arc::new(SourceHeader::new(
            header
                .iter()
                .map(|name| name.trim_start_matches('\u{feff}').trim().to_string()),
        ));

        info!(
            path = %path.display(),
            columns = header.len(),
            batch_size = options.batch_size,
            "Opened source"
        );

        Ok(Self {
            path,
            records: Some(reader.into_records()),
            header,
            options,
            next_index: 0,
            records_read: 0,
        })
    }

    pub fn header(&self) -> &Arc<SourceHeader> {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data records consumed so far, including malformed ones
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn to_raw_row(&self, record: &csv::StringRecord) -> RawRow {
        let values = record
            .iter()
            .map(|cell| {
                if self.options.null_markers.is_null(cell) {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        RawRow::new(Arc::clone(&self.header), values)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Chunk<RawRow>, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch_size = self.options.batch_size.max(1);
        let index = self.next_index;
        let first_record = self.records_read;

        let mut rows = Vec::with_capacity(batch_size.min(1024));
        let mut consumed = 0usize;
        let mut malformed = 0usize;
        let mut first_error: Option<(Option<u64>, String)> = None;

        while consumed < batch_size {
            let Some(records) = self.records.as_mut() else {
                break;
            };

            match records.next() {
                Some(Ok(record)) => {
                    rows.push(self.to_raw_row(&record));
                    consumed += 1;
                },
                Some(Err(e)) if e.is_io_error() => {
                    self.records = None;
                    return Some(Err(ReadError::Io {
                        chunk_index: index,
                        source: e,
                    }));
                },
                Some(Err(e)) => {
                    consumed += 1;
                    malformed += 1;
                    if first_error.is_none() {
                        first_error = Some((e.position().map(|p| p.line()), e.to_string()));
                    }
                },
                None => {
                    self.records = None;
                },
            }
        }

        if consumed == 0 {
            return None;
        }

        self.next_index += 1;
        self.records_read += consumed as u64;

        if let Some((line, message)) = first_error {
            return Some(Err(ReadError::Malformed(MalformedChunk {
                chunk_index: index,
                records: consumed,
                malformed,
                line,
                message,
            })));
        }

        debug!(chunk_index = index, rows = rows.len(), "Read chunk");
        Some(Ok(Chunk::new(index, first_record, rows)))
    }
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("path", &self.path)
            .field("columns", &self.header.len())
            .field("batch_size", &self.options.batch_size)
            .field("next_index", &self.next_index)
            .field("exhausted", &self.records.is_none())
            .finish()
    }
}
