//! Line counting and line-bounded file splitting
//!
//! Chunk files are written next to the source as
//! `<stem>_split_<index>`, the index zero-padded so that names sort in chunk
//! order. Bytes are copied verbatim: concatenating the chunks in order gives
//! back the source file.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Token between the source stem and the chunk index
pub const SPLIT_SEPARATOR: &str = "_split_";

/// Minimum number of digits in a chunk index
const MIN_INDEX_WIDTH: usize = 4;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One slice of a source file, loaded in a single transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadChunk {
    /// Position of the chunk in the load (0-based)
    pub index: usize,
    /// File holding the chunk's lines
    pub path: PathBuf,
    /// Number of lines in the chunk
    pub line_count: usize,
    /// Whether the file was written by the splitter (and may be removed)
    pub generated: bool,
}

impl LoadChunk {
    /// The whole source file as a single chunk
    pub fn whole(path: impl Into<PathBuf>, line_count: usize) -> Self {
        Self {
            index: 0,
            path: path.into(),
            line_count,
            generated: false,
        }
    }
}

/// Counts and splits files for the bulk loader
pub trait Chunker {
    /// Number of lines in `file`; a final line without terminator counts
    fn count_lines(&self, file: &Path) -> io::Result<usize>;

    /// Split `file` (holding `total_lines` lines) into chunks of at most
    /// `lines_per_chunk` lines, in file order
    fn split(
        &self,
        file: &Path,
        lines_per_chunk: usize,
        total_lines: usize,
    ) -> io::Result<Vec<LoadChunk>>;
}

/// Streaming [`Chunker`] that writes chunk files alongside the source
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSplitter;

impl Chunker for FileSplitter {
    fn count_lines(&self, file: &Path) -> io::Result<usize> {
        let mut reader = File::open(file)?;
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut lines = 0;
        let mut last = None;

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            lines += buffer[..n].iter().filter(|b| **b == b'\n').count();
            last = Some(buffer[n - 1]);
        }

        if last.is_some_and(|b| b != b'\n') {
            lines += 1;
        }
        Ok(lines)
    }

    fn split(
        &self,
        file: &Path,
        lines_per_chunk: usize,
        total_lines: usize,
    ) -> io::Result<Vec<LoadChunk>> {
        if lines_per_chunk == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "lines per chunk must be positive",
            ));
        }

        let width = index_width(total_lines.div_ceil(lines_per_chunk));
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut reader = BufReader::new(File::open(file)?);
        let mut line = Vec::new();
        let mut chunks = Vec::new();
        let mut current: Option<(BufWriter<File>, LoadChunk)> = None;

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }

            if current.is_none() {
                let index = chunks.len();
                let path = dir.join(chunk_file_name(&stem, index, width));
                let writer = BufWriter::new(File::create(&path)?);
                current = Some((
                    writer,
                    LoadChunk {
                        index,
                        path,
                        line_count: 0,
                        generated: true,
                    },
                ));
            }

            let full = match current.as_mut() {
                Some((writer, chunk)) => {
                    writer.write_all(&line)?;
                    chunk.line_count += 1;
                    chunk.line_count == lines_per_chunk
                }
                None => false,
            };

            if full && let Some((mut writer, chunk)) = current.take() {
                writer.flush()?;
                chunks.push(chunk);
            }
        }

        if let Some((mut writer, chunk)) = current {
            writer.flush()?;
            chunks.push(chunk);
        }

        Ok(chunks)
    }
}

/// Name of chunk `index` of a file with stem `stem`
pub fn chunk_file_name(stem: &str, index: usize, width: usize) -> String {
    format!("{}{}{:0width$}", stem, SPLIT_SEPARATOR, index, width = width)
}

/// Digits needed for the largest index of `chunk_count` chunks
fn index_width(chunk_count: usize) -> usize {
    let largest = chunk_count.saturating_sub(1);
    let digits = largest.checked_ilog10().map_or(1, |d| d as usize + 1);
    digits.max(MIN_INDEX_WIDTH)
}
