//! Streaming rewrite of a file through an ordered list of filter rules
//!
//! The source is read in chunks of at most `buffer` bytes and every rule is
//! applied to each chunk in order, so memory use is bounded by the buffer
//! size. A match that spans two chunks is not found; pick a buffer larger than
//! the longest expected match.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use super::{Processor, ProcessorError, ProcessorResult};

/// Default read chunk size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Suffix of the temporary target used for in-place rewrites
const TEMP_SUFFIX: &str = ".tmp";

/// A `(pattern, replacement)` pair applied to every chunk
///
/// The replacement may refer to capture groups with `$1` / `${name}`.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pattern: Regex,
    replacement: String,
}

impl FilterRule {
    /// Compile a rule
    pub fn new(pattern: &str, replacement: impl Into<String>) -> ProcessorResult<Self> {
        let compiled = Regex::new(pattern).map_err(|e| ProcessorError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern: compiled,
            replacement: replacement.into(),
        })
    }

    /// CSV-style escaping: `"` becomes `""`
    pub fn escape_quotes() -> Self {
        Self {
            pattern: Regex::new("\"").expect("Invalid regex"),
            replacement: "\"\"".to_string(),
        }
    }

    /// Source of the pattern
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Replacement text
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Replace every match in `text`
    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.pattern.replace_all(text, self.replacement.as_str())
    }
}

/// Counters from one rewrite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RewriteStats {
    pub chunks: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Rewrites a file through a chain of [`FilterRule`]s
///
/// Either copies `source_file` to a distinct `target_file`, or, built with
/// [`in_place`](Self::in_place), rewrites one file through a temporary file
/// that replaces the original on success.
#[derive(Debug, Clone)]
pub struct EscapeCsvProcessor {
    source_file: PathBuf,
    target_file: PathBuf,
    use_temp_file: bool,
    filters: Vec<FilterRule>,
    buffer: usize,
    last_stats: RewriteStats,
}

impl EscapeCsvProcessor {
    /// Rewrite `source_file` into `target_file`
    ///
    /// Fails when either path is empty or both resolve to the same file.
    pub fn new(
        source_file: impl Into<PathBuf>,
        target_file: impl Into<PathBuf>,
    ) -> ProcessorResult<Self> {
        let source_file = source_file.into();
        let target_file = target_file.into();

        if source_file.as_os_str().is_empty() {
            return Err(ProcessorError::Configuration(
                "Source file must be specified".to_string(),
            ));
        }
        if target_file.as_os_str().is_empty() {
            return Err(ProcessorError::Configuration(
                "Target file must be specified".to_string(),
            ));
        }
        if same_path(&source_file, &target_file) {
            return Err(ProcessorError::Configuration(format!(
                "Source and target file cannot point to the same file: {}",
                source_file.display()
            )));
        }

        Ok(Self::build(source_file, target_file, false))
    }

    /// Rewrite `file` in place through `<file>.tmp`
    pub fn in_place(file: impl Into<PathBuf>) -> ProcessorResult<Self> {
        let file = file.into();
        if file.as_os_str().is_empty() {
            return Err(ProcessorError::Configuration(
                "File must be specified".to_string(),
            ));
        }

        let mut temp = OsString::from(file.as_os_str());
        temp.push(TEMP_SUFFIX);
        Ok(Self::build(file, PathBuf::from(temp), true))
    }

    fn build(source_file: PathBuf, target_file: PathBuf, use_temp_file: bool) -> Self {
        Self {
            source_file,
            target_file,
            use_temp_file,
            filters: vec![FilterRule::escape_quotes()],
            buffer: DEFAULT_BUFFER_SIZE,
            last_stats: RewriteStats::default(),
        }
    }

    /// Replace the filter chain
    pub fn with_filters(mut self, filters: Vec<FilterRule>) -> Self {
        self.filters = filters;
        self
    }

    /// Set the read chunk size in bytes
    pub fn with_buffer_size(mut self, buffer: usize) -> ProcessorResult<Self> {
        if buffer == 0 {
            return Err(ProcessorError::Configuration(
                "Buffer size must be positive".to_string(),
            ));
        }
        self.buffer = buffer;
        Ok(self)
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn target_file(&self) -> &Path {
        &self.target_file
    }

    pub fn use_temp_file(&self) -> bool {
        self.use_temp_file
    }

    pub fn filters(&self) -> &[FilterRule] {
        &self.filters
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer
    }

    /// Counters of the last successful run
    pub fn last_stats(&self) -> RewriteStats {
        self.last_stats
    }

    fn rewrite(&self) -> ProcessorResult<RewriteStats> {
        let source = &self.source_file;
        let target = &self.target_file;

        let mut reader = File::open(source).map_err(|e| ProcessorError::io(source, e))?;
        let mut writer =
            BufWriter::new(File::create(target).map_err(|e| ProcessorError::io(target, e))?);

        let mut buffer = vec![0u8; self.buffer];
        let mut pending: Vec<u8> = Vec::with_capacity(self.buffer + 4);
        let mut stats = RewriteStats::default();

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProcessorError::io(source, e)),
            };

            if n == 0 {
                if !pending.is_empty() {
                    return Err(ProcessorError::io(
                        source,
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            "file ends inside a UTF-8 sequence",
                        ),
                    ));
                }
                break;
            }

            stats.bytes_read += n as u64;
            pending.extend_from_slice(&buffer[..n]);

            let (text, incomplete) =
                split_utf8(&pending).map_err(|e| ProcessorError::io(source, e))?;

            let mut chunk: Cow<'_, str> = Cow::Borrowed(text);
            for filter in &self.filters {
                let replaced = match filter.apply(&chunk) {
                    Cow::Borrowed(_) => None,
                    Cow::Owned(s) => Some(s),
                };
                if let Some(s) = replaced {
                    chunk = Cow::Owned(s);
                }
            }

            writer
                .write_all(chunk.as_bytes())
                .map_err(|e| ProcessorError::io(target, e))?;
            stats.bytes_written += chunk.len() as u64;
            stats.chunks += 1;

            let consumed = pending.len() - incomplete;
            pending.drain(..consumed);
        }

        writer.flush().map_err(|e| ProcessorError::io(target, e))?;
        Ok(stats)
    }

    fn replace_source(&self) -> ProcessorResult<()> {
        #[cfg(windows)]
        fs::remove_file(&self.source_file).map_err(|e| ProcessorError::io(&self.source_file, e))?;

        fs::rename(&self.target_file, &self.source_file)
            .map_err(|e| ProcessorError::io(&self.target_file, e))
    }
}

impl Processor for EscapeCsvProcessor {
    fn process(&mut self) -> ProcessorResult<()> {
        let result = self.rewrite();

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                if self.use_temp_file {
                    let _ = fs::remove_file(&self.target_file);
                }
                return Err(e);
            }
        };

        if self.use_temp_file {
            self.replace_source()?;
        }

        tracing::info!(
            source = %self.source_file.display(),
            chunks = stats.chunks,
            bytes_read = stats.bytes_read,
            bytes_written = stats.bytes_written,
            "Rewrote file"
        );
        self.last_stats = stats;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "escape_csv"
    }
}

/// Split off a trailing incomplete UTF-8 sequence
///
/// Returns the valid text and the number of trailing bytes held back.
fn split_utf8(bytes: &[u8]) -> io::Result<(&str, usize)> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok((text, 0)),
        Err(e) if e.error_len().is_none() => {
            let (valid, rest) = bytes.split_at(e.valid_up_to());
            let text = std::str::from_utf8(valid)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok((text, rest.len()))
        }
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}

/// Whether two paths name the same file, compared lexically
fn same_path(a: &Path, b: &Path) -> bool {
    normalize(a) == normalize(b)
}

fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_rule_doubles_quotes() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.csv");
        let target = dir.path().join("out.csv");
        fs::write(&source, "1,say \"hi\"\n2,plain\n").unwrap();

        let mut processor = EscapeCsvProcessor::new(&source, &target).unwrap();
        processor.process().unwrap();

        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "1,say \"\"hi\"\"\n2,plain\n"
        );
        assert_eq!(fs::read_to_string(&source).unwrap(), "1,say \"hi\"\n2,plain\n");
    }

    #[test]
    fn test_rules_apply_in_order() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.txt");
        let target = dir.path().join("out.txt");
        fs::write(&source, "a-b-c").unwrap();

        let filters = vec![
            FilterRule::new("-", "+").unwrap(),
            FilterRule::new(r"\+", "=").unwrap(),
        ];
        let mut processor = EscapeCsvProcessor::new(&source, &target)
            .unwrap()
            .with_filters(filters);
        processor.process().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "a=b=c");
    }

    #[test]
    fn test_capture_group_replacement() {
        let rule = FilterRule::new(r"(\d+)-(\d+)", "$2-$1").unwrap();
        assert_eq!(rule.apply("10-20"), "20-10");
    }

    #[test]
    fn test_in_place_rewrite_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data.csv");
        fs::write(&file, "x,\"y\"\n").unwrap();

        let mut processor = EscapeCsvProcessor::in_place(&file).unwrap();
        assert!(processor.use_temp_file());
        processor.process().unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "x,\"\"y\"\"\n");
        assert!(!dir.path().join("data.csv.tmp").exists());
    }

    #[test]
    fn test_same_source_and_target_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data.csv");
        let dotted = dir.path().join(".").join("data.csv");

        let result = EscapeCsvProcessor::new(&file, &dotted);
        assert!(matches!(result, Err(ProcessorError::Configuration(_))));
        // Nothing was created
        assert!(!file.exists());
    }

    #[test]
    fn test_missing_paths_rejected() {
        assert!(matches!(
            EscapeCsvProcessor::new("", "out.csv"),
            Err(ProcessorError::Configuration(_))
        ));
        assert!(matches!(
            EscapeCsvProcessor::new("in.csv", ""),
            Err(ProcessorError::Configuration(_))
        ));
        assert!(matches!(
            EscapeCsvProcessor::in_place(""),
            Err(ProcessorError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let processor = EscapeCsvProcessor::new("a.csv", "b.csv").unwrap();
        assert!(processor.with_buffer_size(0).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(matches!(
            FilterRule::new("(", "x"),
            Err(ProcessorError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_small_buffer_keeps_multibyte_characters() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.csv");
        let target = dir.path().join("out.csv");
        fs::write(&source, "héllo \"wörld\" ✓\n").unwrap();

        let mut processor = EscapeCsvProcessor::new(&source, &target)
            .unwrap()
            .with_buffer_size(1)
            .unwrap();
        processor.process().unwrap();

        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "héllo \"\"wörld\"\" ✓\n"
        );
        assert!(processor.last_stats().chunks > 1);
    }

    #[test]
    fn test_match_across_chunk_boundary_is_missed() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.txt");
        let target = dir.path().join("out.txt");
        fs::write(&source, "ab").unwrap();

        let mut processor = EscapeCsvProcessor::new(&source, &target)
            .unwrap()
            .with_filters(vec![FilterRule::new("ab", "X").unwrap()])
            .with_buffer_size(1)
            .unwrap();
        processor.process().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "ab");
    }

    #[test]
    fn test_missing_source_fails_and_cleans_up() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("missing.csv");

        let mut processor = EscapeCsvProcessor::in_place(&file).unwrap();
        let result = processor.process();
        assert!(matches!(result, Err(ProcessorError::Io { .. })));
        assert!(!dir.path().join("missing.csv.tmp").exists());
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.bin");
        let target = dir.path().join("out.bin");
        fs::write(&source, [b'a', 0xff, b'b']).unwrap();

        let mut processor = EscapeCsvProcessor::new(&source, &target).unwrap();
        assert!(matches!(
            processor.process(),
            Err(ProcessorError::Io { .. })
        ));
    }
}
