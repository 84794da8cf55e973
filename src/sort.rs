//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::merger::{concat_runs, merge_runs};
use crate::page::{Page, DEFAULT_PAGE_SIZE, VALUE_SIZE};
use crate::pool::{BufferPool, TempFile};
use crate::run::Run;

/// Default number of buffer slots.
pub const DEFAULT_BUFFERS: usize = 3;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Common I/O error.
    IO(io::Error),
    /// Input line that is not a 32-bit integer.
    MalformedInput { line: usize, content: String },
    /// Merge group larger than the number of input buffer slots.
    FanInExceeded { runs: usize, fan_in: usize },
    /// Leading pages declared pre-sorted that do not form one ascending sequence.
    InvalidOffset { page: u64 },
    /// Run iterator read past its end.
    IteratorExhausted,
    /// Sorter configuration error.
    InvalidConfig(String),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::MalformedInput { line, content } => {
                write!(f, "input line {} is not an integer: {:?}", line, content)
            }
            SortError::FanInExceeded { runs, fan_in } => {
                write!(f, "cannot merge {} runs at once (fan-in: {})", runs, fan_in)
            }
            SortError::InvalidOffset { page } => {
                write!(f, "page {} is within the offset but breaks the ascending order", page)
            }
            SortError::IteratorExhausted => write!(f, "run iterator exhausted"),
            SortError::InvalidConfig(msg) => write!(f, "invalid sorter configuration: {}", msg),
        }
    }
}

/// Reusable sorted prefix policy.
///
/// The offset is a number of leading PAGES of the binary input, not a number of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// Every page is sorted.
    None,
    /// The first `n` pages are known to form one ascending sequence and are not sorted again.
    /// The claim is verified while the pages are read. `Fixed(0)` requests detection like [`Offset::Detect`].
    Fixed(u64),
    /// The longest ascending leading run of pages is detected before splitting.
    Detect,
}

impl Default for Offset {
    fn default() -> Self {
        Offset::None
    }
}

/// Input line handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPolicy {
    /// Lines are parsed verbatim, a malformed line aborts the sort.
    Strict,
    /// Lines are trimmed, malformed lines are logged and skipped.
    Lenient,
}

impl Default for InputPolicy {
    fn default() -> Self {
        InputPolicy::Strict
    }
}

/// Sorting statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Number of pages of the binary input.
    pub pages: u64,
    /// Number of leading pages that were not sorted again.
    pub offset_pages: u64,
    /// Whether the whole input was already sorted and merging was skipped.
    pub shortcut: bool,
    /// Number of merge rounds.
    pub merge_rounds: usize,
    /// Number of temporary files created.
    pub temp_files: usize,
    /// Wall time of the sort.
    pub elapsed: Duration,
}

/// Sorted values together with sorting statistics.
#[derive(Debug, Clone)]
pub struct SortOutcome {
    pub values: Vec<i32>,
    pub stats: SortStats,
}

/// External sorter builder. Provides methods for [`ExternalSort`] initialization.
#[derive(Clone)]
pub struct ExternalSortBuilder {
    /// Number of buffer slots.
    buffers: usize,
    /// Page size in bytes.
    page_size: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Sorted prefix policy.
    offset: Offset,
    /// Input line handling.
    input_policy: InputPolicy,
}

impl ExternalSortBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSortBuilder::default()
    }

    /// Builds an [`ExternalSort`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSort, SortError> {
        ExternalSort::new(
            self.buffers,
            self.page_size,
            self.tmp_dir.as_deref(),
            self.offset,
            self.input_policy,
        )
    }

    /// Sets number of buffer slots. One slot is reserved for output, the rest bound the merge fan-in.
    pub fn with_buffers(mut self, buffers: usize) -> ExternalSortBuilder {
        self.buffers = buffers;
        return self;
    }

    /// Sets page size in bytes.
    pub fn with_page_size(mut self, page_size: usize) -> ExternalSortBuilder {
        self.page_size = page_size;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSortBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets sorted prefix policy.
    pub fn with_offset(mut self, offset: Offset) -> ExternalSortBuilder {
        self.offset = offset;
        return self;
    }

    /// Sets input line handling.
    pub fn with_input_policy(mut self, input_policy: InputPolicy) -> ExternalSortBuilder {
        self.input_policy = input_policy;
        return self;
    }

    /// Configures sorted prefix detection with lenient input handling,
    /// suited for repeatedly sorting incrementally appended data.
    pub fn with_offset_values(self) -> ExternalSortBuilder {
        self.with_offset(Offset::Detect).with_input_policy(InputPolicy::Lenient)
    }
}

impl Default for ExternalSortBuilder {
    fn default() -> Self {
        ExternalSortBuilder {
            buffers: DEFAULT_BUFFERS,
            page_size: DEFAULT_PAGE_SIZE,
            tmp_dir: None,
            offset: Offset::default(),
            input_policy: InputPolicy::default(),
        }
    }
}

/// External sorter.
///
/// Every sort creates its own [`BufferPool`] which lives until the sort returns, so independent sorts
/// never share buffers and all temporary files are removed on every exit path.
pub struct ExternalSort {
    /// Number of buffer slots.
    buffers: usize,
    /// Page size in bytes.
    page_size: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Sorted prefix policy.
    offset: Offset,
    /// Input line handling.
    input_policy: InputPolicy,
}

impl ExternalSort {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `buffers` - Number of buffer slots, at least 3 so that a merge round reduces the run count
    /// * `page_size` - Page size in bytes, a positive multiple of 4
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS
    ///   temporary directory will be used.
    /// * `offset` - Sorted prefix policy
    /// * `input_policy` - Input line handling
    pub fn new(
        buffers: usize,
        page_size: usize,
        tmp_path: Option<&Path>,
        offset: Offset,
        input_policy: InputPolicy,
    ) -> Result<Self, SortError> {
        if buffers < 3 {
            return Err(SortError::InvalidConfig(format!(
                "at least 3 buffers required, got {}",
                buffers
            )));
        }
        if page_size == 0 || page_size % VALUE_SIZE != 0 {
            return Err(SortError::InvalidConfig(format!(
                "page size must be a positive multiple of {}, got {}",
                VALUE_SIZE, page_size
            )));
        }

        return Ok(ExternalSort {
            buffers,
            page_size,
            tmp_dir: tmp_path.map(Into::into),
            offset,
            input_policy,
        });
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn input_policy(&self) -> InputPolicy {
        self.input_policy
    }

    /// Sorts integers from a text file holding one decimal integer per line.
    pub fn sort_file(&self, path: &Path) -> Result<SortOutcome, SortError> {
        let file = fs::File::open(path).map_err(SortError::IO)?;
        log::info!("sorting {}", path.display());

        self.sort_reader(io::BufReader::with_capacity(self.page_size, file))
    }

    /// Sorts integers from a text stream holding one decimal integer per line.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    pub fn sort_reader<R: BufRead>(&self, input: R) -> Result<SortOutcome, SortError> {
        let started = Instant::now();
        let mut pool = BufferPool::new(self.buffers, self.page_size, self.tmp_dir.as_deref())?;

        let binary = self.convert_to_binary(&mut pool, input)?;
        let pages = pool.page_count(&binary)?;

        let offset = match self.offset {
            Offset::None => 0,
            Offset::Fixed(n) if n > 0 => n,
            Offset::Fixed(_) | Offset::Detect => self.detect_offset(&mut pool, &binary)?,
        };

        let mut stats = SortStats {
            pages,
            offset_pages: offset.min(pages),
            ..SortStats::default()
        };

        let values = if self.offset != Offset::None && offset >= pages {
            log::debug!("offset covers all {} pages, skipping merge", pages);
            stats.shortcut = true;
            self.read_sorted_file(&mut pool, &binary)?
        } else {
            let mut runs = self.split_into_runs(&mut pool, &binary, offset)?;
            drop(binary);

            while runs.len() > 1 {
                let round_offset = if stats.merge_rounds == 0 { offset } else { 0 };
                runs = self.merge_iteration(&mut pool, runs, round_offset)?;
                stats.merge_rounds += 1;
            }

            match runs.pop() {
                Some(run) => run.read_all(&mut pool, 0)?,
                None => Vec::new(),
            }
        };

        stats.temp_files = pool.temp_files_created();
        stats.elapsed = started.elapsed();
        log::info!(
            "sorted {} values (pages: {}, offset: {}, merge rounds: {}) in {:?}",
            values.len(),
            stats.pages,
            stats.offset_pages,
            stats.merge_rounds,
            stats.elapsed
        );

        return Ok(SortOutcome { values, stats });
    }

    fn convert_to_binary<R: BufRead>(&self, pool: &mut BufferPool, input: R) -> Result<TempFile, SortError> {
        let binary = pool.create_temp_file()?;

        for (idx, line) in input.split(b'\n').enumerate() {
            let mut line = line.map_err(SortError::IO)?;
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let parsed = match std::str::from_utf8(&line) {
                Ok(text) => match self.input_policy {
                    InputPolicy::Strict => text.parse::<i32>().ok(),
                    InputPolicy::Lenient => text.trim().parse::<i32>().ok(),
                },
                Err(_) => None,
            };

            match parsed {
                Some(value) => pool.add_to_output_buffer(&binary, value)?,
                None if self.input_policy == InputPolicy::Lenient => {
                    log::warn!(
                        "skipping non-numeric line {}: {:?}",
                        idx + 1,
                        String::from_utf8_lossy(&line)
                    );
                }
                None => {
                    return Err(SortError::MalformedInput {
                        line: idx + 1,
                        content: String::from_utf8_lossy(&line).into_owned(),
                    })
                }
            }
        }

        pool.flush_output_buffer(&binary)?;

        return Ok(binary);
    }

    /// Counts leading pages that form one ascending sequence.
    fn detect_offset(&self, pool: &mut BufferPool, file: &TempFile) -> Result<u64, SortError> {
        let output_index = pool.output_buffer_index();
        let pages = pool.page_count(file)?;
        let mut prefix = AscendingPrefix::default();

        let mut detected = 0;
        for page_no in 0..pages {
            let page = pool.read_page(file, page_no, output_index)?;
            if !prefix.accepts(page) {
                break;
            }
            detected += 1;
        }

        log::info!("detected offset: {} pages", detected);

        return Ok(detected);
    }

    fn read_sorted_file(&self, pool: &mut BufferPool, file: &TempFile) -> Result<Vec<i32>, SortError> {
        let output_index = pool.output_buffer_index();
        let pages = pool.page_count(file)?;
        let mut prefix = AscendingPrefix::default();

        let mut values = Vec::new();
        for page_no in 0..pages {
            let page = pool.read_page(file, page_no, output_index)?;
            if !prefix.accepts(page) {
                return Err(SortError::InvalidOffset { page: page_no });
            }
            values.extend(page.iter());
        }

        return Ok(values);
    }

    /// Turns every page of the file into a single-page run.
    /// Pages below `offset` are checked instead of sorted.
    fn split_into_runs(&self, pool: &mut BufferPool, file: &TempFile, offset: u64) -> Result<Vec<Run>, SortError> {
        let output_index = pool.output_buffer_index();
        let pages = pool.page_count(file)?;
        let mut prefix = AscendingPrefix::default();

        let mut runs = Vec::with_capacity(pages as usize);
        for page_no in 0..pages {
            let page = pool.read_page(file, page_no, output_index)?;
            if page_no < offset {
                log::debug!("page {} is within offset, skipping sort", page_no);
                if !prefix.accepts(page) {
                    return Err(SortError::InvalidOffset { page: page_no });
                }
            } else {
                log::debug!("page {} is beyond offset, sorting", page_no);
                page.sort();
            }

            let run_file = pool.create_temp_file()?;
            pool.flush_page(&run_file, output_index)?;
            runs.push(Run::from_file(run_file));
        }

        return Ok(runs);
    }

    /// Replaces consecutive groups of at most `pool.size() - 1` runs with their merge.
    /// If `offset` exceeds one page, the leading `offset` runs are first concatenated into a single run.
    fn merge_iteration(&self, pool: &mut BufferPool, runs: Vec<Run>, offset: u64) -> Result<Vec<Run>, SortError> {
        let fan_in = pool.size() - 1;
        let mut remaining = runs;
        let mut merged = Vec::with_capacity(remaining.len() / fan_in + 1);

        log::debug!("merge iteration over {} runs (offset: {})", remaining.len(), offset);

        if offset > 1 {
            let split_at = (offset as usize).min(remaining.len());
            let beyond_offset = remaining.split_off(split_at);
            merged.push(concat_runs(pool, &remaining)?);
            remaining = beyond_offset;
        }

        while !remaining.is_empty() {
            let group: Vec<Run> = remaining.drain(..fan_in.min(remaining.len())).collect();
            merged.push(merge_runs(pool, &group)?);
        }

        return Ok(merged);
    }
}

/// Tracks whether consecutive pages continue one ascending sequence.
#[derive(Default)]
struct AscendingPrefix {
    last: Option<i32>,
}

impl AscendingPrefix {
    /// Checks the page is ascending and continues the pages accepted so far.
    fn accepts(&mut self, page: &Page) -> bool {
        let mut prev = self.last;
        for value in page.iter() {
            if matches!(prev, Some(prev) if value < prev) {
                return false;
            }
            prev = Some(value);
        }
        self.last = prev;

        return true;
    }
}
