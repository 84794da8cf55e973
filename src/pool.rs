//! Buffer pool.
//!
//! The pool owns a fixed number of page slots and mediates every page read and write the sort performs,
//! so memory use is bounded by `size * page_size` bytes no matter how large the input is or how many runs
//! exist on disk. The last slot is reserved as the output buffer which accumulates values appended to a file.

use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::page::{page_count, Page, VALUE_SIZE};
use crate::sort::SortError;

/// Temporary file backing a binary input or a run.
/// Deleted as soon as it is dropped, or together with the pool directory at the latest.
pub type TempFile = tempfile::NamedTempFile;

/// Fixed array of page slots plus the temporary directory all sort files live in.
pub struct BufferPool {
    /// Page slots, the last one is the output buffer.
    slots: Vec<Page>,
    /// Page size in bytes.
    page_size: usize,
    /// Directory holding every temporary file the pool creates, removed on drop.
    tmp_dir: tempfile::TempDir,
    /// File the output buffer is currently accumulating values for.
    output_target: Option<PathBuf>,
    /// Number of temporary files created so far.
    temp_files: usize,
}

impl BufferPool {
    /// Creates a new buffer pool.
    ///
    /// # Arguments
    /// * `size` - Number of page slots
    /// * `page_size` - Page size in bytes
    /// * `tmp_path` - Directory the pool temporary directory is created in. If the parameter is [`None`]
    ///   default OS temporary directory will be used.
    pub fn new(size: usize, page_size: usize, tmp_path: Option<&Path>) -> Result<Self, SortError> {
        if size < 2 {
            return Err(SortError::InvalidConfig(format!(
                "at least one input and one output buffer required, got {}",
                size
            )));
        }
        if page_size == 0 || page_size % VALUE_SIZE != 0 {
            return Err(SortError::InvalidConfig(format!(
                "page size must be a positive multiple of {}, got {}",
                VALUE_SIZE, page_size
            )));
        }

        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::Builder::new().prefix("page-sort").tempdir_in(tmp_path)
        } else {
            tempfile::Builder::new().prefix("page-sort").tempdir()
        }
        .map_err(SortError::TempDir)?;

        log::info!(
            "using {} as a temporary directory (buffers: {}, page size: {})",
            tmp_dir.path().display(),
            size,
            page_size
        );

        return Ok(BufferPool {
            slots: (0..size).map(|_| Page::new(page_size)).collect(),
            page_size,
            tmp_dir,
            output_target: None,
            temp_files: 0,
        });
    }

    /// Returns the total number of buffer slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Returns the index of the slot reserved for output accumulation.
    pub fn output_buffer_index(&self) -> usize {
        self.slots.len() - 1
    }

    /// Returns the number of temporary files created by the pool.
    pub fn temp_files_created(&self) -> usize {
        self.temp_files
    }

    /// Returns the pool temporary directory path.
    pub fn tmp_path(&self) -> &Path {
        self.tmp_dir.path()
    }

    /// Returns the number of pages a file spans.
    pub fn page_count(&self, file: &TempFile) -> Result<u64, SortError> {
        let file_len = file.as_file().metadata().map_err(SortError::IO)?.len();
        return Ok(page_count(file_len, self.page_size));
    }

    /// Creates a new uniquely named temporary file inside the pool directory.
    pub fn create_temp_file(&mut self) -> Result<TempFile, SortError> {
        let file = tempfile::Builder::new()
            .prefix("externalsort")
            .suffix(".tmp")
            .tempfile_in(self.tmp_dir.path())
            .map_err(SortError::TempDir)?;
        self.temp_files += 1;

        log::trace!("created temporary file {}", file.path().display());

        return Ok(file);
    }

    /// Returns the page resident in a slot without touching any file.
    ///
    /// # Panics
    /// Panics if `buffer_index` is out of range.
    pub fn page(&self, buffer_index: usize) -> &Page {
        self.check_index(buffer_index);
        &self.slots[buffer_index]
    }

    /// Loads page `page_no` of the file into a slot, discarding the previous slot contents.
    /// The returned page is valid until the slot is loaded again.
    ///
    /// # Arguments
    /// * `file` - File to be read
    /// * `page_no` - Page number within the file
    /// * `buffer_index` - Slot to load the page into
    ///
    /// # Panics
    /// Panics if `buffer_index` is out of range.
    pub fn read_page(&mut self, file: &TempFile, page_no: u64, buffer_index: usize) -> Result<&mut Page, SortError> {
        self.check_index(buffer_index);

        if buffer_index == self.output_buffer_index() {
            debug_assert!(
                self.output_target.is_none() || self.slots[buffer_index].is_empty(),
                "output buffer holds unflushed values"
            );
            self.output_target = None;
        }

        let page = &mut self.slots[buffer_index];
        page.load(file.as_file(), page_no).map_err(SortError::IO)?;

        return Ok(page);
    }

    /// Writes the page resident in a slot to the file as its next page.
    /// Flushing the output buffer also empties it and releases its current target.
    ///
    /// # Arguments
    /// * `file` - File to be appended to
    /// * `buffer_index` - Slot holding the page
    ///
    /// # Panics
    /// Panics if `buffer_index` is out of range.
    pub fn flush_page(&mut self, file: &TempFile, buffer_index: usize) -> Result<(), SortError> {
        self.check_index(buffer_index);

        let file_len = file.as_file().metadata().map_err(SortError::IO)?.len();
        debug_assert!(
            file_len % self.page_size as u64 == 0,
            "appending after a partial page"
        );

        let page = &self.slots[buffer_index];
        if !page.is_empty() {
            page.write(file.as_file(), page_count(file_len, self.page_size))
                .map_err(SortError::IO)?;
        }

        if buffer_index == self.output_buffer_index() {
            self.slots[buffer_index].clear();
            self.output_target = None;
        }

        return Ok(());
    }

    /// Appends a value to the logical output stream of the file.
    /// The output buffer is flushed to the file whenever it fills up.
    ///
    /// # Panics
    /// Panics if the output buffer holds unflushed values of another file.
    pub fn add_to_output_buffer(&mut self, file: &TempFile, value: i32) -> Result<(), SortError> {
        let output_index = self.output_buffer_index();

        match &self.output_target {
            Some(target) if target.as_path() != file.path() => {
                assert!(
                    self.slots[output_index].is_empty(),
                    "output buffer is in use by {}",
                    target.display()
                );
                self.output_target = Some(file.path().to_path_buf());
            }
            Some(_) => {}
            None => {
                self.slots[output_index].clear();
                self.output_target = Some(file.path().to_path_buf());
            }
        }

        let page = &mut self.slots[output_index];
        page.push(value);
        if page.is_full() {
            self.flush_page(file, output_index)?;
        }

        return Ok(());
    }

    /// Persists values the output buffer accumulated for the file.
    ///
    /// # Panics
    /// Panics if the output buffer holds unflushed values of another file.
    pub fn flush_output_buffer(&mut self, file: &TempFile) -> Result<(), SortError> {
        let output_index = self.output_buffer_index();
        if let Some(target) = &self.output_target {
            assert!(
                target.as_path() == file.path() || self.slots[output_index].is_empty(),
                "output buffer is in use by {}",
                target.display()
            );
        }

        self.flush_page(file, output_index)
    }

    fn check_index(&self, buffer_index: usize) {
        assert!(
            buffer_index < self.slots.len(),
            "buffer index {} out of range (buffers: {})",
            buffer_index,
            self.slots.len()
        );
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::BufferPool;
    use crate::sort::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_output_buffer_rotation(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.output_buffer_index(), 2);

        let file = pool.create_temp_file().unwrap();
        for value in [1, 2, 3, 4, 5] {
            pool.add_to_output_buffer(&file, value).unwrap();
        }
        // two full pages were flushed, the last value is still buffered
        assert_eq!(pool.page_count(&file).unwrap(), 2);
        assert_eq!(pool.page(2).values(), &[5]);

        pool.flush_page(&file, 2).unwrap();
        assert_eq!(pool.page_count(&file).unwrap(), 3);
        assert!(pool.page(2).is_empty());

        assert_eq!(pool.read_page(&file, 0, 0).unwrap().values(), &[1, 2]);
        assert_eq!(pool.read_page(&file, 1, 1).unwrap().values(), &[3, 4]);
        assert_eq!(pool.read_page(&file, 2, 0).unwrap().values(), &[5]);
        // slot 1 was not evicted by the load into slot 0
        assert_eq!(pool.page(1).values(), &[3, 4]);
    }

    #[rstest]
    fn test_flush_sorted_page_to_new_file(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 16, Some(tmp_dir.path())).unwrap();
        let input = pool.create_temp_file().unwrap();
        for value in [4, 1, 3, 2, 0] {
            pool.add_to_output_buffer(&input, value).unwrap();
        }
        pool.flush_page(&input, pool.output_buffer_index()).unwrap();

        let output_index = pool.output_buffer_index();
        pool.read_page(&input, 0, output_index).unwrap().sort();
        let sorted = pool.create_temp_file().unwrap();
        pool.flush_page(&sorted, output_index).unwrap();

        assert_eq!(pool.read_page(&sorted, 0, 0).unwrap().values(), &[1, 2, 3, 4]);
        assert_eq!(pool.temp_files_created(), 2);
    }

    #[rstest]
    #[should_panic(expected = "out of range")]
    fn test_read_page_index_out_of_range(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let file = pool.create_temp_file().unwrap();
        let _ = pool.read_page(&file, 0, 3);
    }

    #[rstest]
    #[should_panic(expected = "output buffer is in use")]
    fn test_output_buffer_is_exclusive(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let first = pool.create_temp_file().unwrap();
        let second = pool.create_temp_file().unwrap();
        pool.add_to_output_buffer(&first, 1).unwrap();
        pool.add_to_output_buffer(&second, 2).unwrap();
    }

    #[rstest]
    #[should_panic(expected = "output buffer is in use")]
    fn test_flush_output_buffer_of_other_file(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 16, Some(tmp_dir.path())).unwrap();
        let first = pool.create_temp_file().unwrap();
        let second = pool.create_temp_file().unwrap();
        pool.add_to_output_buffer(&first, 1).unwrap();
        let _ = pool.flush_output_buffer(&second);
    }

    #[rstest]
    #[case(1, 8)]
    #[case(3, 0)]
    #[case(3, 10)]
    fn test_invalid_geometry(tmp_dir: tempfile::TempDir, #[case] size: usize, #[case] page_size: usize) {
        let result = BufferPool::new(size, page_size, Some(tmp_dir.path()));
        assert!(matches!(result, Err(SortError::InvalidConfig(_))));
    }

    #[rstest]
    fn test_temp_files_removed_on_drop(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let file = pool.create_temp_file().unwrap();
        pool.add_to_output_buffer(&file, 42).unwrap();
        pool.flush_page(&file, 2).unwrap();
        let pool_dir = pool.tmp_path().to_path_buf();
        assert!(pool_dir.exists());

        drop(file);
        drop(pool);
        assert!(!pool_dir.exists());
        assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }
}
