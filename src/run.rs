//! Runs and run iterators.

use crate::pool::{BufferPool, TempFile};
use crate::sort::SortError;

/// File-backed sequence of integers, sorted or about to be sorted by a merge.
/// A run never holds values in memory: every access goes through the [`BufferPool`].
/// The backing file is deleted when the run is dropped.
pub struct Run {
    file: TempFile,
}

impl Run {
    /// Wraps an existing file as a run.
    pub fn from_file(file: TempFile) -> Self {
        Run { file }
    }

    /// Creates an empty run backed by a new temporary file.
    pub fn new(pool: &mut BufferPool) -> Result<Self, SortError> {
        return Ok(Run {
            file: pool.create_temp_file()?,
        });
    }

    pub fn file(&self) -> &TempFile {
        &self.file
    }

    /// Appends a value through the pool output buffer.
    pub fn add_field(&self, pool: &mut BufferPool, value: i32) -> Result<(), SortError> {
        pool.add_to_output_buffer(&self.file, value)
    }

    /// Persists values still held by the pool output buffer.
    /// Must be called once after the last [`Run::add_field`] and before the run is read.
    pub fn flush(&self, pool: &mut BufferPool) -> Result<(), SortError> {
        pool.flush_output_buffer(&self.file)
    }

    /// Creates an iterator bound to a buffer slot. The file is not touched until [`RunIterator::open`].
    pub fn iterator(&self, buffer_index: usize) -> RunIterator<'_> {
        RunIterator::new(self, buffer_index)
    }

    /// Reads the whole run into memory using a single buffer slot.
    pub fn read_all(&self, pool: &mut BufferPool, buffer_index: usize) -> Result<Vec<i32>, SortError> {
        let mut values = Vec::new();
        let mut iter = self.iterator(buffer_index);

        iter.open(pool)?;
        while iter.has_next(pool)? {
            values.push(iter.next(pool)?);
        }
        iter.close();

        return Ok(values);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IteratorState {
    Created,
    Opened,
    Closed,
}

/// Forward-only, single-pass reader over a run that holds at most one page of it in memory.
///
/// The iterator binds one buffer slot for its whole lifetime and reloads that slot page by page,
/// so no other reader may use the slot while the iterator is alive.
pub struct RunIterator<'a> {
    run: &'a Run,
    buffer_index: usize,
    state: IteratorState,
    num_pages: u64,
    page_no: u64,
    /// Position of the next unread value within the resident page.
    pos: usize,
    lookahead: Option<i32>,
    current: Option<i32>,
}

impl<'a> RunIterator<'a> {
    fn new(run: &'a Run, buffer_index: usize) -> Self {
        RunIterator {
            run,
            buffer_index,
            state: IteratorState::Created,
            num_pages: 0,
            page_no: 0,
            pos: 0,
            lookahead: None,
            current: None,
        }
    }

    /// Returns the buffer slot the iterator is bound to.
    pub fn buffer_index(&self) -> usize {
        self.buffer_index
    }

    /// Loads the first page of the run into the bound slot.
    pub fn open(&mut self, pool: &mut BufferPool) -> Result<(), SortError> {
        self.num_pages = pool.page_count(self.run.file())?;
        self.page_no = 0;
        self.pos = 0;
        self.lookahead = None;
        self.current = None;

        pool.read_page(self.run.file(), 0, self.buffer_index)?;
        self.state = IteratorState::Opened;

        return Ok(());
    }

    /// Checks if another value is available, loading the next page when the resident one is drained.
    ///
    /// # Panics
    /// Panics if the iterator was never opened.
    pub fn has_next(&mut self, pool: &mut BufferPool) -> Result<bool, SortError> {
        match self.state {
            IteratorState::Created => panic!("run iterator used before open"),
            IteratorState::Closed => return Ok(false),
            IteratorState::Opened => {}
        }

        if self.lookahead.is_none() {
            self.lookahead = self.read_next_field(pool)?;
        }

        return Ok(self.lookahead.is_some());
    }

    /// Consumes and returns the next value.
    pub fn next(&mut self, pool: &mut BufferPool) -> Result<i32, SortError> {
        if !self.has_next(pool)? {
            return Err(SortError::IteratorExhausted);
        }

        let value = self.lookahead.take().ok_or(SortError::IteratorExhausted)?;
        self.current = Some(value);

        return Ok(value);
    }

    /// Returns the most recently consumed value, [`None`] before the first [`RunIterator::next`].
    pub fn current(&self) -> Option<i32> {
        self.current
    }

    /// Releases the iterator. A closed iterator reports no further values.
    pub fn close(&mut self) {
        self.state = IteratorState::Closed;
        self.lookahead = None;
    }

    fn read_next_field(&mut self, pool: &mut BufferPool) -> Result<Option<i32>, SortError> {
        loop {
            if let Some(value) = pool.page(self.buffer_index).get(self.pos) {
                self.pos += 1;
                return Ok(Some(value));
            }

            self.page_no += 1;
            if self.page_no >= self.num_pages {
                return Ok(None);
            }

            pool.read_page(self.run.file(), self.page_no, self.buffer_index)?;
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::Run;
    use crate::pool::BufferPool;
    use crate::sort::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn build_run(pool: &mut BufferPool, values: &[i32]) -> Run {
        let run = Run::new(pool).unwrap();
        for value in values {
            run.add_field(pool, *value).unwrap();
        }
        run.flush(pool).unwrap();
        run
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![1])]
    #[case(vec![1, 2])]
    #[case(vec![-3, 0, 2, 8, 8, 13, 21])]
    fn test_run_iterator_spans_pages(tmp_dir: tempfile::TempDir, #[case] values: Vec<i32>) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let run = build_run(&mut pool, &values);

        assert_eq!(run.read_all(&mut pool, 0).unwrap(), values);
    }

    #[rstest]
    fn test_run_iterator_lookahead(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let run = build_run(&mut pool, &[10, 20, 30]);

        let mut iter = run.iterator(1);
        assert_eq!(iter.buffer_index(), 1);
        iter.open(&mut pool).unwrap();
        assert_eq!(iter.current(), None);

        assert!(iter.has_next(&mut pool).unwrap());
        assert!(iter.has_next(&mut pool).unwrap());
        assert_eq!(iter.next(&mut pool).unwrap(), 10);
        assert_eq!(iter.current(), Some(10));
        assert_eq!(iter.next(&mut pool).unwrap(), 20);
        assert_eq!(iter.next(&mut pool).unwrap(), 30);
        assert_eq!(iter.current(), Some(30));

        assert!(!iter.has_next(&mut pool).unwrap());
        assert!(matches!(iter.next(&mut pool), Err(SortError::IteratorExhausted)));
        assert_eq!(iter.current(), Some(30));
    }

    #[rstest]
    #[should_panic(expected = "output buffer is in use")]
    fn test_flush_rejects_foreign_output(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 16, Some(tmp_dir.path())).unwrap();
        let building = Run::new(&mut pool).unwrap();
        let other = Run::new(&mut pool).unwrap();

        building.add_field(&mut pool, 7).unwrap();
        let _ = other.flush(&mut pool);
    }

    #[rstest]
    fn test_closed_iterator_is_exhausted(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let run = build_run(&mut pool, &[1, 2, 3]);

        let mut iter = run.iterator(0);
        iter.open(&mut pool).unwrap();
        assert_eq!(iter.next(&mut pool).unwrap(), 1);
        iter.close();
        assert!(!iter.has_next(&mut pool).unwrap());
    }

    #[rstest]
    #[should_panic(expected = "before open")]
    fn test_iterator_requires_open(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let run = build_run(&mut pool, &[1]);

        let mut iter = run.iterator(0);
        let _ = iter.has_next(&mut pool);
    }

    #[rstest]
    fn test_run_file_removed_on_drop(tmp_dir: tempfile::TempDir) {
        let mut pool = BufferPool::new(3, 8, Some(tmp_dir.path())).unwrap();
        let run = build_run(&mut pool, &[5, 4, 3]);
        let path = run.file().path().to_path_buf();
        assert!(path.exists());

        drop(run);
        assert!(!path.exists());
    }
}
