//! Fixed-capacity pages of 32-bit integers.

use std::fs;
use std::io::{self, prelude::*, SeekFrom};

/// Default page byte size.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Encoded size of a single value in bytes.
pub const VALUE_SIZE: usize = 4;

/// In-memory block of integers, the unit of disk I/O.
///
/// A page is bound to no file: it is overwritten by [`Page::load`] and persisted by [`Page::write`].
/// Values are encoded as big-endian signed 32-bit integers, so page `n` of a file occupies
/// bytes `n * page_size .. (n + 1) * page_size`.
#[derive(Debug, Clone)]
pub struct Page {
    /// Page size in bytes.
    page_size: usize,
    /// Resident values.
    values: Vec<i32>,
    /// Whether the resident values were sorted since they were loaded or appended.
    sorted: bool,
}

impl Page {
    /// Creates an empty page.
    ///
    /// # Arguments
    /// * `page_size` - Page size in bytes, a positive multiple of [`VALUE_SIZE`]
    pub fn new(page_size: usize) -> Self {
        debug_assert!(page_size >= VALUE_SIZE && page_size % VALUE_SIZE == 0);

        Page {
            page_size,
            values: Vec::with_capacity(page_size / VALUE_SIZE),
            sorted: false,
        }
    }

    /// Returns the maximum number of values the page holds.
    pub fn capacity(&self) -> usize {
        self.page_size / VALUE_SIZE
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity()
    }

    /// Checks if the page was sorted by [`Page::sort`] since its contents last changed.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Returns the value at position `pos`.
    pub fn get(&self, pos: usize) -> Option<i32> {
        self.values.get(pos).copied()
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Appends a value. The caller is responsible for not overfilling the page.
    pub fn push(&mut self, value: i32) {
        debug_assert!(!self.is_full(), "page overflow");
        self.values.push(value);
        self.sorted = false;
    }

    /// Discards resident values.
    pub fn clear(&mut self) {
        self.values.clear();
        self.sorted = false;
    }

    /// Sorts resident values in ascending order.
    pub fn sort(&mut self) {
        if !self.sorted {
            self.values.sort_unstable();
            self.sorted = true;
        }
    }

    /// Returns an iterator over resident values in their current order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.values.iter().copied()
    }

    /// Replaces resident values with page `page_no` of the file.
    /// A partial final page yields fewer values than the page capacity.
    ///
    /// # Arguments
    /// * `file` - File to be read
    /// * `page_no` - Page number within the file
    pub fn load(&mut self, file: &fs::File, page_no: u64) -> io::Result<()> {
        let mut handle = file;
        handle.seek(SeekFrom::Start(page_no * self.page_size as u64))?;

        let mut buf = Vec::with_capacity(self.page_size);
        handle.take(self.page_size as u64).read_to_end(&mut buf)?;

        if buf.len() % VALUE_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("page {} holds {} bytes, not a whole number of values", page_no, buf.len()),
            ));
        }

        self.values.clear();
        self.values.extend(
            buf.chunks_exact(VALUE_SIZE)
                .map(|chunk| i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        );
        self.sorted = false;

        return Ok(());
    }

    /// Writes resident values to page `page_no` of the file.
    ///
    /// # Arguments
    /// * `file` - File to be written
    /// * `page_no` - Page number within the file
    pub fn write(&self, file: &fs::File, page_no: u64) -> io::Result<()> {
        let mut buf = Vec::with_capacity(self.values.len() * VALUE_SIZE);
        for value in &self.values {
            buf.extend_from_slice(&value.to_be_bytes());
        }

        let mut handle = file;
        handle.seek(SeekFrom::Start(page_no * self.page_size as u64))?;
        handle.write_all(&buf)?;
        handle.flush()?;

        return Ok(());
    }
}

/// Returns the number of pages a file of `file_len` bytes spans.
pub fn page_count(file_len: u64, page_size: usize) -> u64 {
    let page_size = page_size as u64;
    (file_len + page_size - 1) / page_size
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::prelude::*;

    use rstest::*;

    use super::{page_count, Page};

    #[fixture]
    fn tmp_file() -> fs::File {
        tempfile::tempfile().unwrap()
    }

    fn encode(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[rstest]
    fn test_load_full_and_partial_pages(mut tmp_file: fs::File) {
        tmp_file.write_all(&encode(&[7, -1, 3, 9, 4])).unwrap();

        let mut page = Page::new(8);
        page.load(&tmp_file, 0).unwrap();
        assert_eq!(page.values(), &[7, -1]);
        assert!(page.is_full());

        page.load(&tmp_file, 2).unwrap();
        assert_eq!(page.values(), &[4]);
        assert!(!page.is_full());

        page.load(&tmp_file, 3).unwrap();
        assert!(page.is_empty());
    }

    #[rstest]
    fn test_load_rejects_torn_value(mut tmp_file: fs::File) {
        tmp_file.write_all(&[0, 0, 0, 1, 0, 0]).unwrap();

        let mut page = Page::new(16);
        let err = page.load(&tmp_file, 0).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[rstest]
    fn test_sort_and_write(tmp_file: fs::File) {
        let mut page = Page::new(16);
        for value in [5, 3, i32::MIN, 3] {
            page.push(value);
        }
        assert_eq!(Vec::from_iter(page.iter()), vec![5, 3, i32::MIN, 3]);
        assert!(!page.is_sorted());

        page.sort();
        page.sort();
        assert!(page.is_sorted());
        assert_eq!(page.values(), &[i32::MIN, 3, 3, 5]);

        page.write(&tmp_file, 1).unwrap();
        assert_eq!(tmp_file.metadata().unwrap().len(), 32);

        let mut restored = Page::new(16);
        restored.load(&tmp_file, 1).unwrap();
        assert_eq!(restored.values(), &[i32::MIN, 3, 3, 5]);
        assert!(!restored.is_sorted());
    }

    #[rstest]
    #[case(0, 0)]
    #[case(8, 1)]
    #[case(9, 2)]
    #[case(16, 2)]
    #[case(20, 3)]
    fn test_page_count(#[case] file_len: u64, #[case] expected: u64) {
        assert_eq!(page_count(file_len, 8), expected);
    }
}
