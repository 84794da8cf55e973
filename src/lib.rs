//! `page-sort` is a page-oriented external sort of 32-bit integers.
//!
//! External sorting handles datasets that do not fit into main memory. The input is split into pages, every
//! page is sorted in memory and written out as a single-page run, then runs are merged in rounds until one
//! run remains. Memory use is bounded by a [`BufferPool`] of a fixed number of page slots: one slot accumulates
//! merge output and the rest are bound to the runs being merged, so a round merges at most `buffers - 1` runs
//! at once. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   every page read and write goes through the buffer pool, at most `buffers` pages are resident at a time.
//! * **Sorted prefix reuse:**
//!   leading pages that already form one ascending sequence, e.g. the output of a prior sort with new values
//!   appended to it, can be declared or detected with [`Offset`] and are not sorted again.
//! * **Scoped temporary files:**
//!   each sort keeps its temporary files in its own directory which is removed when the sort returns.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use page_sort::{ExternalSort, ExternalSortBuilder, Offset};
//!
//! fn main() {
//!     let sorter: ExternalSort = ExternalSortBuilder::new()
//!         .with_buffers(4)
//!         .with_page_size(8192)
//!         .with_offset(Offset::Detect)
//!         .build()
//!         .unwrap();
//!
//!     let sorted = sorter.sort_file(Path::new("input.txt")).unwrap();
//!
//!     for value in sorted.values {
//!         println!("{}", value);
//!     }
//! }
//! ```

pub mod merger;
pub mod page;
pub mod pool;
pub mod run;
pub mod sort;

pub use merger::TournamentMerger;
pub use page::{Page, DEFAULT_PAGE_SIZE};
pub use pool::{BufferPool, TempFile};
pub use run::{Run, RunIterator};
pub use sort::{ExternalSort, ExternalSortBuilder, InputPolicy, Offset, SortError, SortOutcome, SortStats};
