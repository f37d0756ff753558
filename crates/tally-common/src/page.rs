//! Page size constants shared by the storage and input layers.

/// Default page size for the persistent storage read cache (64 KB).
pub const DEFAULT_FILE_PAGE_SIZE: usize = 64 * 1024;

/// Default page size for scanning input byte ranges (4 MB).
pub const DEFAULT_READ_PAGE_SIZE: usize = 4 * 1024 * 1024;

/// Returns the start offset of the page containing `offset`.
#[inline]
pub fn page_start(offset: u64, page_size: usize) -> u64 {
    offset - offset % page_size as u64
}
