use super::types::PageId;

/// Bytes per page. Every frame, disk transfer, and page view works in
/// units of this size.
pub const PAGE_SIZE: usize = 4096;

/// The "no page here" sentinel: absent sibling, parentless root, or a
/// frame with nothing resident.
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// The one page every database file starts with. It holds the named
/// root-pointer records and is never handed out by `allocate_page`.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Pool size to fall back on when the caller has no better number.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;
