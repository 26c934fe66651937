//! Pagination and chunked streaming over a finalized [`Store`]
//!
//! Both operations read directly from the store's sorted range lists. A page
//! borrows its slice; a stream holds shared handles to the lists it will emit
//! and materializes nothing beyond the chunk currently being handed out, so a
//! slow consumer simply stops the stream from advancing.

use crate::country::normalize_iso;
use crate::error::{GeoError, Result};
use crate::prefix::Prefix;
use crate::store::Store;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

/// Chunk size used when the caller does not specify one
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Upper bound on ranges per chunk
pub const MAX_CHUNK_SIZE: usize = 10_000;

/// One page of a country's range list
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Page<'a> {
    pub content: &'a [Prefix],
    pub total_elements: usize,
    pub total_pages: usize,
    pub page: usize,
    pub size: usize,
}

/// Index window `[page*size, page*size+size)` clamped to `total`
fn page_bounds(total: usize, page: usize, size: usize) -> Range<usize> {
    let from = page.checked_mul(size).map_or(total, |start| start.min(total));
    let to = from.saturating_add(size).min(total);
    from..to
}

fn total_pages(total: usize, size: usize) -> usize {
    total.div_ceil(size)
}

/// Resolve a requested chunk size to the effective one
///
/// Unset or zero falls back to [`DEFAULT_CHUNK_SIZE`]; anything above
/// [`MAX_CHUNK_SIZE`] is capped.
pub fn effective_chunk_size(requested: Option<usize>) -> usize {
    match requested {
        None | Some(0) => DEFAULT_CHUNK_SIZE,
        Some(n) => n.min(MAX_CHUNK_SIZE),
    }
}

/// Validate zero-based `page` and positive `size`
fn check_page(page: i64, size: i64) -> Result<(usize, usize)> {
    if page < 0 {
        return Err(GeoError::InvalidArgument("page must be >= 0".to_string()));
    }
    if size <= 0 {
        return Err(GeoError::InvalidArgument("size must be >= 1".to_string()));
    }
    Ok((
        usize::try_from(page).unwrap_or(usize::MAX),
        usize::try_from(size).unwrap_or(usize::MAX),
    ))
}

/// A page that owns a shared handle to its range list
///
/// Unlike [`Page`] it does not borrow the store, so it can be returned from a
/// snapshot that is about to be dropped.
#[derive(Debug, Clone)]
pub struct SharedPage {
    source: Arc<[Prefix]>,
    span: Range<usize>,
    pub total_elements: usize,
    pub total_pages: usize,
    pub page: usize,
    pub size: usize,
}

impl SharedPage {
    pub fn content(&self) -> &[Prefix] {
        &self.source[self.span.clone()]
    }
}

impl Serialize for SharedPage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SharedPage", 5)?;
        state.serialize_field("content", self.content())?;
        state.serialize_field("total_elements", &self.total_elements)?;
        state.serialize_field("total_pages", &self.total_pages)?;
        state.serialize_field("page", &self.page)?;
        state.serialize_field("size", &self.size)?;
        state.end()
    }
}

impl Store {
    /// Page `page` (zero-based) of `size` ranges for `code`
    ///
    /// A page past the end is empty but still reports the real totals.
    pub fn paginate(&self, code: &str, page: i64, size: i64) -> Result<Page<'_>> {
        let (page, size) = check_page(page, size)?;
        let list = self.ranges_view(code)?;
        let total = list.len();

        Ok(Page {
            content: &list[page_bounds(total, page, size)],
            total_elements: total,
            total_pages: total_pages(total, size),
            page,
            size,
        })
    }

    /// Same as [`paginate`](Self::paginate), returning an owned page
    pub fn paginate_shared(&self, code: &str, page: i64, size: i64) -> Result<SharedPage> {
        let (page, size) = check_page(page, size)?;
        let source = self.ranges_shared(code)?;
        let total = source.len();

        Ok(SharedPage {
            span: page_bounds(total, page, size),
            source,
            total_elements: total,
            total_pages: total_pages(total, size),
            page,
            size,
        })
    }

    /// Stream the range lists of `codes`, in the given order, as bounded chunks
    ///
    /// Every code is validated before the stream is returned, so an unknown
    /// code fails the whole request without emitting anything.
    pub fn stream_ranges<S: AsRef<str>>(
        &self,
        codes: &[S],
        chunk_size: Option<usize>,
    ) -> Result<RangeStream> {
        if codes.is_empty() {
            return Err(GeoError::InvalidArgument(
                "isoCodes must not be empty".to_string(),
            ));
        }

        let mut pending = VecDeque::with_capacity(codes.len());
        for code in codes {
            let canonical = normalize_iso(code.as_ref());
            if canonical.is_empty() {
                return Err(GeoError::InvalidArgument(
                    "isoCode must not be empty".to_string(),
                ));
            }
            let id = self.resolve(&canonical)?;
            pending.push_back((Arc::from(canonical), Arc::clone(self.ranges_by_id(id))));
        }

        Ok(RangeStream {
            pending,
            chunk_size: effective_chunk_size(chunk_size),
            current: None,
        })
    }
}

/// A bounded slice of one country's ranges, tagged with its position
#[derive(Debug, Clone)]
pub struct Chunk {
    code: Arc<str>,
    page: usize,
    total_pages: usize,
    last: bool,
    source: Arc<[Prefix]>,
    span: Range<usize>,
}

impl Chunk {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// Pages for this code; at least 1, even for an empty list
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// True on the final chunk for this code
    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn ranges(&self) -> &[Prefix] {
        &self.source[self.span.clone()]
    }
}

impl Serialize for Chunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Chunk", 5)?;
        state.serialize_field("iso_code", &*self.code)?;
        state.serialize_field("page", &self.page)?;
        state.serialize_field("total_pages", &self.total_pages)?;
        state.serialize_field("last", &self.last)?;
        state.serialize_field("networks", self.ranges())?;
        state.end()
    }
}

struct Cursor {
    code: Arc<str>,
    list: Arc<[Prefix]>,
    page: usize,
    total_pages: usize,
}

/// Pull-driven chunk sequence returned by [`Store::stream_ranges`]
///
/// Owns shared handles to the range lists, so it stays valid even if the
/// store it came from is replaced mid-stream.
pub struct RangeStream {
    pending: VecDeque<(Arc<str>, Arc<[Prefix]>)>,
    chunk_size: usize,
    current: Option<Cursor>,
}

impl RangeStream {
    /// Ranges per chunk after clamping
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Iterator for RangeStream {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.current.is_none() {
            let (code, list) = self.pending.pop_front()?;
            let total_pages = total_pages(list.len(), self.chunk_size).max(1);
            self.current = Some(Cursor {
                code,
                list,
                page: 0,
                total_pages,
            });
        }

        let cursor = self.current.as_mut()?;
        let page = cursor.page;
        let last = page + 1 == cursor.total_pages;
        let chunk = Chunk {
            code: Arc::clone(&cursor.code),
            page,
            total_pages: cursor.total_pages,
            last,
            source: Arc::clone(&cursor.list),
            span: page_bounds(cursor.list.len(), page, self.chunk_size),
        };

        if last {
            self.current = None;
        } else {
            cursor.page += 1;
        }
        Some(chunk)
    }
}
