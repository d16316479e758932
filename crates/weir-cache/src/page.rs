//! Paged byte buffer with free-list recycling.
//!
//! [`PageCache`] holds one contiguous logical byte range as an ordered run
//! of fixed-size pages, plus a free list of recycled pages. The engine
//! appends at the tail as the prefetcher fetches and trims whole pages from
//! the head as the reader moves on; released pages go back to the free
//! list, so the allocation footprint never shrinks below its peak but also
//! stops growing once the window reaches steady state.
//!
//! Not thread-safe: the engine serializes access under its own lock.

use std::collections::VecDeque;

/// One cache page: a fixed-size buffer of which only the first
/// [`fill`](Self::fill) bytes are meaningful.
#[derive(Debug)]
pub struct Page {
    data: Vec<u8>,
    fill: usize,
}

impl Page {
    fn new(page_size: usize) -> Self {
        Self {
            data: vec![0; page_size],
            fill: 0,
        }
    }

    /// Number of meaningful bytes in this page.
    #[inline]
    #[must_use]
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Record that the first `fill` bytes are now meaningful.
    ///
    /// Callers set this after reading into [`buf_mut`](Self::buf_mut) and
    /// before appending the page.
    pub fn set_fill(&mut self, fill: usize) {
        assert!(fill <= self.data.len(), "fill exceeds page size");
        self.fill = fill;
    }

    /// The full page buffer, for the fetcher to read into.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The meaningful bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.fill]
    }
}

/// An ordered run of pages holding contiguous bytes, plus a free list.
#[derive(Debug)]
pub struct PageCache {
    page_size: usize,
    total_size: usize,
    active: VecDeque<Page>,
    free: Vec<Page>,
}

impl PageCache {
    /// Create an empty cache serving pages of `page_size` bytes.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            page_size,
            total_size: 0,
            active: VecDeque::new(),
            free: Vec::new(),
        }
    }

    /// Sum of fills over the active pages.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// The configured page size.
    #[inline]
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pop a page from the free list, or allocate a fresh one.
    ///
    /// The page has `fill == 0`; the caller owns it exclusively until it is
    /// either appended or released.
    #[must_use]
    pub fn acquire_page(&mut self) -> Page {
        self.free.pop().unwrap_or_else(|| Page::new(self.page_size))
    }

    /// Return an unused page to the free list.
    pub fn release_page(&mut self, mut page: Page) {
        page.fill = 0;
        self.free.push(page);
    }

    /// Append a filled page to the tail of the active run.
    ///
    /// The caller sets the fill before appending.
    pub fn append_page(&mut self, page: Page) {
        self.total_size += page.fill;
        self.active.push_back(page);
    }

    /// Release whole pages from the head, up to `max_bytes`.
    ///
    /// Stops before any page whose fill would overshoot the budget;
    /// partial-page trims are not supported, so eviction is granular at
    /// page size. Returns the bytes actually released.
    pub fn release_from_start(&mut self, mut max_bytes: usize) -> usize {
        let mut released = 0;

        while max_bytes > 0 {
            let Some(front) = self.active.front() else {
                break;
            };
            if max_bytes < front.fill {
                break;
            }
            let page = self.active.pop_front().expect("front exists");
            max_bytes -= page.fill;
            released += page.fill;
            self.release_page(page);
        }

        self.total_size -= released;
        released
    }

    /// Copy `dst.len()` bytes starting at logical cache offset `from`
    /// (0-based within the cached run) into `dst`.
    ///
    /// Precondition: `from + dst.len() <= total_size()`. Violations are
    /// programmer errors and panic.
    pub fn copy(&self, from: usize, dst: &mut [u8]) {
        if dst.is_empty() {
            return;
        }
        assert!(
            from + dst.len() <= self.total_size,
            "copy out of range: {}..{} of {}",
            from,
            from + dst.len(),
            self.total_size
        );

        let mut pages = self.active.iter();
        let mut page = pages.next().expect("non-empty: total_size > 0");
        let mut page_start = 0;
        while from >= page_start + page.fill {
            page_start += page.fill;
            page = pages.next().expect("offset within total_size");
        }

        let delta = from - page_start;
        let mut written = (page.fill - delta).min(dst.len());
        dst[..written].copy_from_slice(&page.bytes()[delta..delta + written]);

        while written < dst.len() {
            let page = pages.next().expect("enough pages for total_size");
            let n = page.fill.min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&page.bytes()[..n]);
            written += n;
        }
    }
}
