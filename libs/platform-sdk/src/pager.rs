//! Cursor-based pagination with Stream API
//!
//! [`PageIterator`] turns a page-fetching function into a lazy, forward-only
//! `Stream` of pages. The cursor for the next request is the id of the last
//! item of the previous page; callers never handle it themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use platform_sdk::pager::PageIterator;
//!
//! let pages = PageIterator::new(1000, Some(250), None, |cursor, limit| {
//!     let queue = queue.clone();
//!     async move {
//!         queue
//!             .list_requests(ListRequestsOptions::new(limit).after(cursor))
//!             .await
//!     }
//! });
//!
//! let mut items = pages.into_items();
//! while let Some(request) = items.next().await {
//!     println!("{}", request?.url);
//! }
//! ```

use futures_core::Stream;
use futures_core::future::BoxFuture;
use pin_project_lite::pin_project;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Opaque id of the last item of the previous page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for PageCursor {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PageCursor {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Items that can serve as the continuation point of a cursor listing
pub trait CursorItem {
    fn cursor_id(&self) -> &str;
}

/// One page of a cursor listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Page size the server applied
    #[serde(default)]
    pub limit: u64,
    /// Cursor this page continued from
    #[serde(default)]
    pub exclusive_start_id: Option<String>,
}

impl<T> PageResult<T> {
    #[must_use]
    pub fn new(items: Vec<T>, limit: u64, exclusive_start_id: Option<String>) -> Self {
        Self {
            items,
            limit,
            exclusive_start_id,
        }
    }

    /// An empty page means the listing is exhausted
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: CursorItem> PageResult<T> {
    /// Cursor for the page after this one
    #[must_use]
    pub fn next_cursor(&self) -> Option<PageCursor> {
        self.items.last().map(|item| PageCursor::new(item.cursor_id()))
    }
}

/// Boxed page future, for iterators that must be named in a return type
pub type PageFuture<T, E> = BoxFuture<'static, Result<PageResult<T>, E>>;

/// Boxed page fetch function
pub type PageFetch<T, E> = Box<dyn FnMut(Option<PageCursor>, u64) -> PageFuture<T, E> + Send>;

/// Page iterator over a boxed fetch function
pub type BoxPageIterator<T, E> = PageIterator<T, E, PageFetch<T, E>, PageFuture<T, E>>;

pin_project! {
    /// Lazy stream of pages from one cursor listing.
    ///
    /// Each pull requests `min(ceiling, limit - seen)` items (or the ceiling
    /// when there is no limit). An empty page ends the stream, and so does
    /// reaching the limit; items past the remaining limit are dropped. A
    /// fetch error is yielded once and ends the stream.
    ///
    /// # Type Parameters
    ///
    /// * `T` - The item type
    /// * `E` - The error type
    /// * `F` - The fetch function `(cursor, page_limit) -> Fut`
    /// * `Fut` - The future returned by the fetch function
    pub struct PageIterator<T, E, F, Fut>
    where
        F: FnMut(Option<PageCursor>, u64) -> Fut,
        Fut: Future<Output = Result<PageResult<T>, E>>,
    {
        ceiling: u64,
        limit: Option<u64>,
        seen: u64,
        cursor: Option<PageCursor>,
        done: bool,
        fetch: F,
        #[pin]
        current_fetch: Option<Fut>,
    }
}

impl<T, E, F, Fut> PageIterator<T, E, F, Fut>
where
    F: FnMut(Option<PageCursor>, u64) -> Fut,
    Fut: Future<Output = Result<PageResult<T>, E>>,
{
    /// Create a page iterator.
    ///
    /// # Arguments
    ///
    /// * `ceiling` - Largest page the endpoint accepts (`0` is treated as `1`)
    /// * `limit` - Total number of items to yield, `None` for all
    /// * `start` - Cursor to continue from, `None` for the beginning
    /// * `fetch` - Function that fetches one page
    pub fn new(ceiling: u64, limit: Option<u64>, start: Option<PageCursor>, fetch: F) -> Self {
        Self {
            ceiling: ceiling.max(1),
            limit,
            seen: 0,
            cursor: start,
            done: false,
            fetch,
            current_fetch: None,
        }
    }

    /// Items yielded so far
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Cursor the next fetch will continue from
    pub fn cursor(&self) -> Option<&PageCursor> {
        self.cursor.as_ref()
    }

    /// Flatten the pages into a stream of items
    pub fn into_items(self) -> PageItems<T, E, F, Fut> {
        PageItems {
            pages: self,
            buffer: VecDeque::new(),
        }
    }
}

impl<T, E, F, Fut> Stream for PageIterator<T, E, F, Fut>
where
    T: CursorItem,
    F: FnMut(Option<PageCursor>, u64) -> Fut,
    Fut: Future<Output = Result<PageResult<T>, E>>,
{
    type Item = Result<PageResult<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            if let Some(fut) = this.current_fetch.as_mut().as_pin_mut() {
                match fut.poll(cx) {
                    Poll::Ready(Ok(mut page)) => {
                        this.current_fetch.set(None);

                        if page.items.is_empty() {
                            *this.done = true;
                            return Poll::Ready(None);
                        }

                        if let Some(limit) = *this.limit {
                            let remaining = limit.saturating_sub(*this.seen);
                            page.items
                                .truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
                        }

                        *this.seen += u64::try_from(page.items.len()).unwrap_or(u64::MAX);
                        *this.cursor = page.next_cursor();
                        if this.limit.is_some_and(|limit| *this.seen >= limit) {
                            *this.done = true;
                        }

                        return Poll::Ready(Some(Ok(page)));
                    }
                    Poll::Ready(Err(e)) => {
                        this.current_fetch.set(None);
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            let page_limit = match *this.limit {
                Some(limit) => (*this.ceiling).min(limit.saturating_sub(*this.seen)),
                None => *this.ceiling,
            };
            if page_limit == 0 {
                *this.done = true;
                return Poll::Ready(None);
            }

            let fut = (this.fetch)(this.cursor.clone(), page_limit);
            this.current_fetch.set(Some(fut));
        }
    }
}

pin_project! {
    /// Item stream produced by [`PageIterator::into_items`]
    pub struct PageItems<T, E, F, Fut>
    where
        F: FnMut(Option<PageCursor>, u64) -> Fut,
        Fut: Future<Output = Result<PageResult<T>, E>>,
    {
        #[pin]
        pages: PageIterator<T, E, F, Fut>,
        buffer: VecDeque<T>,
    }
}

impl<T, E, F, Fut> Stream for PageItems<T, E, F, Fut>
where
    T: CursorItem,
    F: FnMut(Option<PageCursor>, u64) -> Fut,
    Fut: Future<Output = Result<PageResult<T>, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.buffer.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            match this.pages.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(page))) => this.buffer.extend(page.items),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
