//! The query backend capability consumed by the follow engine.

use crate::{BackendError, SearchRequest, SearchResponse};
use std::rc::Rc;

/// A document store that answers sorted, paginated range queries.
///
/// Every call blocks until the backend has answered. Implementations are
/// not required to be thread-safe.
pub trait QueryBackend {
    /// Run a search against `index` (all indices when `None`).
    ///
    /// When `request.scroll` is set the response carries a scroll id.
    fn search(
        &self,
        index: Option<&str>,
        request: &SearchRequest,
    ) -> Result<SearchResponse, BackendError>;

    /// Fetch the next page of an open scroll cursor
    fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchResponse, BackendError>;

    /// Release a scroll cursor
    fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError>;
}

impl<T: QueryBackend + ?Sized> QueryBackend for &T {
    fn search(
        &self,
        index: Option<&str>,
        request: &SearchRequest,
    ) -> Result<SearchResponse, BackendError> {
        (**self).search(index, request)
    }

    fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchResponse, BackendError> {
        (**self).scroll(scroll_id, keep_alive)
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        (**self).clear_scroll(scroll_id)
    }
}

impl<T: QueryBackend + ?Sized> QueryBackend for Box<T> {
    fn search(
        &self,
        index: Option<&str>,
        request: &SearchRequest,
    ) -> Result<SearchResponse, BackendError> {
        (**self).search(index, request)
    }

    fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchResponse, BackendError> {
        (**self).scroll(scroll_id, keep_alive)
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        (**self).clear_scroll(scroll_id)
    }
}

impl<T: QueryBackend + ?Sized> QueryBackend for Rc<T> {
    fn search(
        &self,
        index: Option<&str>,
        request: &SearchRequest,
    ) -> Result<SearchResponse, BackendError> {
        (**self).search(index, request)
    }

    fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchResponse, BackendError> {
        (**self).scroll(scroll_id, keep_alive)
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        (**self).clear_scroll(scroll_id)
    }
}
