//! Cursor pagination over collection endpoints.
//!
//! Each page carries the link to the next one in `meta.paging.next`; there is
//! no page count. [`Paginator`] walks those links one page at a time and hands
//! out items in the order the API returned them.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream, TryStreamExt};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::executor::RequestExecutor;
use crate::options::CallOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub paging: Option<Paging>,
    #[serde(default)]
    pub records: Option<u64>,
}

/// One page of a collection response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    pub data: Vec<Value>,
    #[serde(default)]
    pub meta: PageMeta,
}

impl PageEnvelope {
    /// Link to the next page; `None` on the last one.
    pub fn next_url(&self) -> Option<&str> {
        self.meta
            .paging
            .as_ref()
            .and_then(|p| p.next.as_deref())
            .filter(|next| !next.is_empty())
    }
}

impl TryFrom<Value> for PageEnvelope {
    type Error = ApiError;

    fn try_from(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("not a collection page: {}", e)))
    }
}

/// Result of a collection GET.
pub enum Listing {
    /// Every item of every page, fetched lazily
    Items(Paginator),
    /// The first page as returned, with autopagination turned off
    Page(Value),
}

impl Listing {
    /// Consumes the listing into items, following links only for `Items`.
    pub async fn into_vec(self) -> Result<Vec<Value>> {
        match self {
            Listing::Items(paginator) => paginator.collect_all().await,
            Listing::Page(page) => Ok(PageEnvelope::try_from(page)?.data),
        }
    }
}

/// Lazy, single-pass walk over every page of a collection.
///
/// Not restartable: build a new one from the original URL to enumerate again.
/// After an error the paginator is exhausted.
pub struct Paginator {
    executor: Arc<RequestExecutor>,
    options: CallOptions,
    next_url: Option<String>,
    buffer: VecDeque<Value>,
    pages_fetched: usize,
}

impl Paginator {
    pub fn new(executor: Arc<RequestExecutor>, url: impl Into<String>, options: CallOptions) -> Self {
        Self {
            executor,
            options,
            next_url: Some(url.into()),
            buffer: VecDeque::new(),
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Next item, fetching pages as needed. `Ok(None)` once the last page is drained.
    pub async fn next_item(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            match self.next_page().await? {
                Some(page) => self.buffer.extend(page.data),
                None => return Ok(None),
            }
        }
    }

    /// Fetches the next whole page. Items still buffered from an earlier
    /// page are left in place.
    #[tracing::instrument(skip(self))]
    pub async fn next_page(&mut self) -> Result<Option<PageEnvelope>> {
        // Taking the cursor first leaves the paginator exhausted if the fetch fails.
        let Some(url) = self.next_url.take() else {
            return Ok(None);
        };

        debug!("Fetching page {} from {}", self.pages_fetched + 1, url);
        let body = self.executor.get(&url, &self.options).await?.into_json()?;
        let page = PageEnvelope::try_from(body)?;
        self.pages_fetched += 1;

        self.next_url = page.next_url().map(str::to_owned);
        debug!(
            "Page {} had {} items, next: {}",
            self.pages_fetched,
            page.data.len(),
            self.next_url.as_deref().unwrap_or("none")
        );
        Ok(Some(page))
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send + 'static {
        stream::try_unfold(self, |mut paginator| async move {
            Ok(paginator.next_item().await?.map(|item| (item, paginator)))
        })
    }

    pub async fn collect_all(self) -> Result<Vec<Value>> {
        self.into_stream().try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ReqwestTransport;
    use futures_util::StreamExt;
    use mockito::Matcher;
    use serde_json::json;

    fn executor() -> Arc<RequestExecutor> {
        let api = Arc::new(ReqwestTransport::for_api("hyacinth-test").unwrap());
        let storage = Arc::new(ReqwestTransport::new(reqwest::Client::new()));
        Arc::new(RequestExecutor::new(api, storage, true))
    }

    fn page_body(ids: &[u64], next: Option<String>) -> String {
        let data: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
        let meta = match next {
            Some(next) => json!({"paging": {"next": next}, "records": 7}),
            None => json!({"paging": {}, "records": 7}),
        };
        json!({"data": data, "meta": meta}).to_string()
    }

    #[test]
    fn test_envelope_last_page_detection() {
        let no_meta: PageEnvelope = serde_json::from_value(json!({"data": []})).unwrap();
        assert_eq!(no_meta.next_url(), None);

        let no_next: PageEnvelope =
            serde_json::from_value(json!({"data": [], "meta": {"paging": {}}})).unwrap();
        assert_eq!(no_next.next_url(), None);

        let with_next: PageEnvelope = serde_json::from_value(
            json!({"data": [], "meta": {"paging": {"next": "https://x/y?page_token=1"}}}),
        )
        .unwrap();
        assert_eq!(with_next.next_url(), Some("https://x/y?page_token=1"));
    }

    #[test]
    fn test_envelope_requires_data_array() {
        assert!(PageEnvelope::try_from(json!({"error": "nope"})).is_err());
        assert!(PageEnvelope::try_from(json!({"data": {"id": 1}})).is_err());
    }

    #[tokio::test]
    async fn test_three_pages_concatenated_in_order() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let page1 = server
            .mock("GET", "/api/v4/contacts.json")
            // First request only: cursor requests also carry page_token.
            .match_query(Matcher::Regex("^fields=id&order=[^&]+$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(
                &[1, 2, 3],
                Some(format!("{}/api/v4/contacts.json?fields=id&order=id(asc)&page_token=p2", base)),
            ))
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/api/v4/contacts.json")
            .match_query(Matcher::UrlEncoded("page_token".into(), "p2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(
                &[4, 5],
                Some(format!("{}/api/v4/contacts.json?fields=id&order=id(asc)&page_token=p3", base)),
            ))
            .expect(1)
            .create_async()
            .await;
        let page3 = server
            .mock("GET", "/api/v4/contacts.json")
            .match_query(Matcher::UrlEncoded("page_token".into(), "p3".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&[6, 7], None))
            .expect(1)
            .create_async()
            .await;

        let mut paginator = Paginator::new(
            executor(),
            format!("{}/api/v4/contacts.json", base),
            CallOptions::fields("id"),
        );
        let mut ids = Vec::new();
        while let Some(item) = paginator.next_item().await.unwrap() {
            ids.push(item["id"].as_u64().unwrap());
        }

        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(paginator.pages_fetched(), 3);
        assert_eq!(paginator.next_item().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_page_with_cursor_does_not_stop() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _first = server
            .mock("GET", "/api/v4/tasks.json")
            .match_query(Matcher::Regex("^order=[^&]+$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&[], Some(format!("{}/api/v4/tasks.json?page_token=b", base))))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/v4/tasks.json")
            .match_query(Matcher::UrlEncoded("page_token".into(), "b".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&[10], None))
            .expect(1)
            .create_async()
            .await;

        let items = Paginator::new(executor(), format!("{}/api/v4/tasks.json", base), CallOptions::new())
            .collect_all()
            .await
            .unwrap();

        second.assert_async().await;
        assert_eq!(items, vec![json!({"id": 10})]);
    }

    #[tokio::test]
    async fn test_failed_page_ends_stream_with_error() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _first = server
            .mock("GET", "/api/v4/matters.json")
            .match_query(Matcher::Regex("^order=[^&]+$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&[1], Some(format!("{}/api/v4/matters.json?page_token=x", base))))
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/api/v4/matters.json")
            .match_query(Matcher::UrlEncoded("page_token".into(), "x".into()))
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let stream = Paginator::new(executor(), format!("{}/api/v4/matters.json", base), CallOptions::new())
            .into_stream();
        let results: Vec<Result<Value>> = stream.collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &json!({"id": 1}));
        assert!(matches!(results[1], Err(ApiError::HttpStatus { .. })));
    }

    #[tokio::test]
    async fn test_exhausted_after_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v4/users.json")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .expect(1)
            .create_async()
            .await;

        let mut paginator = Paginator::new(
            executor(),
            format!("{}/api/v4/users.json", server.url()),
            CallOptions::new(),
        );
        assert!(paginator.next_item().await.is_err());
        assert_eq!(paginator.next_item().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_listing_page_into_vec() {
        let listing = Listing::Page(json!({"data": [{"id": 1}], "meta": {"paging": {"next": "x"}}}));
        assert_eq!(listing.into_vec().await.unwrap(), vec![json!({"id": 1})]);
    }
}
