use anyhow::{Context, Result};
use log::debug;
use std::io::Write;

use crate::client::Client;
use crate::options::CallOptions;
use crate::pagination::Listing;

use super::write_json;

/// Print every item of a collection, one JSON object per line
#[tracing::instrument(skip(client, out))]
pub async fn list<W: Write>(
    client: &Client,
    collection: &str,
    fields: Option<&str>,
    out: &mut W,
) -> Result<usize> {
    let options = fields.map(CallOptions::fields).unwrap_or_default();
    let listing = client
        .list(collection, &options)
        .await
        .with_context(|| format!("Failed to list {}", collection))?;

    let mut count = 0;
    match listing {
        Listing::Items(mut paginator) => {
            while let Some(item) = paginator
                .next_item()
                .await
                .with_context(|| format!("Failed to fetch a page of {}", collection))?
            {
                write_json(out, &item)?;
                count += 1;
            }
            debug!("{} items over {} pages", count, paginator.pages_fetched());
        }
        Listing::Page(page) => {
            let Some(items) = page.get("data").and_then(|d| d.as_array()) else {
                anyhow::bail!("Response for {} has no data array", collection);
            };
            for item in items {
                write_json(out, item)?;
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_prints_all_pages() {
        let mut server = mockito::Server::new_async().await;
        let next = format!("{}/api/v4/contacts.json?page_token=2", server.url());
        let _first = server
            .mock("GET", "/api/v4/contacts.json")
            .match_query(Matcher::Regex("^fields=id&order=[^&]+$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"data": [{"id": 1}], "meta": {"paging": {"next": next}}}).to_string())
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/api/v4/contacts.json")
            .match_query(Matcher::UrlEncoded("page_token".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"data": [{"id": 2}], "meta": {"paging": {}}}).to_string())
            .create_async()
            .await;

        let client = Client::new(
            "t",
            ClientConfig {
                base_url_override: Some(server.url()),
                ..Default::default()
            },
        )
        .unwrap();
        let mut out = Vec::new();
        let count = list(&client, "contacts", Some("id"), &mut out).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "{\"id\":1}\n{\"id\":2}\n");
    }
}
