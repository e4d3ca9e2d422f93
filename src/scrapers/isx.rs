//! Iraq Stock Exchange portal scraper.
//!
//! Listing pages render one `.indnews-datarow` per story. Each row carries
//! the timestamp in `.table-newsdata` (followed by a non-breaking space and
//! decoration), the title in `.indnews-title` and the portal-relative detail
//! link on the `.indnews-title a` anchor.
//!
//! # URL Pattern
//!
//! Detail links are relative to the portal, e.g. `storyDetails.html?storyId=1`,
//! and are resolved against `http://www.isx-iq.net/isxportal/portal/`.

use super::PageFetcher;
use crate::error::FetchError;
use crate::models::ListingRow;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

const ROW_SELECTOR: &str = ".indnews-datarow";
const DATE_SELECTOR: &str = ".table-newsdata";
const TITLE_SELECTOR: &str = ".indnews-title";
const LINK_SELECTOR: &str = ".indnews-title a[href]";

/// Fetches portal pages over plain HTTP and parses them with `scraper`.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    portal_url: Url,
}

impl HttpPageFetcher {
    /// `portal_url` is the base that relative story links resolve against.
    pub fn new(client: Client, portal_url: &str) -> Result<Self, FetchError> {
        let portal_url = Url::parse(portal_url).map_err(|source| FetchError::InvalidUrl {
            input: portal_url.to_string(),
            source,
        })?;
        Ok(Self { client, portal_url })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(http_err)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(level = "info", skip(self))]
    async fn fetch_listing(&self, page: &str) -> Result<Vec<ListingRow>, FetchError> {
        let html = self.get_text(page).await?;
        let rows = parse_listing(&html, page)?;
        info!(count = rows.len(), "Indexed listing rows");
        Ok(rows)
    }

    #[instrument(level = "info", skip(self))]
    async fn fetch_detail(&self, link: &str) -> Result<String, FetchError> {
        let url = self
            .portal_url
            .join(link)
            .map_err(|source| FetchError::InvalidUrl {
                input: link.to_string(),
                source,
            })?;
        let body = self.get_text(url.as_str()).await?;
        debug!(bytes = body.len(), "Fetched detail page");
        Ok(body)
    }
}

/// Extract listing rows from a listing page.
///
/// Rows missing any of date, title or link are skipped. A page without any
/// row at all means the markup changed (or the page is an error page) and
/// fails with [`FetchError::SelectorNotFound`].
pub fn parse_listing(html: &str, page: &str) -> Result<Vec<ListingRow>, FetchError> {
    let document = Html::parse_document(html);
    let row_sel = selector(ROW_SELECTOR);
    let date_sel = selector(DATE_SELECTOR);
    let title_sel = selector(TITLE_SELECTOR);
    let link_sel = selector(LINK_SELECTOR);

    let elements: Vec<ElementRef> = document.select(&row_sel).collect();
    if elements.is_empty() {
        return Err(FetchError::SelectorNotFound {
            selector: ROW_SELECTOR,
            url: page.to_string(),
        });
    }

    let mut rows = Vec::with_capacity(elements.len());
    for (i, row) in elements.into_iter().enumerate() {
        let date = row.select(&date_sel).next().map(|e| clean_date(&text_of(e)));
        let title = row.select(&title_sel).next().map(|e| text_of(e).trim().to_string());
        let link = row
            .select(&link_sel)
            .next()
            .and_then(|e| e.value().attr("href"))
            .map(|h| h.trim().to_string());

        match (date, title, link) {
            (Some(date), Some(title), Some(link)) if !link.is_empty() => {
                rows.push(ListingRow { title, date, link })
            }
            _ => warn!(row = i, %page, "Listing row missing date, title or link; skipping"),
        }
    }
    Ok(rows)
}

fn selector(css: &'static str) -> Selector {
    // Constant selectors; a parse failure is a programming error.
    Selector::parse(css).expect("static selector")
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join("")
}

/// Keep only the timestamp before the first non-breaking space.
fn clean_date(raw: &str) -> String {
    let cut = raw.split('\u{a0}').next().unwrap_or(raw);
    cut.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING: &str = "<html><body><table>
        <tr class=\"indnews-datarow\">
          <td class=\"table-newsdata\">31/12/2024 10:14\u{a0}\u{a0}<img src=\"new.gif\"></td>
          <td class=\"indnews-title\"><a href=\"storyDetails.html?storyId=101\"> إفصاح مصرف بغداد </a></td>
        </tr>
        <tr class=\"indnews-datarow\">
          <td class=\"table-newsdata\">30/12/2024 09:00</td>
          <td class=\"indnews-title\"><a href=\"storyDetails.html?storyId=102\">Trading halt</a></td>
        </tr>
        <tr class=\"indnews-datarow\">
          <td class=\"table-newsdata\">29/12/2024 08:00</td>
          <td class=\"indnews-title\">no anchor here</td>
        </tr>
      </table></body></html>";

    #[test]
    fn test_parse_listing_extracts_rows() {
        let rows = parse_listing(LISTING, "page").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "31/12/2024 10:14");
        assert_eq!(rows[0].title, "إفصاح مصرف بغداد");
        assert_eq!(rows[0].link, "storyDetails.html?storyId=101");
        assert_eq!(rows[1].date, "30/12/2024 09:00");
    }

    #[test]
    fn test_parse_listing_without_rows_is_selector_error() {
        let err = parse_listing("<html><body>maintenance</body></html>", "page").unwrap_err();
        assert!(matches!(err, FetchError::SelectorNotFound { .. }));
    }

    #[test]
    fn test_clean_date() {
        assert_eq!(clean_date("  31/12/2024 10:14\u{a0}new"), "31/12/2024 10:14");
        assert_eq!(clean_date("31/12/2024\n   10:14"), "31/12/2024 10:14");
    }

    #[tokio::test]
    async fn test_fetch_listing_and_detail_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/isxportal/portal/storyList.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/isxportal/portal/storyDetails.html"))
            .and(query_param("storyId", "101"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>detail</html>"))
            .mount(&server)
            .await;

        let portal = format!("{}/isxportal/portal/", server.uri());
        let fetcher = HttpPageFetcher::new(Client::new(), &portal).unwrap();

        let rows = fetcher
            .fetch_listing(&format!("{portal}storyList.html?activeTab=0"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let html = fetcher.fetch_detail(&rows[0].link).await.unwrap();
        assert_eq!(html, "<html>detail</html>");
    }

    #[tokio::test]
    async fn test_fetch_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let portal = format!("{}/isxportal/portal/", server.uri());
        let fetcher = HttpPageFetcher::new(Client::new(), &portal).unwrap();
        let err = fetcher.fetch_detail("storyDetails.html?storyId=9").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }
}
