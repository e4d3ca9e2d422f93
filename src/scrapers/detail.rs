//! Pattern extraction from story detail pages.
//!
//! The detail page is treated as an opaque HTML blob; only two patterns are
//! pulled out of it: the company ticker from the profile link and the PDF
//! attachment paths under the configured attachment prefix.

use crate::models::Attachment;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

static TICKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"companyprofilecontainer\.html\?companyCode=([A-Z]+)").expect("ticker regex")
});

/// Story PDFs are named `story<id>_<n>[_<n>...].pdf`.
const STORY_PDF_PATTERN: &str = r"story[0-9]+_[0-9_]+\.pdf";

/// Enrichment extracted from one detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detail {
    pub ticker: String,
    pub attachments: Vec<Attachment>,
}

/// First company code linked from the page, or an empty string.
pub fn extract_ticker(html: &str) -> String {
    TICKER_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Detail-page extractor bound to one attachment prefix.
#[derive(Debug, Clone)]
pub struct DetailParser {
    prefix: String,
    pdf_re: Regex,
}

impl DetailParser {
    /// Build a parser that finds story PDFs under `attachment_prefix`.
    ///
    /// The prefix is matched literally; regex metacharacters in it are escaped.
    ///
    /// # Errors
    ///
    /// Only if the compiled pattern would exceed the regex size limit.
    pub fn new(attachment_prefix: &str) -> Result<Self, regex::Error> {
        let pattern = format!("{}{}", regex::escape(attachment_prefix), STORY_PDF_PATTERN);
        Ok(Self {
            prefix: attachment_prefix.to_string(),
            pdf_re: Regex::new(&pattern)?,
        })
    }

    /// Every PDF path on the page in discovery order, without repeats.
    pub fn extract_pdf_links(&self, html: &str) -> Vec<String> {
        self.pdf_re
            .find_iter(html)
            .map(|m| m.as_str().to_string())
            .unique()
            .collect()
    }

    /// Extract ticker and attachments from a detail page.
    ///
    /// # Arguments
    ///
    /// * `html` - Raw detail page; an empty or unrelated page is fine
    ///
    /// # Returns
    ///
    /// The first ticker (or `""`) and one unloaded [`Attachment`] per
    /// distinct PDF path, named by stripping the prefix.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let parser = DetailParser::new("/isxportal/files/")?;
    /// let detail = parser.parse(r#"<a href="/isxportal/files/story1_2.pdf">pdf</a>"#);
    /// assert_eq!(detail.attachments[0].filename, "story1_2.pdf");
    /// ```
    pub fn parse(&self, html: &str) -> Detail {
        Detail {
            ticker: extract_ticker(html),
            attachments: self
                .extract_pdf_links(html)
                .iter()
                .map(|url| Attachment::from_url(url, &self.prefix))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &str = r#"
        <html><body>
          <a href="companyprofilecontainer.html?companyCode=BBOB&currLanguage=ar">مصرف بغداد</a>
          <a href="companyprofilecontainer.html?companyCode=IBSD">other</a>
          <a href="/isxportal/files/story12345_1.pdf">1</a>
          <a href="/isxportal/files/story12345_2_3.pdf">2</a>
          <a href="/isxportal/files/story12345_1.pdf">again</a>
          <a href="/isxportal/files/notastory.pdf">skip</a>
        </body></html>"#;

    fn isx() -> DetailParser {
        DetailParser::new("/isxportal/files/").unwrap()
    }

    #[test]
    fn test_extract_ticker_takes_first_match() {
        assert_eq!(extract_ticker(DETAIL), "BBOB");
    }

    #[test]
    fn test_extract_ticker_missing_is_empty() {
        assert_eq!(extract_ticker("<html>no profile</html>"), "");
        assert_eq!(extract_ticker("companyprofilecontainer.html?companyCode=lower"), "");
    }

    #[test]
    fn test_extract_pdf_links_in_order_without_duplicates() {
        assert_eq!(
            isx().extract_pdf_links(DETAIL),
            vec![
                "/isxportal/files/story12345_1.pdf",
                "/isxportal/files/story12345_2_3.pdf"
            ]
        );
    }

    #[test]
    fn test_parse_builds_unloaded_attachments() {
        let detail = isx().parse(DETAIL);
        assert_eq!(detail.ticker, "BBOB");
        assert_eq!(detail.attachments.len(), 2);
        assert_eq!(detail.attachments[0].filename, "story12345_1.pdf");
        assert_eq!(detail.attachments[1].filename, "story12345_2_3.pdf");
        assert!(detail.attachments.iter().all(|a| !a.is_loaded));
    }

    #[test]
    fn test_parse_of_empty_page() {
        assert_eq!(isx().parse(""), Detail::default());
    }

    #[test]
    fn test_configured_prefix_drives_discovery() {
        let parser = DetailParser::new("/docs/").unwrap();
        let html = r#"<a href="/docs/story7_1.pdf">a</a> <a href="/isxportal/files/story7_2.pdf">b</a>"#;

        let detail = parser.parse(html);
        assert_eq!(detail.attachments.len(), 1);
        assert_eq!(detail.attachments[0].url, "/docs/story7_1.pdf");
        assert_eq!(detail.attachments[0].filename, "story7_1.pdf");
        let default = isx().parse(html);
        assert_eq!(default.attachments.len(), 1);
        assert_eq!(default.attachments[0].filename, "story7_2.pdf");
    }

    #[test]
    fn test_prefix_is_matched_literally() {
        let parser = DetailParser::new("/a.b/").unwrap();
        assert!(parser.extract_pdf_links("/aXb/story1_1.pdf").is_empty());
        assert_eq!(parser.extract_pdf_links("/a.b/story1_1.pdf"), vec!["/a.b/story1_1.pdf"]);
    }
}
