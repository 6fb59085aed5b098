//! Rendering fetched HTML pages as plain text.
//!
//! `scraper` parses the page for its title, `html2text` does the rendering.

use scraper::{Html, Selector};

const MAX_HTML_BYTES: usize = 2_000_000;
/// Wide enough that paragraphs are never wrapped; the chunker does the splitting.
const RENDER_WIDTH: usize = 10_000;

pub struct HtmlPage {
    pub title: String,
    pub text: String,
}

pub fn parse_html(html: &str) -> HtmlPage {
    let html = truncate_at_char(html, MAX_HTML_BYTES);
    let document = Html::parse_document(html);
    let title = page_title(&document);
    let rendered = html2text::from_read(html.as_bytes(), RENDER_WIDTH).unwrap_or_default();
    HtmlPage {
        title,
        text: collapse_blank_lines(&rendered),
    }
}

fn truncate_at_char(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text = doc.select(&selector).next()?.text().collect::<String>();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn page_title(doc: &Html) -> String {
    if let Some(title) = first_text(doc, "title") {
        return title;
    }
    let og = Selector::parse(r#"meta[property="og:title"]"#)
        .ok()
        .and_then(|s| doc.select(&s).next())
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(og) = og {
        return og.to_string();
    }
    first_text(doc, "h1").unwrap_or_default()
}

/// At most one blank line between paragraphs.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank = false;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if !blank && !out.is_empty() {
                out.push('\n');
            }
            blank = true;
        } else {
            blank = false;
            out.push_str(line);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_flattened() {
        let html = "<html><head><title>Parsing Survey</title></head><body><script>var a;</script>\
                    <p>First &amp; foremost.</p><p>Second</p></body></html>";
        let page = parse_html(html);
        assert_eq!(page.title, "Parsing Survey");
        assert!(page.text.contains("First & foremost."));
        assert!(page.text.contains("Second"));
        assert!(!page.text.contains("var a"));
        assert!(!page.text.contains('<'));
    }

    #[test]
    fn entities_breaks_and_headings_survive() {
        let html = "<h2>Method</h2><div>It&#39;s fast&#x2014;really.</div>Line one<br />Line two";
        let text = parse_html(html).text;
        assert!(text.contains("It's fast\u{2014}really."), "{text}");
        assert!(
            text.lines().any(|l| l.trim_start_matches('#').trim() == "Method"),
            "{text}"
        );
        let one = text.lines().position(|l| l.contains("Line one"));
        let two = text.lines().position(|l| l.contains("Line two"));
        assert!(one.is_some() && two.is_some() && one != two, "{text}");
    }

    #[test]
    fn title_falls_back_to_og_then_h1() {
        let og = r#"<html><head><meta property="og:title" content="OG Title"></head><body><h1>H1</h1></body></html>"#;
        assert_eq!(parse_html(og).title, "OG Title");
        assert_eq!(parse_html("<body><h1>Only H1</h1></body>").title, "Only H1");
        assert!(parse_html("").title.is_empty());
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb  \n\n"), "a\n\nb");
    }

    #[test]
    fn oversized_pages_cut_on_char_boundary() {
        let s = "é".repeat(10);
        assert_eq!(truncate_at_char(&s, 5), "éé");
        assert_eq!(truncate_at_char("short", 100), "short");
    }
}
