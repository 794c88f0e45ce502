//! HTML to PDF rendering for per-recipient document attachments.
//!
//! The markup is reduced to its visible text and laid out as Courier lines,
//! which is enough for letters, receipts and notices.

use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use scraper::{Html, Node};
use thiserror::Error;
use tracing::debug;

const LINES_PER_PAGE: usize = 60;
const LINE_WIDTH: usize = 90;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("document has no renderable text")]
    Empty,

    #[error("PDF serialization failed: {0}")]
    Pdf(String),
}

/// Render an HTML string to PDF bytes.
pub fn render_pdf(html: &str) -> Result<Vec<u8>, RenderError> {
    let lines = extract_lines(html);
    if lines.is_empty() {
        return Err(RenderError::Empty);
    }

    debug!(lines = lines.len(), html_length = html.len(), "pdf_render_start");
    build_pdf(&lines)
}

/// Visible text of the document, one entry per text block, wrapped.
fn extract_lines(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "head" | "title"))
        });
        if hidden {
            continue;
        }

        for raw in text.lines() {
            let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() {
                lines.extend(wrap(&collapsed, LINE_WIDTH));
            }
        }
    }

    lines
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for word in text.split(' ') {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.push(word.drain(..width).collect());
        }
        let word: String = word.into_iter().collect();

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn build_pdf(lines: &[String]) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for chunk in lines.chunks(LINES_PER_PAGE) {
        let content = Stream::new(dictionary! {}, page_content(chunk).into_bytes());
        let content_id = doc.add_object(content);
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| RenderError::Pdf(e.to_string()))?;
    Ok(buffer)
}

fn page_content(lines: &[String]) -> String {
    let mut content = String::from("BT\n/F1 10 Tf\n50 742 Td\n12 TL\n");
    for line in lines {
        content.push_str(&format!("({}) Tj T*\n", escape_pdf_string(line)));
    }
    content.push_str("ET\n");
    content
}

fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            c if c.is_ascii() && !c.is_control() => c.to_string(),
            _ => "?".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_produces_pdf() {
        let bytes = render_pdf("<html><body><h1>Invoice</h1><p>Total: 10 (EUR)</p></body></html>")
            .unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_hidden_elements_are_skipped() {
        let lines = extract_lines(
            "<html><head><title>T</title><style>p{}</style></head>\
             <body><script>alert(1)</script><p>Visible  text</p></body></html>",
        );
        assert_eq!(lines, vec!["Visible text".to_string()]);
    }

    #[test]
    fn test_empty_markup_is_an_error() {
        assert!(matches!(render_pdf(""), Err(RenderError::Empty)));
        assert!(matches!(
            render_pdf("<html><body>   <br/> </body></html>"),
            Err(RenderError::Empty)
        ));
    }

    #[test]
    fn test_long_documents_paginate() {
        let body: String = (0..130).map(|i| format!("<p>line {i}</p>")).collect();
        let bytes = render_pdf(&format!("<html><body>{body}</body></html>")).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_pdf_string("a(b)\\é"), "a\\(b\\)\\\\?");
    }
}
