//! Post-processing for LibreOffice HTML output.
//!
//! The converted page is shown inside an iframe. Slides exported by LibreOffice use absolute
//! positioning, which overlaps once the frame is narrower than the slide, so positioned elements
//! are made to flow. A small script reports the reader's text selection to the embedding page.

use regex::Regex;
use std::sync::LazyLock;

static ABSOLUTE_POSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)position\s*:\s*absolute\s*;").expect("valid regex"));
static HEAD_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").expect("valid regex"));
static HEAD_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</head\s*>").expect("valid regex"));

const HEAD_META: &str = r#"
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<base target="_blank">
"#;

const SLIDE_STYLE: &str = r#"
<style>
  html, body { margin: 0; padding: 0; width: 100%; overflow-x: hidden; background: #f5f5f5; }
  body { padding: 20px; box-sizing: border-box; font-family: Arial, sans-serif; font-size: 16px; line-height: 1.5; }
  .page-break, div[style*="page-break-before"] {
    display: block; position: relative; max-width: 960px; margin: 20px auto;
    background: white; box-shadow: 0 2px 8px rgba(0,0,0,0.1); border-radius: 4px; overflow: hidden;
  }
  p, span { position: relative !important; }
  img { max-width: 100%; height: auto; }
  ::selection { background: #cde4ff; }
  @media (max-width: 640px) { body { padding: 10px; } }
</style>
"#;

fn selection_script(parent_origin: &str) -> String {
    // The origin is embedded in a JS string literal
    let origin = parent_origin.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        r#"
<script>
document.addEventListener('mouseup', function () {{
  var selection = window.getSelection();
  var text = selection ? selection.toString().trim() : '';
  if (text) {{
    window.parent.postMessage({{ type: 'textSelection', text: text }}, '{origin}');
  }}
}});
</script>
"#
    )
}

/// Make converted HTML suitable for embedding.
///
/// `parent_origin` is the origin selection messages are posted to; `*` posts to any embedder.
pub fn clean_html(raw: &str, parent_origin: &str) -> String {
    // Rewrite positioning first so the injected stylesheet is left alone
    let mut html = ABSOLUTE_POSITION.replace_all(raw, "position: relative;").into_owned();

    if !HEAD_OPEN.is_match(&html) {
        html = match html.to_ascii_lowercase().find("<html") {
            Some(start) => match html[start..].find('>') {
                Some(end) => {
                    let insert_at = start + end + 1;
                    format!("{}<head></head>{}", &html[..insert_at], &html[insert_at..])
                }
                None => format!("<head></head>{html}"),
            },
            None => format!("<head></head>{html}"),
        };
    }

    html = HEAD_OPEN
        .replacen(&html, 1, |caps: &regex::Captures| format!("{}{HEAD_META}", &caps[0]))
        .into_owned();

    let trailer = format!("{SLIDE_STYLE}{}", selection_script(parent_origin));
    html = match HEAD_CLOSE.find(&html) {
        Some(close) => format!("{}{trailer}{}", &html[..close.start()], &html[close.start()..]),
        None => format!("{html}{trailer}"),
    };

    if !html.trim_start().to_ascii_lowercase().starts_with("<!doctype") {
        html.insert_str(0, "<!DOCTYPE html>\n");
    }

    html
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<HTML><HEAD><TITLE>Lecture 1</TITLE></HEAD>
<BODY><DIV STYLE="position: absolute; top: 10px">Cell structure</DIV>
<p style="position:absolute;left:4px">Nucleus</p></BODY></HTML>"#;

    #[test]
    fn test_doctype_added_once() {
        let cleaned = clean_html(SAMPLE, "*");
        assert!(cleaned.starts_with("<!DOCTYPE html>\n"));

        let again = clean_html(&cleaned, "*");
        assert_eq!(again.matches("<!DOCTYPE html>").count(), 1);
    }

    #[test]
    fn test_absolute_positioning_removed_from_content() {
        let cleaned = clean_html(SAMPLE, "*");
        assert!(!cleaned.to_ascii_lowercase().contains("position: absolute;"));
        assert!(!cleaned.contains("position:absolute;"));

        let body = &cleaned[cleaned.find("<BODY>").unwrap()..];
        assert_eq!(body.matches("position: relative;").count(), 2);
    }

    #[test]
    fn test_head_content_injected() {
        let cleaned = clean_html(SAMPLE, "https://clarity.example.com");
        let head_end = cleaned.find("</HEAD>").unwrap();
        let head = &cleaned[..head_end];

        assert!(head.contains(r#"<meta name="viewport""#));
        assert!(head.contains("<style>"));
        assert!(head.contains("type: 'textSelection'"));
        assert!(head.contains("'https://clarity.example.com'"));
        assert!(head.contains("<TITLE>Lecture 1</TITLE>"));
    }

    #[test]
    fn test_missing_head_is_created() {
        let cleaned = clean_html("<html><body><p>Slide</p></body></html>", "*");
        assert!(cleaned.contains("<html><head>"));
        assert!(cleaned.contains("</head><body>"));
        assert!(cleaned.contains("<meta charset=\"UTF-8\">"));
    }

    #[test]
    fn test_origin_is_escaped() {
        let cleaned = clean_html("<p>x</p>", "https://evil.example');alert('1");
        assert!(cleaned.contains(r"https://evil.example\');alert(\'1"));
    }
}
