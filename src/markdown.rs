use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\r?\n?(.*?)```").unwrap());
static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^()\s]+)\)").unwrap());
static LIST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[*-] +(.+)$").unwrap());
static BLOCK_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new("^\u{1}B\\d+\u{1}$").unwrap());

/// Renders a small markdown subset to an HTML fragment. Pure text
/// transformation: no state, no I/O. Input is HTML-escaped first; code
/// spans and fenced blocks are protected from the other substitutions.
///
/// Examples:
/// - `**bold**` → `<strong>bold</strong>`
/// - `*emphasis*` → `<em>emphasis</em>`
/// - `` `x + 1` `` → `<code>x + 1</code>`
/// - ` ```rust\nfn f() {}\n``` ` → `<pre><code class="language-rust">fn f() {}</code></pre>`
/// - `[site](https://example.com)` → `<a href="https://example.com">site</a>`
/// - `- item` → `<li>item</li>`
/// - a blank line starts a new `<p>`; a single newline becomes `<br>`
pub fn render_markdown(input: &str) -> String {
    let escaped = escape_html(input);

    // Lift code out of the text behind placeholder tokens so the inline
    // substitutions cannot touch it
    let mut fenced_blocks: Vec<String> = Vec::new();
    let text = FENCED_RE
        .replace_all(&escaped, |caps: &Captures| {
            let lang = caps.get(1).map_or("", |m| m.as_str());
            let code = caps.get(2).map_or("", |m| m.as_str()).trim_end_matches('\n');
            let rendered = if lang.is_empty() {
                format!("<pre><code>{}</code></pre>", code)
            } else {
                format!("<pre><code class=\"language-{}\">{}</code></pre>", lang, code)
            };
            fenced_blocks.push(rendered);
            format!("\u{1}B{}\u{1}", fenced_blocks.len() - 1)
        })
        .into_owned();

    let mut code_spans: Vec<String> = Vec::new();
    let text = INLINE_CODE_RE
        .replace_all(&text, |caps: &Captures| {
            code_spans.push(format!("<code>{}</code>", &caps[1]));
            format!("\u{1}S{}\u{1}", code_spans.len() - 1)
        })
        .into_owned();

    let text = BOLD_RE.replace_all(&text, "<strong>$1</strong>");
    let text = ITALIC_RE.replace_all(&text, "<em>$1</em>");
    let text = LINK_RE.replace_all(&text, "<a href=\"$2\">$1</a>");
    let text = LIST_RE.replace_all(&text, "<li>$1</li>").into_owned();
    let text = text.replace("</li>\n<li>", "</li><li>");

    // Blank lines separate paragraphs; remaining single newlines render as
    // line breaks. A chunk that is exactly a fenced block stays unwrapped.
    let mut out = String::new();
    for chunk in text.split("\n\n") {
        let chunk = chunk.trim_matches('\n');
        if chunk.is_empty() {
            continue;
        }
        if BLOCK_TOKEN_RE.is_match(chunk) {
            out.push_str(chunk);
        } else {
            out.push_str("<p>");
            out.push_str(&chunk.replace('\n', "<br>"));
            out.push_str("</p>");
        }
    }

    // Put the protected code back
    for (i, span) in code_spans.iter().enumerate() {
        out = out.replace(&format!("\u{1}S{}\u{1}", i), span);
    }
    for (i, block) in fenced_blocks.iter().enumerate() {
        out = out.replace(&format!("\u{1}B{}\u{1}", i), block);
    }
    out
}

fn escape_html(input: &str) -> String {
    // The placeholder byte is stripped so user text cannot collide with a
    // protected span token
    input
        .replace('\u{1}', "")
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
