//! Rendering of a document into a standalone report.

use std::fmt::Write;

use pulldown_cmark::{Options, Parser, html};
use serde_json::Value;

use crate::document::{Cell, Document, MimeBundle, Output};
use crate::error::{Error, Result};

/// Turns the current state of a document into a textual artifact.
pub trait Renderer: Send + Sync {
    fn render(&self, document: &Document) -> Result<String>;

    /// File extension of the artifact, without the dot.
    fn extension(&self) -> &'static str;
}

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; max-width: 960px; margin: 2em auto; color: #222; }
.cell { margin: 1em 0; }
.input { display: flex; }
.prompt { flex: 0 0 6em; color: #303f9f; font-family: monospace; text-align: right; padding-right: 0.5em; }
.prompt.out { color: #d84315; }
pre { margin: 0; padding: 0.5em; overflow-x: auto; white-space: pre-wrap; }
.source pre { background: #f7f7f7; border: 1px solid #e0e0e0; border-radius: 2px; }
.output { display: flex; }
.output .body { flex: 1; min-width: 0; }
.stderr pre { background: #fdd; }
.error pre { background: #fdd; color: #a00; }
.markdown { padding: 0 0.5em 0 6.5em; }
"#;

/// Renders a document as one self-contained HTML page.
#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    title: String,
}

impl HtmlRenderer {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    fn render_cell(&self, out: &mut String, cell: &Cell) -> std::fmt::Result {
        match cell {
            Cell::Code(code) => {
                let prompt = code
                    .execution_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| " ".to_string());
                writeln!(out, r#"<div class="cell code">"#)?;
                writeln!(
                    out,
                    r#"<div class="input"><div class="prompt">In&nbsp;[{}]:</div><div class="source"><pre>{}</pre></div></div>"#,
                    prompt,
                    escape(&code.source)
                )?;
                for output in &code.outputs {
                    render_output(out, output)?;
                }
                writeln!(out, "</div>")
            }
            Cell::Markdown(text) => {
                let mut body = String::new();
                let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
                html::push_html(&mut body, Parser::new_ext(&text.source, options));
                writeln!(out, r#"<div class="cell markdown">{body}</div>"#)
            }
            Cell::Raw(text) => {
                writeln!(
                    out,
                    r#"<div class="cell raw"><pre>{}</pre></div>"#,
                    escape(&text.source)
                )
            }
        }
    }
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new("Notebook")
    }
}

impl Renderer for HtmlRenderer {
    fn render(&self, document: &Document) -> Result<String> {
        let mut out = String::new();
        self.write_page(&mut out, document)
            .map_err(|e| Error::Render(e.to_string()))?;
        Ok(out)
    }

    fn extension(&self) -> &'static str {
        "html"
    }
}

impl HtmlRenderer {
    fn write_page(&self, out: &mut String, document: &Document) -> std::fmt::Result {
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html>\n<head>")?;
        writeln!(out, r#"<meta charset="utf-8">"#)?;
        writeln!(out, "<title>{}</title>", escape(&self.title))?;
        writeln!(out, "<style>{STYLE}</style>")?;
        writeln!(out, "</head>\n<body>")?;
        for cell in &document.cells {
            self.render_cell(out, cell)?;
        }
        writeln!(out, "</body>\n</html>")
    }
}

fn render_output(out: &mut String, output: &Output) -> std::fmt::Result {
    match output {
        Output::Stream { name, text } => {
            let class = if name == "stderr" { "stderr" } else { "stream" };
            write_output(out, "", class, &format!("<pre>{}</pre>", escape(&strip_ansi(text))))
        }
        Output::ExecuteResult {
            execution_count,
            data,
            ..
        } => {
            let prompt = execution_count
                .map(|n| format!("Out[{n}]:"))
                .unwrap_or_default();
            write_output(out, &prompt, "result", &render_bundle(data))
        }
        Output::DisplayData { data, .. } => write_output(out, "", "display", &render_bundle(data)),
        Output::Error {
            ename,
            evalue,
            traceback,
        } => {
            let body = if traceback.is_empty() {
                format!("{ename}: {evalue}")
            } else {
                traceback
                    .iter()
                    .map(|line| line.trim_end_matches('\n'))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            write_output(
                out,
                "",
                "error",
                &format!("<pre>{}</pre>", escape(&strip_ansi(&body))),
            )
        }
    }
}

fn write_output(out: &mut String, prompt: &str, class: &str, body: &str) -> std::fmt::Result {
    writeln!(
        out,
        r#"<div class="output {class}"><div class="prompt out">{prompt}</div><div class="body">{body}</div></div>"#
    )
}

/// Richest displayable entry of a MIME bundle.
fn render_bundle(data: &MimeBundle) -> String {
    if let Some(html) = data.get("text/html").and_then(mime_text) {
        return html;
    }
    if let Some(svg) = data.get("image/svg+xml").and_then(mime_text) {
        return svg;
    }
    for mime in ["image/png", "image/jpeg"] {
        if let Some(encoded) = data.get(mime).and_then(mime_text) {
            let encoded: String = encoded.split_whitespace().collect();
            return format!(r#"<img src="data:{mime};base64,{encoded}">"#);
        }
    }
    data.get("text/plain")
        .and_then(mime_text)
        .map(|text| format!("<pre>{}</pre>", escape(&strip_ansi(&text))))
        .unwrap_or_default()
}

/// MIME payloads are a string or a list of lines.
fn mime_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(lines) => Some(lines.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

/// Escape text for HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Remove ANSI escape sequences (colours in tracebacks).
fn strip_ansi(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            stripped.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            // Parameters and intermediates, up to the final byte.
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        }
    }
    stripped
}
