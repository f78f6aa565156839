//! Markdown transform using pulldown-cmark.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};

/// Indent applied to code block lines in terminal output.
const CODE_INDENT: &str = "    ";

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Render markdown to HTML for surfaces that can display markup.
pub fn markdown_to_html(content: &str) -> String {
    let mut out = String::with_capacity(content.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(content, options()));
    out
}

/// Render markdown to plain terminal text.
/// Supports: headers, paragraphs, lists, block quotes, code, links, tables.
#[allow(clippy::too_many_lines)]
pub fn markdown_to_text(content: &str) -> String {
    let mut out = Lines::default();
    let mut list_depth: usize = 0;
    let mut ordered_counters: Vec<Option<u64>> = Vec::new();
    let mut quote_depth: usize = 0;
    let mut in_code_block = false;
    let mut code_buffer = String::new();
    let mut code_lang: Option<String> = None;
    let mut link_targets: Vec<String> = Vec::new();

    for event in Parser::new_ext(content, options()) {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { level, .. } => {
                    out.flush();
                    let prefix = match level {
                        HeadingLevel::H1 => "# ",
                        HeadingLevel::H2 => "## ",
                        HeadingLevel::H3 => "### ",
                        _ => "#### ",
                    };
                    out.start_prefixed(prefix.to_string());
                }
                Tag::Paragraph => {
                    if !out.prefix_only {
                        out.flush();
                        if quote_depth > 0 {
                            out.start_prefixed("> ".repeat(quote_depth));
                        }
                    }
                }
                Tag::BlockQuote(_) => {
                    out.flush();
                    quote_depth += 1;
                }
                Tag::List(start) => {
                    out.flush();
                    list_depth += 1;
                    ordered_counters.push(start);
                }
                Tag::Item => {
                    out.flush();
                    let indent = "  ".repeat(list_depth.saturating_sub(1));
                    let prefix = match ordered_counters.last_mut() {
                        Some(Some(n)) => {
                            let num = *n;
                            *n += 1;
                            format!("{indent}{num}. ")
                        }
                        _ => format!("{indent}- "),
                    };
                    out.start_prefixed(prefix);
                }
                Tag::CodeBlock(kind) => {
                    out.flush();
                    in_code_block = true;
                    code_buffer.clear();
                    code_lang = match kind {
                        CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                        _ => None,
                    };
                }
                Tag::Link { dest_url, .. } => link_targets.push(dest_url.to_string()),
                Tag::TableRow | Tag::TableHead => out.flush(),
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Heading(_) => {
                    out.flush();
                    out.blank();
                }
                TagEnd::Paragraph => {
                    out.flush();
                    if list_depth == 0 {
                        out.blank();
                    }
                }
                TagEnd::BlockQuote(_) => {
                    out.flush();
                    quote_depth = quote_depth.saturating_sub(1);
                    out.blank();
                }
                TagEnd::List(_) => {
                    out.flush();
                    list_depth = list_depth.saturating_sub(1);
                    ordered_counters.pop();
                    if list_depth == 0 {
                        out.blank();
                    }
                }
                TagEnd::Item => out.flush(),
                TagEnd::CodeBlock => {
                    in_code_block = false;
                    if let Some(lang) = code_lang.take() {
                        out.push(format!("{CODE_INDENT}[{lang}]"));
                    }
                    for line in code_buffer.lines() {
                        out.push(format!("{CODE_INDENT}{line}"));
                    }
                    out.blank();
                }
                TagEnd::Link => {
                    if let Some(url) = link_targets.pop()
                        && !url.is_empty()
                    {
                        out.current.push_str(&format!(" ({url})"));
                    }
                }
                TagEnd::TableCell => out.current.push_str(" | "),
                TagEnd::TableHead | TagEnd::TableRow => {
                    let row = out.current.trim_end_matches([' ', '|']).to_string();
                    out.current = row;
                    out.flush();
                }
                TagEnd::Table => out.blank(),
                _ => {}
            },
            Event::Text(text) => {
                if in_code_block {
                    code_buffer.push_str(&text);
                } else {
                    out.text(&text);
                }
            }
            Event::Code(code) => out.text(&format!("`{code}`")),
            Event::Html(raw) | Event::InlineHtml(raw) => out.text(raw.trim_end()),
            Event::SoftBreak => out.text(" "),
            Event::HardBreak => out.flush(),
            Event::Rule => {
                out.flush();
                out.push("───".to_string());
                out.blank();
            }
            Event::TaskListMarker(done) => out.text(if done { "[x] " } else { "[ ] " }),
            _ => {}
        }
    }

    out.finish()
}

/// Line accumulator for the text renderer.
#[derive(Default)]
struct Lines {
    lines: Vec<String>,
    current: String,
    /// `current` holds only a list/quote/heading prefix so far.
    prefix_only: bool,
}

impl Lines {
    fn start_prefixed(&mut self, prefix: String) {
        self.current = prefix;
        self.prefix_only = true;
    }

    fn text(&mut self, text: &str) {
        self.current.push_str(text);
        self.prefix_only = false;
    }

    fn flush(&mut self) {
        if !self.prefix_only && !self.current.trim().is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
        }
        self.current.clear();
        self.prefix_only = false;
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    fn blank(&mut self) {
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    fn finish(mut self) -> String {
        self.flush();
        while self.lines.last().is_some_and(String::is_empty) {
            self.lines.pop();
        }
        self.lines.join("\n")
    }
}
