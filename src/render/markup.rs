//! Raw markup blocks.
//!
//! Markup is kept exactly as received. Script elements inside it are
//! catalogued as inert: inserting the markup never runs them, a surface has
//! to ask for them through [`Markup::activate`].

use scraper::{Html, Selector};

/// Width used when flattening markup for the terminal.
const TEXT_WIDTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InertScript {
    pub src: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markup {
    /// Markup as received, unmodified.
    pub html: String,
    scripts: Vec<InertScript>,
}

impl Markup {
    pub fn new(html: impl Into<String>) -> Self {
        let html = html.into();
        let scripts = collect_scripts(&html);
        Self { html, scripts }
    }

    /// Number of script elements awaiting explicit activation.
    #[must_use]
    pub fn inert_script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Hand out the script elements for re-activation. Only surfaces that
    /// execute markup behaviour call this.
    pub fn activate(&self) -> &[InertScript] {
        tracing::debug!(scripts = self.scripts.len(), "Activating markup scripts");
        &self.scripts
    }

    /// Plain-text rendition for terminal output.
    #[must_use]
    pub fn to_text(&self) -> String {
        match html2text::from_read(self.html.as_bytes(), TEXT_WIDTH) {
            Ok(text) => text.trim_end().to_string(),
            Err(e) => {
                tracing::debug!("Markup text conversion failed: {e}");
                self.html.clone()
            }
        }
    }
}

fn collect_scripts(html: &str) -> Vec<InertScript> {
    let fragment = Html::parse_fragment(html);
    let script_sel = Selector::parse("script").expect("valid selector");

    fragment
        .select(&script_sel)
        .map(|el| InertScript {
            src: el.value().attr("src").map(str::to_string),
            body: el.text().collect::<String>(),
        })
        .collect()
}
