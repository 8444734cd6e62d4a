#![forbid(unsafe_code)]
//! md2man converts Markdown/CommonMark into roff manpages.
//!
//! The markdown is parsed into an [`ast::Ast`] and then streamed through a
//! [`RoffRenderer`] in a single depth-first walk.
//!
//! # Example
//!
//! ```no_run
//! let markdown = "# mytool 1\n\n## SYNOPSIS\n\nExample.";
//! let roff = md2man::convert_markdown_to_roff(markdown)?;
//! assert!(roff.starts_with(".nh\n.TH mytool 1"));
//! # Ok::<(), md2man::Md2manError>(())
//! ```

pub mod ast;
pub mod parse;
pub mod roff;

use pulldown_cmark::Options;
use std::io::{self, Write};
use std::string::FromUtf8Error;
use thiserror::Error;

pub use ast::{Ast, ListKind, NodeId, NodeKind, Visitor, WalkStatus};
pub use parse::parse_markdown;
pub use roff::{ColumnCounter, RoffRenderer, count_columns, escape_special_chars};

#[derive(Debug, Error)]
pub enum Md2manError {
    #[error("failed to write roff output: {0}")]
    Io(#[from] io::Error),
    #[error("markdown parse error: {0}")]
    Markdown(String),
    #[error("rendered roff is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Md2manError>;

/// Markdown syntax extensions the renderer expects its parser to enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extensions {
    /// Emphasis closed directly before a letter or digit stays literal text.
    pub no_intra_emphasis: bool,
    pub tables: bool,
    /// Advisory: fenced code is CommonMark and pulldown-cmark always parses it.
    pub fenced_code: bool,
    /// Advisory: CommonMark already requires a space after the `#` run.
    pub space_headings: bool,
    pub footnotes: bool,
    /// Leading `% ` lines become the level-1 title heading; YAML front matter
    /// is consumed and dropped.
    pub titleblock: bool,
    pub definition_lists: bool,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            no_intra_emphasis: true,
            tables: true,
            fenced_code: true,
            space_headings: true,
            footnotes: true,
            titleblock: true,
            definition_lists: true,
        }
    }
}

impl Extensions {
    /// pulldown-cmark options for these extensions.
    ///
    /// Title blocks and intra-word emphasis are handled while folding events
    /// in [`parse_markdown`], not by a parser option.
    pub fn parser_options(&self) -> Options {
        let mut options = Options::empty();
        if self.tables {
            options |= Options::ENABLE_TABLES;
        }
        if self.footnotes {
            options |= Options::ENABLE_FOOTNOTES;
        }
        if self.titleblock {
            options |= Options::ENABLE_YAML_STYLE_METADATA_BLOCKS;
        }
        if self.definition_lists {
            options |= Options::ENABLE_DEFINITION_LIST;
        }
        options
    }
}

/// Parses `markdown` and streams the roff rendering into `w`.
pub fn render_to_writer<W: Write>(markdown: &str, w: &mut W) -> Result<()> {
    let mut renderer = RoffRenderer::new();
    let ast = parse_markdown(markdown, renderer.extensions())?;
    renderer.render(&ast, w)?;
    Ok(())
}

pub fn convert_markdown_to_roff(markdown: &str) -> Result<String> {
    let mut buf = Vec::new();
    render_to_writer(markdown, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
