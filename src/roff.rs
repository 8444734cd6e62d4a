//! Streaming AST-to-roff transducer.

use crate::Extensions;
use crate::ast::{Ast, ListKind, NodeId, NodeKind, Visitor, WalkStatus};
use std::convert::Infallible;
use std::io::{self, Write};

const TITLE_HEADER: &str = ".TH ";
const TOP_LEVEL_HEADER: &str = "\n\n.SH ";
const SECOND_LEVEL_HEADER: &str = "\n.SH ";
const OTHER_HEADER: &str = "\n.SS ";
const CR_TAG: &str = "\n";
const EMPH_TAG: &str = "\\fI";
const EMPH_CLOSE_TAG: &str = "\\fP";
const STRONG_TAG: &str = "\\fB";
const STRONG_CLOSE_TAG: &str = "\\fP";
const BREAK_TAG: &str = "\n.br\n";
const PARA_TAG: &str = "\n.PP\n";
const HRULE_TAG: &str = "\n.ti 0\n\\l'\\n(.lu'\n";
const LINK_TAG: &str = "\n\\[la]";
const LINK_CLOSE_TAG: &str = "\\[ra]";
const CODESPAN_TAG: &str = "\\fB\\fC";
const CODESPAN_CLOSE_TAG: &str = "\\fR";
const CODE_TAG: &str = "\n.PP\n.RS\n\n.nf\n";
const CODE_CLOSE_TAG: &str = "\n.fi\n.RE\n";
const QUOTE_TAG: &str = "\n.PP\n.RS\n";
const QUOTE_CLOSE_TAG: &str = "\n.RE\n";
const LIST_TAG: &str = "\n.RS\n";
const LIST_CLOSE_TAG: &str = "\n.RE\n";
const BULLET_TAG: &str = ".IP \\(bu 2\n";
const ARGLIST_TAG: &str = "\n.TP\n";
const TABLE_START: &str = "\n.TS\nallbox;\n";
const TABLE_END: &str = "\n.TE\n";
const TABLE_CELL_START: &str = "\nT{\n";
const TABLE_CELL_END: &str = "\nT}\n";

/// Cell text longer than this is wrapped in a `T{ ... T}` block.
const TABLE_CELL_INLINE_MAX: usize = 30;

/// Role of the next item in a definition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DefinitionRole {
    #[default]
    ExpectTerm,
    ExpectDefinition,
}

/// Render state for one document. Create a fresh renderer per render.
#[derive(Debug, Default)]
pub struct RoffRenderer {
    extensions: Extensions,
    list_counters: Vec<usize>,
    first_heading_seen: bool,
    definition_role: DefinitionRole,
    list_depth: usize,
}

impl RoffRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser extensions this renderer relies on.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn inside_list(&self) -> bool {
        self.list_depth > 0
    }

    /// Renders the whole tree: header, every node, footer.
    pub fn render<W: Write>(&mut self, ast: &Ast, w: &mut W) -> io::Result<()> {
        self.render_header(w)?;
        let mut visitor = RenderVisitor {
            renderer: &mut *self,
            w: &mut *w,
        };
        ast.walk(ast.root(), &mut visitor)?;
        self.render_footer(w)
    }

    pub fn render_header<W: Write>(&mut self, w: &mut W) -> io::Result<()> {
        // disable hyphenation
        w.write_all(b".nh\n")
    }

    pub fn render_footer<W: Write>(&mut self, _w: &mut W) -> io::Result<()> {
        Ok(())
    }

    pub fn render_node<W: Write>(
        &mut self,
        w: &mut W,
        ast: &Ast,
        id: NodeId,
        entering: bool,
    ) -> io::Result<WalkStatus> {
        match ast.kind(id) {
            NodeKind::Text(literal) => {
                let in_cell = ast
                    .parent(id)
                    .is_some_and(|parent| matches!(ast.kind(parent), NodeKind::TableCell { .. }));
                let wrap = in_cell && literal.len() > TABLE_CELL_INLINE_MAX;
                if wrap {
                    out(w, TABLE_CELL_START)?;
                }
                escape_special_chars(w, literal.as_bytes())?;
                if wrap {
                    out(w, TABLE_CELL_END)?;
                }
            }
            NodeKind::SoftBreak => out(w, CR_TAG)?,
            NodeKind::HardBreak => out(w, BREAK_TAG)?,
            NodeKind::Emphasis => out(w, if entering { EMPH_TAG } else { EMPH_CLOSE_TAG })?,
            NodeKind::Strong => {
                out(w, if entering { STRONG_TAG } else { STRONG_CLOSE_TAG })?;
            }
            NodeKind::Link { destination } => {
                if entering {
                    out(w, LINK_TAG)?;
                    out(w, destination)?;
                } else {
                    out(w, LINK_CLOSE_TAG)?;
                }
            }
            NodeKind::Image { .. } => return Ok(WalkStatus::SkipChildren),
            NodeKind::Code(literal) => {
                out(w, CODESPAN_TAG)?;
                escape_special_chars(w, literal.as_bytes())?;
                out(w, CODESPAN_CLOSE_TAG)?;
            }
            NodeKind::Document => {}
            NodeKind::Paragraph => {
                // .PP would break the list layout
                if !self.inside_list() {
                    out(w, if entering { PARA_TAG } else { CR_TAG })?;
                }
            }
            NodeKind::BlockQuote => {
                out(w, if entering { QUOTE_TAG } else { QUOTE_CLOSE_TAG })?;
            }
            NodeKind::Heading { level } => {
                if entering {
                    self.render_heading(w, *level)?;
                }
            }
            NodeKind::HorizontalRule => out(w, HRULE_TAG)?,
            NodeKind::List { kind } => self.render_list(w, *kind, entering)?,
            NodeKind::Item { kind } => self.render_item(w, *kind, entering)?,
            NodeKind::CodeBlock(literal) => {
                out(w, CODE_TAG)?;
                escape_special_chars(w, literal.as_bytes())?;
                out(w, CODE_CLOSE_TAG)?;
            }
            NodeKind::Table => {
                if entering {
                    let columns = count_columns(ast, id);
                    log::debug!("table has {columns} columns");
                    out(w, TABLE_START)?;
                    let format = "l ".repeat(columns);
                    out(w, &format)?;
                    out(w, "\n")?;
                    out(w, &format)?;
                    out(w, ".\n")?;
                } else {
                    out(w, TABLE_END)?;
                }
            }
            NodeKind::TableCell { header } => {
                if entering {
                    if ast.prev(id).is_some() {
                        out(w, "\t")?;
                    }
                    if *header {
                        out(w, CODESPAN_TAG)?;
                    }
                } else if *header {
                    out(w, CODESPAN_CLOSE_TAG)?;
                }
            }
            NodeKind::TableHead | NodeKind::TableBody => {}
            NodeKind::TableRow => {
                if !entering {
                    out(w, "\n")?;
                }
            }
            other @ (NodeKind::Strikethrough
            | NodeKind::Html(_)
            | NodeKind::FootnoteDefinition { .. }
            | NodeKind::FootnoteReference { .. }
            | NodeKind::TaskListMarker { .. }) => {
                if entering {
                    log::warn!("md2man does not handle node type {other}");
                }
            }
        }
        Ok(WalkStatus::GoToNext)
    }

    fn render_heading<W: Write>(&mut self, w: &mut W, level: u8) -> io::Result<()> {
        match level {
            1 if !self.first_heading_seen => {
                self.first_heading_seen = true;
                out(w, TITLE_HEADER)
            }
            1 => out(w, TOP_LEVEL_HEADER),
            2 => out(w, SECOND_LEVEL_HEADER),
            _ => out(w, OTHER_HEADER),
        }
    }

    fn render_list<W: Write>(&mut self, w: &mut W, kind: ListKind, entering: bool) -> io::Result<()> {
        // definition lists are laid out per item
        let (open_tag, close_tag) = match kind {
            ListKind::Definition => ("", ""),
            ListKind::Ordered | ListKind::Unordered => (LIST_TAG, LIST_CLOSE_TAG),
        };
        if entering {
            self.list_depth += 1;
            if kind == ListKind::Ordered {
                self.list_counters.push(1);
            }
            out(w, open_tag)
        } else {
            match kind {
                ListKind::Ordered => {
                    self.list_counters.pop();
                }
                ListKind::Definition => self.definition_role = DefinitionRole::ExpectTerm,
                ListKind::Unordered => {}
            }
            out(w, close_tag)?;
            self.list_depth = self.list_depth.saturating_sub(1);
            Ok(())
        }
    }

    fn render_item<W: Write>(&mut self, w: &mut W, kind: ListKind, entering: bool) -> io::Result<()> {
        if !entering {
            return out(w, "\n");
        }
        match kind {
            ListKind::Ordered => {
                let Some(counter) = self.list_counters.last_mut() else {
                    return Ok(());
                };
                let marker = format!(".IP \"{:>3}.\" 5\n", *counter);
                *counter += 1;
                out(w, &marker)
            }
            ListKind::Unordered => out(w, BULLET_TAG),
            // the parser does not tell terms from definitions; infer it from order
            ListKind::Definition => match self.definition_role {
                DefinitionRole::ExpectTerm => {
                    self.definition_role = DefinitionRole::ExpectDefinition;
                    out(w, ARGLIST_TAG)
                }
                DefinitionRole::ExpectDefinition => {
                    self.definition_role = DefinitionRole::ExpectTerm;
                    Ok(())
                }
            },
        }
    }
}

struct RenderVisitor<'a, W> {
    renderer: &'a mut RoffRenderer,
    w: &'a mut W,
}

impl<W: Write> Visitor for RenderVisitor<'_, W> {
    type Error = io::Error;

    fn visit(&mut self, ast: &Ast, id: NodeId, entering: bool) -> io::Result<WalkStatus> {
        self.renderer.render_node(&mut *self.w, ast, id, entering)
    }
}

/// Counts the cells of a table's first row without producing output.
#[derive(Debug, Default)]
pub struct ColumnCounter {
    columns: usize,
    rows: usize,
}

impl ColumnCounter {
    pub fn columns(&self) -> usize {
        self.columns
    }
}

impl Visitor for ColumnCounter {
    type Error = Infallible;

    fn visit(&mut self, ast: &Ast, id: NodeId, entering: bool) -> Result<WalkStatus, Infallible> {
        Ok(match ast.kind(id) {
            NodeKind::TableRow if !entering => WalkStatus::Terminate,
            NodeKind::TableRow if self.rows > 0 => WalkStatus::Terminate,
            NodeKind::TableRow => {
                self.rows += 1;
                WalkStatus::GoToNext
            }
            NodeKind::TableCell { .. } => {
                self.columns += 1;
                WalkStatus::SkipChildren
            }
            _ => WalkStatus::GoToNext,
        })
    }
}

/// Roff needs the column count before any table data, so count the cells of
/// the first row up front.
pub fn count_columns(ast: &Ast, table: NodeId) -> usize {
    let mut counter = ColumnCounter::default();
    match ast.walk(table, &mut counter) {
        Ok(()) => counter.columns(),
        Err(never) => match never {},
    }
}

fn out<W: Write>(w: &mut W, output: &str) -> io::Result<()> {
    w.write_all(output.as_bytes())
}

fn needs_backslash(c: u8) -> bool {
    matches!(c, b'-' | b'_' | b'&' | b'\\' | b'~')
}

/// Writes `text` with roff's special characters escaped.
///
/// A leading `'` or `.` would start a control line, so it gets a zero-width
/// `\&` in front.
pub fn escape_special_chars<W: Write>(w: &mut W, text: &[u8]) -> io::Result<()> {
    if matches!(text.first(), Some(b'\'' | b'.')) {
        w.write_all(b"\\&")?;
    }
    let mut rest = text;
    while !rest.is_empty() {
        let run = rest
            .iter()
            .position(|&c| needs_backslash(c))
            .unwrap_or(rest.len());
        w.write_all(&rest[..run])?;
        let Some(&special) = rest.get(run) else {
            break;
        };
        w.write_all(&[b'\\', special])?;
        rest = &rest[run + 1..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn escape(text: &str) -> String {
        let mut buf = Vec::new();
        escape_special_chars(&mut buf, text.as_bytes()).expect("escape");
        String::from_utf8(buf).expect("utf8")
    }

    fn render(ast: &Ast) -> String {
        let mut buf = Vec::new();
        RoffRenderer::new().render(ast, &mut buf).expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    fn text(ast: &mut Ast, parent: NodeId, literal: &str) -> NodeId {
        ast.append(parent, NodeKind::Text(literal.to_string()))
    }

    fn table(rows: &[usize]) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let table = ast.append(NodeId::ROOT, NodeKind::Table);
        let head = ast.append(table, NodeKind::TableHead);
        let body = ast.append(table, NodeKind::TableBody);
        for (index, cells) in rows.iter().enumerate() {
            let section = if index == 0 { head } else { body };
            let row = ast.append(section, NodeKind::TableRow);
            for cell in 0..*cells {
                let cell_id = ast.append(row, NodeKind::TableCell { header: index == 0 });
                text(&mut ast, cell_id, &format!("c{cell}"));
            }
        }
        (ast, table)
    }

    #[test]
    fn escaping_is_identity_without_special_chars() {
        assert_eq!(escape("plain text, with: punctuation!"), "plain text, with: punctuation!");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn escaping_backslashes_each_special_char_once() {
        assert_eq!(escape("a-b_c&d\\e~f"), "a\\-b\\_c\\&d\\\\e\\~f");
        assert_eq!(escape("--"), "\\-\\-");
        assert_eq!(escape("~"), "\\~");
    }

    #[test]
    fn escaping_guards_leading_period_and_apostrophe_once() {
        assert_eq!(escape(".TH x"), "\\&.TH x");
        assert_eq!(escape("'tis-a-test"), "\\&'tis\\-a\\-test");
        assert_eq!(escape("a.b'c"), "a.b'c");
    }

    #[test]
    fn escaping_passes_multibyte_text_through() {
        assert_eq!(escape("naïve—café-au-lait"), "naïve—café\\-au\\-lait");
    }

    #[test]
    fn output_starts_with_no_hyphenation_header() {
        assert_eq!(render(&Ast::new()), ".nh\n");
    }

    #[test]
    fn first_level_one_heading_is_the_title() {
        let mut ast = Ast::new();
        for title in ["Title", "Second", "Third"] {
            let heading = ast.append(NodeId::ROOT, NodeKind::Heading { level: 1 });
            text(&mut ast, heading, title);
        }
        let heading = ast.append(NodeId::ROOT, NodeKind::Heading { level: 2 });
        text(&mut ast, heading, "Sub");
        let heading = ast.append(NodeId::ROOT, NodeKind::Heading { level: 5 });
        text(&mut ast, heading, "Deep");

        assert_eq!(
            render(&ast),
            ".nh\n.TH Title\n\n.SH Second\n\n.SH Third\n.SH Sub\n.SS Deep"
        );
    }

    #[test]
    fn nested_ordered_lists_count_independently() {
        let mut ast = Ast::new();
        let outer = ast.append(NodeId::ROOT, NodeKind::List {
            kind: ListKind::Ordered,
        });
        let first = ast.append(outer, NodeKind::Item {
            kind: ListKind::Ordered,
        });
        text(&mut ast, first, "a");
        let inner = ast.append(first, NodeKind::List {
            kind: ListKind::Ordered,
        });
        for literal in ["x", "y"] {
            let item = ast.append(inner, NodeKind::Item {
                kind: ListKind::Ordered,
            });
            text(&mut ast, item, literal);
        }
        let second = ast.append(outer, NodeKind::Item {
            kind: ListKind::Ordered,
        });
        text(&mut ast, second, "b");

        let roff = render(&ast);
        let markers = roff
            .lines()
            .filter(|line| line.starts_with(".IP"))
            .collect::<Vec<_>>();
        assert_eq!(
            markers,
            [
                ".IP \"  1.\" 5",
                ".IP \"  1.\" 5",
                ".IP \"  2.\" 5",
                ".IP \"  2.\" 5"
            ]
        );
        assert!(roff.contains("\"  2.\" 5\ny\n"));
        assert!(roff.ends_with("b\n\n.RE\n"));
    }

    #[test]
    fn unordered_items_get_bullets() {
        let mut ast = Ast::new();
        let list = ast.append(NodeId::ROOT, NodeKind::List {
            kind: ListKind::Unordered,
        });
        let item = ast.append(list, NodeKind::Item {
            kind: ListKind::Unordered,
        });
        text(&mut ast, item, "one");
        assert_eq!(render(&ast), ".nh\n\n.RS\n.IP \\(bu 2\none\n\n.RE\n");
    }

    fn definition_list(ast: &mut Ast, entries: &[&str]) {
        let list = ast.append(NodeId::ROOT, NodeKind::List {
            kind: ListKind::Definition,
        });
        for entry in entries {
            let item = ast.append(list, NodeKind::Item {
                kind: ListKind::Definition,
            });
            text(ast, item, entry);
        }
    }

    #[test]
    fn definition_terms_get_tagged_paragraph_marker() {
        let mut ast = Ast::new();
        definition_list(&mut ast, &["term1", "def1", "term2", "def2"]);
        assert_eq!(
            render(&ast),
            ".nh\n\n.TP\nterm1\ndef1\n\n.TP\nterm2\ndef2\n"
        );
    }

    #[test]
    fn definition_role_resets_between_lists() {
        let mut ast = Ast::new();
        definition_list(&mut ast, &["term1", "def1", "dangling"]);
        definition_list(&mut ast, &["term2", "def2"]);
        let roff = render(&ast);
        assert_eq!(roff.matches(".TP").count(), 3);
        assert!(roff.contains(".TP\nterm2\ndef2\n"));
    }

    #[test]
    fn paragraphs_inside_lists_have_no_break_marker() {
        let mut ast = Ast::new();
        let para = ast.append(NodeId::ROOT, NodeKind::Paragraph);
        text(&mut ast, para, "outside");
        let list = ast.append(NodeId::ROOT, NodeKind::List {
            kind: ListKind::Unordered,
        });
        let item = ast.append(list, NodeKind::Item {
            kind: ListKind::Unordered,
        });
        let para = ast.append(item, NodeKind::Paragraph);
        text(&mut ast, para, "inside");

        let roff = render(&ast);
        assert_eq!(roff.matches(".PP").count(), 1);
        assert!(roff.starts_with(".nh\n\n.PP\noutside\n"));
        assert!(roff.contains(".IP \\(bu 2\ninside\n"));
    }

    #[test]
    fn closing_nested_list_keeps_outer_list_state() {
        let mut ast = Ast::new();
        let outer = ast.append(NodeId::ROOT, NodeKind::List {
            kind: ListKind::Unordered,
        });
        let first = ast.append(outer, NodeKind::Item {
            kind: ListKind::Unordered,
        });
        let inner = ast.append(first, NodeKind::List {
            kind: ListKind::Unordered,
        });
        let inner_item = ast.append(inner, NodeKind::Item {
            kind: ListKind::Unordered,
        });
        text(&mut ast, inner_item, "nested");
        let second = ast.append(outer, NodeKind::Item {
            kind: ListKind::Unordered,
        });
        let para = ast.append(second, NodeKind::Paragraph);
        text(&mut ast, para, "after");

        assert!(!render(&ast).contains(".PP"));
    }

    #[test]
    fn image_is_skipped_with_its_children() {
        let mut ast = Ast::new();
        let para = ast.append(NodeId::ROOT, NodeKind::Paragraph);
        let image = ast.append(para, NodeKind::Image {
            destination: "pic.png".to_string(),
        });
        text(&mut ast, image, "alt text");
        assert_eq!(render(&ast), ".nh\n\n.PP\n\n");
    }

    #[test]
    fn inline_markup_wraps_children() {
        let mut ast = Ast::new();
        let para = ast.append(NodeId::ROOT, NodeKind::Paragraph);
        let emph = ast.append(para, NodeKind::Emphasis);
        text(&mut ast, emph, "em");
        let link = ast.append(para, NodeKind::Link {
            destination: "https://example.com/a-b".to_string(),
        });
        text(&mut ast, link, "site");
        ast.append(para, NodeKind::Code("x-y".to_string()));
        ast.append(para, NodeKind::HardBreak);
        ast.append(para, NodeKind::SoftBreak);

        assert_eq!(
            render(&ast),
            ".nh\n\n.PP\n\\fIem\\fP\n\\[la]https://example.com/a-bsite\\[ra]\\fB\\fCx\\-y\\fR\n.br\n\n\n"
        );
    }

    #[test]
    fn block_level_markup() {
        let mut ast = Ast::new();
        let quote = ast.append(NodeId::ROOT, NodeKind::BlockQuote);
        text(&mut ast, quote, "quoted");
        ast.append(NodeId::ROOT, NodeKind::HorizontalRule);
        ast.append(NodeId::ROOT, NodeKind::CodeBlock(".start\n".to_string()));

        assert_eq!(
            render(&ast),
            ".nh\n\n.PP\n.RS\nquoted\n.RE\n\n.ti 0\n\\l'\\n(.lu'\n\n.PP\n.RS\n\n.nf\n\\&.start\n\n.fi\n.RE\n"
        );
    }

    #[test]
    fn column_count_comes_from_first_row() {
        let (ast, id) = table(&[3, 3, 3]);
        assert_eq!(count_columns(&ast, id), 3);
        let (ast, id) = table(&[2, 4, 1]);
        assert_eq!(count_columns(&ast, id), 2);
        let (ast, id) = table(&[]);
        assert_eq!(count_columns(&ast, id), 0);
    }

    #[test]
    fn table_renders_format_lines_and_cells() {
        let (ast, _) = table(&[2, 2]);
        assert_eq!(
            render(&ast),
            ".nh\n\n.TS\nallbox;\nl l \nl l .\n\\fB\\fCc0\\fR\t\\fB\\fCc1\\fR\nc0\tc1\n\n.TE\n"
        );
    }

    #[test]
    fn long_cell_text_uses_block_syntax() {
        let mut ast = Ast::new();
        let table = ast.append(NodeId::ROOT, NodeKind::Table);
        let body = ast.append(table, NodeKind::TableBody);
        let row = ast.append(body, NodeKind::TableRow);
        let cell = ast.append(row, NodeKind::TableCell { header: false });
        let long = "this cell text is well over thirty bytes";
        text(&mut ast, cell, long);
        let roff = render(&ast);
        assert!(roff.contains(&format!("\nT{{\n{long}\nT}}\n")));

        let para = ast.append(NodeId::ROOT, NodeKind::Paragraph);
        text(&mut ast, para, long);
        assert_eq!(render(&ast).matches("T{").count(), 1);
    }

    #[test]
    fn unhandled_nodes_are_skipped_but_children_render() {
        let mut ast = Ast::new();
        let para = ast.append(NodeId::ROOT, NodeKind::Paragraph);
        let strike = ast.append(para, NodeKind::Strikethrough);
        text(&mut ast, strike, "gone");
        ast.append(para, NodeKind::Html("<br>".to_string()));
        assert_eq!(render(&ast), ".nh\n\n.PP\ngone\n");
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_errors_propagate() {
        let err = RoffRenderer::new()
            .render(&Ast::new(), &mut FailingSink)
            .expect_err("write should fail");
        assert_eq!(err.to_string(), "sink closed");
    }
}
