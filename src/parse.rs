//! Folds the pulldown-cmark event stream into an [`Ast`].

use crate::ast::{Ast, ListKind, NodeId, NodeKind};
use crate::{Extensions, Md2manError, Result};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use std::ops::Range;

pub fn parse_markdown(markdown: &str, extensions: &Extensions) -> Result<Ast> {
    let mut builder = TreeBuilder::new();
    let mut body = markdown;
    if extensions.titleblock {
        if let Some((title, rest)) = split_title_block(markdown) {
            builder.push_title(&title);
            body = rest;
        }
    }

    let parser = Parser::new_ext(body, extensions.parser_options());
    for (event, range) in parser.into_offset_iter() {
        if extensions.no_intra_emphasis {
            match &event {
                Event::Start(Tag::Emphasis | Tag::Strong) if is_intra_word(body, &range) => {
                    let count = if matches!(event, Event::Start(Tag::Strong)) { 2 } else { 1 };
                    let delimiter = body.get(range.clone()).and_then(|s| s.chars().next());
                    builder.open_literal(delimiter.unwrap_or('*'), count);
                    continue;
                }
                Event::End(TagEnd::Emphasis | TagEnd::Strong) if builder.in_literal() => {
                    builder.close_literal()?;
                    continue;
                }
                _ => {}
            }
        }
        builder.push_event(event)?;
    }
    builder.finish()
}

/// Splits a leading pandoc title block (`% title` lines) from the body.
///
/// The `% ` prefixes are stripped and the lines joined with `\n`.
fn split_title_block(markdown: &str) -> Option<(String, &str)> {
    if !markdown.starts_with('%') {
        return None;
    }
    let mut consumed = 0;
    let mut lines = Vec::new();
    for line in markdown.split_inclusive('\n') {
        if !line.starts_with('%') {
            break;
        }
        consumed += line.len();
        let line = line.trim_end_matches(['\n', '\r']);
        let line = line
            .strip_prefix("% ")
            .or_else(|| line.strip_prefix('%'))
            .unwrap_or(line);
        lines.push(line);
    }
    Some((lines.join("\n"), &markdown[consumed..]))
}

/// Emphasis closed right before a letter or digit sits inside a word.
fn is_intra_word(source: &str, range: &Range<usize>) -> bool {
    source
        .get(range.end..)
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_alphanumeric)
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Node(NodeId),
    /// A tag with no node of its own; children attach to the enclosing node.
    Transparent,
    Metadata,
    /// Emphasis kept as literal text; the closing delimiter is written on close.
    Literal { delimiter: char, count: usize },
}

struct TreeBuilder {
    ast: Ast,
    stack: Vec<Frame>,
}

#[cfg(test)]
pub(crate) fn parse_events<'a, I>(events: I) -> Result<Ast>
where
    I: IntoIterator<Item = Event<'a>>,
{
    let mut builder = TreeBuilder::new();
    for event in events {
        builder.push_event(event)?;
    }
    builder.finish()
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            ast: Ast::new(),
            stack: vec![Frame::Node(NodeId::ROOT)],
        }
    }

    fn push_event(&mut self, event: Event<'_>) -> Result<()> {
        match event {
            Event::Start(tag) => self.handle_start(tag),
            Event::End(tag_end) => self.handle_end(tag_end)?,
            Event::Text(text) => self.push_text(&text),
            Event::Code(text) => self.push_leaf(NodeKind::Code(text.into_string())),
            Event::InlineMath(text) | Event::DisplayMath(text) => {
                self.push_leaf(NodeKind::Code(text.into_string()));
            }
            Event::Html(html) | Event::InlineHtml(html) => self.push_html(&html),
            Event::FootnoteReference(label) => self.push_leaf(NodeKind::FootnoteReference {
                label: label.into_string(),
            }),
            Event::SoftBreak => self.push_leaf(NodeKind::SoftBreak),
            Event::HardBreak => self.push_leaf(NodeKind::HardBreak),
            Event::Rule => self.push_leaf(NodeKind::HorizontalRule),
            Event::TaskListMarker(checked) => {
                self.push_leaf(NodeKind::TaskListMarker { checked });
            }
        }
        Ok(())
    }

    fn push_title(&mut self, title: &str) {
        let heading = self.ast.append(NodeId::ROOT, NodeKind::Heading { level: 1 });
        self.ast.append(heading, NodeKind::Text(title.to_string()));
    }

    fn open_literal(&mut self, delimiter: char, count: usize) {
        self.push_text(&delimiter.to_string().repeat(count));
        self.stack.push(Frame::Literal { delimiter, count });
    }

    fn in_literal(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Literal { .. }))
    }

    fn close_literal(&mut self) -> Result<()> {
        if let Frame::Literal { delimiter, count } = self.close()? {
            self.push_text(&delimiter.to_string().repeat(count));
        }
        Ok(())
    }

    fn finish(self) -> Result<Ast> {
        match self.stack.as_slice() {
            [Frame::Node(id)] if *id == NodeId::ROOT => Ok(self.ast),
            _ => Err(Md2manError::Markdown(
                "unbalanced markdown structure".to_string(),
            )),
        }
    }

    fn handle_start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.open(NodeKind::Paragraph),
            Tag::Heading { level, .. } => self.open(NodeKind::Heading {
                level: heading_level_to_u8(level),
            }),
            Tag::BlockQuote(_) => self.open(NodeKind::BlockQuote),
            Tag::CodeBlock(_) => self.open(NodeKind::CodeBlock(String::new())),
            Tag::HtmlBlock => self.open(NodeKind::Html(String::new())),
            Tag::List(start) => {
                let kind = match start {
                    Some(_) => ListKind::Ordered,
                    None => ListKind::Unordered,
                };
                self.open(NodeKind::List { kind });
            }
            Tag::Item => {
                let kind = match self.ast.kind(self.parent()) {
                    NodeKind::List { kind } => *kind,
                    _ => ListKind::Unordered,
                };
                self.open(NodeKind::Item { kind });
            }
            Tag::DefinitionList => self.open(NodeKind::List {
                kind: ListKind::Definition,
            }),
            Tag::DefinitionListTitle | Tag::DefinitionListDefinition => {
                self.open(NodeKind::Item {
                    kind: ListKind::Definition,
                });
            }
            Tag::FootnoteDefinition(label) => self.open(NodeKind::FootnoteDefinition {
                label: label.into_string(),
            }),
            Tag::Table(_) => self.open(NodeKind::Table),
            Tag::TableHead => {
                self.open(NodeKind::TableHead);
                self.open(NodeKind::TableRow);
            }
            Tag::TableRow => {
                if matches!(self.ast.kind(self.parent()), NodeKind::Table) {
                    self.open(NodeKind::TableBody);
                }
                self.open(NodeKind::TableRow);
            }
            Tag::TableCell => {
                let row = self.parent();
                let header = self
                    .ast
                    .parent(row)
                    .is_some_and(|section| matches!(self.ast.kind(section), NodeKind::TableHead));
                self.open(NodeKind::TableCell { header });
            }
            Tag::Emphasis => self.open(NodeKind::Emphasis),
            Tag::Strong => self.open(NodeKind::Strong),
            Tag::Strikethrough => self.open(NodeKind::Strikethrough),
            Tag::Link { dest_url, .. } => self.open(NodeKind::Link {
                destination: dest_url.into_string(),
            }),
            Tag::Image { dest_url, .. } => self.open(NodeKind::Image {
                destination: dest_url.into_string(),
            }),
            Tag::MetadataBlock(_) => self.stack.push(Frame::Metadata),
            _ => self.stack.push(Frame::Transparent),
        }
    }

    fn handle_end(&mut self, tag_end: TagEnd) -> Result<()> {
        match tag_end {
            // The synthesised header row closes along with the head.
            TagEnd::TableHead => {
                self.close()?;
                self.close()?;
            }
            TagEnd::Table => {
                while let Frame::Node(id) = self.close()? {
                    if matches!(self.ast.kind(id), NodeKind::Table) {
                        break;
                    }
                }
            }
            _ => {
                self.close()?;
            }
        }
        Ok(())
    }

    fn open(&mut self, kind: NodeKind) {
        let id = self.ast.append(self.parent(), kind);
        self.stack.push(Frame::Node(id));
    }

    fn close(&mut self) -> Result<Frame> {
        if self.stack.len() <= 1 {
            return Err(Md2manError::Markdown(
                "closing tag without matching opening tag".to_string(),
            ));
        }
        self.stack
            .pop()
            .ok_or_else(|| Md2manError::Markdown("empty parser stack".to_string()))
    }

    fn parent(&self) -> NodeId {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| match frame {
                Frame::Node(id) => Some(*id),
                _ => None,
            })
            .unwrap_or(NodeId::ROOT)
    }

    fn in_metadata(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Metadata))
    }

    fn push_leaf(&mut self, kind: NodeKind) {
        if self.in_metadata() {
            return;
        }
        self.ast.append(self.parent(), kind);
    }

    fn push_text(&mut self, text: &str) {
        if self.in_metadata() {
            return;
        }
        let parent = self.parent();
        match self.ast.kind_mut(parent) {
            NodeKind::CodeBlock(buffer) | NodeKind::Html(buffer) => {
                buffer.push_str(text);
                return;
            }
            _ => {}
        }
        if let Some(last) = self.ast.last_child(parent) {
            if let NodeKind::Text(buffer) = self.ast.kind_mut(last) {
                buffer.push_str(text);
                return;
            }
        }
        self.ast.append(parent, NodeKind::Text(text.to_string()));
    }

    fn push_html(&mut self, html: &str) {
        if self.in_metadata() {
            return;
        }
        let parent = self.parent();
        if let NodeKind::Html(buffer) = self.ast.kind_mut(parent) {
            buffer.push_str(html);
            return;
        }
        self.ast.append(parent, NodeKind::Html(html.to_string()));
    }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}
