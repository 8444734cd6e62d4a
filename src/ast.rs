//! Read-only markdown syntax tree and the depth-first walker used to render it.
//!
//! The tree is an arena: every [`Node`] lives in one `Vec` and links to its
//! relatives through [`NodeId`]s. Node 0 is always the [`NodeKind::Document`]
//! root.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Unordered,
    Ordered,
    Definition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    BlockQuote,
    List { kind: ListKind },
    Item { kind: ListKind },
    Paragraph,
    Heading { level: u8 },
    HorizontalRule,
    Emphasis,
    Strong,
    Strikethrough,
    Link { destination: String },
    Image { destination: String },
    Text(String),
    Html(String),
    SoftBreak,
    HardBreak,
    Code(String),
    CodeBlock(String),
    Table,
    TableHead,
    TableBody,
    TableRow,
    TableCell { header: bool },
    FootnoteDefinition { label: String },
    FootnoteReference { label: String },
    TaskListMarker { checked: bool },
}

impl NodeKind {
    /// Containers are visited twice by [`Ast::walk`]; leaves only once.
    pub fn is_container(&self) -> bool {
        !matches!(
            self,
            NodeKind::Text(_)
                | NodeKind::Html(_)
                | NodeKind::SoftBreak
                | NodeKind::HardBreak
                | NodeKind::Code(_)
                | NodeKind::CodeBlock(_)
                | NodeKind::HorizontalRule
                | NodeKind::FootnoteReference { .. }
                | NodeKind::TaskListMarker { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Document => "Document",
            NodeKind::BlockQuote => "BlockQuote",
            NodeKind::List { .. } => "List",
            NodeKind::Item { .. } => "Item",
            NodeKind::Paragraph => "Paragraph",
            NodeKind::Heading { .. } => "Heading",
            NodeKind::HorizontalRule => "HorizontalRule",
            NodeKind::Emphasis => "Emphasis",
            NodeKind::Strong => "Strong",
            NodeKind::Strikethrough => "Strikethrough",
            NodeKind::Link { .. } => "Link",
            NodeKind::Image { .. } => "Image",
            NodeKind::Text(_) => "Text",
            NodeKind::Html(_) => "Html",
            NodeKind::SoftBreak => "SoftBreak",
            NodeKind::HardBreak => "HardBreak",
            NodeKind::Code(_) => "Code",
            NodeKind::CodeBlock(_) => "CodeBlock",
            NodeKind::Table => "Table",
            NodeKind::TableHead => "TableHead",
            NodeKind::TableBody => "TableBody",
            NodeKind::TableRow => "TableRow",
            NodeKind::TableCell { .. } => "TableCell",
            NodeKind::FootnoteDefinition { .. } => "FootnoteDefinition",
            NodeKind::FootnoteReference { .. } => "FootnoteReference",
            NodeKind::TaskListMarker { .. } => "TaskListMarker",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            parent,
            prev: None,
            next: None,
            first_child: None,
            last_child: None,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn prev(&self) -> Option<NodeId> {
        self.prev
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }
}

/// What the walker should do after a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    GoToNext,
    SkipChildren,
    Terminate,
}

/// Callback driven by [`Ast::walk`] on the entering and leaving edge of each node.
pub trait Visitor {
    type Error;

    fn visit(
        &mut self,
        ast: &Ast,
        id: NodeId,
        entering: bool,
    ) -> Result<WalkStatus, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Document, None)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds `kind` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node::new(kind, Some(parent));
        node.prev = self.nodes[parent.0].last_child;
        self.nodes.push(node);

        if let Some(prev) = self.nodes[parent.0].last_child {
            self.nodes[prev.0].next = Some(id);
        } else {
            self.nodes[parent.0].first_child = Some(id);
        }
        self.nodes[parent.0].last_child = Some(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub(crate) fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].prev
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].next
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].last_child
    }

    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            ast: self,
            next: self.nodes[id.0].first_child,
        }
    }

    /// Depth-first walk of the subtree rooted at `root`.
    ///
    /// Containers get an entering and a leaving visit, leaves a single
    /// entering visit. `SkipChildren` moves straight past the node without
    /// delivering its leaving edge.
    pub fn walk<V: Visitor>(&self, root: NodeId, visitor: &mut V) -> Result<(), V::Error> {
        let mut current = Some(root);
        let mut entering = true;
        while let Some(id) = current {
            match visitor.visit(self, id, entering)? {
                WalkStatus::GoToNext => {}
                WalkStatus::SkipChildren => entering = false,
                WalkStatus::Terminate => return Ok(()),
            }
            (current, entering) = self.step(root, id, entering);
        }
        Ok(())
    }

    fn step(&self, root: NodeId, id: NodeId, entering: bool) -> (Option<NodeId>, bool) {
        let node = &self.nodes[id.0];
        let container = node.kind.is_container();
        if (!container || !entering) && id == root {
            return (None, false);
        }
        if container && entering {
            return match node.first_child {
                Some(child) => (Some(child), true),
                None => (Some(id), false),
            };
        }
        match node.next {
            Some(next) => (Some(next), true),
            None => (node.parent, false),
        }
    }
}

pub struct Children<'a> {
    ast: &'a Ast,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.ast.nodes[id.0].next;
        Some(id)
    }
}
