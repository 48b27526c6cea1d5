//! Script nodes: the structured tree a subroutine is rebuilt into.
//!
//! Nodes live in an arena owned by the subroutine's [`Tree`] and refer to
//! each other by [`NodeId`]. Every node records the block that holds it, so
//! a node can be detached without walking the tree.

use crate::parser::{BinaryOp, IncDec, UnaryOp};

/// Index of a variable slot in the program-wide variable table.
pub(crate) type VarId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub usize);

/// A recovered expression.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Int(i32),
    Float(f32),
    Str(String),
    Object(i32),
    /// `count` consecutive variable slots starting at `first`.
    Var { first: VarId, count: usize },
    /// Three float components written as a vector literal.
    Vector(Box<[Expr; 3]>),
    /// `count` slots at slot `offset` of a multi-slot value.
    Member {
        base: Box<Expr>,
        offset: usize,
        count: usize,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Assign {
        first: VarId,
        count: usize,
        value: Box<Expr>,
    },
    IncDec {
        op: IncDec,
        prefix: bool,
        var: VarId,
    },
    /// Engine routine call, arguments in declaration order.
    Engine { routine: u16, args: Vec<Expr> },
    /// Call of another subroutine. Arguments are kept as the pieces that
    /// were pushed, and are matched to the callee's parameters once every
    /// subroutine has been analysed.
    User { sub: usize, args: Vec<Piece> },
}

/// One pushed argument value covering `parts` stack slots.
#[derive(Debug, Clone)]
pub(crate) struct Piece {
    pub expr: Expr,
    pub parts: usize,
}

impl Expr {
    /// Whether evaluating the expression changes state.
    pub fn has_effects(&self) -> bool {
        match self {
            Expr::Assign { .. } | Expr::IncDec { .. } | Expr::Engine { .. } | Expr::User { .. } => {
                true
            }
            Expr::Vector(parts) => parts.iter().any(Expr::has_effects),
            Expr::Member { base, .. } => base.has_effects(),
            Expr::Unary(_, operand) => operand.has_effects(),
            Expr::Binary(_, left, right) => left.has_effects() || right.has_effects(),
            Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Object(_) | Expr::Var { .. } => {
                false
            }
        }
    }

    pub fn not(self) -> Expr {
        match self {
            Expr::Unary(UnaryOp::Not, inner) => *inner,
            other => Expr::Unary(UnaryOp::Not, Box::new(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CaseLabel {
    Int(i32),
    Str(String),
    Default,
}

#[derive(Debug, Clone)]
pub(crate) struct Arm {
    pub labels: Vec<CaseLabel>,
    pub body: NodeId,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Block(Vec<NodeId>),
    /// A local or global declaration, named after the group `var` starts.
    Decl { var: VarId, init: Option<Expr> },
    Expr(Expr),
    If {
        cond: Expr,
        then: NodeId,
        els: Option<NodeId>,
    },
    While { cond: Expr, body: NodeId },
    DoWhile { body: NodeId, cond: Expr },
    For { cond: Expr, step: Expr, body: NodeId },
    Switch { value: Expr, arms: Vec<Arm> },
    Break,
    Continue,
    /// Jump to a loop's continue point; replaced once the loop is built.
    ContinueTail,
    Return(Option<Expr>),
    /// A detached node.
    Empty,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
}

/// Arena holding one subroutine's nodes.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    /// A new, unattached block.
    pub fn block(&mut self) -> NodeId {
        self.alloc(NodeKind::Block(Vec::new()), None)
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { kind, parent });
        id
    }

    /// Appends a node to the end of `block`.
    pub fn append(&mut self, block: NodeId, kind: NodeKind) -> NodeId {
        let id = self.alloc(kind, Some(block));
        self.adopt(block, id);
        id
    }

    /// Makes `child` the last statement of `block`.
    pub fn adopt(&mut self, block: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(block);
        if let NodeKind::Block(children) = &mut self.nodes[block.0].kind {
            children.push(child);
        }
    }

    pub fn children(&self, block: NodeId) -> &[NodeId] {
        match &self.nodes[block.0].kind {
            NodeKind::Block(children) => children,
            _ => &[],
        }
    }

    /// Removes `id` from its block and blanks it.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take()
            && let NodeKind::Block(children) = &mut self.nodes[parent.0].kind
        {
            children.retain(|child| *child != id);
        }
        self.nodes[id.0].kind = NodeKind::Empty;
    }

    /// Deep copy of the subtree at `id`, left unattached.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let kind = self.nodes[id.0].kind.clone();
        let copy = self.alloc(NodeKind::Empty, None);
        let kind = match kind {
            NodeKind::Block(children) => {
                let copies: Vec<NodeId> = children
                    .into_iter()
                    .map(|child| {
                        let c = self.clone_subtree(child);
                        self.nodes[c.0].parent = Some(copy);
                        c
                    })
                    .collect();
                NodeKind::Block(copies)
            }
            NodeKind::If { cond, then, els } => NodeKind::If {
                cond,
                then: self.clone_child(then, copy),
                els: els.map(|els| self.clone_child(els, copy)),
            },
            NodeKind::While { cond, body } => NodeKind::While {
                cond,
                body: self.clone_child(body, copy),
            },
            NodeKind::DoWhile { body, cond } => NodeKind::DoWhile {
                body: self.clone_child(body, copy),
                cond,
            },
            NodeKind::For { cond, step, body } => NodeKind::For {
                cond,
                step,
                body: self.clone_child(body, copy),
            },
            NodeKind::Switch { value, arms } => NodeKind::Switch {
                value,
                arms: arms
                    .into_iter()
                    .map(|arm| Arm {
                        labels: arm.labels,
                        body: self.clone_child(arm.body, copy),
                    })
                    .collect(),
            },
            other => other,
        };
        self.nodes[copy.0].kind = kind;
        copy
    }

    fn clone_child(&mut self, id: NodeId, parent: NodeId) -> NodeId {
        let copy = self.clone_subtree(id);
        self.nodes[copy.0].parent = Some(parent);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_detach_updates_parent() {
        let mut tree = Tree::new();
        let root = tree.block();
        let a = tree.append(root, NodeKind::Break);
        let b = tree.append(root, NodeKind::Continue);
        assert_eq!(tree.get_mut(a).parent, Some(root));
        tree.detach(a);
        assert_eq!(tree.children(root), &[b]);
        assert!(matches!(tree.kind(a), NodeKind::Empty));
    }

    #[test]
    fn test_clone_subtree_is_independent() {
        let mut tree = Tree::new();
        let root = tree.block();
        let body = tree.block();
        tree.append(body, NodeKind::Expr(Expr::Int(1)));
        let node = tree.append(
            root,
            NodeKind::While {
                cond: Expr::Int(1),
                body,
            },
        );
        let copy = tree.clone_subtree(node);
        let NodeKind::While { body: copied, .. } = tree.kind(copy).clone() else {
            panic!("expected a loop");
        };
        assert_ne!(copied, body);
        assert_eq!(tree.get_mut(copied).parent, Some(copy));
        tree.append(copied, NodeKind::Break);
        assert_eq!(tree.children(body).len(), 1);
        assert_eq!(tree.children(copied).len(), 2);
    }

    #[test]
    fn test_not_cancels() {
        let e = Expr::Int(3).not().not();
        assert!(matches!(e, Expr::Int(3)));
    }
}
