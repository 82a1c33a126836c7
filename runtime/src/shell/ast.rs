//! Arena syntax tree.
//!
//! Every node of one parsed unit lives in a single [`SyntaxTree`] and refers
//! to its children and parent by [`NodeId`]. The tree owns exactly one
//! [`ExecCtx`]; cloning a subtree for a new process always produces a new
//! tree with its own context, so no two processes ever share one.

use super::process::Pid;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;

/// Handle of a node inside its owning [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Execution context shared by every node of one tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecCtx {
    pub session: String,
    pub pid: Pid,
    pub ppid: Pid,
    pub pgid: Pid,
    /// File descriptor -> device key.
    pub fds: BTreeMap<u32, String>,
    /// Names of the shell functions being executed, innermost last.
    pub call_stack: Vec<String>,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndOrOp {
    And,
    Or,
}

impl AndOrOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AndOrOp::And => "&&",
            AndOrOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    Write,
    Append,
    Read,
    DupOutput,
    DupInput,
    HereDoc,
    HereString,
    OutputAndError,
    Other,
}

impl RedirectOp {
    pub fn as_str(self) -> &'static str {
        match self {
            RedirectOp::Write => ">",
            RedirectOp::Append => ">>",
            RedirectOp::Read => "<",
            RedirectOp::DupOutput => ">&",
            RedirectOp::DupInput => "<&",
            RedirectOp::HereDoc => "<<",
            RedirectOp::HereString => "<<<",
            RedirectOp::OutputAndError => "&>",
            RedirectOp::Other => "",
        }
    }
}

/// Operator of a braced parameter expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamOp {
    /// `${x:-w}` / `${x-w}`
    Default { colon: bool },
    /// `${x:=w}` / `${x=w}`
    Assign { colon: bool },
    /// `${x:+w}` / `${x+w}`
    Alternate { colon: bool },
    /// `${#x}`
    Length,
    /// Anything else; fails when expanded.
    Other(String),
}

impl ParamOp {
    pub fn as_str(&self) -> &str {
        match self {
            ParamOp::Default { colon: true } => ":-",
            ParamOp::Default { colon: false } => "-",
            ParamOp::Assign { colon: true } => ":=",
            ParamOp::Assign { colon: false } => "=",
            ParamOp::Alternate { colon: true } => ":+",
            ParamOp::Alternate { colon: false } => "+",
            ParamOp::Length => "#",
            ParamOp::Other(op) => op,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Statement sequence.
    List { items: Vec<NodeId> },
    Stmt { body: NodeId, background: bool },
    AndOr { first: NodeId, rest: Vec<(AndOrOp, NodeId)> },
    Pipeline { bang: bool, stages: Vec<NodeId> },
    Simple {
        assigns: Vec<NodeId>,
        words: Vec<NodeId>,
        redirects: Vec<NodeId>,
    },
    Assign { name: String, value: Option<NodeId> },
    /// A shell word; `raw` is its source text.
    Word { raw: String, parts: Vec<NodeId> },
    Literal(String),
    SingleQuoted(String),
    DoubleQuoted { parts: Vec<NodeId> },
    Param {
        name: String,
        op: Option<ParamOp>,
        word: Option<NodeId>,
        braced: bool,
    },
    CommandSub { body: NodeId, backtick: bool },
    Arithmetic(String),
    Redirect {
        fd: Option<u32>,
        op: RedirectOp,
        target: Option<NodeId>,
    },
    /// `if`/`elif`; `otherwise` is another `If` (elif) or an `Else`.
    If {
        cond: NodeId,
        then: NodeId,
        otherwise: Option<NodeId>,
    },
    Else { body: NodeId },
    Loop { until: bool, cond: NodeId, body: NodeId },
    For {
        var: String,
        items: Option<Vec<NodeId>>,
        body: NodeId,
    },
    Case { word: NodeId, items: Vec<NodeId> },
    CaseItem { patterns: Vec<NodeId>, body: Option<NodeId> },
    Subshell { body: NodeId },
    BraceGroup { body: NodeId },
    FunctionDef { name: String, body: NodeId },
    /// Compound command with trailing redirections.
    Redirected { body: NodeId, redirects: Vec<NodeId> },
    /// `[[ ... ]]`, one word per token.
    Test { words: Vec<NodeId> },
    Unsupported { what: String },
}

impl NodeKind {
    /// Direct children in source order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::List { items } => items.clone(),
            NodeKind::Stmt { body, .. }
            | NodeKind::Else { body }
            | NodeKind::Subshell { body }
            | NodeKind::BraceGroup { body }
            | NodeKind::FunctionDef { body, .. }
            | NodeKind::CommandSub { body, .. } => vec![*body],
            NodeKind::AndOr { first, rest } => std::iter::once(*first)
                .chain(rest.iter().map(|(_, id)| *id))
                .collect(),
            NodeKind::Pipeline { stages, .. } => stages.clone(),
            NodeKind::Simple {
                assigns,
                words,
                redirects,
            } => assigns
                .iter()
                .chain(words.iter())
                .chain(redirects.iter())
                .copied()
                .collect(),
            NodeKind::Assign { value, .. } => value.iter().copied().collect(),
            NodeKind::Word { parts, .. } | NodeKind::DoubleQuoted { parts } => parts.clone(),
            NodeKind::Param { word, .. } => word.iter().copied().collect(),
            NodeKind::Redirect { target, .. } => target.iter().copied().collect(),
            NodeKind::If {
                cond,
                then,
                otherwise,
            } => {
                let mut ids = vec![*cond, *then];
                ids.extend(otherwise.iter().copied());
                ids
            }
            NodeKind::Loop { cond, body, .. } => vec![*cond, *body],
            NodeKind::For { items, body, .. } => {
                let mut ids: Vec<NodeId> = items.iter().flatten().copied().collect();
                ids.push(*body);
                ids
            }
            NodeKind::Case { word, items } => {
                std::iter::once(*word).chain(items.iter().copied()).collect()
            }
            NodeKind::CaseItem { patterns, body } => patterns
                .iter()
                .copied()
                .chain(body.iter().copied())
                .collect(),
            NodeKind::Redirected { body, redirects } => std::iter::once(*body)
                .chain(redirects.iter().copied())
                .collect(),
            NodeKind::Test { words } => words.clone(),
            NodeKind::Literal(_)
            | NodeKind::SingleQuoted(_)
            | NodeKind::Arithmetic(_)
            | NodeKind::Unsupported { .. } => Vec::new(),
        }
    }

    /// Same node with every child id passed through `f`.
    pub fn remap(&self, f: &mut impl FnMut(NodeId) -> NodeId) -> NodeKind {
        let mut all = |ids: &[NodeId]| ids.iter().map(|id| f(*id)).collect::<Vec<_>>();
        match self {
            NodeKind::List { items } => NodeKind::List { items: all(items) },
            NodeKind::Stmt { body, background } => NodeKind::Stmt {
                body: all(&[*body])[0],
                background: *background,
            },
            NodeKind::AndOr { first, rest } => {
                let first = all(&[*first])[0];
                let rest = rest
                    .iter()
                    .map(|(op, id)| (*op, all(&[*id])[0]))
                    .collect();
                NodeKind::AndOr { first, rest }
            }
            NodeKind::Pipeline { bang, stages } => NodeKind::Pipeline {
                bang: *bang,
                stages: all(stages),
            },
            NodeKind::Simple {
                assigns,
                words,
                redirects,
            } => NodeKind::Simple {
                assigns: all(assigns),
                words: all(words),
                redirects: all(redirects),
            },
            NodeKind::Assign { name, value } => NodeKind::Assign {
                name: name.clone(),
                value: value.map(|id| all(&[id])[0]),
            },
            NodeKind::Word { raw, parts } => NodeKind::Word {
                raw: raw.clone(),
                parts: all(parts),
            },
            NodeKind::DoubleQuoted { parts } => NodeKind::DoubleQuoted { parts: all(parts) },
            NodeKind::Param {
                name,
                op,
                word,
                braced,
            } => NodeKind::Param {
                name: name.clone(),
                op: op.clone(),
                word: word.map(|id| all(&[id])[0]),
                braced: *braced,
            },
            NodeKind::CommandSub { body, backtick } => NodeKind::CommandSub {
                body: all(&[*body])[0],
                backtick: *backtick,
            },
            NodeKind::Redirect { fd, op, target } => NodeKind::Redirect {
                fd: *fd,
                op: *op,
                target: target.map(|id| all(&[id])[0]),
            },
            NodeKind::If {
                cond,
                then,
                otherwise,
            } => NodeKind::If {
                cond: all(&[*cond])[0],
                then: all(&[*then])[0],
                otherwise: otherwise.map(|id| all(&[id])[0]),
            },
            NodeKind::Else { body } => NodeKind::Else {
                body: all(&[*body])[0],
            },
            NodeKind::Loop { until, cond, body } => NodeKind::Loop {
                until: *until,
                cond: all(&[*cond])[0],
                body: all(&[*body])[0],
            },
            NodeKind::For { var, items, body } => NodeKind::For {
                var: var.clone(),
                items: items.as_ref().map(|ids| all(ids)),
                body: all(&[*body])[0],
            },
            NodeKind::Case { word, items } => NodeKind::Case {
                word: all(&[*word])[0],
                items: all(items),
            },
            NodeKind::CaseItem { patterns, body } => NodeKind::CaseItem {
                patterns: all(patterns),
                body: body.map(|id| all(&[id])[0]),
            },
            NodeKind::Subshell { body } => NodeKind::Subshell {
                body: all(&[*body])[0],
            },
            NodeKind::BraceGroup { body } => NodeKind::BraceGroup {
                body: all(&[*body])[0],
            },
            NodeKind::FunctionDef { name, body } => NodeKind::FunctionDef {
                name: name.clone(),
                body: all(&[*body])[0],
            },
            NodeKind::Redirected { body, redirects } => NodeKind::Redirected {
                body: all(&[*body])[0],
                redirects: all(redirects),
            },
            NodeKind::Test { words } => NodeKind::Test { words: all(words) },
            NodeKind::Literal(_)
            | NodeKind::SingleQuoted(_)
            | NodeKind::Arithmetic(_)
            | NodeKind::Unsupported { .. } => self.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    parent: Option<NodeId>,
    exit_code: Cell<Option<i32>>,
    expanded: RefCell<Option<String>>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get()
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.set(Some(code));
    }

    /// Cached result of the last expansion of this node.
    pub fn expanded(&self) -> Option<String> {
        self.expanded.borrow().clone()
    }

    pub fn set_expanded(&self, text: String) {
        *self.expanded.borrow_mut() = Some(text);
    }
}

#[derive(Debug)]
pub struct SyntaxTree {
    nodes: Vec<Node>,
    root: NodeId,
    ctx: RefCell<ExecCtx>,
}

impl SyntaxTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind(self.root), NodeKind::List { items } if items.is_empty())
    }

    pub fn ctx(&self) -> Ref<'_, ExecCtx> {
        self.ctx.borrow()
    }

    pub fn ctx_mut(&self) -> RefMut<'_, ExecCtx> {
        self.ctx.borrow_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Deep copy of the subtree rooted at `id` with a fresh context.
    pub fn subtree(&self, id: NodeId, ctx: ExecCtx) -> SyntaxTree {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            order.push(next);
            let children = self.kind(next).children();
            stack.extend(children.into_iter().rev());
        }

        let mut mapping = BTreeMap::new();
        for (new, old) in order.iter().enumerate() {
            mapping.insert(*old, NodeId(new));
        }

        let mut builder = TreeBuilder::default();
        for old in &order {
            let kind = self.kind(*old).remap(&mut |child| mapping[&child]);
            builder.push(kind);
        }
        builder.finish(NodeId(0), ctx)
    }
}

/// Collects node kinds and produces a [`SyntaxTree`].
#[derive(Debug, Default)]
pub struct TreeBuilder {
    kinds: Vec<NodeKind>,
}

impl TreeBuilder {
    pub fn push(&mut self, kind: NodeKind) -> NodeId {
        self.kinds.push(kind);
        NodeId(self.kinds.len() - 1)
    }

    /// Wire parent links with one post-order walk from `root`.
    pub fn finish(self, root: NodeId, ctx: ExecCtx) -> SyntaxTree {
        let mut parents: Vec<Option<NodeId>> = vec![None; self.kinds.len()];
        let mut stack = vec![(root, false)];
        while let Some((id, visited)) = stack.pop() {
            let children = self.kinds[id.0].children();
            if visited {
                for child in children {
                    parents[child.0] = Some(id);
                }
            } else {
                stack.push((id, true));
                stack.extend(children.into_iter().map(|c| (c, false)));
            }
        }

        let nodes = self
            .kinds
            .into_iter()
            .zip(parents)
            .map(|(kind, parent)| Node {
                kind,
                parent,
                exit_code: Cell::new(None),
                expanded: RefCell::new(None),
            })
            .collect();

        SyntaxTree {
            nodes,
            root,
            ctx: RefCell::new(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parser::parse;

    #[test]
    fn test_parents_are_wired() {
        let tree = parse("echo a | cat").unwrap();
        for id in tree.ids() {
            for child in tree.kind(id).children() {
                assert_eq!(tree.node(child).parent(), Some(id));
            }
        }
        assert_eq!(tree.node(tree.root()).parent(), None);
    }

    #[test]
    fn test_subtree_gets_fresh_context() {
        let tree = parse("f() { echo hi; }; f | cat").unwrap();
        tree.ctx_mut().pid = 4;

        let stage = tree
            .ids()
            .find(|id| matches!(tree.kind(*id), NodeKind::Pipeline { stages, .. } if stages.len() == 2))
            .unwrap();
        let ctx = ExecCtx {
            pid: 9,
            ..ExecCtx::default()
        };
        let clone = tree.subtree(stage, ctx);

        clone.ctx_mut().fds.insert(1, "/dev/fifo-1".into());
        assert_eq!(tree.ctx().pid, 4);
        assert!(tree.ctx().fds.is_empty());
        assert_eq!(clone.ctx().pid, 9);
        assert_eq!(clone.node(clone.root()).parent(), None);
        for id in clone.ids() {
            for child in clone.kind(id).children() {
                assert_eq!(clone.node(child).parent(), Some(id));
            }
        }
    }

    #[test]
    fn test_subtree_is_isomorphic() {
        let tree = parse("if true; then echo \"$x\"; fi").unwrap();
        let clone = tree.subtree(tree.root(), ExecCtx::default());
        assert_eq!(clone.len(), tree.len());
        assert_eq!(
            crate::shell::reconstruct::single_line(&clone, clone.root()),
            crate::shell::reconstruct::single_line(&tree, tree.root())
        );
    }

    #[test]
    fn test_subtree_does_not_share_exit_codes() {
        let tree = parse("true").unwrap();
        tree.node(tree.root()).set_exit_code(3);
        let clone = tree.subtree(tree.root(), ExecCtx::default());
        assert_eq!(clone.node(clone.root()).exit_code(), None);
    }
}
