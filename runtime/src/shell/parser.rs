//! Parser module - wraps brush-parser and translates its AST.
//!
//! brush-parser answers three ways: a complete program, an error at end of
//! input (the text is a proper prefix of a command), or a real syntax
//! error. The first is translated node by node into our arena tree; words
//! keep their raw text and are split into parts by [`super::word`].

use super::ast::{AndOrOp, ExecCtx, NodeId, NodeKind, RedirectOp, SyntaxTree, TreeBuilder};
use super::error::ParseError;
use super::word::{lex_word, split_raw_words, WordPart};
use brush_parser::ast;
use brush_parser::{Parser, ParserOptions, SourceInfo};
use std::io::Cursor;

/// Parse source text into a tree with a default context.
pub fn parse(source: &str) -> Result<SyntaxTree, ParseError> {
    parse_with_ctx(source, ExecCtx::default())
}

pub fn parse_with_ctx(source: &str, ctx: ExecCtx) -> Result<SyntaxTree, ParseError> {
    let program = parse_program(source)?;
    let mut converter = Converter::default();
    let root = converter.program(program);
    Ok(converter.builder.finish(root, ctx))
}

/// True when `source` is a valid proper prefix of a command.
pub fn is_incomplete(source: &str) -> bool {
    matches!(parse_program(source), Err(ParseError::Incomplete))
}

fn parse_program(source: &str) -> Result<ast::Program, ParseError> {
    let input = format!("{}\n", source);
    let cursor = Cursor::new(input);

    let options = ParserOptions::default();
    let source_info = SourceInfo::default();
    let mut parser = Parser::new(cursor, &options, &source_info);

    match parser.parse_program() {
        Ok(program) => Ok(program),
        Err(brush_parser::ParseError::ParsingAtEndOfInput) => Err(ParseError::Incomplete),
        Err(brush_parser::ParseError::Tokenizing { inner, .. }) if inner.is_incomplete() => {
            Err(ParseError::Incomplete)
        }
        Err(e) => {
            tracing::debug!(error = %e, "parse failed");
            Err(ParseError::Syntax(e.to_string()))
        }
    }
}

#[derive(Default)]
struct Converter {
    builder: TreeBuilder,
}

impl Converter {
    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.builder.push(kind)
    }

    fn program(&mut self, program: ast::Program) -> NodeId {
        let items = program
            .complete_commands
            .into_iter()
            .flat_map(|list| list.0)
            .map(|item| self.list_item(item))
            .collect();
        self.push(NodeKind::List { items })
    }

    fn compound_list(&mut self, list: ast::CompoundList) -> NodeId {
        let items = list.0.into_iter().map(|item| self.list_item(item)).collect();
        self.push(NodeKind::List { items })
    }

    fn list_item(&mut self, item: ast::CompoundListItem) -> NodeId {
        let background = matches!(item.1, ast::SeparatorOperator::Async);
        let body = self.and_or(item.0);
        self.push(NodeKind::Stmt { body, background })
    }

    fn and_or(&mut self, list: ast::AndOrList) -> NodeId {
        let first = self.pipeline(list.first);
        if list.additional.is_empty() {
            return first;
        }
        let rest = list
            .additional
            .into_iter()
            .map(|and_or| match and_or {
                ast::AndOr::And(p) => (AndOrOp::And, self.pipeline(p)),
                ast::AndOr::Or(p) => (AndOrOp::Or, self.pipeline(p)),
            })
            .collect();
        self.push(NodeKind::AndOr { first, rest })
    }

    fn pipeline(&mut self, pipeline: ast::Pipeline) -> NodeId {
        let bang = pipeline.bang;
        let mut stages: Vec<NodeId> = pipeline
            .seq
            .into_iter()
            .map(|cmd| self.command(cmd))
            .collect();
        if stages.len() == 1 && !bang {
            return stages.remove(0);
        }
        self.push(NodeKind::Pipeline { bang, stages })
    }

    fn command(&mut self, cmd: ast::Command) -> NodeId {
        match cmd {
            ast::Command::Simple(simple) => self.simple(simple),
            ast::Command::Compound(compound, redirects) => {
                let body = self.compound(compound);
                match redirects {
                    Some(list) if !list.0.is_empty() => {
                        let redirects = list.0.into_iter().map(|r| self.redirect(r)).collect();
                        self.push(NodeKind::Redirected { body, redirects })
                    }
                    _ => body,
                }
            }
            ast::Command::Function(func_def) => {
                let body = self.compound(func_def.body.0);
                self.push(NodeKind::FunctionDef {
                    name: format!("{}", func_def.fname),
                    body,
                })
            }
            ast::Command::ExtendedTest(test) => {
                let text = format!("{}", test.expr);
                let words = split_raw_words(&text)
                    .into_iter()
                    .map(|raw| self.word(raw))
                    .collect();
                self.push(NodeKind::Test { words })
            }
        }
    }

    fn simple(&mut self, cmd: ast::SimpleCommand) -> NodeId {
        let mut assigns = Vec::new();
        let mut words = Vec::new();
        let mut redirects = Vec::new();

        if let Some(prefix) = cmd.prefix {
            for item in prefix.0 {
                self.affix(item, true, &mut assigns, &mut words, &mut redirects);
            }
        }
        if let Some(name) = cmd.word_or_name {
            let id = self.word(format!("{}", name));
            words.insert(0, id);
        }
        if let Some(suffix) = cmd.suffix {
            for item in suffix.0 {
                self.affix(item, false, &mut assigns, &mut words, &mut redirects);
            }
        }

        self.push(NodeKind::Simple {
            assigns,
            words,
            redirects,
        })
    }

    fn affix(
        &mut self,
        item: ast::CommandPrefixOrSuffixItem,
        is_prefix: bool,
        assigns: &mut Vec<NodeId>,
        words: &mut Vec<NodeId>,
        redirects: &mut Vec<NodeId>,
    ) {
        match item {
            ast::CommandPrefixOrSuffixItem::AssignmentWord(assignment, word) => {
                if !is_prefix {
                    // after the command name an assignment is just an argument
                    words.push(self.word(format!("{}", word)));
                    return;
                }
                let raw = match &assignment.value {
                    ast::AssignmentValue::Scalar(w) => format!("{}", w),
                    ast::AssignmentValue::Array(items) => items
                        .iter()
                        .map(|(_, w)| format!("{}", w))
                        .collect::<Vec<_>>()
                        .join(" "),
                };
                let value = if raw.is_empty() {
                    None
                } else {
                    Some(self.word(raw))
                };
                let name = format!("{}", assignment.name);
                assigns.push(self.push(NodeKind::Assign { name, value }));
            }
            ast::CommandPrefixOrSuffixItem::IoRedirect(redirect) => {
                redirects.push(self.redirect(redirect));
            }
            ast::CommandPrefixOrSuffixItem::Word(w) => {
                words.push(self.word(format!("{}", w)));
            }
            ast::CommandPrefixOrSuffixItem::ProcessSubstitution(_, _) => {
                words.push(self.push(NodeKind::Unsupported {
                    what: "process substitution".into(),
                }));
            }
        }
    }

    fn compound(&mut self, cmd: ast::CompoundCommand) -> NodeId {
        match cmd {
            ast::CompoundCommand::BraceGroup(brace) => {
                let body = self.compound_list(brace.list);
                self.push(NodeKind::BraceGroup { body })
            }
            ast::CompoundCommand::Subshell(subshell) => {
                let body = self.compound_list(subshell.list);
                self.push(NodeKind::Subshell { body })
            }
            ast::CompoundCommand::ForClause(for_clause) => {
                let items = for_clause.values.map(|values| {
                    values
                        .into_iter()
                        .map(|w| self.word(format!("{}", w)))
                        .collect()
                });
                let body = self.compound_list(for_clause.body.list);
                self.push(NodeKind::For {
                    var: for_clause.variable_name,
                    items,
                    body,
                })
            }
            ast::CompoundCommand::WhileClause(while_clause) => {
                let cond = self.compound_list(while_clause.0);
                let body = self.compound_list(while_clause.1.list);
                self.push(NodeKind::Loop {
                    until: false,
                    cond,
                    body,
                })
            }
            ast::CompoundCommand::UntilClause(until_clause) => {
                let cond = self.compound_list(until_clause.0);
                let body = self.compound_list(until_clause.1.list);
                self.push(NodeKind::Loop {
                    until: true,
                    cond,
                    body,
                })
            }
            ast::CompoundCommand::IfClause(if_clause) => {
                let cond = self.compound_list(if_clause.condition);
                let then = self.compound_list(if_clause.then);

                // build the elif/else chain back to front
                let mut otherwise = None;
                let elses = if_clause.elses.unwrap_or_default();
                for else_clause in elses.into_iter().rev() {
                    let body = self.compound_list(else_clause.body);
                    otherwise = Some(match else_clause.condition {
                        Some(condition) => {
                            let cond = self.compound_list(condition);
                            self.push(NodeKind::If {
                                cond,
                                then: body,
                                otherwise,
                            })
                        }
                        None => self.push(NodeKind::Else { body }),
                    });
                }

                self.push(NodeKind::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            ast::CompoundCommand::CaseClause(case_clause) => {
                let word = self.word(format!("{}", case_clause.value));
                let items = case_clause
                    .cases
                    .into_iter()
                    .map(|case_item| {
                        let patterns = case_item
                            .patterns
                            .into_iter()
                            .map(|p| self.word(format!("{}", p)))
                            .collect();
                        let body = case_item.cmd.map(|list| self.compound_list(list));
                        self.push(NodeKind::CaseItem { patterns, body })
                    })
                    .collect();
                self.push(NodeKind::Case { word, items })
            }
            ast::CompoundCommand::Arithmetic(arith) => self.push(NodeKind::Unsupported {
                what: format!("(({}))", arith.expr),
            }),
            ast::CompoundCommand::ArithmeticForClause(_) => self.push(NodeKind::Unsupported {
                what: "arithmetic for loop".into(),
            }),
        }
    }

    fn redirect(&mut self, redirect: ast::IoRedirect) -> NodeId {
        let (fd, op, target) = match redirect {
            ast::IoRedirect::File(fd, kind, target) => {
                let op = match kind {
                    ast::IoFileRedirectKind::Read => RedirectOp::Read,
                    ast::IoFileRedirectKind::Write | ast::IoFileRedirectKind::Clobber => {
                        RedirectOp::Write
                    }
                    ast::IoFileRedirectKind::Append => RedirectOp::Append,
                    ast::IoFileRedirectKind::DuplicateInput => RedirectOp::DupInput,
                    ast::IoFileRedirectKind::DuplicateOutput => RedirectOp::DupOutput,
                    _ => RedirectOp::Other,
                };
                let target = match target {
                    ast::IoFileRedirectTarget::Filename(w) => Some(self.word(format!("{}", w))),
                    ast::IoFileRedirectTarget::Fd(n) => Some(self.word(n.to_string())),
                    ast::IoFileRedirectTarget::Duplicate(w) => Some(self.word(format!("{}", w))),
                    _ => None,
                };
                (fd.map(|f| f as u32), op, target)
            }
            ast::IoRedirect::HereDocument(fd, _) => (fd.map(|f| f as u32), RedirectOp::HereDoc, None),
            ast::IoRedirect::HereString(fd, word) => {
                let target = Some(self.word(format!("{}", word)));
                (fd.map(|f| f as u32), RedirectOp::HereString, target)
            }
            ast::IoRedirect::OutputAndError(word, _append) => {
                let target = Some(self.word(format!("{}", word)));
                (None, RedirectOp::OutputAndError, target)
            }
        };
        self.push(NodeKind::Redirect { fd, op, target })
    }

    fn word(&mut self, raw: String) -> NodeId {
        let parts = lex_word(&raw);
        let parts = self.word_parts(parts);
        self.push(NodeKind::Word { raw, parts })
    }

    fn word_parts(&mut self, parts: Vec<WordPart>) -> Vec<NodeId> {
        parts.into_iter().map(|part| self.word_part(part)).collect()
    }

    fn word_part(&mut self, part: WordPart) -> NodeId {
        match part {
            WordPart::Literal(text) => self.push(NodeKind::Literal(text)),
            WordPart::SingleQuoted(text) => self.push(NodeKind::SingleQuoted(text)),
            WordPart::DoubleQuoted(inner) => {
                let parts = self.word_parts(inner);
                self.push(NodeKind::DoubleQuoted { parts })
            }
            WordPart::Param {
                name,
                op,
                word,
                braced,
            } => {
                let word = word.map(|raw| self.word(raw));
                self.push(NodeKind::Param {
                    name,
                    op,
                    word,
                    braced,
                })
            }
            WordPart::CommandSub { body, backtick } => {
                let body_id = match parse_program(&body) {
                    Ok(program) => self.program(program),
                    Err(e) => self.push(NodeKind::Unsupported {
                        what: format!("command substitution ({})", e),
                    }),
                };
                self.push(NodeKind::CommandSub {
                    body: body_id,
                    backtick,
                })
            }
            WordPart::Arithmetic(expr) => self.push(NodeKind::Arithmetic(expr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_items(tree: &SyntaxTree) -> Vec<NodeId> {
        match tree.kind(tree.root()) {
            NodeKind::List { items } => items.clone(),
            other => panic!("expected list, got {:?}", other),
        }
    }

    fn stmt_body(tree: &SyntaxTree, stmt: NodeId) -> (NodeId, bool) {
        match tree.kind(stmt) {
            NodeKind::Stmt { body, background } => (*body, *background),
            other => panic!("expected stmt, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_command() {
        let tree = parse("echo hello world").unwrap();
        let items = root_items(&tree);
        assert_eq!(items.len(), 1);
        let (body, background) = stmt_body(&tree, items[0]);
        assert!(!background);
        match tree.kind(body) {
            NodeKind::Simple { words, .. } => assert_eq!(words.len(), 3),
            other => panic!("expected simple, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pipeline() {
        let tree = parse("echo hello | cat").unwrap();
        let (body, _) = stmt_body(&tree, root_items(&tree)[0]);
        match tree.kind(body) {
            NodeKind::Pipeline { bang, stages } => {
                assert!(!bang);
                assert_eq!(stages.len(), 2);
            }
            other => panic!("expected pipeline, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_background() {
        let tree = parse("sleep 1 & echo done").unwrap();
        let items = root_items(&tree);
        assert_eq!(items.len(), 2);
        assert!(stmt_body(&tree, items[0]).1);
        assert!(!stmt_body(&tree, items[1]).1);
    }

    #[test]
    fn test_parse_elif_chain() {
        let tree = parse("if a; then b; elif c; then d; else e; fi").unwrap();
        let (body, _) = stmt_body(&tree, root_items(&tree)[0]);
        let NodeKind::If { otherwise, .. } = tree.kind(body) else {
            panic!("expected if");
        };
        let elif = otherwise.unwrap();
        let NodeKind::If { otherwise, .. } = tree.kind(elif) else {
            panic!("expected elif");
        };
        assert!(matches!(tree.kind(otherwise.unwrap()), NodeKind::Else { .. }));
    }

    #[test]
    fn test_parse_redirect() {
        let tree = parse("echo hello > out").unwrap();
        let (body, _) = stmt_body(&tree, root_items(&tree)[0]);
        let NodeKind::Simple { redirects, .. } = tree.kind(body) else {
            panic!("expected simple");
        };
        assert_eq!(redirects.len(), 1);
        assert!(matches!(
            tree.kind(redirects[0]),
            NodeKind::Redirect { op: RedirectOp::Write, target: Some(_), .. }
        ));
    }

    #[test]
    fn test_parse_extended_test() {
        let tree = parse("[[ $x != aaa ]]").unwrap();
        let (body, _) = stmt_body(&tree, root_items(&tree)[0]);
        match tree.kind(body) {
            NodeKind::Test { words } => assert_eq!(words.len(), 3),
            other => panic!("expected test, got {:?}", other),
        }
    }

    #[test]
    fn test_command_substitution_body_is_parsed() {
        let tree = parse("echo \"$(echo foo; echo bar)\"").unwrap();
        let sub = tree
            .ids()
            .find(|id| matches!(tree.kind(*id), NodeKind::CommandSub { .. }))
            .unwrap();
        let NodeKind::CommandSub { body, .. } = tree.kind(sub) else {
            unreachable!()
        };
        assert!(matches!(tree.kind(*body), NodeKind::List { items } if items.len() == 2));
    }

    #[test]
    fn test_incomplete_inputs() {
        assert_eq!(parse("if true; then").unwrap_err(), ParseError::Incomplete);
        assert_eq!(parse("echo 'abc").unwrap_err(), ParseError::Incomplete);
        assert_eq!(parse("while true; do").unwrap_err(), ParseError::Incomplete);
        assert!(is_incomplete("f() {"));
        assert!(!is_incomplete("echo hi"));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(parse("echo )"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse("fi"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn test_empty_input() {
        let tree = parse("   ").unwrap();
        assert!(tree.is_empty());
        let tree = parse("# just a comment").unwrap();
        assert!(tree.is_empty());
    }
}
