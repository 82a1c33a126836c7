//! Word lexer.
//!
//! The parser hands us each word as raw source text. This module splits
//! that text into quoting-aware parts (literal runs, quoted strings,
//! parameter references, command substitutions) which the tree builder
//! turns into nodes. Backslash escapes are kept verbatim in literals; the
//! expansion engine consumes them according to the quoting context.

use super::ast::ParamOp;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    Literal(String),
    SingleQuoted(String),
    DoubleQuoted(Vec<WordPart>),
    Param {
        name: String,
        op: Option<ParamOp>,
        word: Option<String>,
        braced: bool,
    },
    CommandSub {
        body: String,
        backtick: bool,
    },
    Arithmetic(String),
}

/// Split a raw word into parts.
pub fn lex_word(raw: &str) -> Vec<WordPart> {
    let mut chars = raw.chars().peekable();
    lex_parts(&mut chars, false)
}

fn lex_parts(chars: &mut Peekable<Chars>, in_double_quotes: bool) -> Vec<WordPart> {
    let mut parts = Vec::new();
    let mut literal = String::new();

    fn flush(literal: &mut String, parts: &mut Vec<WordPart>) {
        if !literal.is_empty() {
            parts.push(WordPart::Literal(std::mem::take(literal)));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                literal.push('\\');
                if let Some(next) = chars.next() {
                    literal.push(next);
                }
            }
            '"' if in_double_quotes => break,
            '"' => {
                flush(&mut literal, &mut parts);
                let inner = lex_parts(chars, true);
                parts.push(WordPart::DoubleQuoted(inner));
            }
            '\'' if !in_double_quotes => {
                flush(&mut literal, &mut parts);
                let mut quoted = String::new();
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    quoted.push(q);
                }
                parts.push(WordPart::SingleQuoted(quoted));
            }
            '`' => {
                flush(&mut literal, &mut parts);
                let mut body = String::new();
                while let Some(b) = chars.next() {
                    match b {
                        '`' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                if !matches!(escaped, '`' | '\\' | '$') {
                                    body.push('\\');
                                }
                                body.push(escaped);
                            }
                        }
                        _ => body.push(b),
                    }
                }
                parts.push(WordPart::CommandSub {
                    body,
                    backtick: true,
                });
            }
            '$' => match lex_dollar(chars) {
                Some(part) => {
                    flush(&mut literal, &mut parts);
                    parts.push(part);
                }
                None => literal.push('$'),
            },
            _ => literal.push(c),
        }
    }

    flush(&mut literal, &mut parts);
    parts
}

fn is_special_param(c: char) -> bool {
    matches!(c, '@' | '*' | '#' | '?' | '$' | '!' | '-')
}

fn lex_dollar(chars: &mut Peekable<Chars>) -> Option<WordPart> {
    match chars.peek().copied()? {
        '{' => {
            chars.next();
            let inner = read_balanced(chars, '{', '}');
            Some(parse_braced_param(&inner))
        }
        '(' => {
            chars.next();
            if chars.peek() == Some(&'(') {
                chars.next();
                let inner = read_balanced(chars, '(', ')');
                // consume the second closing paren of `))`
                if chars.peek() == Some(&')') {
                    chars.next();
                }
                Some(WordPart::Arithmetic(inner))
            } else {
                let body = read_balanced(chars, '(', ')');
                Some(WordPart::CommandSub {
                    body,
                    backtick: false,
                })
            }
        }
        c if c.is_ascii_digit() => {
            chars.next();
            Some(plain_param(c.to_string()))
        }
        c if c.is_ascii_alphabetic() || c == '_' => {
            let mut name = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    name.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            Some(plain_param(name))
        }
        c if is_special_param(c) => {
            chars.next();
            Some(plain_param(c.to_string()))
        }
        _ => None,
    }
}

fn plain_param(name: String) -> WordPart {
    WordPart::Param {
        name,
        op: None,
        word: None,
        braced: false,
    }
}

/// Read up to the bracket matching an already-consumed `open`, honouring
/// quotes and nesting. The closing bracket is consumed but not returned.
fn read_balanced(chars: &mut Peekable<Chars>, open: char, close: char) -> String {
    let mut depth = 1usize;
    let mut out = String::new();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' && q == '"' {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                    continue;
                }
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => {
                if c == '\\' {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                    continue;
                }
                if c == '\'' || c == '"' {
                    quote = Some(c);
                } else if c == open {
                    depth += 1;
                } else if c == close {
                    depth -= 1;
                    if depth == 0 {
                        return out;
                    }
                }
                out.push(c);
            }
        }
    }
    out
}

fn parse_braced_param(inner: &str) -> WordPart {
    if let Some(rest) = inner.strip_prefix('#') {
        if !rest.is_empty() && is_name(rest) {
            return WordPart::Param {
                name: rest.to_string(),
                op: Some(ParamOp::Length),
                word: None,
                braced: true,
            };
        }
    }

    let name_len = param_name_len(inner);
    let (name, rest) = inner.split_at(name_len);

    let (op, word) = if rest.is_empty() {
        (None, None)
    } else {
        let ops = [
            (":-", ParamOp::Default { colon: true }),
            (":=", ParamOp::Assign { colon: true }),
            (":+", ParamOp::Alternate { colon: true }),
            ("-", ParamOp::Default { colon: false }),
            ("=", ParamOp::Assign { colon: false }),
            ("+", ParamOp::Alternate { colon: false }),
        ];
        match ops.into_iter().find(|(prefix, _)| rest.starts_with(prefix)) {
            Some((prefix, op)) => (Some(op), Some(rest[prefix.len()..].to_string())),
            None => (Some(ParamOp::Other(rest.to_string())), None),
        }
    };

    WordPart::Param {
        name: name.to_string(),
        op,
        word,
        braced: true,
    }
}

fn param_name_len(text: &str) -> usize {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => text
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(text.len()),
        Some((_, c)) if c.is_ascii_digit() => text
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(text.len()),
        Some((_, c)) if is_special_param(c) => c.len_utf8(),
        _ => 0,
    }
}

/// Valid variable name (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Split text into raw words at unquoted whitespace, keeping quotes.
pub fn split_raw_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;
    let mut has_word = false;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' && q == '"' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => {
                if has_word {
                    words.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            None => {
                has_word = true;
                current.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else if c == '\'' || c == '"' {
                    quote = Some(c);
                } else if c == '$' && chars.peek() == Some(&'(') {
                    chars.next();
                    current.push('(');
                    current.push_str(&read_balanced(&mut chars, '(', ')'));
                    current.push(')');
                } else if c == '$' && chars.peek() == Some(&'{') {
                    chars.next();
                    current.push('{');
                    current.push_str(&read_balanced(&mut chars, '{', '}'));
                    current.push('}');
                }
            }
        }
    }
    if has_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> WordPart {
        WordPart::Literal(s.to_string())
    }

    #[test]
    fn test_plain_literal() {
        assert_eq!(lex_word("hello"), vec![lit("hello")]);
    }

    #[test]
    fn test_escape_kept_in_literal() {
        assert_eq!(lex_word(r"a\ b"), vec![lit(r"a\ b")]);
    }

    #[test]
    fn test_quotes_and_params() {
        let parts = lex_word(r#"pre'$x'"a $y"$z"#);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], lit("pre"));
        assert_eq!(parts[1], WordPart::SingleQuoted("$x".into()));
        match &parts[2] {
            WordPart::DoubleQuoted(inner) => {
                assert_eq!(inner[0], lit("a "));
                assert!(matches!(&inner[1], WordPart::Param { name, .. } if name == "y"));
            }
            other => panic!("expected double quoted, got {:?}", other),
        }
        assert!(matches!(&parts[3], WordPart::Param { name, braced: false, .. } if name == "z"));
    }

    #[test]
    fn test_braced_operators() {
        match &lex_word("${x:-a b}")[0] {
            WordPart::Param { name, op, word, .. } => {
                assert_eq!(name, "x");
                assert_eq!(op, &Some(ParamOp::Default { colon: true }));
                assert_eq!(word.as_deref(), Some("a b"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &lex_word("${#name}")[0] {
            WordPart::Param { op, .. } => assert_eq!(op, &Some(ParamOp::Length)),
            other => panic!("unexpected {:?}", other),
        }
        match &lex_word("${x/a/b}")[0] {
            WordPart::Param { op, .. } => {
                assert_eq!(op, &Some(ParamOp::Other("/a/b".into())))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_command_substitution_nesting() {
        let parts = lex_word("$(echo $(echo hi) ')')x");
        assert_eq!(
            parts[0],
            WordPart::CommandSub {
                body: "echo $(echo hi) ')'".into(),
                backtick: false
            }
        );
        assert_eq!(parts[1], lit("x"));
    }

    #[test]
    fn test_special_params() {
        for (raw, name) in [("$?", "?"), ("$$", "$"), ("$1", "1"), ("$@", "@"), ("$_", "_")] {
            match &lex_word(raw)[0] {
                WordPart::Param { name: n, .. } => assert_eq!(n, name),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_lone_dollar_is_literal() {
        assert_eq!(lex_word("a$"), vec![lit("a$")]);
        assert_eq!(lex_word("$ x"), vec![lit("$ x")]);
    }

    #[test]
    fn test_split_raw_words() {
        assert_eq!(
            split_raw_words(r#"$x != "a b" && -z $(echo  y)"#),
            vec!["$x", "!=", "\"a b\"", "&&", "-z", "$(echo  y)"]
        );
    }
}
