//! Conditional expressions for `test`, `[` and `[[ ]]`.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ( ("||" | "-o") and )*
//! and     := not ( ("&&" | "-a") not )*
//! not     := "!" not | primary
//! primary := "(" or ")" | UNARY word | word BINARY word | word
//! ```

/// Operand syntax differences between `[[ ]]` and `test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `test` / `[`: exact string comparison.
    Posix,
    /// `[[ ]]`: the right side of `==`/`!=` is a glob pattern.
    Extended,
}

pub fn evaluate(args: &[String], dialect: Dialect) -> Result<bool, String> {
    if args.is_empty() {
        return Ok(false);
    }
    let mut parser = Parser {
        args,
        pos: 0,
        dialect,
    };
    let result = parser.or()?;
    match parser.peek() {
        None => Ok(result),
        Some(extra) => Err(format!("unexpected argument `{}`", extra)),
    }
}

struct Parser<'a> {
    args: &'a [String],
    pos: usize,
    dialect: Dialect,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).map(String::as_str)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a str> {
        self.args.get(self.pos + offset).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let arg = self.peek();
        if arg.is_some() {
            self.pos += 1;
        }
        arg
    }

    fn or(&mut self) -> Result<bool, String> {
        let mut value = self.and()?;
        while matches!(self.peek(), Some("||") | Some("-o")) {
            self.pos += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, String> {
        let mut value = self.not()?;
        while matches!(self.peek(), Some("&&") | Some("-a")) {
            self.pos += 1;
            let rhs = self.not()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not(&mut self) -> Result<bool, String> {
        // a lone `!` is a plain word
        if self.peek() == Some("!") && self.peek_at(1).is_some() {
            self.pos += 1;
            return Ok(!self.not()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        let first = self
            .next()
            .ok_or_else(|| "argument expected".to_string())?;

        if first == "(" {
            let value = self.or()?;
            return match self.next() {
                Some(")") => Ok(value),
                _ => Err("missing `)`".to_string()),
            };
        }

        if let Some(op) = self.peek().filter(|op| is_binary(op)) {
            if let Some(rhs) = self.peek_at(1) {
                self.pos += 2;
                return self.binary(first, op, rhs);
            }
        }

        match first {
            "-z" | "-n" => match self.next() {
                Some(operand) => Ok((first == "-z") == operand.is_empty()),
                None => Ok(true),
            },
            word => Ok(!word.is_empty()),
        }
    }

    fn binary(&self, lhs: &str, op: &str, rhs: &str) -> Result<bool, String> {
        let equal = || match self.dialect {
            Dialect::Posix => lhs == rhs,
            Dialect::Extended => glob_match(rhs, lhs),
        };
        match op {
            "=" | "==" => Ok(equal()),
            "!=" => Ok(!equal()),
            _ => {
                let l = integer(lhs)?;
                let r = integer(rhs)?;
                Ok(match op {
                    "-eq" => l == r,
                    "-ne" => l != r,
                    "-lt" => l < r,
                    "-le" => l <= r,
                    "-gt" => l > r,
                    _ => l >= r,
                })
            }
        }
    }
}

fn is_binary(op: &str) -> bool {
    matches!(
        op,
        "=" | "==" | "!=" | "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge"
    )
}

fn integer(text: &str) -> Result<i64, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse()
        .map_err(|_| format!("{}: integer expression expected", text))
}

/// Shell glob match supporting `*` and `?`; `\` escapes the next char.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // last `*` seen and the text position it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star, absorbed)) => {
                p = star + 1;
                t = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}
