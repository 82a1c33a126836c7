//! Brace expansion of unquoted literal text.
//!
//! `brush_parser` splits a literal into text and `{...}` members; we only
//! enumerate the alternatives. `a{1,2}` -> `a1 a2`, `{1..5..2}` -> `1 3 5`.

use brush_parser::word::{BraceExpressionMember, BraceExpressionOrText};
use itertools::Itertools;

/// Expansions that would produce more words than this are left as text.
const MAX_ALTERNATIVES: usize = 10_000;

/// Expand every brace expression in `text`; text without one, or with one
/// too large to enumerate, comes back unchanged as a single alternative.
pub fn expand(text: &str) -> Vec<String> {
    if !has_brace_candidate(text) {
        return vec![text.to_string()];
    }
    let options = brush_parser::ParserOptions::default();
    match brush_parser::word::parse_brace_expansions(text, &options) {
        Ok(Some(pieces)) => combine(pieces).unwrap_or_else(|| vec![text.to_string()]),
        Ok(None) | Err(_) => vec![text.to_string()],
    }
}

fn has_brace_candidate(text: &str) -> bool {
    // the brace parser cannot represent numbers past i64
    let oversized_number = text
        .split(|c: char| !c.is_ascii_digit())
        .any(|run| !run.is_empty() && run.parse::<i64>().is_err());
    if oversized_number {
        return false;
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(open), Some(close)) if open < close => {
            let inner = &text[open..close];
            inner.contains(',') || inner.contains("..")
        }
        _ => false,
    }
}

fn combine(pieces: Vec<BraceExpressionOrText>) -> Option<Vec<String>> {
    let lists = pieces
        .into_iter()
        .map(alternatives)
        .collect::<Option<Vec<_>>>()?;
    lists.iter().try_fold(1usize, |total, list| {
        total
            .checked_mul(list.len())
            .filter(|n| *n <= MAX_ALTERNATIVES)
    })?;
    Some(
        lists
            .into_iter()
            .multi_cartesian_product()
            .map(|parts| parts.concat())
            .collect(),
    )
}

fn alternatives(piece: BraceExpressionOrText) -> Option<Vec<String>> {
    match piece {
        BraceExpressionOrText::Text(text) => Some(vec![text]),
        BraceExpressionOrText::Expr(members) => {
            let mut all = Vec::new();
            for m in members {
                all.extend(member(m)?);
                if all.len() > MAX_ALTERNATIVES {
                    return None;
                }
            }
            Some(all)
        }
    }
}

fn member(member: BraceExpressionMember) -> Option<Vec<String>> {
    match member {
        BraceExpressionMember::NumberSequence {
            start,
            end,
            increment,
        } => Some(
            sequence(start, end, increment)?
                .into_iter()
                .map(|n| n.to_string())
                .collect(),
        ),
        BraceExpressionMember::CharSequence {
            start,
            end,
            increment,
        } => Some(
            sequence(i64::from(u32::from(start)), i64::from(u32::from(end)), increment)?
                .into_iter()
                .filter_map(|n| u32::try_from(n).ok().and_then(char::from_u32))
                .map(String::from)
                .collect(),
        ),
        BraceExpressionMember::Child(pieces) => combine(pieces),
    }
}

/// Inclusive walk from `start` towards `end`; the sign of `step` is ignored.
/// `None` when the walk is longer than [`MAX_ALTERNATIVES`].
fn sequence(start: i64, end: i64, step: i64) -> Option<Vec<i64>> {
    let (start, end) = (i128::from(start), i128::from(end));
    let step = i128::from(step).abs().max(1);
    let count = (end - start).abs() / step + 1;
    if count > MAX_ALTERNATIVES as i128 {
        return None;
    }
    let step = if start <= end { step } else { -step };
    Some(
        (0..count)
            .filter_map(|i| i64::try_from(start + i * step).ok())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_with_prefix() {
        assert_eq!(expand("a{1,2}"), vec!["a1", "a2"]);
    }

    #[test]
    fn test_numeric_and_char_ranges() {
        assert_eq!(expand("{1..5..2}"), vec!["1", "3", "5"]);
        assert_eq!(expand("{3..1}"), vec!["3", "2", "1"]);
        assert_eq!(expand("{a..c}"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_nested_and_product() {
        assert_eq!(expand("{a,b}{x,y}"), vec!["ax", "ay", "bx", "by"]);
        assert_eq!(expand("{a,{b,c}}"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_extreme_ranges_stay_literal() {
        let wide = "{-1..9223372036854775807..4611686018427387904}";
        assert_eq!(
            expand(wide),
            vec!["-1", "4611686018427387903", "9223372036854775807"]
        );
        // past i64: the range is not a sequence at all
        assert_eq!(expand("{1..99999999999999999999}"), vec!["{1..99999999999999999999}"]);

        assert_eq!(expand("{1..99999999999}"), vec!["{1..99999999999}"]);
        assert_eq!(expand("{1..200}{1..200}"), vec!["{1..200}{1..200}"]);
        assert_eq!(expand("{1..100}{1..100}").len(), MAX_ALTERNATIVES);
    }

    #[test]
    fn test_no_expansion() {
        assert_eq!(expand("plain"), vec!["plain"]);
        assert_eq!(expand("{single}"), vec!["{single}"]);
        assert_eq!(expand("}a,b{"), vec!["}a,b{"]);
    }
}
