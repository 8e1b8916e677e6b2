//! Filter Tree.
//!
//! A closed sum type of condition nodes, parsed from any of the four
//! request shapes (Hash / Operator / Logical / Structured) and resolved
//! against a header once so row evaluation never does a per-row name
//! lookup. Grounded on `query/engine.rs`'s predicate evaluator,
//! generalized from CQL's typed-column predicates to plain string
//! columns and widened with an explicit `column → index` resolution
//! pass that avoids a vtable dispatch per node by resolving column
//! indices ahead of time.

mod parse;

pub use parse::parse_where;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::scanner::Header;

/// A condition tree with column names still unresolved. Produced by
/// [`parse_where`] directly from a request's JSON `where` value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFilter {
    Eq(String, String),
    Neq(String, String),
    Lt(String, String),
    Le(String, String),
    Gt(String, String),
    Ge(String, String),
    Like(String, String),
    In(String, Vec<String>),
    IsNull(String),
    IsNotNull(String),
    And(Vec<RawFilter>),
    Or(Vec<RawFilter>),
    Not(Box<RawFilter>),
}

/// The same tree with every column name resolved to a position in a
/// specific [`Header`] (or `None` for a column the header doesn't have;
/// unknown columns evaluate to false except under IS NULL).
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(Option<usize>, String),
    Neq(Option<usize>, String),
    Lt(Option<usize>, String),
    Le(Option<usize>, String),
    Gt(Option<usize>, String),
    Ge(Option<usize>, String),
    Like(Option<usize>, String),
    In(Option<usize>, Vec<String>),
    IsNull(Option<usize>),
    IsNotNull(Option<usize>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl RawFilter {
    /// Resolve every column name against `header`.
    pub fn resolve(&self, header: &Header) -> Filter {
        let r = |c: &str| header.position(c);
        match self {
            RawFilter::Eq(c, v) => Filter::Eq(r(c), v.clone()),
            RawFilter::Neq(c, v) => Filter::Neq(r(c), v.clone()),
            RawFilter::Lt(c, v) => Filter::Lt(r(c), v.clone()),
            RawFilter::Le(c, v) => Filter::Le(r(c), v.clone()),
            RawFilter::Gt(c, v) => Filter::Gt(r(c), v.clone()),
            RawFilter::Ge(c, v) => Filter::Ge(r(c), v.clone()),
            RawFilter::Like(c, v) => Filter::Like(r(c), v.clone()),
            RawFilter::In(c, vs) => Filter::In(r(c), vs.clone()),
            RawFilter::IsNull(c) => Filter::IsNull(r(c)),
            RawFilter::IsNotNull(c) => Filter::IsNotNull(r(c)),
            RawFilter::And(children) => Filter::And(children.iter().map(|c| c.resolve(header)).collect()),
            RawFilter::Or(children) => Filter::Or(children.iter().map(|c| c.resolve(header)).collect()),
            RawFilter::Not(child) => Filter::Not(Box::new(child.resolve(header))),
        }
    }

    /// If this tree is a single equality or an AND of equalities over
    /// distinct columns, return `column → literal`. Drives index
    /// selection — deliberately only recognizes the shape index
    /// selection cares about; any other node (OR, NOT, range, LIKE, …)
    /// makes the whole tree ineligible.
    pub fn equality_keys(&self) -> Option<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        if collect_equalities(self, &mut out) {
            Some(out)
        } else {
            None
        }
    }
}

fn collect_equalities(filter: &RawFilter, out: &mut BTreeMap<String, String>) -> bool {
    match filter {
        RawFilter::Eq(c, v) => out.insert(c.to_lowercase(), v.clone()).is_none(),
        RawFilter::And(children) => children.iter().all(|c| collect_equalities(c, out)),
        _ => false,
    }
}

/// A single CSV row's fields, already overlay-merged, indexed by
/// pre-resolved column position.
pub type RowView<'a> = [&'a str];

impl Filter {
    pub fn evaluate(&self, row: &RowView) -> bool {
        match self {
            Filter::Eq(col, v) => cell(row, *col).is_some_and(|c| values_eq(c, v)),
            Filter::Neq(col, v) => cell(row, *col).is_some_and(|c| !values_eq(c, v)),
            Filter::Lt(col, v) => cell(row, *col).is_some_and(|c| compare_values(c, v) == Ordering::Less),
            Filter::Le(col, v) => {
                cell(row, *col).is_some_and(|c| compare_values(c, v) != Ordering::Greater)
            }
            Filter::Gt(col, v) => cell(row, *col).is_some_and(|c| compare_values(c, v) == Ordering::Greater),
            Filter::Ge(col, v) => {
                cell(row, *col).is_some_and(|c| compare_values(c, v) != Ordering::Less)
            }
            Filter::Like(col, pattern) => cell(row, *col).is_some_and(|c| like_match(c, pattern)),
            Filter::In(col, values) => {
                cell(row, *col).is_some_and(|c| values.iter().any(|v| values_eq(c, v)))
            }
            Filter::IsNull(col) => is_null(row, *col),
            Filter::IsNotNull(col) => !is_null(row, *col),
            Filter::And(children) => children.iter().all(|c| c.evaluate(row)),
            Filter::Or(children) => children.iter().any(|c| c.evaluate(row)),
            Filter::Not(child) => !child.evaluate(row),
        }
    }
}

fn cell<'a>(row: &RowView<'a>, col: Option<usize>) -> Option<&'a str> {
    col.and_then(|i| row.get(i).copied())
}

fn is_null(row: &RowView, col: Option<usize>) -> bool {
    match cell(row, col) {
        None => true,
        Some(v) => v.is_empty() || v == "NULL",
    }
}

/// Numeric comparison when both sides parse as a number, lexicographic
/// byte comparison otherwise.
fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

/// Strictly lexicographic equality, no numeric normalization — an
/// index's covered-equality lookup compares raw key bytes, so `Eq`/`Neq`/
/// `In` must agree with that exact-byte comparison rather than the
/// numeric-aware ordering `<`/`<=`/`>`/`>=` use.
fn values_eq(a: &str, b: &str) -> bool {
    a == b
}

/// SQL-style `LIKE`: `%` matches any run of characters, `_` matches
/// exactly one, ASCII case-insensitive.
fn like_match(value: &str, pattern: &str) -> bool {
    let v: Vec<u8> = value.bytes().map(|b| b.to_ascii_lowercase()).collect();
    let p: Vec<u8> = pattern.bytes().map(|b| b.to_ascii_lowercase()).collect();
    glob_match(&v, &p)
}

fn glob_match(value: &[u8], pattern: &[u8]) -> bool {
    // Iterative two-pointer match with backtracking on the last '%'.
    let (mut vi, mut pi) = (0usize, 0usize);
    let (mut star_p, mut star_v) = (None, 0usize);

    while vi < value.len() {
        if pi < pattern.len() && (pattern[pi] == b'_' || pattern[pi] == value[vi]) {
            vi += 1;
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == b'%' {
            star_p = Some(pi);
            star_v = vi;
            pi += 1;
        } else if let Some(sp) = star_p {
            pi = sp + 1;
            star_v += 1;
            vi = star_v;
        } else {
            return false;
        }
    }
    while pi < pattern.len() && pattern[pi] == b'%' {
        pi += 1;
    }
    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Header;

    fn header(cols: &[&str]) -> Header {
        let line = format!("{}\n", cols.join(","));
        Header::parse(line.as_bytes(), b',').unwrap()
    }

    #[test]
    fn equality_keys_recognizes_and_of_equalities() {
        let f = RawFilter::And(vec![
            RawFilter::Eq("t".into(), "x".into()),
            RawFilter::Eq("v".into(), "20".into()),
        ]);
        let keys = f.equality_keys().unwrap();
        assert_eq!(keys.get("t").unwrap(), "x");
        assert_eq!(keys.get("v").unwrap(), "20");
    }

    #[test]
    fn equality_keys_rejects_or_and_range() {
        assert!(RawFilter::Or(vec![RawFilter::Eq("a".into(), "1".into())])
            .equality_keys()
            .is_none());
        assert!(RawFilter::Gt("a".into(), "1".into()).equality_keys().is_none());
    }

    #[test]
    fn unknown_column_is_false_except_is_null() {
        let h = header(&["id", "status"]);
        let eq = RawFilter::Eq("nope".into(), "x".into()).resolve(&h);
        let is_null = RawFilter::IsNull("nope".into()).resolve(&h);
        let row = ["1", "active"];
        assert!(!eq.evaluate(&row));
        assert!(is_null.evaluate(&row));
    }

    #[test]
    fn numeric_comparison_overrides_lexicographic_ordering() {
        // Lexicographically "10" < "9", but both parse as numbers so the
        // numeric rule (10 > 9) applies.
        let h = header(&["id", "score"]);
        let gt = RawFilter::Gt("score".into(), "9".into()).resolve(&h);
        assert!(gt.evaluate(&["1", "10"]));
        let lt = RawFilter::Lt("score".into(), "9".into()).resolve(&h);
        assert!(!lt.evaluate(&["1", "10"]));
    }

    #[test]
    fn equality_stays_lexicographic_despite_numeric_parse() {
        // "007" and "7" parse as the same number, but Eq/Neq must compare
        // raw bytes so they agree with an index's exact-byte key lookup.
        let h = header(&["id", "code"]);
        let eq = RawFilter::Eq("code".into(), "7".into()).resolve(&h);
        assert!(!eq.evaluate(&["1", "007"]));
        let neq = RawFilter::Neq("code".into(), "7".into()).resolve(&h);
        assert!(neq.evaluate(&["1", "007"]));
        let in_filter = RawFilter::In("code".into(), vec!["7".into()]).resolve(&h);
        assert!(!in_filter.evaluate(&["1", "007"]));
    }

    #[test]
    fn like_supports_percent_and_underscore() {
        assert!(like_match("hello world", "%WORLD"));
        assert!(like_match("hello", "h_llo"));
        assert!(!like_match("hello", "h_llx"));
        assert!(like_match("anything", "%"));
    }

    #[test]
    fn is_null_matches_absent_empty_and_literal_null() {
        let h = header(&["a", "b", "c"]);
        let na = RawFilter::IsNull("a".into()).resolve(&h);
        assert!(na.evaluate(&["", "x", "NULL"]));
        assert!(!na.evaluate(&["present", "x", "y"]));
        let nc = RawFilter::IsNull("c".into()).resolve(&h);
        assert!(nc.evaluate(&["present", "x", "NULL"]));
    }
}
