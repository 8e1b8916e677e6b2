//! Parses the four request `where` shapes (Hash / Operator / Logical /
//! Structured) into a [`super::RawFilter`].

use serde_json::Value;

use crate::error::Error;
use crate::Result;

use super::RawFilter;

/// Parse a request's `where` value. `null` (or absent) means "no filter".
pub fn parse_where(value: &Value) -> Result<Option<RawFilter>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) if map.contains_key("operator") => Ok(Some(parse_structured(map)?)),
        Value::Object(map) => Ok(Some(parse_hash(map)?)),
        Value::Array(items) => Ok(Some(parse_array(items)?)),
        other => Err(Error::invalid_input(format!(
            "where clause must be an object, array, or null, got {other}"
        ))),
    }
}

fn parse_hash(map: &serde_json::Map<String, Value>) -> Result<RawFilter> {
    let mut eqs = Vec::new();
    for (col, v) in map {
        eqs.push(match v {
            Value::Array(items) => RawFilter::In(col.clone(), items.iter().map(stringify).collect()),
            other => RawFilter::Eq(col.clone(), stringify(other)),
        });
    }
    if eqs.len() == 1 {
        Ok(eqs.into_iter().next().unwrap())
    } else {
        Ok(RawFilter::And(eqs))
    }
}

fn parse_array(items: &[Value]) -> Result<RawFilter> {
    let head = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_input("array where-clause must start with an operator string"))?;

    let upper = head.to_uppercase();
    if matches!(upper.as_str(), "AND" | "OR" | "NOT") {
        let children = items[1..]
            .iter()
            .map(|c| parse_where(c).map(|opt| opt.unwrap_or(RawFilter::And(vec![]))))
            .collect::<Result<Vec<_>>>()?;
        return Ok(match upper.as_str() {
            "AND" => RawFilter::And(children),
            "OR" => RawFilter::Or(children),
            _ => RawFilter::Not(Box::new(children.into_iter().next().ok_or_else(|| {
                Error::invalid_input("NOT requires exactly one child")
            })?)),
        });
    }

    parse_operator(&upper, &items[1..])
}

fn parse_structured(map: &serde_json::Map<String, Value>) -> Result<RawFilter> {
    let op = map
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_input("structured where-clause missing `operator`"))?
        .to_uppercase();

    if matches!(op.as_str(), "AND" | "OR" | "NOT") {
        let children: Vec<RawFilter> = map
            .get("children")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::invalid_input("AND/OR/NOT requires `children`"))?
            .iter()
            .map(|c| parse_where(c).map(|opt| opt.unwrap_or(RawFilter::And(vec![]))))
            .collect::<Result<_>>()?;
        return Ok(match op.as_str() {
            "AND" => RawFilter::And(children),
            "OR" => RawFilter::Or(children),
            _ => RawFilter::Not(Box::new(children.into_iter().next().ok_or_else(|| {
                Error::invalid_input("NOT requires exactly one child")
            })?)),
        });
    }

    let column = map
        .get("column")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_input("structured where-clause missing `column`"))?
        .to_string();
    let value = map.get("value").cloned().unwrap_or(Value::Null);
    build_condition(&op, column, value)
}

fn parse_operator(op: &str, rest: &[Value]) -> Result<RawFilter> {
    let column = rest
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_input("operator where-clause missing column"))?
        .to_string();

    let value = match rest.len() {
        0 | 1 => Value::Null,
        2 => rest[1].clone(),
        _ => Value::Array(rest[1..].to_vec()),
    };

    build_condition(op, column, value)
}

fn build_condition(op: &str, column: String, value: Value) -> Result<RawFilter> {
    Ok(match op {
        "=" | "==" => RawFilter::Eq(column, stringify(&value)),
        "!=" | "<>" => RawFilter::Neq(column, stringify(&value)),
        "<" => RawFilter::Lt(column, stringify(&value)),
        "<=" => RawFilter::Le(column, stringify(&value)),
        ">" => RawFilter::Gt(column, stringify(&value)),
        ">=" => RawFilter::Ge(column, stringify(&value)),
        "LIKE" => RawFilter::Like(column, stringify(&value)),
        "IN" => RawFilter::In(column, list_values(&value)?),
        "NOT IN" => RawFilter::Not(Box::new(RawFilter::In(column, list_values(&value)?))),
        "BETWEEN" => {
            let (lo, hi) = between_bounds(&value)?;
            RawFilter::And(vec![
                RawFilter::Ge(column.clone(), lo),
                RawFilter::Le(column, hi),
            ])
        }
        "NOT BETWEEN" => {
            let (lo, hi) = between_bounds(&value)?;
            RawFilter::Not(Box::new(RawFilter::And(vec![
                RawFilter::Ge(column.clone(), lo),
                RawFilter::Le(column, hi),
            ])))
        }
        "IS" => RawFilter::IsNull(column),
        "IS NOT" => RawFilter::IsNotNull(column),
        other => return Err(Error::invalid_input(format!("unknown operator: {other}"))),
    })
}

fn between_bounds(value: &Value) -> Result<(String, String)> {
    match value.as_array() {
        Some(items) if items.len() == 2 => Ok((stringify(&items[0]), stringify(&items[1]))),
        _ => Err(Error::invalid_input("BETWEEN requires a [lo, hi] value")),
    }
}

fn list_values(value: &Value) -> Result<Vec<String>> {
    match value.as_array() {
        Some(items) => Ok(items.iter().map(stringify).collect()),
        None => Err(Error::invalid_input("IN requires a list value")),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_shape_is_implicit_and() {
        let f = parse_where(&json!({"status": "active", "region": "us"}))
            .unwrap()
            .unwrap();
        assert_eq!(f.equality_keys().unwrap().len(), 2);
    }

    #[test]
    fn operator_shape_parses_comparison() {
        let f = parse_where(&json!(["=", "status", "active"])).unwrap().unwrap();
        assert_eq!(f, RawFilter::Eq("status".into(), "active".into()));
    }

    #[test]
    fn logical_shape_parses_and_or_not() {
        let f = parse_where(&json!(["AND", ["=", "a", "1"], ["=", "b", "2"]]))
            .unwrap()
            .unwrap();
        match f {
            RawFilter::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn structured_shape_parses_operator_and_children() {
        let f = parse_where(&json!({
            "operator": "OR",
            "children": [
                {"operator": "=", "column": "a", "value": "1"},
                {"operator": "=", "column": "b", "value": "2"}
            ]
        }))
        .unwrap()
        .unwrap();
        match f {
            RawFilter::Or(children) => assert_eq!(children.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn between_desugars_to_range_and() {
        let f = parse_where(&json!(["BETWEEN", "score", 10, 20])).unwrap().unwrap();
        match f {
            RawFilter::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn null_where_means_no_filter() {
        assert!(parse_where(&Value::Null).unwrap().is_none());
    }
}
