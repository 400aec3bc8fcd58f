use crate::tree::Tree;
use crate::workitem::Workitem;
use serde_json::Value;

/// Substitute `${...}` references against the workitem's fields.
///
/// `${x}` and `${f:x}` both read field `x`. Unknown fields render as the
/// empty string; non-string fields render as their JSON text.
pub fn substitute(text: &str, workitem: &Workitem) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                let key = key
                    .strip_prefix("field:")
                    .or_else(|| key.strip_prefix("f:"))
                    .unwrap_or(key);
                if let Some(value) = workitem.fields.get(key) {
                    match value {
                        Value::String(s) => out.push_str(s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference, keep it verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Truthiness of a condition result string.
pub fn truthy(s: &str) -> bool {
    !matches!(s.trim(), "" | "false" | "nil" | "null")
}

/// Evaluate a condition expression against a workitem.
///
/// The expression is substituted first; `a == b` and `a != b` compare the
/// trimmed sides, anything else is judged by [`truthy`].
pub fn eval_condition(expr: &str, workitem: &Workitem) -> bool {
    let expanded = substitute(expr, workitem);
    if let Some((left, right)) = expanded.split_once("==") {
        return left.trim() == right.trim();
    }
    if let Some((left, right)) = expanded.split_once("!=") {
        return left.trim() != right.trim();
    }
    truthy(&expanded)
}

/// Apply-time guard: `if` must hold and `unless` must not.
pub fn apply_allowed(tree: &Tree, workitem: &Workitem) -> bool {
    if let Some(cond) = tree.attribute_str("if") {
        if !eval_condition(&cond, workitem) {
            return false;
        }
    }
    if let Some(cond) = tree.attribute_str("unless") {
        if eval_condition(&cond, workitem) {
            return false;
        }
    }
    true
}
