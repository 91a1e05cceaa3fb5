//! In-memory document sorting for the multi-location cursor (§4.5, §9:
//! "correctness over efficiency... a future optimization (merge-sorted
//! iteration) is documented as open; do not attempt it in v1").

use std::cmp::Ordering;

use serde_json::Value;

use crate::db::Document;

fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| a.partial_cmp(&b).unwrap_or(Ordering::Equal))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}

fn field_value<'a>(doc: &'a Document, field: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    doc.get(field).unwrap_or(&NULL)
}

/// Sorts `docs` by `spec`, a `{field: 1 | -1, ...}` document, applying
/// each key in insertion order as a secondary tiebreak.
pub fn sort_documents(docs: &mut [Document], spec: &Document) {
    let keys: Vec<(&String, bool)> = spec
        .iter()
        .map(|(field, direction)| (field, direction.as_i64().unwrap_or(1) < 0))
        .collect();

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let ordering = compare_values(field_value(a, field), field_value(b, field));
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn doc(y: i64) -> Document {
        json!({"y": y}).as_object().unwrap().clone()
    }

    #[test]
    fn sorts_ascending_and_descending() {
        let mut docs = vec![doc(3), doc(1), doc(2)];
        let spec: Document = json!({"y": 1}).as_object().unwrap().clone();
        sort_documents(&mut docs, &spec);
        let ys: Vec<_> = docs.iter().map(|d| d["y"].as_i64().unwrap()).collect();
        assert_eq!(ys, vec![1, 2, 3]);

        let spec: Document = json!({"y": -1}).as_object().unwrap().clone();
        sort_documents(&mut docs, &spec);
        let ys: Vec<_> = docs.iter().map(|d| d["y"].as_i64().unwrap()).collect();
        assert_eq!(ys, vec![3, 2, 1]);
    }
}
