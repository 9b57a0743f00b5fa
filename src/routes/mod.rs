use serde_json::{Map, Value};

use crate::db::{Document, WriteBatch};

pub mod applications;
pub mod events;
pub mod forms;
pub mod hero;
pub mod members;
pub mod officers;
pub mod partners;
pub mod points;
pub mod reports;
pub mod settings;

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn filled(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Queues updates so `docs`, already in display order, end up with `order`
/// values 0..n. Documents already in place are left alone.
pub(crate) fn renumber_order(batch: &mut WriteBatch, collection: &str, docs: &[Document]) {
    for (position, doc) in docs.iter().enumerate() {
        if doc.field("order").and_then(Value::as_u64) == Some(position as u64) {
            continue;
        }
        let mut patch = Map::new();
        patch.insert("order".to_string(), Value::from(position as u64));
        batch.update_if_version(collection, &doc.id, patch, doc.version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WriteOp;
    use serde_json::json;

    #[test]
    fn renumber_only_touches_shifted_documents() {
        let docs: Vec<Document> = [("a", 0), ("c", 2), ("d", 3)]
            .into_iter()
            .map(|(id, order)| Document {
                id: id.to_string(),
                version: 1,
                data: json!({ "order": order }),
            })
            .collect();

        let mut batch = WriteBatch::new();
        renumber_order(&mut batch, "officers", &docs);

        let touched: Vec<(&str, Option<u64>)> = batch
            .ops()
            .iter()
            .map(|op| match op {
                WriteOp::Update { id, patch, .. } => (id.as_str(), patch["order"].as_u64()),
                _ => panic!("unexpected op"),
            })
            .collect();
        assert_eq!(touched, vec![("c", Some(1)), ("d", Some(2))]);
    }

    #[test]
    fn filled_trims_and_drops_blanks() {
        assert_eq!(filled(&Some("  x ".into())), Some("x".to_string()));
        assert_eq!(filled(&Some("   ".into())), None);
        assert_eq!(filled(&None), None);
    }
}
