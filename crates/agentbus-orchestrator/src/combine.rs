use serde_json::{json, Value};
use std::cmp::Ordering;

/// A successful agent answer waiting to be merged.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub agent_id: String,
    pub score: f32,
    /// Registration order with the broker; unknown agents sort last.
    pub order: u64,
    pub payload: Value,
}

/// Merge successful answers into one payload.
///
/// A single contribution is passed through untouched. Several become
/// `{"sections": [{agent, score, payload}], "text": ...}` ordered by score
/// (highest first), then registration order, then agent id.
pub fn combine(mut contributions: Vec<Contribution>) -> Value {
    if contributions.len() == 1 {
        if let Some(only) = contributions.pop() {
            return only.payload;
        }
    }
    contributions.sort_by(compare);

    let text = contributions
        .iter()
        .filter_map(|c| text_of(&c.payload))
        .collect::<Vec<_>>()
        .join("\n\n");
    let sections: Vec<Value> = contributions
        .into_iter()
        .map(|c| {
            json!({
                "agent": c.agent_id,
                "score": c.score,
                "payload": c.payload,
            })
        })
        .collect();

    json!({ "sections": sections, "text": text })
}

fn compare(a: &Contribution, b: &Contribution) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.order.cmp(&b.order))
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}

/// Human-readable part of a payload: a bare string, or its `text`/`answer` field.
fn text_of(payload: &Value) -> Option<String> {
    let text = match payload {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["text", "answer"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str)),
        _ => None,
    };
    text.filter(|s| !s.trim().is_empty()).map(str::to_string)
}
