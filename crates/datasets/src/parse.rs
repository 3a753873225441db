//! JSONL parsing and id-keyed alignment of labels and predictions.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::error::DatasetError;

/// One labelled example from a dataset file.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub uid: String,
    pub label: String,
}

/// One model prediction from a batch-transform output file.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub uid: String,
    pub label: String,
}

/// Well-known field names for example ids (tried in order).
const UID_KEYS: &[&str] = &["uid", "id", "example_id"];

/// Well-known field names for prediction values.
const PRED_KEYS: &[&str] = &["label", "prediction", "pred"];

fn field_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn probe<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

/// Parse a dataset line, reading the label from `label_field`.
pub fn parse_label_line(line: &str, label_field: &str) -> Result<LabeledExample, DatasetError> {
    let json: Value = serde_json::from_str(line)
        .map_err(|e| DatasetError::Parse(format!("invalid JSON line: {e}")))?;
    let obj = json
        .as_object()
        .ok_or_else(|| DatasetError::Parse("dataset line is not a JSON object".into()))?;

    let uid = probe(obj, UID_KEYS)
        .and_then(field_as_string)
        .ok_or_else(|| DatasetError::Parse("dataset line has no uid".into()))?;

    let label = obj
        .get(label_field)
        .and_then(field_as_string)
        .ok_or_else(|| DatasetError::Parse(format!("dataset line {uid} has no '{label_field}'")))?;

    Ok(LabeledExample { uid, label })
}

/// Parse a prediction line, probing the common prediction field names.
pub fn parse_prediction_line(line: &str) -> Result<Prediction, DatasetError> {
    let json: Value = serde_json::from_str(line)
        .map_err(|e| DatasetError::Parse(format!("invalid JSON line: {e}")))?;
    let obj = json
        .as_object()
        .ok_or_else(|| DatasetError::Parse("prediction line is not a JSON object".into()))?;

    let uid = probe(obj, UID_KEYS)
        .and_then(field_as_string)
        .ok_or_else(|| DatasetError::Parse("prediction line has no uid".into()))?;

    let label = probe(obj, PRED_KEYS)
        .and_then(field_as_string)
        .ok_or_else(|| DatasetError::Parse(format!("prediction {uid} has no label field")))?;

    Ok(Prediction { uid, label })
}

/// Align predictions to examples by uid, producing (target, prediction)
/// pairs in example order.
///
/// A count mismatch or a missing uid is an alignment error; it is reported
/// to the caller, never panicked over, so the failure stays contained at
/// the job boundary.
pub fn align(
    examples: &[LabeledExample],
    predictions: &[Prediction],
) -> Result<Vec<(String, String)>, DatasetError> {
    if examples.len() != predictions.len() {
        return Err(DatasetError::Alignment(format!(
            "{} examples but {} predictions",
            examples.len(),
            predictions.len()
        )));
    }

    let by_uid: HashMap<&str, &Prediction> =
        predictions.iter().map(|p| (p.uid.as_str(), p)).collect();
    if by_uid.len() != predictions.len() {
        warn!("duplicate uids in prediction file");
    }

    let mut pairs = Vec::with_capacity(examples.len());
    for example in examples {
        let prediction = by_uid.get(example.uid.as_str()).ok_or_else(|| {
            DatasetError::Alignment(format!("no prediction for example {}", example.uid))
        })?;
        pairs.push((example.label.clone(), prediction.label.clone()));
    }
    Ok(pairs)
}
