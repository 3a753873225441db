//! Inbound evaluation request parsing.
//!
//! Request bodies are JSON objects of the form
//! `{"model_id": 7 | [7, 8] | "*", "dataset_name": "mnli-dev" | [...] | "*",
//!   "eval_server_id": "default", "reload_datasets": false}`.
//! At least one of `model_id` / `dataset_name` must be present.

use serde_json::Value;

use dynaeval_core::ModelId;

use crate::error::QueueError;

/// Which models a request names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelector {
    All,
    Ids(Vec<ModelId>),
}

/// Which datasets a request names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSelector {
    All,
    Names(Vec<String>),
}

/// A decoded evaluation request.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalRequest {
    pub model: Option<ModelSelector>,
    pub dataset: Option<DatasetSelector>,
    pub eval_server_id: String,
    pub reload_datasets: bool,
}

fn parse_model_selector(v: &Value) -> Result<ModelSelector, QueueError> {
    match v {
        Value::String(s) if s == "*" => Ok(ModelSelector::All),
        Value::Number(n) => n
            .as_i64()
            .map(|id| ModelSelector::Ids(vec![id]))
            .ok_or_else(|| QueueError::Parse(format!("model_id {n} is not an integer"))),
        Value::Array(items) => {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                let id = item
                    .as_i64()
                    .ok_or_else(|| QueueError::Parse(format!("model_id entry {item} is not an integer")))?;
                ids.push(id);
            }
            Ok(ModelSelector::Ids(ids))
        }
        other => Err(QueueError::Parse(format!("unsupported model_id: {other}"))),
    }
}

fn parse_dataset_selector(v: &Value) -> Result<DatasetSelector, QueueError> {
    match v {
        Value::String(s) if s == "*" => Ok(DatasetSelector::All),
        Value::String(s) => Ok(DatasetSelector::Names(vec![s.clone()])),
        Value::Array(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                let name = item
                    .as_str()
                    .ok_or_else(|| QueueError::Parse(format!("dataset_name entry {item} is not a string")))?;
                names.push(name.to_string());
            }
            Ok(DatasetSelector::Names(names))
        }
        other => Err(QueueError::Parse(format!("unsupported dataset_name: {other}"))),
    }
}

/// Parse a request body. Messages naming neither models nor datasets are
/// rejected here rather than silently producing an empty evaluation.
pub fn parse_request(body: &str) -> Result<EvalRequest, QueueError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| QueueError::Parse(format!("invalid JSON: {e}")))?;

    let obj = json
        .as_object()
        .ok_or_else(|| QueueError::Parse("request body is not a JSON object".into()))?;

    let model = obj
        .get("model_id")
        .filter(|v| !v.is_null())
        .map(parse_model_selector)
        .transpose()?;

    let dataset = obj
        .get("dataset_name")
        .filter(|v| !v.is_null())
        .map(parse_dataset_selector)
        .transpose()?;

    if model.is_none() && dataset.is_none() {
        return Err(QueueError::Parse(
            "request names neither model_id nor dataset_name".into(),
        ));
    }

    let eval_server_id = obj
        .get("eval_server_id")
        .and_then(|v| v.as_str())
        .unwrap_or("default")
        .to_string();

    let reload_datasets = obj
        .get("reload_datasets")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(EvalRequest {
        model,
        dataset,
        eval_server_id,
        reload_datasets,
    })
}
