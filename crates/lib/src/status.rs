//! Read-only stack status queries.

use serde_json::Value;
use tracing::debug;

use crate::execute::WorkflowError;
use crate::provision::describe_stack;
use crate::remote::{Session, StackDescription};
use crate::template::TemplateError;

/// Describe the service stack, masking the caller's account id in every
/// reported value when `redact` is set.
pub async fn stack_status(session: &Session, stack_name: &str, redact: bool) -> Result<StackDescription, WorkflowError> {
  let description = describe_stack(session, stack_name).await?;
  if !redact {
    return Ok(description);
  }
  let account_id = session.caller_account().await?;
  debug!(stack = %stack_name, "redacting account id");
  redact_account(description, &account_id)
}

/// Replace every occurrence of `account_id` with `*` of the same length.
pub fn redact_account(description: StackDescription, account_id: &str) -> Result<StackDescription, WorkflowError> {
  if account_id.is_empty() {
    return Ok(description);
  }
  let mask = "*".repeat(account_id.len());
  let mut value = serde_json::to_value(&description).map_err(TemplateError::from)?;
  mask_strings(&mut value, account_id, &mask);
  Ok(serde_json::from_value(value).map_err(TemplateError::from)?)
}

fn mask_strings(value: &mut Value, needle: &str, mask: &str) {
  match value {
    Value::String(text) if text.contains(needle) => *text = text.replace(needle, mask),
    Value::Array(items) => items.iter_mut().for_each(|item| mask_strings(item, needle, mask)),
    Value::Object(map) => map.values_mut().for_each(|item| mask_strings(item, needle, mask)),
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::{StackOutput, StackStatus};
  use chrono::Utc;
  use std::collections::BTreeMap;

  fn description() -> StackDescription {
    StackDescription {
      stack_id: "arn:aws:local:us-east-1:123456789012:stack/svc".to_string(),
      stack_name: "svc".to_string(),
      description: Some("svc".to_string()),
      status: StackStatus::CreateComplete,
      status_reason: None,
      created_at: Utc::now(),
      updated_at: None,
      parameters: BTreeMap::from([("CodeBucket".to_string(), "bucket".to_string())]),
      tags: BTreeMap::new(),
      outputs: vec![StackOutput {
        key: "RoleArn".to_string(),
        value: "arn:aws:iam::123456789012:role/x".to_string(),
        export_name: Some("svc-123456789012".to_string()),
      }],
    }
  }

  #[test]
  fn account_id_is_masked_everywhere() {
    let redacted = redact_account(description(), "123456789012").unwrap();
    assert_eq!(redacted.stack_id, "arn:aws:local:us-east-1:************:stack/svc");
    assert_eq!(redacted.outputs[0].value, "arn:aws:iam::************:role/x");
    assert_eq!(redacted.outputs[0].export_name.as_deref(), Some("svc-************"));
    assert_eq!(redacted.parameters["CodeBucket"], "bucket");
  }

  #[test]
  fn empty_account_leaves_values() {
    let original = description();
    let redacted = redact_account(original.clone(), "").unwrap();
    assert_eq!(redacted, original);
  }
}
