//! Intrinsic function expressions.
//!
//! Template values that reference other resources are encoded as single-key
//! JSON objects (`{"Ref": "Name"}`, `{"Fn::GetAtt": ["Name", "Arn"]}`). These
//! helpers build them and walk them back out for dependency analysis.

use std::collections::BTreeSet;

use serde_json::{Value, json};

pub fn reference(name: &str) -> Value {
  json!({ "Ref": name })
}

pub fn get_att(name: &str, attribute: &str) -> Value {
  json!({ "Fn::GetAtt": [name, attribute] })
}

pub fn sub(body: &str) -> Value {
  json!({ "Fn::Sub": body })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
  json!({ "Fn::Join": [delimiter, parts] })
}

/// Pseudo parameters provided by the stack API; never resource names.
const PSEUDO_PREFIX: &str = "AWS::";

/// Collect the logical names referenced by `Ref`, `Fn::GetAtt` and
/// `${Name}` / `${Name.Attr}` placeholders inside `Fn::Sub` bodies.
pub fn referenced_names(value: &Value) -> BTreeSet<String> {
  let mut names = BTreeSet::new();
  walk(value, &mut names);
  names
}

fn walk(value: &Value, names: &mut BTreeSet<String>) {
  match value {
    Value::Object(map) => {
      if map.len() == 1 {
        if let Some(Value::String(name)) = map.get("Ref") {
          insert_name(name, names);
          return;
        }
        if let Some(Value::Array(args)) = map.get("Fn::GetAtt")
          && let Some(Value::String(name)) = args.first()
        {
          insert_name(name, names);
          return;
        }
        if let Some(body) = map.get("Fn::Sub") {
          match body {
            Value::String(text) => sub_placeholders(text, names),
            Value::Array(args) => {
              if let Some(Value::String(text)) = args.first() {
                sub_placeholders(text, names);
              }
              for arg in args.iter().skip(1) {
                walk(arg, names);
              }
            }
            _ => {}
          }
          return;
        }
      }
      for nested in map.values() {
        walk(nested, names);
      }
    }
    Value::Array(items) => {
      for item in items {
        walk(item, names);
      }
    }
    _ => {}
  }
}

fn sub_placeholders(text: &str, names: &mut BTreeSet<String>) {
  let mut rest = text;
  while let Some(start) = rest.find("${") {
    let after = &rest[start + 2..];
    let Some(end) = after.find('}') else {
      break;
    };
    let inner = &after[..end];
    // `${!Literal}` is an escape, not a reference.
    if !inner.starts_with('!') {
      let name = inner.split('.').next().unwrap_or(inner);
      insert_name(name, names);
    }
    rest = &after[end + 1..];
  }
}

fn insert_name(name: &str, names: &mut BTreeSet<String>) {
  if !name.is_empty() && !name.starts_with(PSEUDO_PREFIX) {
    names.insert(name.to_string());
  }
}
