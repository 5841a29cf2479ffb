//! Collision-checked merging of template fragments.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::{Template, TemplateError};

/// The template section a conflicting logical name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSection {
  Parameters,
  Resources,
  Outputs,
  Metadata,
}

impl fmt::Display for TemplateSection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TemplateSection::Parameters => "Parameters",
      TemplateSection::Resources => "Resources",
      TemplateSection::Outputs => "Outputs",
      TemplateSection::Metadata => "Metadata",
    };
    f.write_str(name)
  }
}

/// A logical name declared twice with different content.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
  pub section: TemplateSection,
  pub logical_name: String,
  pub existing: Value,
  pub incoming: Value,
}

impl fmt::Display for MergeConflict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}.{}: existing {} conflicts with incoming {}",
      self.section, self.logical_name, self.existing, self.incoming
    )
  }
}

impl Template {
  /// Merge `fragment` into this template.
  ///
  /// Every logical name in the fragment is checked before anything is
  /// inserted: either the whole fragment is merged or the template is left
  /// untouched and all conflicts are returned together. Identical
  /// redeclarations are accepted. The fragment's description is ignored.
  pub fn safe_merge(&mut self, fragment: Template) -> Result<(), TemplateError> {
    let mut conflicts = Vec::new();
    collect_conflicts(TemplateSection::Parameters, &self.parameters, &fragment.parameters, &mut conflicts);
    collect_conflicts(TemplateSection::Resources, &self.resources, &fragment.resources, &mut conflicts);
    collect_conflicts(TemplateSection::Outputs, &self.outputs, &fragment.outputs, &mut conflicts);
    collect_conflicts(TemplateSection::Metadata, &self.metadata, &fragment.metadata, &mut conflicts);

    if !conflicts.is_empty() {
      return Err(TemplateError::MergeConflicts(conflicts));
    }

    self.parameters.extend(fragment.parameters);
    self.resources.extend(fragment.resources);
    self.outputs.extend(fragment.outputs);
    self.metadata.extend(fragment.metadata);
    Ok(())
  }
}

fn collect_conflicts<T: PartialEq + Serialize>(
  section: TemplateSection,
  existing: &BTreeMap<String, T>,
  incoming: &BTreeMap<String, T>,
  conflicts: &mut Vec<MergeConflict>,
) {
  for (name, candidate) in incoming {
    if let Some(current) = existing.get(name)
      && current != candidate
    {
      conflicts.push(MergeConflict {
        section,
        logical_name: name.clone(),
        existing: serde_json::to_value(current).unwrap_or(Value::Null),
        incoming: serde_json::to_value(candidate).unwrap_or(Value::Null),
      });
    }
  }
}
