//! Graphviz rendering of a template's resource graph.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::template::{Template, expr};

/// Render `template` as a DOT digraph.
///
/// Every resource is a node labelled with its logical name and type.
/// `DependsOn` entries are drawn as solid edges and `Ref`/`GetAtt`/`Sub`
/// references from properties as dashed edges. References to parameters
/// and pseudo parameters are not drawn.
pub fn render_dot(template: &Template) -> String {
  let mut dot = String::from("digraph template {\n  rankdir=LR;\n  node [shape=box];\n");

  for (name, resource) in &template.resources {
    let _ = writeln!(
      dot,
      "  \"{}\" [label=\"{}\\n{}\"];",
      escape(name),
      escape(name),
      escape(&resource.resource_type)
    );
  }

  for (name, resource) in &template.resources {
    let depends: BTreeSet<&String> = resource.depends_on.iter().collect();
    for target in &depends {
      let _ = writeln!(dot, "  \"{}\" -> \"{}\";", escape(name), escape(target));
    }
    for target in expr::referenced_names(&resource.properties) {
      if target == *name || depends.contains(&target) || !template.resources.contains_key(&target) {
        continue;
      }
      let _ = writeln!(dot, "  \"{}\" -> \"{}\" [style=dashed];", escape(name), escape(&target));
    }
  }

  dot.push_str("}\n");
  dot
}

fn escape(text: &str) -> String {
  text.replace('\\', "\\\\").replace('"', "\\\"")
}
