//! Execution role requirements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::consts::ROLE_RESOURCE_TYPE;
use crate::template::Resource;
use crate::util::hash::{HashError, Hashable};

/// Role logical name or literal name -> identifier expression.
///
/// Inline roles map to `Fn::GetAtt [name, Arn]`, literal roles to the ARN
/// returned by the identity API.
pub type RoleMap = BTreeMap<String, Value>;

/// Managed policy attached to every generated role.
const BASIC_EXECUTION_POLICY: &str = "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// The role a function runs as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleRequirement {
  /// A pre-existing role name or ARN, verified through the identity API.
  Literal(String),
  /// A role declared in the template.
  Inline(RoleDefinition),
}

impl Default for RoleRequirement {
  fn default() -> Self {
    RoleRequirement::Inline(RoleDefinition::default())
  }
}

impl RoleRequirement {
  /// Key of this requirement in the [`RoleMap`].
  pub fn key(&self, service_name: &str) -> Result<String, HashError> {
    match self {
      RoleRequirement::Literal(name) => Ok(name.clone()),
      RoleRequirement::Inline(definition) => definition.logical_name(service_name),
    }
  }
}

/// A single policy statement granted to an inline role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Privilege {
  pub actions: Vec<String>,
  #[serde(default = "any_resource")]
  pub resource: Value,
}

fn any_resource() -> Value {
  Value::String("*".to_string())
}

/// An inline role definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
  #[serde(default)]
  pub privileges: Vec<Privilege>,
  #[serde(default)]
  pub managed_policy_arns: Vec<String>,
}

#[derive(Serialize)]
struct RoleIdentity<'a> {
  service: &'a str,
  definition: &'a RoleDefinition,
}

impl Hashable for RoleIdentity<'_> {}

impl RoleDefinition {
  /// Content-derived logical name.
  ///
  /// Two functions of the same service with equal definitions share one
  /// role resource, and an unchanged definition keeps its name across builds.
  pub fn logical_name(&self, service_name: &str) -> Result<String, HashError> {
    let hash = RoleIdentity {
      service: service_name,
      definition: self,
    }
    .compute_hash()?;
    Ok(format!("IAMRole{}", hash))
  }

  pub fn to_resource(&self) -> Resource {
    let mut statements = vec![json!({
      "Effect": "Allow",
      "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
      "Resource": "arn:aws:logs:*:*:*",
    })];
    statements.extend(self.privileges.iter().map(|privilege| {
      json!({
        "Effect": "Allow",
        "Action": privilege.actions,
        "Resource": privilege.resource,
      })
    }));

    let mut managed = vec![BASIC_EXECUTION_POLICY.to_string()];
    managed.extend(self.managed_policy_arns.iter().cloned());
    managed.dedup();

    Resource::new(
      ROLE_RESOURCE_TYPE,
      json!({
        "AssumeRolePolicyDocument": {
          "Version": "2012-10-17",
          "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": ["lambda.amazonaws.com"]},
            "Action": ["sts:AssumeRole"],
          }],
        },
        "ManagedPolicyArns": managed,
        "Policies": [{
          "PolicyName": "FunctionPolicy",
          "PolicyDocument": {"Version": "2012-10-17", "Statement": statements},
        }],
      }),
    )
  }
}
