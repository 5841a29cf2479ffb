//! Packaging: compiling the service binary and writing the archives.

mod archive;
mod toolchain;

use serde::Serialize;
use serde_json::{Value, json};

use crate::consts::{PARAM_CODE_BUCKET, PARAM_CODE_KEY, PARAM_CODE_VERSION};
use crate::template::expr;

pub use archive::{ArchiveError, CodeArchive, EntryPermission};
pub use toolchain::{CargoToolchain, CompileRequest, DEFAULT_TARGET, PrebuiltToolchain, Toolchain, ToolchainError};

/// Where function code is fetched from at deploy time.
///
/// Each field is a template expression, normally a reference to the code
/// stack parameters, so the same template works for any uploaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeLocation {
  pub bucket: Value,
  pub key: Value,
  pub version: Value,
}

impl CodeLocation {
  /// References to the `CodeBucket`, `CodeKey` and `CodeVersion` parameters.
  pub fn from_parameters() -> Self {
    Self {
      bucket: expr::reference(PARAM_CODE_BUCKET),
      key: expr::reference(PARAM_CODE_KEY),
      version: expr::reference(PARAM_CODE_VERSION),
    }
  }

  /// The `Code` property of a function resource.
  pub fn to_properties(&self) -> Value {
    json!({
      "S3Bucket": self.bucket,
      "S3Key": self.key,
      "S3ObjectVersion": self.version,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn code_properties_reference_parameters() {
    let props = CodeLocation::from_parameters().to_properties();
    assert_eq!(props["S3Bucket"], json!({"Ref": PARAM_CODE_BUCKET}));
    assert_eq!(props["S3Key"], json!({"Ref": PARAM_CODE_KEY}));
  }
}
