//! Shared constants: names that appear in generated templates, archives and
//! the runtime environment of deployed functions.

pub const APP_NAME: &str = "stratus";

/// Length of the truncated content hash used in logical names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Name of the compiled executable inside the code archive.
pub const BINARY_NAME: &str = "bootstrap";

/// Runtime identifier for functions backed by a custom executable.
pub const FUNCTION_RUNTIME: &str = "provided.al2023";

pub const FUNCTION_RESOURCE_TYPE: &str = "AWS::Lambda::Function";
pub const ROLE_RESOURCE_TYPE: &str = "AWS::IAM::Role";
pub const CUSTOM_RESOURCE_TYPE: &str = "AWS::CloudFormation::CustomResource";

// Environment contract with deployed functions.
pub const ENV_DISCOVERY_INFO: &str = "STRATUS_DISCOVERY_INFO";
pub const ENV_LOG_LEVEL: &str = "STRATUS_LOG_LEVEL";
pub const ENV_HANDLER: &str = "STRATUS_HANDLER";
pub const ENV_BUILD_ID: &str = "STRATUS_BUILD_ID";

// Stack parameters.
pub const PARAM_CODE_BUCKET: &str = "CodeBucket";
pub const PARAM_CODE_KEY: &str = "CodeKey";
pub const PARAM_CODE_VERSION: &str = "CodeVersion";
pub const PARAM_SITE_ARCHIVE_KEY: &str = "SiteArchiveKey";
pub const PARAM_SITE_ARCHIVE_VERSION: &str = "SiteArchiveVersion";

// Stack outputs.
pub const OUTPUT_BUILD_ID: &str = "BuildID";
pub const OUTPUT_BUILD_TIME: &str = "BuildTime";

// Template metadata keys.
pub const META_CODE_ARCHIVE_PATH: &str = "CodeArchivePath";
pub const META_CODE_ARCHIVE_SHA256: &str = "CodeArchiveSha256";
pub const META_SITE_ARCHIVE_PATH: &str = "SiteArchivePath";
pub const META_SERVICE_NAME: &str = "ServiceName";
pub const META_S3_BUCKET: &str = "S3Bucket";
pub const META_BUILD_ID: &str = "BuildID";

// Stack tags.
pub const TAG_BUILD_ID: &str = "stratus:buildId";
pub const TAG_BUILD_TAGS: &str = "stratus:buildTags";

// Well-known hook context keys.
pub const CONTEXT_KEY_BUILD_ID: &str = "buildId";
pub const CONTEXT_KEY_BUILD_OUTPUT_DIR: &str = "buildOutputDir";
pub const CONTEXT_KEY_BUILD_BINARY_NAME: &str = "buildBinaryName";
