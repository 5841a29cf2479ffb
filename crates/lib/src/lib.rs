//! stratus-lib: build and provision function-based services.
//!
//! A service is compiled into a single binary, packaged into archives and
//! described by one infrastructure template assembled from independently
//! generated fragments:
//! - `provision`: the staged build/provision workflow and its operations
//! - `execute`: the pipeline engine with reverse-order rollback
//! - `hooks`: named user callbacks at each extension point
//! - `template`: the template model, safe merging and annotation passes
//! - `remote`: the stack and identity APIs and their local implementations

pub mod consts;
pub mod describe;
pub mod execute;
pub mod hooks;
pub mod package;
pub mod platform;
pub mod provision;
pub mod remote;
pub mod service;
pub mod status;
pub mod template;
pub mod util;
