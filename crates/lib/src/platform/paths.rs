use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Overrides the data directory (stack registry, caches).
pub const DATA_DIR_ENV: &str = "STRATUS_DATA_DIR";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for data files for the application
///
/// `STRATUS_DATA_DIR` wins over the platform default.
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
    return PathBuf::from(dir);
  }
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
///
/// `STRATUS_DATA_DIR` wins over the platform default.
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
    return PathBuf::from(dir);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Directory holding one JSON record per applied stack.
pub fn stacks_dir() -> PathBuf {
  data_dir().join("stacks")
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn explicit_data_dir_takes_precedence() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, Some("/srv/stratus")),
        ("XDG_DATA_HOME", Some("/custom/data")),
      ],
      || {
        assert_eq!(data_dir(), PathBuf::from("/srv/stratus"));
        assert_eq!(stacks_dir(), PathBuf::from("/srv/stratus/stacks"));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_data_home_is_used() {
    temp_env::with_vars(
      [(DATA_DIR_ENV, None::<&str>), ("XDG_DATA_HOME", Some("/custom/data"))],
      || {
        assert_eq!(data_dir(), PathBuf::from("/custom/data").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, None::<&str>),
        ("XDG_DATA_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(data_dir(), PathBuf::from("/home/user/.local/share").join(APP_NAME));
      },
    );
  }
}
