//! Remote key derivation.

use std::path::Path;

/// Default separator between host name and local path.
pub const DEFAULT_SEPARATOR: &str = ":";

/// Suffix of the directory index object stored next to every file.
const INDEX_SUFFIX: &str = "-listdir.json";

/// Maps local paths to remote keys: `<prefix><host><separator><absolute path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    prefix: String,
    host: String,
    separator: String,
}

impl KeyScheme {
    pub fn new(
        prefix: impl Into<String>,
        host: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            host: host.into(),
            separator: separator.into(),
        }
    }

    /// Uses this machine's host name, or `host_override` when given.
    pub fn for_this_host(prefix: &str, host_override: Option<&str>, separator: &str) -> Self {
        let host = match host_override {
            Some(name) => name.to_string(),
            None => local_hostname(),
        };
        Self::new(prefix, host, separator)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote key of `path`. Relative paths are made absolute against the
    /// current directory; symlinks are not resolved.
    ///
    /// Fails with `InvalidData` for paths that are not valid UTF-8.
    pub fn key_for(&self, path: &Path) -> std::io::Result<String> {
        let absolute = std::path::absolute(path)?;
        let Some(absolute) = absolute.to_str() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "path is not valid UTF-8",
            ));
        };
        Ok(format!(
            "{}{}{}{}",
            self.prefix, self.host, self.separator, absolute
        ))
    }

    /// Key of the directory index object belonging to `remote_key`.
    pub fn index_key(remote_key: &str) -> String {
        format!("{remote_key}{INDEX_SUFFIX}")
    }
}

/// Host name of this machine, `localhost` if it cannot be read.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".into())
}
