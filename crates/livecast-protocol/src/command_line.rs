//! Building transcoder command lines.
//!
//! The command line is the only record of what a transcoder process is
//! doing: it carries `-metadata key=value` tags that the scheduler reads
//! back from the process table on later runs.
//!
//! Format:
//!
//! ```text
//! <exe> <input> <output> -metadata k1=v1 -metadata k2=v2 >> <target> 2>&1 &
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use livecast_core::{is_shell_safe, shell_quote, BroadcastId, ChannelId};
use thiserror::Error;

/// Flag preceding every tag on the command line.
pub const METADATA_FLAG: &str = "-metadata";

/// Tag carrying the broadcast id.
pub const TAG_BROADCAST_ID: &str = "broadcast_id";

/// Tag carrying the channel id.
pub const TAG_CHANNEL_ID: &str = "channel_id";

/// Tag carrying the deployment environment.
pub const TAG_ENVIRONMENT: &str = "env";

/// Default prefix for transcoder log files.
pub const DEFAULT_LOG_PREFIX: &str = "livebroadcaster";

/// Output sink when no log directory is configured.
pub const DEV_NULL: &str = "/dev/null";

// ============================================================================
// Tags
// ============================================================================

/// Errors raised when a tag cannot be embedded in a command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    /// Keys must be non-empty and made of letters, digits, `_`, `-` and `.`.
    #[error("invalid tag key: {0:?}")]
    InvalidKey(String),

    /// Values are written unquoted, so they must be free of whitespace and
    /// shell metacharacters.
    #[error("invalid value for tag {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Ordered `key=value` tags.
///
/// Order is insertion order, not key order: the command line reproduces tags
/// exactly in the order callers supply them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags identifying one (broadcast, channel) stream.
    pub fn for_stream(broadcast_id: BroadcastId, channel_id: ChannelId) -> Self {
        let mut tags = Self::new();
        tags.push(TAG_BROADCAST_ID, broadcast_id);
        tags.push(TAG_CHANNEL_ID, channel_id);
        tags
    }

    /// Appends a tag, or replaces the value of an existing key in place.
    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder-style [`Tags::push`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks every tag survives a round trip through the command line.
    ///
    /// Tags are not quoted: the process table shows them verbatim and
    /// [`crate::decode_tags`] reads them back token by token.
    pub fn validate(&self) -> Result<(), TagError> {
        for (key, value) in &self.0 {
            let key_ok = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "_-.".contains(c));
            if !key_ok {
                return Err(TagError::InvalidKey(key.clone()));
            }
            if !value.chars().all(is_shell_safe) {
                return Err(TagError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = Self::new();
        for (key, value) in iter {
            tags.push(key, value);
        }
        tags
    }
}

// ============================================================================
// Log Target
// ============================================================================

/// Where the transcoder's stdout/stderr are appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    DevNull,
    File(PathBuf),
}

impl LogTarget {
    /// Picks a log target for a process started at `now`.
    ///
    /// Without a directory output is discarded. With one, each process gets
    /// its own file: `<dir>/<prefix>-ffmpeg-<YYYY-MM-DD_HHmm>-<suffix>.log`,
    /// where the suffix is the start time in hex microseconds.
    pub fn for_start(directory: Option<&Path>, prefix: &str, now: DateTime<Utc>) -> Self {
        match directory {
            None => Self::DevNull,
            Some(dir) => {
                let file_name = format!(
                    "{}-ffmpeg-{}-{:x}.log",
                    prefix,
                    now.format("%Y-%m-%d_%H%M"),
                    now.timestamp_micros()
                );
                Self::File(dir.join(file_name))
            }
        }
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DevNull => f.write_str(DEV_NULL),
            Self::File(path) => f.write_str(&shell_quote(&path.to_string_lossy())),
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Builds the shell command line for a detached transcoder process.
pub fn encode(
    executable: &str,
    input: &str,
    output: &str,
    tags: &Tags,
    log_target: &LogTarget,
) -> String {
    let mut line = format!("{executable} {input} {output}");
    for (key, value) in tags.iter() {
        line.push_str(&format!(" {METADATA_FLAG} {key}={value}"));
    }
    line.push_str(&format!(" >> {log_target} 2>&1 &"));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encode_without_log_directory() {
        let tags = Tags::new()
            .with("broadcast_id", 4)
            .with("unit", "test")
            .with("env", "unit_test");
        let line = encode("ffmpeg", "input", "output", &tags, &LogTarget::DevNull);
        assert_eq!(
            line,
            "ffmpeg input output -metadata broadcast_id=4 -metadata unit=test -metadata env=unit_test >> /dev/null 2>&1 &"
        );
    }

    #[test]
    fn test_encode_keeps_insertion_order() {
        let tags: Tags = [("zeta", "1"), ("alpha", "2")].into_iter().collect();
        let line = encode("ffmpeg", "i", "o", &tags, &LogTarget::DevNull);
        assert!(line.contains("-metadata zeta=1 -metadata alpha=2"));
    }

    #[test]
    fn test_push_replaces_existing_key_in_place() {
        let mut tags = Tags::new().with("a", 1).with("b", 2);
        tags.push("a", 3);
        let pairs: Vec<_> = tags.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
        assert_eq!(tags.get("a"), Some("3"));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_log_target_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        let target = LogTarget::for_start(Some(Path::new("/tmp")), DEFAULT_LOG_PREFIX, now);
        let rendered = target.to_string();
        assert!(rendered.starts_with("/tmp/livebroadcaster-ffmpeg-2024-03-09_0705-"));
        assert!(rendered.ends_with(".log"));

        assert_eq!(
            LogTarget::for_start(None, DEFAULT_LOG_PREFIX, now),
            LogTarget::DevNull
        );
    }

    #[test]
    fn test_validate() {
        assert!(Tags::for_stream(BroadcastId::new(1), ChannelId::new(2))
            .validate()
            .is_ok());
        assert_eq!(
            Tags::new().with("bad key", 1).validate(),
            Err(TagError::InvalidKey("bad key".to_string()))
        );
        assert!(matches!(
            Tags::new().with("title", "two words").validate(),
            Err(TagError::InvalidValue { .. })
        ));
        assert!(Tags::new().with("env", "prod-eu.1").validate().is_ok());
        assert!(Tags::new().with("env", "").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shell_metacharacters() {
        for value in ["prod;reboot", "a|b", "$(id)", "`id`", "x&", "a>b", "it's"] {
            assert!(
                matches!(
                    Tags::new().with("env", value).validate(),
                    Err(TagError::InvalidValue { .. })
                ),
                "accepted {value:?}"
            );
        }
        assert_eq!(
            Tags::new().with("k;ey", 1).validate(),
            Err(TagError::InvalidKey("k;ey".to_string()))
        );
    }

    #[test]
    fn test_log_target_with_space_is_quoted() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        let target = LogTarget::for_start(Some(Path::new("/var/log/my logs")), DEFAULT_LOG_PREFIX, now);
        let line = encode("ffmpeg", "i", "o", &Tags::new().with("env", "prod"), &target);

        let redirect = line
            .split_once(" >> ")
            .map(|(_, rest)| rest)
            .unwrap();
        assert!(redirect.starts_with("'/var/log/my logs/livebroadcaster-ffmpeg-2024-03-09_0705-"));
        assert!(redirect.ends_with(".log' 2>&1 &"));
    }
}
