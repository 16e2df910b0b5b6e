//! Reading identity back out of process-table lines.
//!
//! Lines come from the process listing as `"<pid> <full command line>"`.
//! Every function here is total: malformed input yields `None` (or the `0`
//! pid sentinel) and never an error.

use crate::command_line::{Tags, METADATA_FLAG};

/// Finds the value of the first `-metadata <tag>=<value>` pair.
fn find_tag<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| match pair {
        [flag, assignment] if *flag == METADATA_FLAG => assignment
            .split_once('=')
            .filter(|(key, _)| *key == tag)
            .map(|(_, value)| value),
        _ => None,
    })
}

/// Extracts a numeric tag.
///
/// Returns `None` when the tag is missing, has no `=`, or its value is empty
/// or not made of digits only.
pub fn extract_int_tag(line: &str, tag: &str) -> Option<u32> {
    let value = find_tag(line, tag)?;
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Extracts a string tag.
///
/// An explicit empty value (`env=`) is `Some("")`, not `None`: it points at
/// a damaged entry rather than a missing one.
pub fn extract_string_tag(line: &str, tag: &str) -> Option<String> {
    find_tag(line, tag).map(str::to_string)
}

/// Parses the pid at the start of a listing line.
///
/// Leading whitespace is skipped. Returns `0` if the line does not start
/// with a number; `0` is never a real pid.
pub fn extract_leading_pid(line: &str) -> u32 {
    let trimmed = line.trim_start();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed
        .get(..digits_end)
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Collects every `-metadata key=value` pair in command-line order.
pub fn decode_tags(line: &str) -> Tags {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens
        .windows(2)
        .filter_map(|pair| match pair {
            [flag, assignment] if *flag == METADATA_FLAG => assignment.split_once('='),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_line::{encode, LogTarget, TAG_BROADCAST_ID, TAG_CHANNEL_ID, TAG_ENVIRONMENT};

    const LINE: &str = "1234 ffmpeg -re -i /path/to/video.mp4 -vcodec copy -acodec copy -f flv rtmp://live-ams.twitch.tv/app/ -metadata env=unit_test -metadata broadcast_id=1337";

    #[test]
    fn test_extract_broadcast_id() {
        assert_eq!(extract_int_tag(LINE, TAG_BROADCAST_ID), Some(1337));
        assert_eq!(extract_int_tag("", TAG_BROADCAST_ID), None);

        let dangling = "1234 ffmpeg -re -i /path/to/video.mp4 -f flv rtmp://x/app/ -metadata env=unit_test -metadata";
        assert_eq!(extract_int_tag(dangling, TAG_BROADCAST_ID), None);

        let empty = "1234 ffmpeg -re -i /path/to/video.mp4 -f flv rtmp://x/app/ -metadata env=unit_test -metadata broadcast_id=";
        assert_eq!(extract_int_tag(empty, TAG_BROADCAST_ID), None);
    }

    #[test]
    fn test_extract_int_tag_rejects_non_numeric() {
        assert_eq!(extract_int_tag("-metadata broadcast_id=12abc", TAG_BROADCAST_ID), None);
        assert_eq!(extract_int_tag("-metadata broadcast_id=-4", TAG_BROADCAST_ID), None);
        assert_eq!(extract_int_tag("-metadata broadcast_id", TAG_BROADCAST_ID), None);
        assert_eq!(
            extract_int_tag("-metadata broadcast_id=99999999999", TAG_BROADCAST_ID),
            None
        );
    }

    #[test]
    fn test_extract_channel_id() {
        assert_eq!(extract_int_tag("", TAG_CHANNEL_ID), None);
        assert_eq!(extract_int_tag("channel_id=12", TAG_CHANNEL_ID), None);
        assert_eq!(extract_int_tag(LINE, TAG_CHANNEL_ID), None);

        let line = format!("{LINE} -metadata channel_id=5");
        assert_eq!(extract_int_tag(&line, TAG_CHANNEL_ID), Some(5));
    }

    #[test]
    fn test_extract_first_occurrence_wins() {
        let line = "1 ffmpeg -metadata channel_id=5 -metadata channel_id=6";
        assert_eq!(extract_int_tag(line, TAG_CHANNEL_ID), Some(5));
    }

    #[test]
    fn test_extract_environment() {
        assert_eq!(extract_string_tag("", TAG_ENVIRONMENT), None);

        let prod = "1234 ffmpeg -re -i /v.mp4 -metadata env=prod -metadata broadcast_id=1337 -metadata channel_id=5";
        assert_eq!(extract_string_tag(prod, TAG_ENVIRONMENT).as_deref(), Some("prod"));

        let empty = "1234 ffmpeg -re -i /v.mp4 -metadata env= -metadata broadcast_id=1337";
        assert_eq!(extract_string_tag(empty, TAG_ENVIRONMENT).as_deref(), Some(""));

        let missing = "1234 ffmpeg -re -i /v.mp4 -metadata broadcast_id=1337";
        assert_eq!(extract_string_tag(missing, TAG_ENVIRONMENT), None);
    }

    #[test]
    fn test_extract_leading_pid() {
        assert_eq!(extract_leading_pid(""), 0);
        assert_eq!(extract_leading_pid(LINE), 1234);
        assert_eq!(extract_leading_pid(&format!("  5678{}", &LINE[4..])), 5678);
        assert_eq!(extract_leading_pid("test 5678"), 0);
        assert_eq!(extract_leading_pid("\t42 ffmpeg"), 42);
    }

    #[test]
    fn test_end_to_end_listing_line() {
        assert_eq!(extract_leading_pid(LINE), 1234);
        assert_eq!(extract_int_tag(LINE, TAG_BROADCAST_ID), Some(1337));
        assert_eq!(extract_int_tag(LINE, TAG_CHANNEL_ID), None);
        assert_eq!(
            extract_string_tag(LINE, TAG_ENVIRONMENT).as_deref(),
            Some("unit_test")
        );
    }

    #[test]
    fn test_decode_recovers_encoded_tags() {
        let tags = Tags::new()
            .with(TAG_BROADCAST_ID, 4)
            .with(TAG_CHANNEL_ID, 9)
            .with(TAG_ENVIRONMENT, "prod");
        let line = encode("ffmpeg", "-re -i /v.mp4", "-f flv rtmp://x", &tags, &LogTarget::DevNull);
        assert_eq!(decode_tags(&line), tags);
    }

    // ========================================================================
    // Property Tests
    // ========================================================================

    use proptest::prelude::*;

    fn tag_entry() -> impl Strategy<Value = (String, String)> {
        ("[a-z_]{1,8}", "[A-Za-z0-9._:/=%@+,-]{0,12}")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_decode_recovers_any_valid_tags(entries in prop::collection::vec(tag_entry(), 0..6)) {
            let tags: Tags = entries.into_iter().collect();
            prop_assert!(tags.validate().is_ok());

            let line = encode("ffmpeg", "-re -i /v.mp4", "-f flv rtmp://x", &tags, &LogTarget::DevNull);
            prop_assert_eq!(decode_tags(&line), tags);
        }
    }
}
