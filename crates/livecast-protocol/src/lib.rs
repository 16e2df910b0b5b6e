//! livecast protocol - the process command line as a wire format
//!
//! Between scheduler runs the only durable state is the OS process table.
//! This crate writes identity into transcoder command lines and reads it
//! back from process listings.

pub mod command_line;
pub mod parse;

pub use command_line::{
    encode, LogTarget, TagError, Tags, DEFAULT_LOG_PREFIX, DEV_NULL, METADATA_FLAG,
    TAG_BROADCAST_ID, TAG_CHANNEL_ID, TAG_ENVIRONMENT,
};
pub use parse::{decode_tags, extract_int_tag, extract_leading_pid, extract_string_tag};
