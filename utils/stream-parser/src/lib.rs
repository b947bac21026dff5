//! Incremental classification of streamed assistant text.
//!
//! An agent reply mixes conversation prose with the contents of files the
//! agent is writing. [`CodeStreamParser`] consumes the reply one fragment at a
//! time and emits an ordered list of [`StreamEvent`]s that route every byte to
//! exactly one destination: the chat transcript or the file currently open.

mod code_stream;
mod filename;
mod fragment_buffer;
mod markers;
mod stream_text;

pub use code_stream::CodeStreamParser;
pub use code_stream::Mode;
pub use code_stream::ModeKind;
pub use code_stream::OpenFile;
pub use code_stream::ParseAnomaly;
pub use code_stream::ParserState;
pub use code_stream::StreamEvent;
pub use code_stream::extract_files;
pub use code_stream::parse_complete_response;
pub use code_stream::strip_file_blocks;
pub use filename::DEFAULT_EXTENSION;
pub use filename::extension_for_language;
pub use filename::resolve_filename;
pub use markers::CLOSE_TAG;
pub use markers::FENCE;
pub use markers::MAX_MARKER_LEN;
pub use stream_text::StreamTextChunk;
pub use stream_text::StreamTextParser;
