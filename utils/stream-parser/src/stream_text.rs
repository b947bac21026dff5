/// Classifier result for one pushed fragment (or the final flush).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTextChunk<T> {
    /// Conversation text produced by this step, safe to render immediately.
    pub visible_text: String,
    /// Ordered payloads produced by this step. Parsers that route text to
    /// several destinations include the conversation text here as well so
    /// consumers can rely on this list alone for ordering.
    pub extracted: Vec<T>,
}

impl<T> Default for StreamTextChunk<T> {
    fn default() -> Self {
        Self {
            visible_text: String::new(),
            extracted: Vec::new(),
        }
    }
}

impl<T> StreamTextChunk<T> {
    /// Returns true when no visible text or extracted payloads were produced.
    pub fn is_empty(&self) -> bool {
        self.visible_text.is_empty() && self.extracted.is_empty()
    }

    /// Appends a later chunk, keeping emission order.
    pub fn append(&mut self, mut later: StreamTextChunk<T>) {
        self.visible_text.push_str(&later.visible_text);
        self.extracted.append(&mut later.extracted);
    }
}

/// Trait for parsers that consume streamed text one fragment at a time.
pub trait StreamTextParser {
    /// Payload produced by this parser (for example a classified event).
    type Extracted;

    /// Feed a new text fragment.
    fn push_str(&mut self, chunk: &str) -> StreamTextChunk<Self::Extracted>;

    /// Flush any buffered state at end-of-stream (or end-of-response).
    fn finish(&mut self) -> StreamTextChunk<Self::Extracted>;
}
