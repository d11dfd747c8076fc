//! Turns a streamed reply into synthesis-sized sentences.
//!
//! A boundary character only ends a sentence once the buffer holds at least
//! `min_chars` characters; shorter clauses are merged with the text that
//! follows so synthesis is not asked for choppy fragments. Whatever is left
//! when the stream ends is emitted as-is.

/// Full-width and ASCII punctuation plus line control characters
const BOUNDARIES: &str = "，。！？；：｡＂＃＄％＆＇（）＊＋，－／：；＜＝＞＠［＼］＾＿｀｛｜｝～｟｠｢｣､、〃《》「」『』【】〔〕〖〗〘〙〚〛〜〝〞〟〰〾〿–—‘’‛“”„‟…‧﹏.!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~\r\n\t";

pub fn is_boundary(ch: char) -> bool {
    BOUNDARIES.contains(ch)
}

/// One unit handed to synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    /// False for the residual flushed at end of stream
    pub terminated: bool,
}

#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
    chars: usize,
    min_chars: usize,
}

impl SentenceSegmenter {
    pub fn new(min_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            chars: 0,
            min_chars,
        }
    }

    pub fn feed(&mut self, ch: char) -> Option<Sentence> {
        if is_boundary(ch) {
            if self.chars >= self.min_chars {
                self.push(ch);
                return self.take(true);
            }
            if ch.is_control() {
                self.push_gap();
            } else {
                self.push(ch);
            }
            return None;
        }

        if ch.is_whitespace() {
            self.push_gap();
            return None;
        }

        self.push(ch);
        None
    }

    pub fn feed_str(&mut self, text: &str) -> Vec<Sentence> {
        text.chars().filter_map(|ch| self.feed(ch)).collect()
    }

    /// Flush whatever is buffered, regardless of length or terminator
    pub fn end_of_stream(&mut self) -> Option<Sentence> {
        self.take(false)
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn push(&mut self, ch: char) {
        self.buffer.push(ch);
        self.chars += 1;
    }

    // Single word gap; leading and repeated blanks are dropped.
    fn push_gap(&mut self) {
        if !self.buffer.is_empty() && !self.buffer.ends_with(char::is_whitespace) {
            self.push(' ');
        }
    }

    fn take(&mut self, terminated: bool) -> Option<Sentence> {
        let text = std::mem::take(&mut self.buffer);
        self.chars = 0;

        let text = text.trim().to_string();
        if text.is_empty() {
            return None;
        }

        Some(Sentence { text, terminated })
    }
}
