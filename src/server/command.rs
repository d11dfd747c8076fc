use super::segmenter::Sentence;

/// Decides whether the closing fragment of a reply doubles as a robot command.
///
/// Very short residual replies ("forward", "stop", "左转") are what the chat
/// backend produces for motion requests, so they are forwarded to the robot
/// topic in addition to being spoken.
#[derive(Debug, Clone, Copy)]
pub struct RobotCommandPolicy {
    /// Residuals with fewer characters than this are commands
    pub max_chars: usize,
}

impl RobotCommandPolicy {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Only the unterminated residual flushed at end of stream qualifies.
    pub fn command_for<'a>(&self, residual: &'a Sentence) -> Option<&'a str> {
        let text = residual.text.trim();
        let qualifies = !residual.terminated
            && !text.is_empty()
            && text.chars().count() < self.max_chars;
        qualifies.then_some(text)
    }
}

impl Default for RobotCommandPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}
