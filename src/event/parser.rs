use std::collections::HashSet;

use serde_json::Value;

use super::ChatEvent;
use crate::error::ParseError;

/// Splits SSE lines into typed chat events and tracks the task ids seen on
/// the current stream.
///
/// The task set targets stop-generation requests; it is a set, not a log, so
/// order of first appearance does not matter. The session drains it on stop.
#[derive(Debug, Default)]
pub struct ChatEventParser {
    active_tasks: HashSet<String>,
}

impl ChatEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line of the SSE stream.
    ///
    /// Lines without the `data:` prefix (blank separators, comments) are
    /// valid no-ops and yield `Ok(None)`. A `data:` line that is not a JSON
    /// object fails with a `ParseError` the caller logs and skips; it must
    /// never terminate the session.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<ChatEvent>, ParseError> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };

        let value: Value = serde_json::from_str(data.trim())?;
        let event = ChatEvent::from_value(value)?;

        if let Some(task_id) = event.task_id() {
            if self.active_tasks.insert(task_id.to_string()) {
                tracing::debug!(task_id, "tracking task");
            }
        }

        Ok(Some(event))
    }

    /// Task ids observed on the currently open stream.
    pub fn active_tasks(&self) -> &HashSet<String> {
        &self.active_tasks
    }

    /// Hand over the task set, leaving it empty (stop path).
    pub fn take_tasks(&mut self) -> HashSet<String> {
        std::mem::take(&mut self.active_tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_line_parses() {
        let mut parser = ChatEventParser::new();
        let event = parser.parse_line("data: {\"event\":\"ping\"}").unwrap();
        assert!(matches!(event, Some(ChatEvent::Ping)));
    }

    #[test]
    fn test_blank_and_comment_lines_are_no_ops() {
        let mut parser = ChatEventParser::new();
        assert!(parser.parse_line("").unwrap().is_none());
        assert!(parser.parse_line(": keep-alive").unwrap().is_none());
        assert!(parser.parse_line("event: message").unwrap().is_none());
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let mut parser = ChatEventParser::new();
        assert!(matches!(
            parser.parse_line("data: not-json"),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_task_ids_accumulate_as_a_set() {
        let mut parser = ChatEventParser::new();
        for line in [
            "data: {\"event\":\"message\",\"task_id\":\"t-1\",\"answer\":\"a\"}",
            "data: {\"event\":\"message\",\"task_id\":\"t-1\",\"answer\":\"b\"}",
            "data: {\"event\":\"tts_message\",\"task_id\":\"t-2\",\"audio\":\"\"}",
        ] {
            parser.parse_line(line).unwrap();
        }
        assert_eq!(parser.active_tasks().len(), 2);
        assert!(parser.active_tasks().contains("t-1"));
        assert!(parser.active_tasks().contains("t-2"));

        let drained = parser.take_tasks();
        assert_eq!(drained.len(), 2);
        assert!(parser.active_tasks().is_empty());
    }

    #[test]
    fn test_unknown_event_kind_is_preserved() {
        let mut parser = ChatEventParser::new();
        let event = parser
            .parse_line("data: {\"event\":\"agent_thought\",\"task_id\":\"t-9\",\"thought\":\"hmm\"}")
            .unwrap()
            .unwrap();
        match event {
            ChatEvent::Unknown { event, payload } => {
                assert_eq!(event, "agent_thought");
                assert_eq!(payload["thought"], "hmm");
            }
            other => panic!("expected Unknown, got {:?}", other.kind()),
        }
        assert!(parser.active_tasks().contains("t-9"));
    }
}
