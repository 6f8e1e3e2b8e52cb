//! Progress channel messages
//!
//! Every message on a progress channel is a single JSON object carrying
//! exactly one of `stdout`, `stderr` or `code`. The last message of a
//! channel is the terminal event: `{"code": <exit code>, "output": <path>}`.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One message relayed from a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// A chunk read from the process's standard output
    Stdout { stdout: String },
    /// A chunk read from the process's standard error
    Stderr { stderr: String },
    /// Terminal event: exit code plus the normalized output location
    Exit { code: i32, output: String },
}

impl StreamEvent {
    pub fn stdout(text: impl Into<String>) -> Self {
        StreamEvent::Stdout { stdout: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        StreamEvent::Stderr { stderr: text.into() }
    }

    pub fn exit(code: i32, output: impl Into<String>) -> Self {
        StreamEvent::Exit { code, output: output.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Exit { .. })
    }

    /// Text payload of a stdout/stderr chunk
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::Stdout { stdout } => Some(stdout),
            StreamEvent::Stderr { stderr } => Some(stderr),
            StreamEvent::Exit { .. } => None,
        }
    }

    /// The decoded terminal event, if this is one
    pub fn completion(&self) -> Option<Completion> {
        match self {
            StreamEvent::Exit { code, output } => Some(Completion {
                code: *code,
                output: output.clone(),
            }),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Encode as one server-push block: `data: <json>` followed by a blank line
    pub fn encode_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}

/// Outcome of a job as reported by its terminal event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub code: i32,
    pub output: String,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shapes() {
        assert_eq!(StreamEvent::stdout("hi").to_json().unwrap(), r#"{"stdout":"hi"}"#);
        assert_eq!(StreamEvent::stderr("oops").to_json().unwrap(), r#"{"stderr":"oops"}"#);
        assert_eq!(
            StreamEvent::exit(0, "uploads/a.mp4/audio.opus").to_json().unwrap(),
            r#"{"code":0,"output":"uploads/a.mp4/audio.opus"}"#
        );
    }

    #[test]
    fn test_decode_each_shape() {
        assert_eq!(
            StreamEvent::from_json(r#"{"stderr":"frame=1"}"#).unwrap(),
            StreamEvent::stderr("frame=1")
        );
        let exit = StreamEvent::from_json(r#"{"code":1,"output":"uploads/x/%04d.jpg"}"#).unwrap();
        assert!(exit.is_terminal());
        let completion = exit.completion().unwrap();
        assert_eq!(completion.code, 1);
        assert!(!completion.is_success());
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        assert!(StreamEvent::from_json(r#"{"progress":5}"#).is_err());
    }

    #[test]
    fn test_encode_frame() {
        let frame = StreamEvent::stdout("x").encode_frame().unwrap();
        assert_eq!(frame, "data: {\"stdout\":\"x\"}\n\n");
    }
}
