//! Line frame format for the pub/sub channel.
//!
//! Every WebSocket text message carries exactly one frame:
//!
//! ```text
//! COMMAND SP param1 SP param2 ...      (header line)
//! {"json": "body"}                     (optional body line)
//! ```
//!
//! The header is split on single spaces; the first token is the command.
//! Bodies are compact JSON, so they never contain a raw newline.

use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Separator between the header line and the body line.
pub const LINE_SEPARATOR: char = '\n';

/// A parsed (but not yet interpreted) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command token, e.g. `NOTIFY`.
    pub command: String,
    /// Positional header parameters following the command.
    pub params: Vec<String>,
    /// Raw JSON body line, if present.
    pub body: Option<String>,
}

impl Frame {
    /// Creates a frame with no parameters and no body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attaches the compact JSON encoding of `value` as the body line.
    pub fn with_json_body<T: Serialize>(self, value: &T) -> Result<Self, ProtocolError> {
        let body = serde_json::to_string(value)?;
        Ok(self.with_body(body))
    }

    /// Encodes the frame into its wire text.
    pub fn encode(&self) -> String {
        let mut out = self.command.clone();
        for param in &self.params {
            out.push(' ');
            out.push_str(param);
        }
        if let Some(ref body) = self.body {
            out.push(LINE_SEPARATOR);
            out.push_str(body);
        }
        out
    }

    /// Parses wire text into a frame.
    ///
    /// Only the first body line is kept. A blank body line counts as no body.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let (header, rest) = match text.split_once(LINE_SEPARATOR) {
            Some((header, rest)) => (header, Some(rest)),
            None => (text, None),
        };

        let mut tokens = header
            .trim_end_matches('\r')
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let command = tokens.next().ok_or(ProtocolError::EmptyFrame)?;
        let params = tokens.collect();

        let body = rest
            .and_then(|rest| rest.lines().next())
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string);

        Ok(Self {
            command,
            params,
            body,
        })
    }

    /// Returns the parameter at `index`, if present.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Returns the parameter at `index` or a `MissingParam` error.
    pub fn require_param(
        &self,
        command: &'static str,
        index: usize,
    ) -> Result<&str, ProtocolError> {
        self.param(index)
            .ok_or(ProtocolError::MissingParam { command, index })
    }

    /// Decodes the body line as JSON, failing if it is absent.
    pub fn json_body<T: DeserializeOwned>(
        &self,
        command: &'static str,
    ) -> Result<T, ProtocolError> {
        let body = self
            .body
            .as_deref()
            .ok_or(ProtocolError::MissingBody(command))?;
        Ok(serde_json::from_str(body)?)
    }

    /// Decodes the body line as JSON, falling back to `T::default()` when
    /// there is no body.
    pub fn json_body_or_default<T: DeserializeOwned + Default>(&self) -> Result<T, ProtocolError> {
        match self.body.as_deref() {
            Some(body) => Ok(serde_json::from_str(body)?),
            None => Ok(T::default()),
        }
    }
}
