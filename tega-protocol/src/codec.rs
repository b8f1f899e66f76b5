//! Encoder and decoder between typed commands and line frames.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Command, RequestType, Scope};

const REGEX_TRUE: &str = "True";

/// Encodes commands into frames and wire text.
pub struct Encoder;

impl Encoder {
    /// Encodes a command into a frame.
    pub fn encode_frame(command: &Command) -> Result<Frame, ProtocolError> {
        let frame = Frame::new(command.name());
        let frame = match command {
            Command::Session { tega_id, scope } => {
                frame.with_param(tega_id.as_str()).with_param(scope.as_str())
            }
            Command::SessionAck { tega_id } => frame.with_param(tega_id.as_str()),
            Command::Subscribe { path, scope, regex } => {
                let frame = frame.with_param(path.as_str()).with_param(scope.as_str());
                with_regex_flag(frame, *regex)
            }
            Command::Unsubscribe { path, regex } => match path {
                Some(path) => with_regex_flag(frame.with_param(path.as_str()), *regex),
                None => frame,
            },
            Command::Publish { channel, message } => {
                frame.with_param(channel.as_str()).with_json_body(message)?
            }
            Command::Notify { notifications } => frame.with_json_body(notifications)?,
            Command::Message {
                channel,
                tega_id,
                message,
            } => frame
                .with_param(channel.as_str())
                .with_param(tega_id.as_str())
                .with_json_body(message)?,
            Command::Request {
                seq_no,
                request_type,
                tega_id,
                path,
                args,
            } => frame
                .with_param(seq_no.to_string())
                .with_param(request_type.as_str())
                .with_param(tega_id.as_str())
                .with_param(path.as_str())
                .with_json_body(args)?,
            Command::Response {
                seq_no,
                request_type,
                tega_id,
                result,
            } => frame
                .with_param(seq_no.to_string())
                .with_param(request_type.as_str())
                .with_param(tega_id.as_str())
                .with_json_body(result)?,
        };
        Ok(frame)
    }

    /// Encodes a command into wire text.
    pub fn encode(command: &Command) -> Result<String, ProtocolError> {
        Ok(Self::encode_frame(command)?.encode())
    }
}

/// Decodes frames and wire text into commands.
pub struct Decoder;

impl Decoder {
    /// Parses wire text into a command.
    pub fn decode(text: &str) -> Result<Command, ProtocolError> {
        let frame = Frame::parse(text)?;
        Self::decode_frame(&frame)
    }

    /// Interprets an already parsed frame.
    pub fn decode_frame(frame: &Frame) -> Result<Command, ProtocolError> {
        match frame.command.as_str() {
            Command::SESSION => Ok(Command::Session {
                tega_id: frame.require_param(Command::SESSION, 0)?.to_string(),
                scope: parse_scope(frame, Command::SESSION, 1)?,
            }),
            Command::SESSIONACK => Ok(Command::SessionAck {
                tega_id: frame.param(0).unwrap_or_default().to_string(),
            }),
            Command::SUBSCRIBE => Ok(Command::Subscribe {
                path: frame.require_param(Command::SUBSCRIBE, 0)?.to_string(),
                scope: parse_scope(frame, Command::SUBSCRIBE, 1)?,
                regex: parse_flag(frame.param(2)),
            }),
            Command::UNSUBSCRIBE => Ok(Command::Unsubscribe {
                path: frame.param(0).map(str::to_string),
                regex: parse_flag(frame.param(1)),
            }),
            Command::PUBLISH => Ok(Command::Publish {
                channel: frame.require_param(Command::PUBLISH, 0)?.to_string(),
                message: frame.json_body(Command::PUBLISH)?,
            }),
            Command::NOTIFY => Ok(Command::Notify {
                notifications: frame.json_body(Command::NOTIFY)?,
            }),
            Command::MESSAGE => Ok(Command::Message {
                channel: frame.require_param(Command::MESSAGE, 0)?.to_string(),
                tega_id: frame.require_param(Command::MESSAGE, 1)?.to_string(),
                message: frame.json_body(Command::MESSAGE)?,
            }),
            Command::REQUEST => {
                let seq_no = parse_seq_no(frame.require_param(Command::REQUEST, 0)?)?;
                let request_type: RequestType =
                    frame.require_param(Command::REQUEST, 1)?.parse()?;
                let tega_id = frame.require_param(Command::REQUEST, 2)?.to_string();
                let path = frame.require_param(Command::REQUEST, 3)?.to_string();
                // RPC calls without arguments are sent without a body.
                let args = frame.json_body_or_default()?;
                Ok(Command::Request {
                    seq_no,
                    request_type,
                    tega_id,
                    path,
                    args,
                })
            }
            Command::RESPONSE => {
                let seq_no = parse_seq_no(frame.require_param(Command::RESPONSE, 0)?)?;
                let request_type: RequestType =
                    frame.require_param(Command::RESPONSE, 1)?.parse()?;
                let tega_id = frame.require_param(Command::RESPONSE, 2)?.to_string();
                Ok(Command::Response {
                    seq_no,
                    request_type,
                    tega_id,
                    result: frame.json_body(Command::RESPONSE)?,
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// The regex token is only written when set, so plain subscriptions keep
/// their two-token form.
fn with_regex_flag(frame: Frame, regex: bool) -> Frame {
    if regex {
        frame.with_param(REGEX_TRUE)
    } else {
        frame
    }
}

fn parse_flag(token: Option<&str>) -> bool {
    token.is_some_and(|t| t.eq_ignore_ascii_case("true") || t == "1")
}

fn parse_scope(frame: &Frame, command: &'static str, index: usize) -> Result<Scope, ProtocolError> {
    frame.require_param(command, index)?.parse()
}

fn parse_seq_no(token: &str) -> Result<u32, ProtocolError> {
    token
        .parse()
        .map_err(|_| ProtocolError::InvalidSeqNo(token.to_string()))
}
