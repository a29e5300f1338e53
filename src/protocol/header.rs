//! Header parser for inbound messages.
//!
//! A state machine over the [`Lexer`](super::lexer::Lexer) tokens that reads
//! the routing fields at the front of the envelope (`id`, `method`, `error`)
//! and stops at the payload (`result` / `params`) without decoding it. The
//! returned offset is where the payload value starts, so the body can be
//! handed on unread.

use super::lexer::{Lexer, Token};
use super::response::{Header, NotifyHeader, ResponseHeader, RpcError};
use crate::error::{WsError, WsResult};

/// A failed attempt to parse one header grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderError {
    pub message: String,
    pub offset: usize,
}

impl HeaderError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Prop,
    PropId,
    PropMethod,
    PropError,
    PropPayload,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Response,
    Notify,
}

impl Grammar {
    fn property(self, name: &str) -> Option<State> {
        if name.eq_ignore_ascii_case("id") {
            return Some(State::PropId);
        }
        match self {
            Grammar::Response if name.eq_ignore_ascii_case("error") => Some(State::PropError),
            Grammar::Response if name.eq_ignore_ascii_case("result") => Some(State::PropPayload),
            Grammar::Notify if name.eq_ignore_ascii_case("method") => Some(State::PropMethod),
            Grammar::Notify if name.eq_ignore_ascii_case("params") => Some(State::PropPayload),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Fields {
    id: Option<String>,
    method: Option<String>,
    error: Option<RpcError>,
}

fn run(bytes: &[u8], grammar: Grammar) -> Result<(Fields, usize), HeaderError> {
    let mut lexer = Lexer::new(bytes);
    let mut fields = Fields::default();
    let mut state = State::Start;
    let mut resume = bytes.len();

    while state != State::End {
        state = match state {
            State::Start => match lexer.next_token() {
                Some(Token::StartObject) => State::Prop,
                _ => {
                    return Err(HeaderError::new(
                        "Expected the start of an object",
                        lexer.token_start(),
                    ))
                }
            },
            State::Prop => match lexer.next_token() {
                Some(Token::PropertyName(name)) => match grammar.property(&name) {
                    Some(next) => next,
                    None => {
                        return Err(HeaderError::new(
                            format!("Unknown property name `{}`", name),
                            lexer.token_start(),
                        ))
                    }
                },
                Some(Token::EndObject) => {
                    resume = lexer.token_start();
                    State::End
                }
                _ => {
                    return Err(HeaderError::new(
                        "Expected a property name",
                        lexer.token_start(),
                    ))
                }
            },
            State::PropId => match lexer.next_token() {
                Some(Token::String(id)) => {
                    fields.id = Some(id.into_owned());
                    State::Prop
                }
                _ => {
                    return Err(HeaderError::new(
                        "Expected a string value for `id`",
                        lexer.token_start(),
                    ))
                }
            },
            State::PropMethod => match lexer.next_token() {
                Some(Token::String(method)) => {
                    fields.method = Some(method.into_owned());
                    State::Prop
                }
                _ => {
                    return Err(HeaderError::new(
                        "Expected a string value for `method`",
                        lexer.token_start(),
                    ))
                }
            },
            State::PropError => {
                let start = lexer.value_start();
                let mut values = serde_json::Deserializer::from_slice(&bytes[start..])
                    .into_iter::<Option<RpcError>>();
                match values.next() {
                    Some(Ok(error)) => {
                        lexer.skip_value(values.byte_offset());
                        fields.error = error;
                        State::Prop
                    }
                    Some(Err(e)) => {
                        return Err(HeaderError::new(
                            format!("Invalid `error` object: {}", e),
                            start,
                        ))
                    }
                    None => {
                        return Err(HeaderError::new("Missing `error` value", start));
                    }
                }
            }
            State::PropPayload => {
                resume = lexer.value_start();
                State::End
            }
            State::End => State::End,
        };
    }

    Ok((fields, resume))
}

/// Parse `bytes` as a response header (`id`, `error`, `result`).
///
/// Returns the header and the offset of the `result` value (or of the
/// closing brace when there is none).
pub fn parse_response_header(bytes: &[u8]) -> Result<(ResponseHeader, usize), HeaderError> {
    let (fields, resume) = run(bytes, Grammar::Response)?;
    match fields.id {
        Some(id) if !id.is_empty() => Ok((
            ResponseHeader {
                id,
                error: fields.error,
            },
            resume,
        )),
        _ => Err(HeaderError::new("Response has no `id`", resume)),
    }
}

/// Parse `bytes` as a notification header (`id`, `method`, `params`).
pub fn parse_notify_header(bytes: &[u8]) -> Result<(NotifyHeader, usize), HeaderError> {
    let (fields, resume) = run(bytes, Grammar::Notify)?;
    match (fields.id, fields.method) {
        (Some(id), Some(method)) => Ok((NotifyHeader { id, method }, resume)),
        (None, _) => Err(HeaderError::new("Notification has no `id`", resume)),
        (_, None) => Err(HeaderError::new("Notification has no `method`", resume)),
    }
}

/// Parse the header of an inbound message, trying the response grammar first
/// and the notification grammar second.
pub fn parse_header(bytes: &[u8]) -> WsResult<(Header, usize)> {
    let rsp_err = match parse_response_header(bytes) {
        Ok((header, resume)) => return Ok((Header::Response(header), resume)),
        Err(e) => e,
    };
    let nty_err = match parse_notify_header(bytes) {
        Ok((header, resume)) => return Ok((Header::Notify(header), resume)),
        Err(e) => e,
    };

    Err(WsError::ProtocolParse {
        message: format!("{} --AND-- {}", rsp_err, nty_err),
        offset: rsp_err.offset.max(nty_err.offset),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_with_error_and_result() {
        let input = br#"{"id":"abc","error":{"code":0,"message":""},"result":[1,2,3]}"#;
        let (header, resume) = parse_header(input).unwrap();

        assert_eq!(header.id(), "abc");
        assert_eq!(
            header.error(),
            Some(&RpcError {
                code: 0,
                message: String::new()
            })
        );
        assert_eq!(resume, 53);
        assert_eq!(&input[resume..resume + 7], b"[1,2,3]");
    }

    #[test]
    fn test_notify_falls_back_from_response() {
        let input = br#"{"id":"abc","method":"notify","params":[1]}"#;

        let rsp = parse_response_header(input).unwrap_err();
        assert!(rsp.message.contains("method"));

        let (header, resume) = parse_header(input).unwrap();
        assert_eq!(
            header,
            Header::Notify(NotifyHeader {
                id: "abc".to_string(),
                method: "notify".to_string()
            })
        );
        assert_eq!(resume, 39);
        assert_eq!(&input[resume..resume + 3], b"[1]");
    }

    #[test]
    fn test_non_string_id_fails_both_grammars() {
        let input = br#"{"id":123}"#;
        let err = parse_header(input).unwrap_err();
        match err {
            WsError::ProtocolParse { message, offset } => {
                assert!(message.contains("--AND--"));
                assert_eq!(offset, 6);
                assert!(offset < input.len());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_combined_error_reports_larger_offset() {
        // the response grammar stops at `method` (12), the notify grammar at `error` (25)
        let input = br#"{"id":"abc","method":"x","error":null}"#;
        let err = parse_header(input).unwrap_err();
        assert!(matches!(err, WsError::ProtocolParse { offset: 25, .. }));
    }

    #[test]
    fn test_response_without_result() {
        let input = br#"{"id":"abc"}"#;
        let (header, resume) = parse_response_header(input).unwrap();
        assert_eq!(header.id, "abc");
        assert!(header.error.is_none());
        assert_eq!(input[resume], b'}');
    }

    #[test]
    fn test_error_after_result_is_not_reached() {
        let input = br#"{"id":"e1","result":null,"error":{"code":-1}}"#;
        let (header, resume) = parse_response_header(input).unwrap();
        assert!(header.error.is_none());
        assert_eq!(&input[resume..resume + 4], b"null");
    }

    #[test]
    fn test_error_without_result() {
        let input = br#"{ "id" : "e2" , "error" : { "code" : -32000, "message" : "There was a problem" } }"#;
        let (header, resume) = parse_response_header(input).unwrap();
        let error = header.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "There was a problem");
        assert_eq!(input[resume], b'}');
    }

    #[test]
    fn test_property_names_are_case_insensitive() {
        let input = br#"{"ID":"abc","Method":"live","PARAMS":{"x":1}}"#;
        let (header, resume) = parse_header(input).unwrap();
        assert_eq!(header.method(), Some("live"));
        assert_eq!(input[resume], b'{');
    }

    #[test]
    fn test_whitespace_before_payload_is_skipped() {
        let input = b"{\"id\":\"a\",\"result\":   \n\"ok\"}";
        let (_, resume) = parse_header(input).unwrap();
        assert_eq!(input[resume], b'"');
    }

    #[test]
    fn test_missing_required_fields() {
        assert!(parse_response_header(br#"{"result":1}"#).is_err());
        assert!(parse_response_header(br#"{"id":"","result":1}"#).is_err());
        assert!(parse_notify_header(br#"{"id":"a","params":[]}"#).is_err());
        assert!(parse_header(br#"{}"#).is_err());
    }

    #[test]
    fn test_unknown_property_is_fatal() {
        let err = parse_header(br#"{"id":"a","extra":1,"result":2}"#).unwrap_err();
        match err {
            WsError::ProtocolParse { message, offset } => {
                assert!(message.contains("Unknown property name `extra`"));
                assert_eq!(offset, 10);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_header() {
        let err = parse_header(br#"{"id":"abc"#).unwrap_err();
        assert!(matches!(err, WsError::ProtocolParse { offset: 6, .. }));
    }

    #[test]
    fn test_not_an_object() {
        let err = parse_header(b"[1,2]").unwrap_err();
        assert!(matches!(err, WsError::ProtocolParse { offset: 0, .. }));
    }
}
