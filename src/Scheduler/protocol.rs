// Text wire format carried inside ring messages.
//
//   request:  kernelType|requestId|clientType[|uniqueId]\n
//   response: requestId|allowed(1|0)|reason\n

use std::fmt::Write as _;

use crate::Core::error::{IpcError, Result};

pub const FIELD_SEPARATOR: char = '|';

/// Frames with fewer fields are dropped by the handler.
pub const MIN_REQUEST_FIELDS: usize = 3;

fn strip_terminator(frame: &str) -> &str {
    frame.trim_end_matches(['\n', '\r'])
}

/// A parsed request frame, borrowing from the received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub kernel_type: &'a str,
    pub request_id: &'a str,
    pub client_type: &'a str,
    pub unique_id: Option<&'a str>,
}

impl<'a> Request<'a> {
    pub fn new(kernel_type: &'a str, request_id: &'a str, client_type: &'a str) -> Self {
        Self {
            kernel_type,
            request_id,
            client_type,
            unique_id: None,
        }
    }

    pub fn with_unique_id(mut self, unique_id: &'a str) -> Self {
        self.unique_id = Some(unique_id).filter(|id| !id.is_empty());
        self
    }

    /// Split a frame on `|`. Fields past the fourth are ignored.
    pub fn parse(frame: &'a str) -> Result<Self> {
        let body = strip_terminator(frame);
        let mut fields = body.split(FIELD_SEPARATOR);
        match (fields.next(), fields.next(), fields.next()) {
            (Some(kernel_type), Some(request_id), Some(client_type)) => Ok(Self {
                kernel_type,
                request_id,
                client_type,
                unique_id: fields.next().filter(|id| !id.is_empty()),
            }),
            _ => Err(IpcError::MalformedFrame(format!(
                "expected at least {} fields in {:?}",
                MIN_REQUEST_FIELDS, body
            ))),
        }
    }

    /// The unique id carried by the frame, else `fallback`.
    pub fn unique_id_or(&self, fallback: &'a str) -> &'a str {
        self.unique_id.unwrap_or(fallback)
    }

    pub fn encode(&self) -> String {
        let mut frame = format!(
            "{}|{}|{}",
            self.kernel_type, self.request_id, self.client_type
        );
        if let Some(unique_id) = self.unique_id {
            frame.push(FIELD_SEPARATOR);
            frame.push_str(unique_id);
        }
        frame.push('\n');
        frame
    }
}

/// A decision as sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request_id: String,
    pub allowed: bool,
    pub reason: String,
}

impl Response {
    pub fn encode(&self) -> String {
        let mut frame = String::with_capacity(self.request_id.len() + self.reason.len() + 4);
        write_response(&mut frame, &self.request_id, self.allowed, &self.reason);
        frame
    }

    pub fn parse(frame: &str) -> Result<Self> {
        let body = strip_terminator(frame);
        let mut fields = body.splitn(3, FIELD_SEPARATOR);
        let (Some(request_id), Some(flag), Some(reason)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(IpcError::MalformedFrame(format!(
                "expected 3 response fields in {:?}",
                body
            )));
        };
        let allowed = match flag {
            "1" => true,
            "0" => false,
            other => {
                return Err(IpcError::MalformedFrame(format!(
                    "bad allowed flag {:?} in {:?}",
                    other, body
                )))
            }
        };
        Ok(Self {
            request_id: request_id.to_owned(),
            allowed,
            reason: reason.to_owned(),
        })
    }
}

/// Append one response frame to `out`. Separators and line breaks in `reason`
/// become spaces so the frame always has exactly three fields.
pub fn write_response(out: &mut String, request_id: &str, allowed: bool, reason: &str) {
    let _ = write!(out, "{}|{}|", request_id, if allowed { '1' } else { '0' });
    out.extend(reason.chars().map(|c| match c {
        FIELD_SEPARATOR | '\n' | '\r' => ' ',
        c => c,
    }));
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_field_request() {
        let req = Request::parse("matmul|req-1|pytorch|abc\n").unwrap();
        assert_eq!(req.kernel_type, "matmul");
        assert_eq!(req.request_id, "req-1");
        assert_eq!(req.client_type, "pytorch");
        assert_eq!(req.unique_id, Some("abc"));
    }

    #[test]
    fn unique_id_is_optional() {
        let req = Request::parse("conv2d|7|sglang").unwrap();
        assert_eq!(req.unique_id, None);
        assert_eq!(req.unique_id_or("sglang"), "sglang");

        let req = Request::parse("conv2d|7|sglang|\r\n").unwrap();
        assert_eq!(req.unique_id, None);
    }

    #[test]
    fn short_frames_are_malformed() {
        assert!(matches!(
            Request::parse("req-1|pytorch"),
            Err(IpcError::MalformedFrame(_))
        ));
        assert!(Request::parse("").is_err());
    }

    #[test]
    fn request_encode_parses_back() {
        let req = Request::new("softmax", "r9", "pytorch").with_unique_id("w0");
        assert_eq!(req.encode(), "softmax|r9|pytorch|w0\n");
        assert_eq!(Request::parse(&req.encode()).unwrap(), req);
        assert_eq!(Request::new("a", "b", "c").encode(), "a|b|c\n");
    }

    #[test]
    fn response_frame_format() {
        let mut out = String::new();
        write_response(&mut out, "req-1", true, "OK");
        assert_eq!(out, "req-1|1|OK\n");

        let denied = Response {
            request_id: "9".into(),
            allowed: false,
            reason: "quota|exceeded\nnow".into(),
        };
        assert_eq!(denied.encode(), "9|0|quota exceeded now\n");
    }

    #[test]
    fn response_parse() {
        let resp = Response::parse("req-1|1|OK\n").unwrap();
        assert_eq!(resp.request_id, "req-1");
        assert!(resp.allowed);
        assert_eq!(resp.reason, "OK");

        assert!(Response::parse("req-1|yes|OK\n").is_err());
        assert!(Response::parse("req-1|1").is_err());
    }
}
