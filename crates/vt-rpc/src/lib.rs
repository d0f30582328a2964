//! Posted-message ports and the cross-origin RPC layer between the shell
//! and its embedded page.

use std::sync::mpsc;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;
use vt_core::ShellError;
use vt_core::ShellResult;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const FRAME_PREFIX_BYTES: usize = 4;

/// Wildcard target accepted by every port.
pub const TARGET_ORIGIN_ANY: &str = "*";

/// Error code a handler raises when a renavigation replaced its session
/// mid-request. The router treats it as an expected abort and posts no reply.
pub const REQUEST_SUPERSEDED_CODE: &str = "rpc.request_superseded";

/// Error code for unknown methods; becomes the `method_not_found` reply kind.
pub const METHOD_NOT_FOUND_CODE: &str = "rpc.method_not_found";

/// Delivery settings for one side of a message boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub origin: String,
    pub max_message_bytes: usize,
}

impl PortConfig {
    pub fn hardened(origin: impl Into<String>) -> ShellResult<Self> {
        let config = Self {
            origin: origin.into(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ShellResult<()> {
        if self.origin.trim().is_empty() {
            return Err(ShellError::new(
                "rpc.origin_empty",
                "port origin must not be empty",
            ));
        }

        if self.origin.chars().any(char::is_whitespace) {
            return Err(ShellError::new(
                "rpc.origin_malformed",
                format!("port origin `{}` contains whitespace", self.origin),
            ));
        }

        if self.max_message_bytes == 0 {
            return Err(ShellError::new(
                "rpc.max_message_bytes_invalid",
                "port max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > (16 * 1024 * 1024) {
            return Err(ShellError::new(
                "rpc.max_message_bytes_too_large",
                "port max_message_bytes exceeds hard limit (16 MiB)",
            ));
        }

        Ok(())
    }
}

/// One delivered message: who sent it, who it was for, and the JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub origin: String,
    pub target_origin: String,
    pub body: String,
}

/// In-memory port that behaves like a window boundary: it stamps its own
/// origin on everything it sends and only delivers messages addressed to it.
pub struct MessagePort {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    config: PortConfig,
}

impl MessagePort {
    pub fn origin(&self) -> &str {
        &self.config.origin
    }

    /// Posts `body` toward `target_origin`.
    ///
    /// The sender origin on the wire always comes from this port's config;
    /// a payload cannot claim to be from somewhere else.
    pub fn post(&self, body: &str, target_origin: &str) -> ShellResult<()> {
        let payload = encode_posted_payload(&self.config.origin, target_origin, body)?;
        let frame = encode_frame(&payload, self.config.max_message_bytes)?;
        self.tx.send(frame).map_err(|error| {
            ShellError::new(
                "rpc.post_failed",
                format!(
                    "failed to post message from {} port: {error}",
                    self.config.origin
                ),
            )
        })
    }

    /// Waits for the next message addressed to this port.
    ///
    /// Messages targeted at a different origin are discarded, not delivered;
    /// `*` targets are delivered to anyone.
    pub fn recv_timeout(&self, timeout: Duration) -> ShellResult<PostedMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ShellError::new(
                    "rpc.recv_failed",
                    format!("timed out waiting for a message on {} port", self.config.origin),
                ));
            }

            let frame = self.rx.recv_timeout(remaining).map_err(|error| {
                ShellError::new(
                    "rpc.recv_failed",
                    format!(
                        "failed to receive message for {} port: {error}",
                        self.config.origin
                    ),
                )
            })?;
            let payload = decode_frame(&frame, self.config.max_message_bytes)?;
            let message = decode_posted_payload(&payload)?;

            if message.target_origin == TARGET_ORIGIN_ANY
                || message.target_origin == self.config.origin
            {
                return Ok(message);
            }

            trace!(
                target_origin = %message.target_origin,
                port = %self.config.origin,
                "discarding message addressed to another origin"
            );
        }
    }
}

/// Creates an entangled pair of ports, one per side of the boundary.
pub fn local_port_pair(
    left: PortConfig,
    right: PortConfig,
) -> ShellResult<(MessagePort, MessagePort)> {
    left.validate()?;
    right.validate()?;

    let (left_to_right_tx, left_to_right_rx) = mpsc::channel();
    let (right_to_left_tx, right_to_left_rx) = mpsc::channel();

    Ok((
        MessagePort {
            tx: left_to_right_tx,
            rx: right_to_left_rx,
            config: left,
        },
        MessagePort {
            tx: right_to_left_tx,
            rx: left_to_right_rx,
            config: right,
        },
    ))
}

/// Encodes a payload as a length-prefixed frame.
pub fn encode_frame(payload: &[u8], max_message_bytes: usize) -> ShellResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(ShellError::new(
            "rpc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                payload.len(),
                max_message_bytes
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        ShellError::new(
            "rpc.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a length-prefixed frame and validates payload size.
pub fn decode_frame(frame: &[u8], max_message_bytes: usize) -> ShellResult<Vec<u8>> {
    if frame.len() < FRAME_PREFIX_BYTES {
        return Err(ShellError::new(
            "rpc.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    }

    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    len_bytes.copy_from_slice(&frame[..FRAME_PREFIX_BYTES]);
    let payload_len = u32::from_be_bytes(len_bytes) as usize;
    if payload_len > max_message_bytes {
        return Err(ShellError::new(
            "rpc.message_too_large",
            format!(
                "decoded payload exceeds max_message_bytes ({} > {})",
                payload_len, max_message_bytes
            ),
        ));
    }

    let expected = FRAME_PREFIX_BYTES + payload_len;
    if frame.len() != expected {
        return Err(ShellError::new(
            "rpc.frame_length_mismatch",
            format!(
                "frame length mismatch: expected {expected} bytes, got {}",
                frame.len()
            ),
        ));
    }

    Ok(frame[FRAME_PREFIX_BYTES..].to_vec())
}

fn encode_posted_payload(
    origin: &str,
    target_origin: &str,
    body: &str,
) -> ShellResult<Vec<u8>> {
    let mut out =
        Vec::with_capacity(4 + origin.len() + target_origin.len() + body.len());
    write_string_u16(&mut out, origin, "origin")?;
    write_string_u16(&mut out, target_origin, "target_origin")?;
    out.extend_from_slice(body.as_bytes());
    Ok(out)
}

fn decode_posted_payload(payload: &[u8]) -> ShellResult<PostedMessage> {
    let mut offset = 0_usize;
    let origin = read_string_u16(payload, &mut offset, "origin")?;
    let target_origin = read_string_u16(payload, &mut offset, "target_origin")?;
    let body = String::from_utf8(payload[offset..].to_vec()).map_err(|error| {
        ShellError::new(
            "rpc.message_utf8_invalid",
            format!("posted message body is not valid UTF-8: {error}"),
        )
    })?;

    Ok(PostedMessage {
        origin,
        target_origin,
        body,
    })
}

fn write_string_u16(out: &mut Vec<u8>, value: &str, field: &str) -> ShellResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        ShellError::new(
            "rpc.message_field_too_long",
            format!("posted message field `{field}` exceeds the u16 length prefix"),
        )
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_u16(payload: &[u8], offset: &mut usize, field: &str) -> ShellResult<u16> {
    let bytes = read_exact(payload, offset, 2, field)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_string_u16(payload: &[u8], offset: &mut usize, field: &str) -> ShellResult<String> {
    let len = usize::from(read_u16(payload, offset, field)?);
    let bytes = read_exact(payload, offset, len, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|error| {
        ShellError::new(
            "rpc.message_utf8_invalid",
            format!("posted message field `{field}` is not valid UTF-8: {error}"),
        )
    })
}

fn read_exact<'a>(
    payload: &'a [u8],
    offset: &mut usize,
    len: usize,
    field: &str,
) -> ShellResult<&'a [u8]> {
    let end = offset.saturating_add(len);
    if end > payload.len() {
        return Err(ShellError::new(
            "rpc.message_truncated",
            format!("posted message ended while reading `{field}` (need {len} bytes)"),
        ));
    }

    let out = &payload[*offset..end];
    *offset = end;
    Ok(out)
}

/// One request from the page on the other side of the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Machine-readable failure category carried in error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    MethodNotFound,
    InvalidOrigin,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            kind: RpcErrorKind::MethodNotFound,
            message: format!("no such method `{method}`"),
        }
    }

    /// Maps a handler failure onto the wire categories. Unknown methods and
    /// origin-validation failures keep their identity; everything else is a
    /// generic error with the handler's message.
    pub fn from_shell_error(error: &ShellError) -> Self {
        let kind = if error.code == METHOD_NOT_FOUND_CODE {
            RpcErrorKind::MethodNotFound
        } else if error.code.ends_with("origin_invalid") {
            RpcErrorKind::InvalidOrigin
        } else {
            RpcErrorKind::Error
        };
        Self {
            kind,
            message: error.message.clone(),
        }
    }
}

/// Reply envelope. Exactly one of `result` or `error` appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Ok { id: u64, result: Value },
    Err { id: u64, error: RpcError },
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self::Ok { id, result }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self::Err { id, error }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Ok { id, .. } => *id,
            Self::Err { id, .. } => *id,
        }
    }
}

/// Monotonic request ids for the calling side.
#[derive(Debug, Default)]
pub struct RequestIdSource {
    next: u64,
}

impl RequestIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u64 {
        self.next = self.next.wrapping_add(1);
        self.next
    }
}

/// Something able to service inbound method calls.
pub trait MethodHandler {
    fn handle(&mut self, method: &str, params: &Value) -> ShellResult<Value>;
}

/// What the router did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Replied,
    OriginRejected,
    Malformed,
    Superseded,
}

/// Dispatches inbound requests to a handler, enforcing the origin gate.
pub struct RpcRouter<H: MethodHandler> {
    port: MessagePort,
    peer_origin: String,
    handler: H,
}

impl<H: MethodHandler> RpcRouter<H> {
    pub fn new(port: MessagePort, peer_origin: impl Into<String>, handler: H) -> Self {
        Self {
            port,
            peer_origin: peer_origin.into(),
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Receives one message and serves it.
    pub fn pump(&mut self, timeout: Duration) -> ShellResult<RouteOutcome> {
        let message = self.port.recv_timeout(timeout)?;
        self.serve(message)
    }

    /// Applies the origin gate and dispatches one posted message.
    ///
    /// A message from any origin other than the expected peer is dropped:
    /// no reply, no handler call, no state change. A body that is not a
    /// request envelope is dropped the same way.
    pub fn serve(&mut self, message: PostedMessage) -> ShellResult<RouteOutcome> {
        if message.origin != self.peer_origin {
            trace!(
                origin = %message.origin,
                expected = %self.peer_origin,
                "dropping message from unexpected origin"
            );
            return Ok(RouteOutcome::OriginRejected);
        }

        let request: RpcRequest = match serde_json::from_str(&message.body) {
            Ok(request) => request,
            Err(error) => {
                trace!(%error, "dropping message that is not a request envelope");
                return Ok(RouteOutcome::Malformed);
            }
        };

        let response = match self.handler.handle(&request.method, &request.params) {
            Ok(result) => RpcResponse::ok(request.id, result),
            Err(error) if error.code == REQUEST_SUPERSEDED_CODE => {
                trace!(method = %request.method, "request superseded; suppressing reply");
                return Ok(RouteOutcome::Superseded);
            }
            Err(error) => RpcResponse::err(request.id, RpcError::from_shell_error(&error)),
        };

        let body = serde_json::to_string(&response).map_err(|error| {
            ShellError::new(
                "rpc.encode_failed",
                format!("failed to encode reply envelope: {error}"),
            )
        })?;
        self.port.post(&body, &message.origin)?;
        Ok(RouteOutcome::Replied)
    }
}

/// Caller side: posts requests toward the peer and matches replies by id.
pub struct RpcClient {
    port: MessagePort,
    peer_origin: String,
    ids: RequestIdSource,
}

impl RpcClient {
    pub fn new(port: MessagePort, peer_origin: impl Into<String>) -> Self {
        Self {
            port,
            peer_origin: peer_origin.into(),
            ids: RequestIdSource::new(),
        }
    }

    /// Sends one request and waits for its reply. Replies carrying other
    /// ids (from requests this client already gave up on) are discarded.
    pub fn call(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> ShellResult<RpcResponse> {
        let id = self.ids.next();
        let request = RpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        let body = serde_json::to_string(&request).map_err(|error| {
            ShellError::new(
                "rpc.encode_failed",
                format!("failed to encode request envelope: {error}"),
            )
        })?;
        self.port.post(&body, &self.peer_origin)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ShellError::new(
                    "rpc.recv_failed",
                    format!("timed out waiting for a reply to `{method}`"),
                ));
            }

            let message = self.port.recv_timeout(remaining)?;
            let response: RpcResponse = match serde_json::from_str(&message.body) {
                Ok(response) => response,
                Err(error) => {
                    trace!(%error, "discarding message that is not a reply envelope");
                    continue;
                }
            };
            if response.id() == id {
                return Ok(response);
            }
            trace!(id = response.id(), expected = id, "discarding stale reply");
        }
    }
}
