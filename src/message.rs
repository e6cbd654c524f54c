//! The protocol message model (spec §3): 21 tagged variants, one struct per
//! payload, and a single encode/decode pair. This replaces the polymorphic
//! "Message base class with reflection-based field copying" the spec's
//! design notes (§9) describe in the source system with a sum type — each
//! variant's fields are known at compile time, and there is exactly one
//! place (`Message::decode`/`Message::encode_payload`) that knows how to
//! turn tag bytes into Rust values and back.
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize as _, Deserializer, Serialize as _, Serializer};
use serde_derive::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Tag 8 (SHELL_DATA) is reserved and unused (spec §3, §9 open question);
/// it is never produced, and decoding it is rejected at the frame layer.
pub const TAG_RESERVED_SHELL_DATA: u8 = 8;

mod base64_bytes {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        BASE64.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        bytes.as_ref().map(|b| BASE64.encode(b)).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => BASE64
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Unlike most enums here, an unrecognized `authType` string must not fail
/// decoding outright (spec §4.4: it's an auth failure, not a protocol
/// error), so this carries the raw string through rather than deriving
/// `Serialize`/`Deserialize` and rejecting unknown variants at the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthType {
    Password,
    PublicKey,
    Dual,
    Unknown(String),
}

impl serde::Serialize for AuthType {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AuthType::Password => "password".serialize(s),
            AuthType::PublicKey => "publickey".serialize(s),
            AuthType::Dual => "dual".serialize(s),
            AuthType::Unknown(value) => value.serialize(s),
        }
    }
}

impl<'de> serde::Deserialize<'de> for AuthType {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(match raw.as_str() {
            "password" => AuthType::Password,
            "publickey" => AuthType::PublicKey,
            "dual" => AuthType::Dual,
            _ => AuthType::Unknown(raw),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardType {
    #[serde(rename = "LOCAL")]
    Local,
    #[serde(rename = "REMOTE")]
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeInit {
    #[serde(with = "base64_bytes")]
    pub dh_public_key: Vec<u8>,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeReply {
    #[serde(with = "base64_bytes")]
    pub dh_public_key: Vec<u8>,
    pub server_id: String,
    #[serde(with = "base64_bytes")]
    pub server_public_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub username: String,
    pub auth_type: AuthType,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, with = "base64_bytes_opt")]
    pub public_key: Option<Vec<u8>>,
    #[serde(default, with = "base64_bytes_opt")]
    pub signature: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSuccess {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailure {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccept {
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellCommand {
    pub command: String,
    pub working_directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub working_directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadRequest {
    pub filename: String,
    pub file_size: u64,
    pub target_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDownloadRequest {
    pub filename: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub sequence_number: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub is_last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAck {
    pub sequence_number: u32,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub error_code: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardRequest {
    pub forward_type: ForwardType,
    pub source_port: u16,
    pub dest_host: String,
    pub dest_port: u16,
    pub connection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardAccept {
    pub connection_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardData {
    pub connection_id: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardClose {
    pub connection_id: String,
}

/// The 21-variant tagged union (spec §3's table). Tag 8 is deliberately
/// absent: it is reserved and never constructed.
#[derive(Debug, Clone)]
pub enum Message {
    KeyExchangeInit(KeyExchangeInit),
    KeyExchangeReply(KeyExchangeReply),
    AuthRequest(AuthRequest),
    AuthSuccess(AuthSuccess),
    AuthFailure(AuthFailure),
    ServiceRequest(ServiceRequest),
    ServiceAccept(ServiceAccept),
    ShellCommand(ShellCommand),
    ShellResult(ShellResult),
    FileUploadRequest(FileUploadRequest),
    FileDownloadRequest(FileDownloadRequest),
    FileData(FileData),
    FileAck(FileAck),
    Error(ErrorMessage),
    Disconnect,
    ReloadUsers,
    PortForwardRequest(PortForwardRequest),
    PortForwardAccept(PortForwardAccept),
    PortForwardData(PortForwardData),
    PortForwardClose(PortForwardClose),
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::KeyExchangeInit(_) => 1,
            Message::KeyExchangeReply(_) => 2,
            Message::AuthRequest(_) => 3,
            Message::AuthSuccess(_) => 4,
            Message::AuthFailure(_) => 5,
            Message::ServiceRequest(_) => 6,
            Message::ServiceAccept(_) => 7,
            Message::ShellCommand(_) => 9,
            Message::ShellResult(_) => 10,
            Message::FileUploadRequest(_) => 11,
            Message::FileDownloadRequest(_) => 12,
            Message::FileData(_) => 13,
            Message::FileAck(_) => 14,
            Message::Error(_) => 15,
            Message::Disconnect => 16,
            Message::ReloadUsers => 17,
            Message::PortForwardRequest(_) => 18,
            Message::PortForwardAccept(_) => 19,
            Message::PortForwardData(_) => 20,
            Message::PortForwardClose(_) => 21,
        }
    }

    /// Human-readable name, used only for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeyExchangeInit(_) => "KEY_EXCHANGE_INIT",
            Message::KeyExchangeReply(_) => "KEY_EXCHANGE_REPLY",
            Message::AuthRequest(_) => "AUTH_REQUEST",
            Message::AuthSuccess(_) => "AUTH_SUCCESS",
            Message::AuthFailure(_) => "AUTH_FAILURE",
            Message::ServiceRequest(_) => "SERVICE_REQUEST",
            Message::ServiceAccept(_) => "SERVICE_ACCEPT",
            Message::ShellCommand(_) => "SHELL_COMMAND",
            Message::ShellResult(_) => "SHELL_RESULT",
            Message::FileUploadRequest(_) => "FILE_UPLOAD_REQUEST",
            Message::FileDownloadRequest(_) => "FILE_DOWNLOAD_REQUEST",
            Message::FileData(_) => "FILE_DATA",
            Message::FileAck(_) => "FILE_ACK",
            Message::Error(_) => "ERROR",
            Message::Disconnect => "DISCONNECT",
            Message::ReloadUsers => "RELOAD_USERS",
            Message::PortForwardRequest(_) => "PORT_FORWARD_REQUEST",
            Message::PortForwardAccept(_) => "PORT_FORWARD_ACCEPT",
            Message::PortForwardData(_) => "PORT_FORWARD_DATA",
            Message::PortForwardClose(_) => "PORT_FORWARD_CLOSE",
        }
    }

    /// Serializes this message's payload (everything except the tag,
    /// sequence number, and MAC trailer, which the frame codec owns).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let value = match self {
            Message::KeyExchangeInit(p) => serde_json::to_vec(p),
            Message::KeyExchangeReply(p) => serde_json::to_vec(p),
            Message::AuthRequest(p) => serde_json::to_vec(p),
            Message::AuthSuccess(p) => serde_json::to_vec(p),
            Message::AuthFailure(p) => serde_json::to_vec(p),
            Message::ServiceRequest(p) => serde_json::to_vec(p),
            Message::ServiceAccept(p) => serde_json::to_vec(p),
            Message::ShellCommand(p) => serde_json::to_vec(p),
            Message::ShellResult(p) => serde_json::to_vec(p),
            Message::FileUploadRequest(p) => serde_json::to_vec(p),
            Message::FileDownloadRequest(p) => serde_json::to_vec(p),
            Message::FileData(p) => serde_json::to_vec(p),
            Message::FileAck(p) => serde_json::to_vec(p),
            Message::Error(p) => serde_json::to_vec(p),
            Message::Disconnect => Ok(Vec::new()),
            Message::ReloadUsers => Ok(Vec::new()),
            Message::PortForwardRequest(p) => serde_json::to_vec(p),
            Message::PortForwardAccept(p) => serde_json::to_vec(p),
            Message::PortForwardData(p) => serde_json::to_vec(p),
            Message::PortForwardClose(p) => serde_json::to_vec(p),
        };
        Ok(value?)
    }

    /// Decodes a message from its wire tag and payload bytes. Unknown
    /// fields in the payload are ignored by `serde_json` by default,
    /// giving forward compatibility (spec §4.1); unknown tags, including
    /// the reserved tag 8, fail with `UnknownType`.
    pub fn decode(tag: u8, payload: &[u8]) -> Result<Message> {
        Ok(match tag {
            1 => Message::KeyExchangeInit(serde_json::from_slice(payload)?),
            2 => Message::KeyExchangeReply(serde_json::from_slice(payload)?),
            3 => Message::AuthRequest(serde_json::from_slice(payload)?),
            4 => Message::AuthSuccess(serde_json::from_slice(payload)?),
            5 => Message::AuthFailure(serde_json::from_slice(payload)?),
            6 => Message::ServiceRequest(serde_json::from_slice(payload)?),
            7 => Message::ServiceAccept(serde_json::from_slice(payload)?),
            9 => Message::ShellCommand(serde_json::from_slice(payload)?),
            10 => Message::ShellResult(serde_json::from_slice(payload)?),
            11 => Message::FileUploadRequest(serde_json::from_slice(payload)?),
            12 => Message::FileDownloadRequest(serde_json::from_slice(payload)?),
            13 => Message::FileData(serde_json::from_slice(payload)?),
            14 => Message::FileAck(serde_json::from_slice(payload)?),
            15 => Message::Error(serde_json::from_slice(payload)?),
            16 => Message::Disconnect,
            17 => Message::ReloadUsers,
            18 => Message::PortForwardRequest(serde_json::from_slice(payload)?),
            19 => Message::PortForwardAccept(serde_json::from_slice(payload)?),
            20 => Message::PortForwardData(serde_json::from_slice(payload)?),
            21 => Message::PortForwardClose(serde_json::from_slice(payload)?),
            other => return Err(Error::UnknownType(other)),
        })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Message {
        Message::Error(ErrorMessage {
            error_code: code.into(),
            error_message: message.into(),
            details: None,
        })
    }

    pub fn auth_success(message: impl Into<String>) -> Message {
        Message::AuthSuccess(AuthSuccess {
            success: true,
            message: message.into(),
        })
    }

    /// Spec §4.4: the server MUST NOT disclose which factor failed, so
    /// this is the only constructor for AUTH_FAILURE and it always carries
    /// the same constant text.
    pub fn auth_failure() -> Message {
        Message::AuthFailure(AuthFailure {
            success: false,
            message: "authentication failed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_round_trips() {
        let msg = Message::ShellCommand(ShellCommand {
            command: "echo hello".to_string(),
            working_directory: "/tmp".to_string(),
        });
        let payload = msg.encode_payload().unwrap();
        let decoded = Message::decode(msg.tag(), &payload).unwrap();
        match decoded {
            Message::ShellCommand(c) => {
                assert_eq!(c.command, "echo hello");
                assert_eq!(c.working_directory, "/tmp");
            }
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn binary_fields_round_trip_through_base64() {
        let msg = Message::PortForwardData(PortForwardData {
            connection_id: "c1".to_string(),
            data: vec![0, 1, 2, 255, 254],
        });
        let payload = msg.encode_payload().unwrap();
        assert!(!payload.is_empty());
        let decoded = Message::decode(20, &payload).unwrap();
        match decoded {
            Message::PortForwardData(d) => assert_eq!(d.data, vec![0, 1, 2, 255, 254]),
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn reserved_tag_is_rejected() {
        assert!(Message::decode(TAG_RESERVED_SHELL_DATA, b"{}").is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(Message::decode(200, b"{}").is_err());
    }

    #[test]
    fn unknown_fields_are_ignored_on_decode() {
        let payload = br#"{"command":"ls","workingDirectory":"/","extra":"ignored"}"#;
        let decoded = Message::decode(9, payload).unwrap();
        match decoded {
            Message::ShellCommand(c) => assert_eq!(c.command, "ls"),
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn auth_failure_message_is_constant() {
        assert_eq!(
            Message::auth_failure().encode_payload().unwrap(),
            Message::auth_failure().encode_payload().unwrap()
        );
    }
}
