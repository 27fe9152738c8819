//! The BTP wire frame format: `{ type, requestId, sub-protocols }`, where
//! each sub-protocol is a named byte-string payload. The `ilp` sub-protocol
//! carries an encoded ILP packet; `auth`/`auth_token` carry the
//! authentication handshake.

use std::borrow::Cow;
use std::io::Read;
use std::str;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use chrono::{DateTime, TimeZone, Utc};
use ilp_packet::oer::{BufOerExt, MutBufOerExt};
use ilp_packet::ParseError;

static GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%S%.3fZ";

pub trait Serializable<T> {
    fn from_bytes(bytes: &[u8]) -> Result<T, ParseError>;
    fn to_bytes(&self) -> Vec<u8>;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
enum FrameType {
    Message = 6,
    Response = 1,
    Error = 2,
    Unknown,
}

impl From<u8> for FrameType {
    fn from(byte: u8) -> Self {
        match byte {
            6 => FrameType::Message,
            1 => FrameType::Response,
            2 => FrameType::Error,
            _ => FrameType::Unknown,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum BtpPacket {
    Message(BtpMessage),
    Response(BtpResponse),
    Error(BtpError),
}

impl BtpPacket {
    pub fn request_id(&self) -> u32 {
        match self {
            BtpPacket::Message(m) => m.request_id,
            BtpPacket::Response(r) => r.request_id,
            BtpPacket::Error(e) => e.request_id,
        }
    }
}

impl Serializable<BtpPacket> for BtpPacket {
    fn from_bytes(bytes: &[u8]) -> Result<BtpPacket, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::InvalidPacket("empty BTP frame".to_string()));
        }
        match FrameType::from(bytes[0]) {
            FrameType::Message => Ok(BtpPacket::Message(BtpMessage::from_bytes(bytes)?)),
            FrameType::Response => Ok(BtpPacket::Response(BtpResponse::from_bytes(bytes)?)),
            FrameType::Error => Ok(BtpPacket::Error(BtpError::from_bytes(bytes)?)),
            FrameType::Unknown => Err(ParseError::InvalidPacket(format!(
                "unknown BTP frame type: {}",
                bytes[0]
            ))),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            BtpPacket::Message(packet) => packet.to_bytes(),
            BtpPacket::Response(packet) => packet.to_bytes(),
            BtpPacket::Error(packet) => packet.to_bytes(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ContentType {
    ApplicationOctetStream,
    TextPlainUtf8,
    Unknown(u8),
}

impl From<u8> for ContentType {
    fn from(byte: u8) -> Self {
        match byte {
            0 => ContentType::ApplicationOctetStream,
            1 => ContentType::TextPlainUtf8,
            x => ContentType::Unknown(x),
        }
    }
}

impl From<ContentType> for u8 {
    fn from(content_type: ContentType) -> Self {
        match content_type {
            ContentType::ApplicationOctetStream => 0,
            ContentType::TextPlainUtf8 => 1,
            ContentType::Unknown(x) => x,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ProtocolData {
    pub protocol_name: Cow<'static, str>,
    pub content_type: ContentType,
    pub data: Vec<u8>,
}

impl ProtocolData {
    pub fn ilp(data: Vec<u8>) -> Self {
        ProtocolData {
            protocol_name: Cow::Borrowed("ilp"),
            content_type: ContentType::ApplicationOctetStream,
            data,
        }
    }
}

/// The sub-protocol name carrying the encoded ILP packet.
pub const ILP_SUBPROTOCOL: &str = "ilp";
/// The sub-protocol name carrying the auth handshake marker.
pub const AUTH_SUBPROTOCOL: &str = "auth";
/// The sub-protocol name carrying the auth token payload.
pub const AUTH_TOKEN_SUBPROTOCOL: &str = "auth_token";

/// Finds the `ilp` sub-protocol payload among a frame's protocol data, if any.
pub fn find_ilp_payload(protocol_data: &[ProtocolData]) -> Option<&[u8]> {
    protocol_data
        .iter()
        .find(|p| p.protocol_name == ILP_SUBPROTOCOL)
        .map(|p| p.data.as_slice())
}

fn read_protocol_data(reader: &mut &[u8]) -> Result<Vec<ProtocolData>, ParseError> {
    let mut protocol_data = Vec::new();
    let num_entries = reader.read_var_uint()?;
    for _ in 0..num_entries {
        let protocol_name = str::from_utf8(reader.read_var_octet_string()?)?.to_owned();
        let content_type = ContentType::from(reader.read_u8()?);
        let data = reader.read_var_octet_string()?.to_vec();
        protocol_data.push(ProtocolData {
            protocol_name: Cow::Owned(protocol_name),
            content_type,
            data,
        });
    }
    Ok(protocol_data)
}

fn put_protocol_data(buf: &mut Vec<u8>, protocol_data: &[ProtocolData]) {
    buf.put_var_uint(protocol_data.len() as u64);
    for entry in protocol_data {
        buf.put_var_octet_string(entry.protocol_name.as_bytes());
        buf.put_u8(entry.content_type.into());
        buf.put_var_octet_string(&entry.data[..]);
    }
}

fn check_no_trailing_bytes(buf: &[u8]) -> Result<(), ParseError> {
    if !buf.is_empty() {
        return Err(ParseError::InvalidPacket("extra trailing bytes".to_string()));
    }
    Ok(())
}

#[derive(Debug, PartialEq, Clone)]
pub struct BtpMessage {
    pub request_id: u32,
    pub protocol_data: Vec<ProtocolData>,
}

impl Serializable<BtpMessage> for BtpMessage {
    fn from_bytes(bytes: &[u8]) -> Result<BtpMessage, ParseError> {
        let mut reader = bytes;
        let frame_type = reader.read_u8()?;
        if FrameType::from(frame_type) != FrameType::Message {
            return Err(ParseError::InvalidPacket(format!(
                "expected Message frame (type {}), got {}",
                FrameType::Message as u8,
                frame_type
            )));
        }
        let request_id = reader.read_u32::<BigEndian>()?;
        let mut contents = reader.read_var_octet_string()?;
        check_no_trailing_bytes(reader)?;
        let protocol_data = read_protocol_data(&mut contents)?;
        Ok(BtpMessage { request_id, protocol_data })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(FrameType::Message as u8);
        buf.put_u32(self.request_id);
        let mut contents = Vec::new();
        put_protocol_data(&mut contents, &self.protocol_data);
        buf.put_var_octet_string(&contents[..]);
        buf
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct BtpResponse {
    pub request_id: u32,
    pub protocol_data: Vec<ProtocolData>,
}

impl Serializable<BtpResponse> for BtpResponse {
    fn from_bytes(bytes: &[u8]) -> Result<BtpResponse, ParseError> {
        let mut reader = bytes;
        let frame_type = reader.read_u8()?;
        if FrameType::from(frame_type) != FrameType::Response {
            return Err(ParseError::InvalidPacket(format!(
                "expected Response frame (type {}), got {}",
                FrameType::Response as u8,
                frame_type
            )));
        }
        let request_id = reader.read_u32::<BigEndian>()?;
        let mut contents = reader.read_var_octet_string()?;
        check_no_trailing_bytes(reader)?;
        let protocol_data = read_protocol_data(&mut contents)?;
        Ok(BtpResponse { request_id, protocol_data })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(FrameType::Response as u8);
        buf.put_u32(self.request_id);
        let mut contents = Vec::new();
        put_protocol_data(&mut contents, &self.protocol_data);
        buf.put_var_octet_string(&contents[..]);
        buf
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct BtpError {
    pub request_id: u32,
    pub code: String,
    pub name: String,
    pub triggered_at: DateTime<Utc>,
    pub data: String,
    pub protocol_data: Vec<ProtocolData>,
}

impl Serializable<BtpError> for BtpError {
    fn from_bytes(bytes: &[u8]) -> Result<BtpError, ParseError> {
        let mut reader = bytes;
        let frame_type = reader.read_u8()?;
        if FrameType::from(frame_type) != FrameType::Error {
            return Err(ParseError::InvalidPacket(format!(
                "expected Error frame (type {}), got {}",
                FrameType::Error as u8,
                frame_type
            )));
        }
        let request_id = reader.read_u32::<BigEndian>()?;
        let mut contents = reader.read_var_octet_string()?;
        check_no_trailing_bytes(reader)?;

        let mut code = [0u8; 3];
        contents.read_exact(&mut code)?;
        let name = str::from_utf8(contents.read_var_octet_string()?)?.to_owned();
        let triggered_at_string = str::from_utf8(contents.read_var_octet_string()?)?.to_owned();
        let triggered_at = Utc.datetime_from_str(&triggered_at_string, GENERALIZED_TIME_FORMAT)?;
        let data = str::from_utf8(contents.read_var_octet_string()?)?.to_owned();
        let protocol_data = read_protocol_data(&mut contents)?;

        Ok(BtpError {
            request_id,
            code: str::from_utf8(&code[..])?.to_owned(),
            name,
            triggered_at,
            data,
            protocol_data,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(FrameType::Error as u8);
        buf.put_u32(self.request_id);
        let mut contents = Vec::new();
        contents.extend_from_slice(self.code.as_bytes());
        contents.put_var_octet_string(self.name.as_bytes());
        contents.put_var_octet_string(
            self.triggered_at.format(GENERALIZED_TIME_FORMAT).to_string().as_bytes(),
        );
        contents.put_var_octet_string(self.data.as_bytes());
        put_protocol_data(&mut contents, &self.protocol_data);
        buf.put_var_octet_string(&contents[..]);
        buf
    }
}
