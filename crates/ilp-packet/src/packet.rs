use std::fmt;
use std::io::prelude::*;
use std::str;
use std::time::SystemTime;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use super::oer::{self, BufOerExt, MutBufOerExt};
use super::{Address, ErrorCode, ParseError};
use std::convert::TryFrom;

const AMOUNT_LEN: usize = 8;
const EXPIRY_LEN: usize = 17;
const CONDITION_LEN: usize = 32;
const FULFILLMENT_LEN: usize = 32;
const ERROR_CODE_LEN: usize = 3;

/// Maximum length of the `data` field carried on any packet, per the wire
/// contract.
pub const MAX_DATA_LEN: usize = 32768;
/// Maximum length of a Reject's `message` field.
pub const MAX_MESSAGE_LEN: usize = 8192;

pub(crate) static INTERLEDGER_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u8)]
pub enum PacketType {
    Prepare = 12,
    Fulfill = 13,
    Reject = 14,
}

impl TryFrom<&[u8]> for PacketType {
    type Error = ParseError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        match bytes.first() {
            Some(&12) => Ok(PacketType::Prepare),
            Some(&13) => Ok(PacketType::Fulfill),
            Some(&14) => Ok(PacketType::Reject),
            _ => Err(ParseError::InvalidPacket(format!("unknown packet type: {:?}", bytes))),
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ParseError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            12 => Ok(PacketType::Prepare),
            13 => Ok(PacketType::Fulfill),
            14 => Ok(PacketType::Reject),
            _ => Err(ParseError::InvalidPacket(format!("unknown packet type: {:?}", byte))),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Packet {
    Prepare(Prepare),
    Fulfill(Fulfill),
    Reject(Reject),
}

impl TryFrom<BytesMut> for Packet {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        match buffer.first() {
            Some(&12) => Ok(Packet::Prepare(Prepare::try_from(buffer)?)),
            Some(&13) => Ok(Packet::Fulfill(Fulfill::try_from(buffer)?)),
            Some(&14) => Ok(Packet::Reject(Reject::try_from(buffer)?)),
            _ => Err(ParseError::InvalidPacket(format!("unknown packet type: {:?}", buffer.first()))),
        }
    }
}

impl From<Packet> for BytesMut {
    fn from(packet: Packet) -> Self {
        match packet {
            Packet::Prepare(prepare) => prepare.into(),
            Packet::Fulfill(fulfill) => fulfill.into(),
            Packet::Reject(reject) => reject.into(),
        }
    }
}

impl From<Prepare> for Packet {
    fn from(prepare: Prepare) -> Self {
        Packet::Prepare(prepare)
    }
}

impl From<Fulfill> for Packet {
    fn from(fulfill: Fulfill) -> Self {
        Packet::Fulfill(fulfill)
    }
}

impl From<Reject> for Packet {
    fn from(reject: Reject) -> Self {
        Packet::Reject(reject)
    }
}

#[derive(PartialEq, Clone)]
pub struct Prepare {
    buffer: BytesMut,
    content_offset: usize,
    destination: Address,
    amount: u64,
    expires_at: SystemTime,
    data_offset: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PrepareBuilder<'a> {
    pub amount: u64,
    pub expires_at: SystemTime,
    pub execution_condition: &'a [u8; 32],
    pub destination: Address,
    pub data: &'a [u8],
}

impl TryFrom<BytesMut> for Prepare {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        let (content_offset, mut content) = deserialize_envelope(PacketType::Prepare, &buffer)?;
        let content_len = content.len();
        let amount = content.read_u64::<BigEndian>()?;

        let mut expires_at = [0x00; EXPIRY_LEN];
        content.read_exact(&mut expires_at)?;
        let expires_at = str::from_utf8(&expires_at[..])?;
        let expires_at: DateTime<Utc> = Utc.datetime_from_str(expires_at, INTERLEDGER_TIMESTAMP_FORMAT)?;
        let expires_at = SystemTime::from(expires_at);

        // Skip execution condition.
        content.skip(CONDITION_LEN)?;

        let destination = Address::try_from(Bytes::copy_from_slice(content.read_var_octet_string()?))?;

        let data_offset = content_offset + content_len - content.len();
        let data = content.read_var_octet_string()?;
        if data.len() > MAX_DATA_LEN {
            return Err(ParseError::InvalidPacket("data field exceeds maximum length".into()));
        }
        if !content.is_empty() {
            return Err(ParseError::InvalidPacket("trailing bytes after Prepare data".into()));
        }

        Ok(Prepare {
            buffer,
            content_offset,
            destination,
            amount,
            expires_at,
            data_offset,
        })
    }
}

impl Prepare {
    #[inline]
    pub fn amount(&self) -> u64 {
        self.amount
    }

    #[inline]
    pub fn set_amount(&mut self, amount: u64) {
        self.amount = amount;
        let offset = self.content_offset;
        BigEndian::write_u64(&mut self.buffer[offset..offset + AMOUNT_LEN], amount);
    }

    #[inline]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    #[inline]
    pub fn set_expires_at(&mut self, expires_at: SystemTime) {
        self.expires_at = expires_at;
        let offset = self.content_offset + AMOUNT_LEN;
        write!(
            &mut self.buffer[offset..offset + EXPIRY_LEN],
            "{}",
            DateTime::<Utc>::from(expires_at).format(INTERLEDGER_TIMESTAMP_FORMAT),
        )
        .unwrap();
    }

    /// The returned value always has a length of 32.
    #[inline]
    pub fn execution_condition(&self) -> &[u8] {
        let begin = self.content_offset + AMOUNT_LEN + EXPIRY_LEN;
        let end = begin + CONDITION_LEN;
        &self.buffer[begin..end]
    }

    #[inline]
    pub fn destination(&self) -> Address {
        self.destination.clone()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        (&self.buffer[self.data_offset..]).peek_var_octet_string().unwrap()
    }

    #[inline]
    pub fn into_data(mut self) -> BytesMut {
        oer::extract_var_octet_string(self.buffer.split_off(self.data_offset)).unwrap()
    }
}

impl AsRef<[u8]> for Prepare {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.buffer
    }
}

impl From<Prepare> for BytesMut {
    fn from(prepare: Prepare) -> Self {
        prepare.buffer
    }
}

impl fmt::Debug for Prepare {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Prepare")
            .field("destination", &self.destination())
            .field("amount", &self.amount())
            .field("expires_at", &DateTime::<Utc>::from(self.expires_at()).to_rfc3339())
            .field("execution_condition", &hex::encode(self.execution_condition()))
            .field("data_length", &self.data().len())
            .finish()
    }
}

impl<'a> PrepareBuilder<'a> {
    pub fn build(&self) -> Prepare {
        const STATIC_LEN: usize = AMOUNT_LEN + EXPIRY_LEN + CONDITION_LEN;
        let destination_size = oer::predict_var_octet_string(self.destination.len());
        let data_size = oer::predict_var_octet_string(self.data.len());
        let content_len = STATIC_LEN + destination_size + data_size;
        let buf_size = 1 + oer::predict_var_octet_string(content_len);
        let mut buffer = BytesMut::with_capacity(buf_size);

        buffer.put_u8(PacketType::Prepare as u8);
        buffer.put_var_octet_string_length(content_len);
        let content_offset = buffer.len();
        buffer.put_u64(self.amount);

        let mut expiry = [0u8; EXPIRY_LEN];
        write!(
            &mut expiry[..],
            "{}",
            DateTime::<Utc>::from(self.expires_at).format(INTERLEDGER_TIMESTAMP_FORMAT),
        )
        .unwrap();
        buffer.put_slice(&expiry);

        buffer.put_slice(&self.execution_condition[..]);
        buffer.put_var_octet_string(AsRef::<[u8]>::as_ref(&self.destination));
        buffer.put_var_octet_string(self.data);

        Prepare {
            buffer,
            content_offset,
            destination: self.destination.clone(),
            amount: self.amount,
            expires_at: self.expires_at,
            data_offset: buf_size - data_size,
        }
    }
}

#[derive(PartialEq, Clone)]
pub struct Fulfill {
    buffer: BytesMut,
    content_offset: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FulfillBuilder<'a> {
    pub fulfillment: &'a [u8; 32],
    pub data: &'a [u8],
}

impl TryFrom<BytesMut> for Fulfill {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        let (content_offset, mut content) = deserialize_envelope(PacketType::Fulfill, &buffer)?;

        content.skip(FULFILLMENT_LEN)?;
        let data = content.read_var_octet_string()?;
        if data.len() > MAX_DATA_LEN {
            return Err(ParseError::InvalidPacket("data field exceeds maximum length".into()));
        }
        if !content.is_empty() {
            return Err(ParseError::InvalidPacket("trailing bytes after Fulfill data".into()));
        }

        Ok(Fulfill { buffer, content_offset })
    }
}

impl Fulfill {
    /// The returned value always has a length of 32.
    #[inline]
    pub fn fulfillment(&self) -> &[u8] {
        let begin = self.content_offset;
        let end = begin + FULFILLMENT_LEN;
        &self.buffer[begin..end]
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        let data_offset = self.content_offset + FULFILLMENT_LEN;
        (&self.buffer[data_offset..]).peek_var_octet_string().unwrap()
    }

    #[inline]
    pub fn into_data(mut self) -> BytesMut {
        let data_offset = self.content_offset + FULFILLMENT_LEN;
        oer::extract_var_octet_string(self.buffer.split_off(data_offset)).unwrap()
    }
}

impl AsRef<[u8]> for Fulfill {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.buffer
    }
}

impl From<Fulfill> for BytesMut {
    fn from(fulfill: Fulfill) -> Self {
        fulfill.buffer
    }
}

impl fmt::Debug for Fulfill {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Fulfill")
            .field("fulfillment", &hex::encode(self.fulfillment()))
            .field("data_length", &self.data().len())
            .finish()
    }
}

impl<'a> FulfillBuilder<'a> {
    pub fn build(&self) -> Fulfill {
        let data_size = oer::predict_var_octet_string(self.data.len());
        let content_len = FULFILLMENT_LEN + data_size;
        let buf_size = 1 + oer::predict_var_octet_string(content_len);
        let mut buffer = BytesMut::with_capacity(buf_size);

        buffer.put_u8(PacketType::Fulfill as u8);
        buffer.put_var_octet_string_length(content_len);
        let content_offset = buffer.len();
        buffer.put_slice(&self.fulfillment[..]);
        buffer.put_var_octet_string(&self.data[..]);
        Fulfill { buffer, content_offset }
    }
}

#[derive(PartialEq, Clone)]
pub struct Reject {
    buffer: BytesMut,
    code: ErrorCode,
    message_offset: usize,
    triggered_by_offset: usize,
    data_offset: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RejectBuilder<'a> {
    pub code: ErrorCode,
    pub message: &'a [u8],
    pub triggered_by: Option<&'a Address>,
    pub data: &'a [u8],
}

impl TryFrom<BytesMut> for Reject {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        let (content_offset, mut content) = deserialize_envelope(PacketType::Reject, &buffer)?;
        let content_len = content.len();

        let mut code = [0; ERROR_CODE_LEN];
        content.read_exact(&mut code)?;
        let code = ErrorCode::new(code);

        let triggered_by_offset = content_offset + content_len - content.len();
        // The triggered-by address is allowed to be empty (no address yet assigned);
        // only validate it as an address when non-empty.
        let triggered_by_bytes = content.read_var_octet_string()?;
        if !triggered_by_bytes.is_empty() {
            Address::try_from(Bytes::copy_from_slice(triggered_by_bytes))?;
        }

        let message_offset = content_offset + content_len - content.len();
        let message = content.read_var_octet_string()?;
        if message.len() > MAX_MESSAGE_LEN {
            return Err(ParseError::InvalidPacket("message field exceeds maximum length".into()));
        }
        str::from_utf8(message)?;

        let data_offset = content_offset + content_len - content.len();
        let data = content.read_var_octet_string()?;
        if data.len() > MAX_DATA_LEN {
            return Err(ParseError::InvalidPacket("data field exceeds maximum length".into()));
        }
        if !content.is_empty() {
            return Err(ParseError::InvalidPacket("trailing bytes after Reject data".into()));
        }

        Ok(Reject {
            buffer,
            code,
            triggered_by_offset,
            message_offset,
            data_offset,
        })
    }
}

impl Reject {
    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[inline]
    pub fn triggered_by(&self) -> Option<Address> {
        match (&self.buffer[self.triggered_by_offset..]).peek_var_octet_string() {
            Ok(bytes) if !bytes.is_empty() => Address::try_from(Bytes::copy_from_slice(bytes)).ok(),
            _ => None,
        }
    }

    #[inline]
    pub fn message(&self) -> &[u8] {
        (&self.buffer[self.message_offset..]).peek_var_octet_string().unwrap()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        (&self.buffer[self.data_offset..]).peek_var_octet_string().unwrap()
    }

    pub fn into_data(mut self) -> BytesMut {
        oer::extract_var_octet_string(self.buffer.split_off(self.data_offset)).unwrap()
    }
}

impl AsRef<[u8]> for Reject {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.buffer
    }
}

impl From<Reject> for BytesMut {
    fn from(reject: Reject) -> Self {
        reject.buffer
    }
}

impl fmt::Debug for Reject {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Reject")
            .field("code", &self.code())
            .field("message", &str::from_utf8(self.message()).map_err(|_| fmt::Error)?)
            .field("triggered_by", &self.triggered_by())
            .field("data_length", &self.data().len())
            .finish()
    }
}

impl<'a> RejectBuilder<'a> {
    pub fn build(&self) -> Reject {
        let (triggered_by_bytes, len) = match self.triggered_by {
            Some(addr) => (AsRef::<[u8]>::as_ref(addr), addr.len()),
            None => (&[][..], 0),
        };
        let triggered_by_size = oer::predict_var_octet_string(len);
        let message_size = oer::predict_var_octet_string(self.message.len());
        let data_size = oer::predict_var_octet_string(self.data.len());
        let content_len = ERROR_CODE_LEN + triggered_by_size + message_size + data_size;
        let buf_size = 1 + oer::predict_var_octet_string(content_len);
        let mut buffer = BytesMut::with_capacity(buf_size);

        buffer.put_u8(PacketType::Reject as u8);
        buffer.put_var_octet_string_length(content_len);
        buffer.put_slice(&<[u8; 3]>::from(self.code)[..]);
        buffer.put_var_octet_string(triggered_by_bytes);
        buffer.put_var_octet_string(self.message);
        buffer.put_var_octet_string(self.data);
        Reject {
            buffer,
            code: self.code,
            triggered_by_offset: buf_size - data_size - message_size - triggered_by_size,
            message_offset: buf_size - data_size - message_size,
            data_offset: buf_size - data_size,
        }
    }
}

fn deserialize_envelope(packet_type: PacketType, mut reader: &[u8]) -> Result<(usize, &[u8]), ParseError> {
    let got_type = reader.read_u8()?;
    if got_type == packet_type as u8 {
        let content_offset = 1 + {
            let mut peek = &reader[..];
            let before = peek.len();
            peek.read_var_octet_string_length()?;
            before - peek.len()
        };
        let content = reader.peek_var_octet_string()?;
        Ok((content_offset, content))
    } else {
        Err(ParseError::InvalidPacket(format!("unexpected packet type: {:?}", got_type)))
    }
}



#[cfg(test)]
mod test_prepare {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_invalid_address() {
        let mut prep = fixtures::prepare_bytes();
        prep[67] = b'!'; // corrupt a byte inside the address with an illegal character
        assert!(Prepare::try_from(prep).is_err());
    }

    #[test]
    fn test_try_from() {
        assert_eq!(Prepare::try_from(fixtures::prepare_bytes()).unwrap(), fixtures::prepare());

        assert!(Prepare::try_from({
            let mut with_wrong_type = fixtures::prepare_bytes();
            with_wrong_type[0] = PacketType::Fulfill as u8;
            with_wrong_type
        })
        .is_err());

        // Trailing junk bytes must be rejected.
        let with_junk_data = {
            let mut buffer = fixtures::prepare_bytes();
            buffer.extend_from_slice(&[0x11, 0x12, 0x13]);
            buffer
        };
        assert!(Prepare::try_from(with_junk_data).is_err());
    }

    #[test]
    fn test_into_bytes_mut() {
        assert_eq!(BytesMut::from(fixtures::prepare()), fixtures::prepare_bytes());
    }

    #[test]
    fn test_amount() {
        assert_eq!(fixtures::prepare().amount(), fixtures::prepare_builder().amount);
    }

    #[test]
    fn test_set_amount() {
        let target_amount = fixtures::prepare_builder().amount;
        let destination = fixtures::prepare_builder().destination;
        let mut prepare = PrepareBuilder { amount: 9999, destination, ..fixtures::prepare_builder() }.build();
        prepare.set_amount(target_amount);
        assert_eq!(prepare.amount(), target_amount);
        assert_eq!(BytesMut::from(prepare), fixtures::prepare_bytes());
    }

    #[test]
    fn test_expires_at() {
        assert_eq!(fixtures::prepare().expires_at(), fixtures::expires_at());
    }

    #[test]
    fn test_set_expires_at() {
        let target_expiry = fixtures::prepare_builder().expires_at;
        let destination = fixtures::prepare_builder().destination;
        let mut prepare =
            PrepareBuilder { expires_at: SystemTime::now(), destination, ..fixtures::prepare_builder() }.build();
        prepare.set_expires_at(target_expiry);
        assert_eq!(prepare.expires_at(), target_expiry);
        assert_eq!(BytesMut::from(prepare), fixtures::prepare_bytes());
    }

    #[test]
    fn test_execution_condition() {
        assert_eq!(fixtures::prepare().execution_condition(), fixtures::EXECUTION_CONDITION);
    }

    #[test]
    fn test_data() {
        assert_eq!(fixtures::prepare().data(), fixtures::DATA);
    }

    #[test]
    fn test_into_data() {
        assert_eq!(fixtures::prepare().into_data(), BytesMut::from(fixtures::DATA));
    }
}

#[cfg(test)]
mod test_fulfill {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_try_from() {
        assert_eq!(Fulfill::try_from(fixtures::fulfill_bytes()).unwrap(), fixtures::fulfill());

        let with_junk_data = {
            let mut buffer = fixtures::fulfill_bytes();
            buffer.extend_from_slice(&[0x11, 0x12, 0x13]);
            buffer
        };
        assert!(Fulfill::try_from(with_junk_data).is_err());
    }

    #[test]
    fn test_into_bytes_mut() {
        assert_eq!(BytesMut::from(fixtures::fulfill()), fixtures::fulfill_bytes());
    }

    #[test]
    fn test_fulfillment() {
        assert_eq!(fixtures::fulfill().fulfillment(), fixtures::FULFILLMENT);
    }

    #[test]
    fn test_data() {
        assert_eq!(fixtures::fulfill().data(), fixtures::DATA);
    }

    #[test]
    fn test_into_data() {
        assert_eq!(fixtures::fulfill().into_data(), BytesMut::from(fixtures::DATA));
    }
}
