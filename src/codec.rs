//! Datagram codec (C1): wire format for the six TFTP packet types
//! (spec §4.1, §6).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::options::OptionMap;

pub const MIN_BLOCK_SIZE: usize = 8;
pub const MAX_BLOCK_SIZE: usize = 65464;
pub const DEFAULT_BLOCK_SIZE: usize = 512;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpCode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
    Oack = 6,
}

impl TryFrom<u16> for OpCode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Error> {
        match value {
            1 => Ok(OpCode::Rrq),
            2 => Ok(OpCode::Wrq),
            3 => Ok(OpCode::Data),
            4 => Ok(OpCode::Ack),
            5 => Ok(OpCode::Error),
            6 => Ok(OpCode::Oack),
            _ => Err(Error::InvalidOpcode),
        }
    }
}

/// A TFTP error code (spec §6). Stored as a validated `u16 ∈ 0..=8`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
    TerminateOptionNegotiation = 8,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// The canonical RFC message for this code, substituted whenever a
    /// decoded ERROR packet carries an absent or empty message (spec §4.1).
    pub fn default_message(self) -> &'static [u8] {
        match self {
            ErrorCode::NotDefined => b"",
            ErrorCode::FileNotFound => b"File not found",
            ErrorCode::AccessViolation => b"Access violation",
            ErrorCode::DiskFull => b"Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => b"Illegal TFTP operation",
            ErrorCode::UnknownTransferId => b"Unknown transfer ID",
            ErrorCode::FileAlreadyExists => b"File already exists",
            ErrorCode::NoSuchUser => b"No such user",
            ErrorCode::TerminateOptionNegotiation => {
                b"Terminate transfer due to option negotiation"
            }
        }
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Error> {
        match value {
            0 => Ok(ErrorCode::NotDefined),
            1 => Ok(ErrorCode::FileNotFound),
            2 => Ok(ErrorCode::AccessViolation),
            3 => Ok(ErrorCode::DiskFull),
            4 => Ok(ErrorCode::IllegalOperation),
            5 => Ok(ErrorCode::UnknownTransferId),
            6 => Ok(ErrorCode::FileAlreadyExists),
            7 => Ok(ErrorCode::NoSuchUser),
            8 => Ok(ErrorCode::TerminateOptionNegotiation),
            _ => Err(Error::InvalidErrorCode),
        }
    }
}

/// A read or write request, the payload of `RRQ`/`WRQ` (spec §3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub filename: Bytes,
    pub mode: Bytes,
    pub options: OptionMap,
}

/// A decoded TFTP packet (spec §3, §6).
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Rrq(Request),
    Wrq(Request),
    Data { block: u16, payload: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: Bytes },
    Oack(OptionMap),
}

/// Splits `buf` on NUL bytes into owned, zero-extra-copy-per-field `Bytes`
/// fragments — mirrors the Cisco-7941 workaround of stripping trailing empty
/// fragments before pairing options up (spec §4.1).
fn split_fields(buf: &[u8]) -> Vec<Bytes> {
    let mut fields: Vec<Bytes> = buf
        .split(|&b| b == 0)
        .map(Bytes::copy_from_slice)
        .collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

fn decode_request(buf: &[u8]) -> Result<Request, Error> {
    // `buf.split` on an empty trailing fragment after the mode's NUL is
    // expected and dropped by `split_fields`; what's left must still
    // contain at least filename and mode.
    let mut raw_fields: Vec<Bytes> = buf.split(|&b| b == 0).map(Bytes::copy_from_slice).collect();
    if raw_fields.len() < 2 {
        return Err(Error::PayloadDecode);
    }
    let filename = raw_fields.remove(0);
    let mut mode = raw_fields.remove(0).to_vec();
    mode.make_ascii_lowercase();
    let mode = Bytes::from(mode);

    while raw_fields.last().is_some_and(|f| f.is_empty()) {
        raw_fields.pop();
    }
    let options = OptionMap::from_fragments(&raw_fields)?;

    Ok(Request {
        filename,
        mode,
        options,
    })
}

fn decode_data(mut buf: Bytes) -> Result<Packet, Error> {
    if buf.len() < 2 {
        return Err(Error::PayloadDecode);
    }
    let block = buf.get_u16();
    Ok(Packet::Data { block, payload: buf })
}

fn decode_ack(buf: &[u8]) -> Result<Packet, Error> {
    if buf.len() != 2 {
        return Err(Error::PayloadDecode);
    }
    let block = u16::from_be_bytes([buf[0], buf[1]]);
    Ok(Packet::Ack { block })
}

fn decode_error(buf: &[u8]) -> Result<Packet, Error> {
    if buf.len() < 2 {
        return Err(Error::PayloadDecode);
    }
    let code = ErrorCode::try_from(u16::from_be_bytes([buf[0], buf[1]]))?;
    let rest = &buf[2..];
    let message_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let message = &rest[..message_end];
    let message = if message.is_empty() {
        Bytes::from_static(code.default_message())
    } else {
        Bytes::copy_from_slice(message)
    };
    Ok(Packet::Error { code, message })
}

fn decode_oack(buf: &[u8]) -> Result<Packet, Error> {
    let fields = split_fields(buf);
    Ok(Packet::Oack(OptionMap::from_fragments(&fields)?))
}

/// Decodes a raw UDP datagram into a `Packet` (spec §4.1).
pub fn decode(buf: &[u8]) -> Result<Packet, Error> {
    if buf.len() < 2 {
        return Err(Error::WireProtocol);
    }
    let opcode = OpCode::try_from(u16::from_be_bytes([buf[0], buf[1]]))?;
    let rest = &buf[2..];
    match opcode {
        OpCode::Rrq => Ok(Packet::Rrq(decode_request(rest)?)),
        OpCode::Wrq => Ok(Packet::Wrq(decode_request(rest)?)),
        OpCode::Data => decode_data(Bytes::copy_from_slice(rest)),
        OpCode::Ack => decode_ack(rest),
        OpCode::Error => decode_error(rest),
        OpCode::Oack => decode_oack(rest),
    }
}

fn encode_request(opcode: OpCode, req: &Request) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u16(opcode as u16);
    buf.put(req.filename.as_ref());
    buf.put_u8(0);
    buf.put(req.mode.as_ref());
    buf.put_u8(0);
    req.options.encode_to(&mut buf);
    buf.freeze()
}

/// Encodes a `Packet` into its wire representation (spec §4.1).
pub fn encode(packet: &Packet) -> Bytes {
    match packet {
        Packet::Rrq(req) => encode_request(OpCode::Rrq, req),
        Packet::Wrq(req) => encode_request(OpCode::Wrq, req),
        Packet::Data { block, payload } => {
            let mut buf = BytesMut::with_capacity(4 + payload.len());
            buf.put_u16(OpCode::Data as u16);
            buf.put_u16(*block);
            buf.put(payload.as_ref());
            buf.freeze()
        }
        Packet::Ack { block } => {
            let mut buf = BytesMut::with_capacity(4);
            buf.put_u16(OpCode::Ack as u16);
            buf.put_u16(*block);
            buf.freeze()
        }
        Packet::Error { code, message } => {
            let mut buf = BytesMut::with_capacity(5 + message.len());
            buf.put_u16(OpCode::Error as u16);
            buf.put_u16(code.as_u16());
            buf.put(message.as_ref());
            buf.put_u8(0);
            buf.freeze()
        }
        Packet::Oack(options) => {
            let mut buf = BytesMut::new();
            buf.put_u16(OpCode::Oack as u16);
            options.encode_to(&mut buf);
            buf.freeze()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &[u8]) -> Bytes {
        Bytes::copy_from_slice(s)
    }

    #[test]
    fn rrq_round_trip() {
        let wire = b"\x00\x01foo\x00octet\x00";
        let packet = decode(wire).unwrap();
        assert_eq!(
            packet,
            Packet::Rrq(Request {
                filename: b(b"foo"),
                mode: b(b"octet"),
                options: OptionMap::new(),
            })
        );
        assert_eq!(encode(&packet), Bytes::copy_from_slice(wire));
    }

    #[test]
    fn rrq_mode_is_lowercased() {
        let wire = b"\x00\x01foo\x00OCTET\x00";
        let packet = decode(wire).unwrap();
        match packet {
            Packet::Rrq(req) => assert_eq!(req.mode, b(b"octet")),
            _ => panic!("expected RRQ"),
        }
    }

    #[test]
    fn rrq_options_parsed() {
        let wire = b"\x00\x01f\x00octet\x00blksize\x008\x00";
        let packet = decode(wire).unwrap();
        match packet {
            Packet::Rrq(req) => {
                assert_eq!(req.options.get(b"blksize"), Some(&b(b"8")));
            }
            _ => panic!("expected RRQ"),
        }
    }

    #[test]
    fn rrq_strips_trailing_empty_fragments() {
        // Cisco 7941 quirk: trailing NULs beyond the last option value.
        let wire = b"\x00\x01f\x00octet\x00blksize\x008\x00\x00\x00";
        let packet = decode(wire).unwrap();
        match packet {
            Packet::Rrq(req) => assert_eq!(req.options.len(), 1),
            _ => panic!("expected RRQ"),
        }
    }

    #[test]
    fn rrq_too_few_fields_is_payload_decode_error() {
        let wire = b"\x00\x01onlyname\x00";
        assert!(matches!(decode(wire), Err(Error::PayloadDecode)));
    }

    #[test]
    fn rrq_odd_option_count_is_options_decode_error() {
        let wire = b"\x00\x01f\x00octet\x00blksize\x00";
        assert!(matches!(decode(wire), Err(Error::OptionsDecode)));
    }

    #[test]
    fn rrq_duplicate_option_is_options_decode_error() {
        let wire = b"\x00\x01f\x00octet\x00blksize\x008\x00blksize\x0016\x00";
        assert!(matches!(decode(wire), Err(Error::OptionsDecode)));
    }

    #[test]
    fn data_round_trip() {
        let wire = b"\x00\x03\x00\x01hello";
        let packet = decode(wire).unwrap();
        assert_eq!(
            packet,
            Packet::Data {
                block: 1,
                payload: b(b"hello"),
            }
        );
        assert_eq!(encode(&packet), Bytes::copy_from_slice(wire));
    }

    #[test]
    fn ack_round_trip() {
        let wire = b"\x00\x04\x00\x2a";
        let packet = decode(wire).unwrap();
        assert_eq!(packet, Packet::Ack { block: 42 });
        assert_eq!(encode(&packet), Bytes::copy_from_slice(wire));
    }

    #[test]
    fn ack_wrong_length_is_payload_decode_error() {
        assert!(matches!(decode(b"\x00\x04\x00"), Err(Error::PayloadDecode)));
        assert!(matches!(
            decode(b"\x00\x04\x00\x01\x02"),
            Err(Error::PayloadDecode)
        ));
    }

    #[test]
    fn error_round_trip_with_explicit_message() {
        let wire = b"\x00\x05\x00\x01custom\x00";
        let packet = decode(wire).unwrap();
        assert_eq!(
            packet,
            Packet::Error {
                code: ErrorCode::FileNotFound,
                message: b(b"custom"),
            }
        );
        assert_eq!(encode(&packet), Bytes::copy_from_slice(wire));
    }

    #[test]
    fn error_empty_message_gets_canonical_default() {
        let wire = b"\x00\x05\x00\x01\x00";
        let packet = decode(wire).unwrap();
        assert_eq!(
            packet,
            Packet::Error {
                code: ErrorCode::FileNotFound,
                message: b(b"File not found"),
            }
        );
    }

    #[test]
    fn error_invalid_code_is_invalid_errorcode_error() {
        let wire = b"\x00\x05\x00\x09\x00";
        assert!(matches!(decode(wire), Err(Error::InvalidErrorCode)));
    }

    #[test]
    fn oack_round_trip() {
        let wire = b"\x00\x06blksize\x008\x00";
        let packet = decode(wire).unwrap();
        match &packet {
            Packet::Oack(options) => assert_eq!(options.get(b"blksize"), Some(&b(b"8"))),
            _ => panic!("expected OACK"),
        }
        assert_eq!(encode(&packet), Bytes::copy_from_slice(wire));
    }

    #[test]
    fn invalid_opcode_is_rejected() {
        assert!(matches!(decode(b"\x00\x09"), Err(Error::InvalidOpcode)));
    }

    #[test]
    fn too_short_for_opcode_is_wire_protocol_error() {
        assert!(matches!(decode(b"\x00"), Err(Error::WireProtocol)));
    }
}
