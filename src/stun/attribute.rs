/**
 * STUN attributes: a closed set of variants keyed by the 16-bit attribute type,
 * with their decode and encode rules.
 * See RFC 5389 Section 15, RFC 5766 Section 14, RFC 5780 Section 7 and RFC 5245 Section 19.1
 * https://datatracker.ietf.org/doc/html/rfc5389#section-15
 */
use super::{
    address::StunAddress,
    attribute_type::*,
    error::{StunError, StunResult},
    reader::StunReader,
    TransactionId,
};

/// The two flags of a CHANGE-REQUEST attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeRequest {
    pub change_ip: bool,
    pub change_port: bool,
}

impl ChangeRequest {
    const IP_BIT: u32 = 1 << 2;
    const PORT_BIT: u32 = 1 << 1;

    fn from_bits(bits: u32) -> Self {
        ChangeRequest {
            change_ip: bits & Self::IP_BIT != 0,
            change_port: bits & Self::PORT_BIT != 0,
        }
    }

    fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.change_ip {
            bits |= Self::IP_BIT;
        }
        if self.change_port {
            bits |= Self::PORT_BIT;
        }
        bits
    }
}

/// ERROR-CODE payload. On the wire the code is split into a class (hundreds) and a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: u16,
    pub reason: String,
}

impl ErrorCode {
    pub fn new(code: u16, reason: &str) -> Self {
        ErrorCode {
            code,
            reason: reason.to_string(),
        }
    }
}

/**
 * Comprehension-required attribute types met while decoding one message that are not
 * part of the known set. A non-empty accumulator makes the Binding handler answer 420.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownTypes {
    types: Vec<u16>,
}

impl UnknownTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attr_type: u16) {
        self.types.push(attr_type);
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.types
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    MappedAddress(StunAddress),
    AlternateServer(StunAddress),
    ResponseOrigin(StunAddress),
    OtherAddress(StunAddress),
    XorPeerAddress(StunAddress),
    XorRelayedAddress(StunAddress),
    XorMappedAddress(StunAddress),
    ChangeRequest(ChangeRequest),
    Username(String),
    Realm(String),
    Nonce(String),
    Software(String),
    MessageIntegrity([u8; 20]),
    ErrorCode(ErrorCode),
    UnknownAttributes(Vec<u16>),
    ChannelNumber(u16),
    ResponsePort(u16),
    Lifetime(u32),
    Priority(u32),
    Fingerprint(u32),
    Data(Vec<u8>),
    Padding(Vec<u8>),
    RequestedAddressFamily(u8),
    RequestedTransport(u8),
    EvenPort(bool),
    DontFragment,
    UseCandidate,
    ReservationToken(u64),
    IceControlling(u64),
    IceControlled(u64),
}

impl StunAttribute {
    /// The wire type code of this attribute
    pub fn attr_type(&self) -> u16 {
        match self {
            StunAttribute::MappedAddress(_) => MAPPED_ADDRESS,
            StunAttribute::AlternateServer(_) => ALTERNATE_SERVER,
            StunAttribute::ResponseOrigin(_) => RESPONSE_ORIGIN,
            StunAttribute::OtherAddress(_) => OTHER_ADDRESS,
            StunAttribute::XorPeerAddress(_) => XOR_PEER_ADDRESS,
            StunAttribute::XorRelayedAddress(_) => XOR_RELAYED_ADDRESS,
            StunAttribute::XorMappedAddress(_) => XOR_MAPPED_ADDRESS,
            StunAttribute::ChangeRequest(_) => CHANGE_REQUEST,
            StunAttribute::Username(_) => USERNAME,
            StunAttribute::Realm(_) => REALM,
            StunAttribute::Nonce(_) => NONCE,
            StunAttribute::Software(_) => SOFTWARE,
            StunAttribute::MessageIntegrity(_) => MESSAGE_INTEGRITY,
            StunAttribute::ErrorCode(_) => ERROR_CODE,
            StunAttribute::UnknownAttributes(_) => UNKNOWN_ATTRIBUTES,
            StunAttribute::ChannelNumber(_) => CHANNEL_NUMBER,
            StunAttribute::ResponsePort(_) => RESPONSE_PORT,
            StunAttribute::Lifetime(_) => LIFETIME,
            StunAttribute::Priority(_) => PRIORITY,
            StunAttribute::Fingerprint(_) => FINGERPRINT,
            StunAttribute::Data(_) => DATA,
            StunAttribute::Padding(_) => PADDING,
            StunAttribute::RequestedAddressFamily(_) => REQUESTED_ADDRESS_FAMILY,
            StunAttribute::RequestedTransport(_) => REQUESTED_TRANSPORT,
            StunAttribute::EvenPort(_) => EVEN_PORT,
            StunAttribute::DontFragment => DONT_FRAGMENT,
            StunAttribute::UseCandidate => USE_CANDIDATE,
            StunAttribute::ReservationToken(_) => RESERVATION_TOKEN,
            StunAttribute::IceControlling(_) => ICE_CONTROLLING,
            StunAttribute::IceControlled(_) => ICE_CONTROLLED,
        }
    }

    /**
     * Decode one attribute at the reader's position.
     *
     * Returns `Ok(None)` for attributes that are not stored: unknown comprehension-required types
     * (recorded into `unknown`) and unknown comprehension-optional types (ignored). Whatever the
     * outcome, the reader is left on the next 4-byte boundary.
     *
     * @param reader The reader positioned on the attribute header
     * @param unknown Accumulator for unknown comprehension-required types
     * @param transaction_id The enclosing message's transaction id, used by XOR address types
     */
    pub fn decode(
        reader: &mut StunReader,
        unknown: &mut UnknownTypes,
        transaction_id: &TransactionId,
    ) -> StunResult<Option<StunAttribute>> {
        let result = Self::decode_value(reader, unknown, transaction_id);
        reader.align();
        result
    }

    fn decode_value(
        reader: &mut StunReader,
        unknown: &mut UnknownTypes,
        transaction_id: &TransactionId,
    ) -> StunResult<Option<StunAttribute>> {
        let attr_type = reader.read_u16()?;
        let length = reader.read_u16()? as usize;
        if reader.remaining() < length {
            return Err(StunError::MalformedMessage);
        }
        // the value is decoded from its own section so no variant can read past its length
        let value = reader.read_bytes(length)?;
        let mut value_reader = StunReader::new(value);
        let r = &mut value_reader;

        let attr = match attr_type {
            MAPPED_ADDRESS => StunAttribute::MappedAddress(address(r, None)?),
            ALTERNATE_SERVER => StunAttribute::AlternateServer(address(r, None)?),
            RESPONSE_ORIGIN => StunAttribute::ResponseOrigin(address(r, None)?),
            OTHER_ADDRESS => StunAttribute::OtherAddress(address(r, None)?),
            XOR_PEER_ADDRESS => StunAttribute::XorPeerAddress(address(r, Some(transaction_id))?),
            XOR_RELAYED_ADDRESS => {
                StunAttribute::XorRelayedAddress(address(r, Some(transaction_id))?)
            }
            XOR_MAPPED_ADDRESS => {
                StunAttribute::XorMappedAddress(address(r, Some(transaction_id))?)
            }
            CHANGE_REQUEST => {
                exact_length(length, 4)?;
                StunAttribute::ChangeRequest(ChangeRequest::from_bits(r.read_u32()?))
            }
            USERNAME => StunAttribute::Username(text(value)?),
            REALM => StunAttribute::Realm(text(value)?),
            NONCE => StunAttribute::Nonce(text(value)?),
            SOFTWARE => StunAttribute::Software(text(value)?),
            MESSAGE_INTEGRITY => {
                exact_length(length, 20)?;
                StunAttribute::MessageIntegrity(r.read_array()?)
            }
            ERROR_CODE => {
                min_length(length, 4)?;
                r.skip(2);
                let class = (r.read_u8()? & 0x7) as u16;
                let number = r.read_u8()? as u16;
                let reason = text(r.read_bytes(length - 4)?)?;
                StunAttribute::ErrorCode(ErrorCode {
                    code: class * 100 + number,
                    reason,
                })
            }
            UNKNOWN_ATTRIBUTES => {
                let mut types = Vec::with_capacity(length / 2);
                for _ in 0..length / 2 {
                    types.push(r.read_u16()?);
                }
                StunAttribute::UnknownAttributes(types)
            }
            CHANNEL_NUMBER => {
                min_length(length, 2)?;
                StunAttribute::ChannelNumber(r.read_u16()?)
            }
            RESPONSE_PORT => {
                min_length(length, 2)?;
                StunAttribute::ResponsePort(r.read_u16()?)
            }
            LIFETIME => {
                exact_length(length, 4)?;
                StunAttribute::Lifetime(r.read_u32()?)
            }
            PRIORITY => {
                exact_length(length, 4)?;
                StunAttribute::Priority(r.read_u32()?)
            }
            FINGERPRINT => {
                exact_length(length, 4)?;
                StunAttribute::Fingerprint(r.read_u32()?)
            }
            DATA => StunAttribute::Data(value.to_vec()),
            PADDING => StunAttribute::Padding(value.to_vec()),
            REQUESTED_ADDRESS_FAMILY => {
                min_length(length, 1)?;
                StunAttribute::RequestedAddressFamily(r.read_u8()?)
            }
            REQUESTED_TRANSPORT => {
                min_length(length, 1)?;
                StunAttribute::RequestedTransport(r.read_u8()?)
            }
            EVEN_PORT => {
                min_length(length, 1)?;
                StunAttribute::EvenPort(r.read_u8()? & 0x80 != 0)
            }
            DONT_FRAGMENT => {
                exact_length(length, 0)?;
                StunAttribute::DontFragment
            }
            USE_CANDIDATE => {
                exact_length(length, 0)?;
                StunAttribute::UseCandidate
            }
            RESERVATION_TOKEN => {
                exact_length(length, 8)?;
                StunAttribute::ReservationToken(r.read_u64()?)
            }
            ICE_CONTROLLING => {
                exact_length(length, 8)?;
                StunAttribute::IceControlling(r.read_u64()?)
            }
            ICE_CONTROLLED => {
                exact_length(length, 8)?;
                StunAttribute::IceControlled(r.read_u64()?)
            }
            other => {
                if other < COMPREHENSION_OPTIONAL {
                    unknown.push(other);
                }
                return Ok(None);
            }
        };

        Ok(Some(attr))
    }

    /**
     * Encode this attribute: a 4-byte type + length header followed by the value, padded to a
     * 4-byte boundary with `padding_byte`. The length field carries the unpadded value length.
     *
     * @param transaction_id Transaction id of the enclosing message, used by XOR address types
     * @param padding_byte The byte used to fill the padding
     */
    pub fn encode(&self, transaction_id: &TransactionId, padding_byte: u8) -> StunResult<Vec<u8>> {
        let attr_type = self.attr_type();
        let value: Vec<u8> = match self {
            StunAttribute::MappedAddress(addr)
            | StunAttribute::AlternateServer(addr)
            | StunAttribute::ResponseOrigin(addr)
            | StunAttribute::OtherAddress(addr) => addr.encode(None),
            StunAttribute::XorPeerAddress(addr)
            | StunAttribute::XorRelayedAddress(addr)
            | StunAttribute::XorMappedAddress(addr) => addr.encode(Some(transaction_id)),
            StunAttribute::ChangeRequest(cr) => cr.bits().to_be_bytes().to_vec(),
            StunAttribute::Username(s)
            | StunAttribute::Realm(s)
            | StunAttribute::Nonce(s)
            | StunAttribute::Software(s) => s.as_bytes().to_vec(),
            StunAttribute::MessageIntegrity(digest) => digest.to_vec(),
            StunAttribute::ErrorCode(ec) => {
                if !(300..=699).contains(&ec.code) {
                    return Err(StunError::UnencodableAttribute(attr_type));
                }
                let mut buf = vec![0, 0, (ec.code / 100) as u8, (ec.code % 100) as u8];
                buf.extend_from_slice(ec.reason.as_bytes());
                buf
            }
            StunAttribute::UnknownAttributes(types) => {
                types.iter().flat_map(|t| t.to_be_bytes()).collect()
            }
            // 16-bit values are followed by two reserved bytes
            StunAttribute::ChannelNumber(n) | StunAttribute::ResponsePort(n) => {
                let mut buf = n.to_be_bytes().to_vec();
                buf.extend_from_slice(&[0, 0]);
                buf
            }
            StunAttribute::Lifetime(n)
            | StunAttribute::Priority(n)
            | StunAttribute::Fingerprint(n) => n.to_be_bytes().to_vec(),
            StunAttribute::Data(bytes) | StunAttribute::Padding(bytes) => bytes.clone(),
            StunAttribute::RequestedAddressFamily(n) | StunAttribute::RequestedTransport(n) => {
                vec![*n, 0, 0, 0]
            }
            StunAttribute::EvenPort(reserve) => vec![if *reserve { 0x80 } else { 0 }],
            StunAttribute::DontFragment | StunAttribute::UseCandidate => Vec::new(),
            StunAttribute::ReservationToken(n)
            | StunAttribute::IceControlling(n)
            | StunAttribute::IceControlled(n) => n.to_be_bytes().to_vec(),
        };

        if value.len() > u16::MAX as usize {
            return Err(StunError::UnencodableAttribute(attr_type));
        }

        let mut buf = Vec::with_capacity(4 + value.len() + 3);
        buf.extend_from_slice(&attr_type.to_be_bytes());
        buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        buf.extend_from_slice(&value);
        while buf.len() % 4 != 0 {
            buf.push(padding_byte);
        }
        Ok(buf)
    }
}

fn address(
    reader: &mut StunReader,
    transaction_id: Option<&TransactionId>,
) -> StunResult<StunAddress> {
    StunAddress::decode(reader, transaction_id).map_err(|_| StunError::MalformedMessage)
}

/// Text attributes are UTF-8 on the wire; anything else would not encode back to the same bytes
fn text(bytes: &[u8]) -> StunResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| StunError::MalformedMessage)
}

fn exact_length(length: usize, expected: usize) -> StunResult<()> {
    if length != expected {
        return Err(StunError::MalformedMessage);
    }
    Ok(())
}

fn min_length(length: usize, expected: usize) -> StunResult<()> {
    if length < expected {
        return Err(StunError::MalformedMessage);
    }
    Ok(())
}
