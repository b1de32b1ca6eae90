/**
 * STUN message codec: the 20-byte header plus the attribute sequence, and the
 * MESSAGE-INTEGRITY / FINGERPRINT trailers.
 * See RFC 5389 Section 6, 15.4 and 15.5
 * https://datatracker.ietf.org/doc/html/rfc5389#section-6
 */
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::{
    attribute::{ErrorCode, StunAttribute, UnknownTypes},
    attribute_type,
    error::{StunError, StunResult},
    reader::StunReader,
    TransactionId, FINGERPRINT_SIZE, FINGERPRINT_XOR, HEADER_LENGTH, INTEGRITY_SIZE,
    MAGIC_COOKIE,
};

type HmacSha1 = Hmac<Sha1>;

/**
 * One parsed or to-be-encoded STUN message.
 *
 * `length` is whatever the header said for a decoded message; `encode` always recomputes it
 * from the bytes it writes.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    pub message_type: u16,
    pub length: u16,
    pub magic_cookie: u32,
    pub transaction_id: TransactionId,
    pub attributes: Vec<StunAttribute>,
    /// raw attribute section of a decoded message, used to verify the trailers
    body: Vec<u8>,
}

impl StunMessage {
    /**
     * Create an empty message, packing the method and the class into the type field.
     *
     *  0                 1
     *  2  3  4 5 6 7 8 9 0 1 2 3 4 5
     * +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
     * |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
     * |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
     * +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
     */
    pub fn new(method: u16, class: u8, transaction_id: TransactionId) -> Self {
        let class = class as u16;
        let message_type = ((method & 0x0f80) << 2)
            | ((method & 0x0070) << 1)
            | (method & 0x000f)
            | ((class & 0x2) << 7)
            | ((class & 0x1) << 4);

        StunMessage {
            message_type,
            length: 0,
            magic_cookie: MAGIC_COOKIE,
            transaction_id,
            attributes: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn class(&self) -> u8 {
        (((self.message_type >> 7) & 0x2) | ((self.message_type >> 4) & 0x1)) as u8
    }

    pub fn method(&self) -> u16 {
        ((self.message_type & 0x3e00) >> 2)
            | ((self.message_type & 0x00e0) >> 1)
            | (self.message_type & 0x000f)
    }

    pub fn add_attribute(&mut self, attr: StunAttribute) -> &mut Self {
        self.attributes.push(attr);
        self
    }

    /// First attribute of the given type, in wire order
    pub fn attribute(&self, attr_type: u16) -> Option<&StunAttribute> {
        self.attributes.iter().find(|a| a.attr_type() == attr_type)
    }

    /**
     * Decode a message from the reader.
     *
     * The header must be complete and the declared length must fit in what is left. Attributes are
     * then decoded until fewer than 4 body bytes remain; the first attribute that fails to decode
     * ends the list, and the attributes read so far are kept.
     *
     * @param reader Reader positioned on the message header
     * @param unknown Accumulator for unknown comprehension-required attribute types
     */
    pub fn decode(reader: &mut StunReader, unknown: &mut UnknownTypes) -> StunResult<Self> {
        if reader.remaining() < HEADER_LENGTH {
            return Err(StunError::MalformedMessage);
        }
        let message_type = reader.read_u16()?;
        let length = reader.read_u16()?;
        let magic_cookie = reader.read_u32()?;
        let transaction_id: TransactionId = reader.read_array()?;

        if reader.remaining() < length as usize {
            return Err(StunError::MalformedMessage);
        }
        let body = reader.read_bytes(length as usize)?;

        let mut attributes = Vec::new();
        let mut body_reader = StunReader::new(body);
        while body_reader.remaining() >= 4 {
            match StunAttribute::decode(&mut body_reader, unknown, &transaction_id) {
                Ok(Some(attr)) => attributes.push(attr),
                Ok(None) => {}
                Err(_) => break,
            }
        }

        Ok(StunMessage {
            message_type,
            length,
            magic_cookie,
            transaction_id,
            attributes,
            body: body.to_vec(),
        })
    }

    /// Decode a message from a complete buffer
    pub fn from_bytes(bytes: &[u8], unknown: &mut UnknownTypes) -> StunResult<Self> {
        let mut reader = StunReader::new(bytes);
        Self::decode(&mut reader, unknown)
    }

    /**
     * Encode the message.
     *
     * With an error code the body is exactly one ERROR-CODE attribute and the attached
     * attributes are ignored; no trailers are added to such a message. Otherwise the attached
     * attributes are written in order, followed by MESSAGE-INTEGRITY when a key is given and
     * FINGERPRINT when requested. The header length is recomputed and stored back in `self`.
     *
     * @param error_code Error code for an error-class response
     * @param integrity_key HMAC-SHA1 key for MESSAGE-INTEGRITY
     * @param fingerprint Append a FINGERPRINT attribute
     * @param padding_byte Byte used to pad attribute values
     */
    pub fn encode(
        &mut self,
        error_code: Option<&ErrorCode>,
        integrity_key: Option<&[u8]>,
        fingerprint: bool,
        padding_byte: u8,
    ) -> StunResult<Vec<u8>> {
        let tid = self.transaction_id;
        let mut body = Vec::new();

        if let Some(ec) = error_code {
            body.extend(StunAttribute::ErrorCode(ec.clone()).encode(&tid, padding_byte)?);
            self.length = body_length(&body)?;
            let mut out = self.header_bytes(self.length);
            out.extend(body);
            return Ok(out);
        }

        for attr in &self.attributes {
            body.extend(attr.encode(&tid, padding_byte)?);
        }

        if let Some(key) = integrity_key {
            let length = body_length(&body)?
                .checked_add(INTEGRITY_SIZE)
                .ok_or(StunError::UnencodableAttribute(attribute_type::MESSAGE_INTEGRITY))?;
            let mut mac = new_mac(key)?;
            mac.update(&self.header_bytes(length));
            mac.update(&body);
            let digest: [u8; 20] = mac.finalize().into_bytes().into();
            body.extend(StunAttribute::MessageIntegrity(digest).encode(&tid, padding_byte)?);
        }

        if fingerprint {
            let length = body_length(&body)?
                .checked_add(FINGERPRINT_SIZE)
                .ok_or(StunError::UnencodableAttribute(attribute_type::FINGERPRINT))?;
            let mut covered = self.header_bytes(length);
            covered.extend_from_slice(&body);
            let crc = self::fingerprint(&covered);
            body.extend(StunAttribute::Fingerprint(crc).encode(&tid, padding_byte)?);
        }

        self.length = body_length(&body)?;
        let mut out = self.header_bytes(self.length);
        out.extend(body);
        Ok(out)
    }

    /// The 20 header bytes with the given length field
    fn header_bytes(&self, length: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LENGTH);
        buf.extend_from_slice(&self.message_type.to_be_bytes());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&self.magic_cookie.to_be_bytes());
        buf.extend_from_slice(&self.transaction_id);
        buf
    }

    /**
     * Recompute the MESSAGE-INTEGRITY digest of a decoded message.
     *
     * The HMAC covers the header, with a length that includes MESSAGE-INTEGRITY but not a
     * FINGERPRINT added after it, followed by the body up to the MESSAGE-INTEGRITY attribute.
     */
    pub fn make_message_integrity(&self, key: &[u8]) -> StunResult<[u8; 20]> {
        let mut length = self.length;
        if self.attribute(attribute_type::FINGERPRINT).is_some() {
            length = length
                .checked_sub(FINGERPRINT_SIZE)
                .ok_or(StunError::MalformedMessage)?;
        }
        let covered = (length as usize)
            .checked_sub(INTEGRITY_SIZE as usize)
            .ok_or(StunError::MalformedMessage)?;
        let body = self.body.get(..covered).ok_or(StunError::MalformedMessage)?;

        let mut mac = new_mac(key)?;
        mac.update(&self.header_bytes(length));
        mac.update(body);
        Ok(mac.finalize().into_bytes().into())
    }

    /// Verify the MESSAGE-INTEGRITY attribute of a decoded message against `key`
    pub fn check_message_integrity(&self, key: &[u8]) -> StunResult<()> {
        let stored = match self.attribute(attribute_type::MESSAGE_INTEGRITY) {
            Some(StunAttribute::MessageIntegrity(digest)) => digest,
            _ => return Err(StunError::MissingIntegrity),
        };
        if self.make_message_integrity(key)? != *stored {
            return Err(StunError::IntegrityMismatch);
        }
        Ok(())
    }

    /// Verify the FINGERPRINT attribute of a decoded message
    pub fn check_fingerprint(&self) -> StunResult<()> {
        let stored = match self.attribute(attribute_type::FINGERPRINT) {
            Some(StunAttribute::Fingerprint(crc)) => *crc,
            _ => return Err(StunError::MissingFingerprint),
        };
        let covered = (self.length as usize)
            .checked_sub(FINGERPRINT_SIZE as usize)
            .ok_or(StunError::MalformedMessage)?;
        let body = self.body.get(..covered).ok_or(StunError::MalformedMessage)?;

        let mut bytes = self.header_bytes(self.length);
        bytes.extend_from_slice(body);
        if fingerprint(&bytes) != stored {
            return Err(StunError::FingerprintMismatch);
        }
        Ok(())
    }
}

/// CRC32 of `bytes` XORed with 0x5354554E
pub fn fingerprint(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes) ^ FINGERPRINT_XOR
}

fn new_mac(key: &[u8]) -> StunResult<HmacSha1> {
    HmacSha1::new_from_slice(key)
        .map_err(|_| StunError::UnencodableAttribute(attribute_type::MESSAGE_INTEGRITY))
}

fn body_length(body: &[u8]) -> StunResult<u16> {
    u16::try_from(body.len()).map_err(|_| StunError::MalformedMessage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::{address::StunAddress, class, error_code, method};
    use rand::Rng;

    const BINDING_RESPONSE: [u8; 80] = [
        0x01, 0x01, 0x00, 0x3c, 0x21, 0x12, 0xa4, 0x42, 0x2f, 0x55, 0x36, 0x75, 0x66, 0x37, 0x31,
        0x43, 0x37, 0x65, 0x70, 0x31, 0x00, 0x20, 0x00, 0x08, 0x00, 0x01, 0x6e, 0x10, 0x1c, 0x8d,
        0xcc, 0xb0, 0x00, 0x06, 0x00, 0x09, 0x4f, 0x36, 0x56, 0x6c, 0x3a, 0x4d, 0x41, 0x37, 0x4b,
        0x20, 0x20, 0x20, 0x00, 0x08, 0x00, 0x14, 0x9c, 0xfc, 0x01, 0x5a, 0x68, 0x21, 0x9c, 0x77,
        0xed, 0xa5, 0x47, 0x8d, 0x80, 0x0d, 0x7a, 0xd5, 0xde, 0xe8, 0x28, 0xc4, 0x80, 0x28, 0x00,
        0x04, 0xf5, 0x75, 0x86, 0xcf,
    ];

    fn get_transaction_id() -> TransactionId {
        let mut rng = rand::thread_rng();
        let mut transaction_id = [0u8; 12];
        rng.fill(&mut transaction_id);
        transaction_id
    }

    fn sample_request() -> StunMessage {
        let mut msg = StunMessage::new(method::BINDING, class::REQUEST, get_transaction_id());
        msg.add_attribute(StunAttribute::Software("STUN test client".to_string()))
            .add_attribute(StunAttribute::Priority(0x6e0001ff))
            .add_attribute(StunAttribute::IceControlled(0x932ff9b151263b36))
            .add_attribute(StunAttribute::Username("evtj:h6vY".to_string()));
        msg
    }

    #[test]
    fn test_decode_binding_response() {
        let mut unknown = UnknownTypes::new();
        let msg = StunMessage::from_bytes(&BINDING_RESPONSE, &mut unknown).unwrap();

        assert_eq!(msg.message_type, 0x0101);
        assert_eq!(msg.length, 60);
        assert_eq!(msg.magic_cookie, MAGIC_COOKIE);
        assert_eq!(
            msg.transaction_id,
            [0x2f, 0x55, 0x36, 0x75, 0x66, 0x37, 0x31, 0x43, 0x37, 0x65, 0x70, 0x31]
        );
        assert_eq!(msg.method(), method::BINDING);
        assert_eq!(msg.class(), class::SUCCESS_RESPONSE);
        assert!(unknown.is_empty());

        assert_eq!(msg.attributes.len(), 4);
        match &msg.attributes[0] {
            StunAttribute::XorMappedAddress(addr) => {
                assert_eq!(addr.to_string(), "61.159.104.242:20226")
            }
            other => panic!("unexpected attribute {:?}", other),
        }
        assert_eq!(
            msg.attributes[1],
            StunAttribute::Username("O6Vl:MA7K".to_string())
        );
        match &msg.attributes[2] {
            StunAttribute::MessageIntegrity(digest) => assert_eq!(digest[9], 0xa5),
            other => panic!("unexpected attribute {:?}", other),
        }
        assert_eq!(msg.attributes[3], StunAttribute::Fingerprint(0xf57586cf));

        msg.check_fingerprint().unwrap();
    }

    #[test]
    fn test_class_and_method() {
        let tid = get_transaction_id();
        let cases = [
            (class::REQUEST, 0x0001),
            (class::SUCCESS_RESPONSE, 0x0101),
            (class::ERROR_RESPONSE, 0x0111),
            (class::INDICATION, 0x0011),
        ];
        for (c, expected) in cases {
            let msg = StunMessage::new(method::BINDING, c, tid);
            assert_eq!(msg.message_type, expected);
            assert_eq!(msg.class(), c);
            assert_eq!(msg.method(), method::BINDING);
        }

        for m in [method::ALLOCATE, method::CHANNEL_BIND, 0x0fff, 0x0abc] {
            for c in 0..4u8 {
                let msg = StunMessage::new(m, c, tid);
                assert_eq!(msg.method(), m);
                assert_eq!(msg.class(), c);
            }
        }
    }

    #[test]
    fn test_encode_roundtrip() {
        let mut msg = sample_request();
        let encoded = msg.encode(None, None, false, 0x20).unwrap();

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        assert_eq!(decoded.transaction_id, msg.transaction_id);
        assert_eq!(decoded.message_type, 0x0001);
        assert_eq!(decoded.attributes, msg.attributes);
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_length_accounting() {
        let mut msg = sample_request();
        // SOFTWARE 4+16, PRIORITY 4+4, ICE-CONTROLLED 4+8, USERNAME 4+9+3
        let encoded = msg.encode(None, None, false, 0x20).unwrap();
        let length = u16::from_be_bytes([encoded[2], encoded[3]]);
        assert_eq!(length, 20 + 8 + 12 + 16);
        assert_eq!(encoded.len(), HEADER_LENGTH + length as usize);
        assert_eq!(msg.length, length);

        let encoded = msg.encode(None, Some(&b"key"[..]), true, 0x20).unwrap();
        let length = u16::from_be_bytes([encoded[2], encoded[3]]);
        assert_eq!(length, 56 + 24 + 8);
        assert_eq!(encoded.len(), HEADER_LENGTH + length as usize);
    }

    #[test]
    fn test_caller_length_is_ignored() {
        let mut msg = StunMessage::new(method::BINDING, class::REQUEST, get_transaction_id());
        msg.length = 999;
        let encoded = msg.encode(None, None, false, 0).unwrap();
        assert_eq!(encoded.len(), HEADER_LENGTH);
        assert_eq!(&encoded[2..4], &[0, 0]);
    }

    #[test]
    fn test_message_integrity() {
        let key: &[u8] = b"VOkJxbRl1RmTxUk/WvJxBt";
        let mut msg = sample_request();
        let encoded = msg.encode(None, Some(key), false, 0x20).unwrap();

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        decoded.check_message_integrity(key).unwrap();
        assert!(matches!(
            decoded.check_message_integrity(b"other key"),
            Err(StunError::IntegrityMismatch)
        ));

        // flip one byte of the SOFTWARE text
        let mut tampered = encoded.clone();
        tampered[HEADER_LENGTH + 4] ^= 0x01;
        let decoded = StunMessage::from_bytes(&tampered, &mut unknown).unwrap();
        assert!(matches!(
            decoded.check_message_integrity(key),
            Err(StunError::IntegrityMismatch)
        ));
    }

    #[test]
    fn test_message_integrity_with_fingerprint() {
        let key: &[u8] = b"VOkJxbRl1RmTxUk/WvJxBt";
        let mut msg = sample_request();
        let encoded = msg.encode(None, Some(key), true, 0x20).unwrap();

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        assert_eq!(decoded.attributes.len(), 6);
        decoded.check_message_integrity(key).unwrap();
        decoded.check_fingerprint().unwrap();

        let mut tampered = encoded.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        let decoded = StunMessage::from_bytes(&tampered, &mut unknown).unwrap();
        // the integrity digest does not cover the fingerprint
        decoded.check_message_integrity(key).unwrap();
        assert!(matches!(
            decoded.check_fingerprint(),
            Err(StunError::FingerprintMismatch)
        ));
    }

    #[test]
    fn test_missing_trailers() {
        let mut msg = sample_request();
        let encoded = msg.encode(None, None, false, 0x20).unwrap();

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        assert!(matches!(
            decoded.check_message_integrity(b"key"),
            Err(StunError::MissingIntegrity)
        ));
        assert!(matches!(
            decoded.check_fingerprint(),
            Err(StunError::MissingFingerprint)
        ));
    }

    #[test]
    fn test_fingerprint_function() {
        assert_eq!(fingerprint(b""), 0x5354554E);
        assert_eq!(fingerprint(b"123456789"), 0xcbf43926 ^ 0x5354554E);

        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let len = rng.gen_range(0..64);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&bytes);
            assert_eq!(fingerprint(&bytes), hasher.finalize() ^ FINGERPRINT_XOR);
        }
    }

    #[test]
    fn test_success_response_bytes() {
        let tid = [
            0xcc, 0x96, 0x2d, 0x59, 0x2e, 0x49, 0x85, 0x1e, 0x5b, 0x4f, 0x2f, 0x20,
        ];
        let mut msg = StunMessage::new(method::BINDING, class::SUCCESS_RESPONSE, tid);
        msg.add_attribute(StunAttribute::Software("test1".to_string()));
        let encoded = msg.encode(None, None, true, 0).unwrap();

        let expected: [u8; 40] = [
            1, 1, 0, 20, 33, 18, 164, 66, 204, 150, 45, 89, 46, 73, 133, 30, 91, 79, 47, 32, 128,
            34, 0, 5, 116, 101, 115, 116, 49, 0, 0, 0, 128, 40, 0, 4, 0x20, 0xc5, 0x79, 0xb7,
        ];
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_encode_error_response() {
        let mut msg = StunMessage::new(method::BINDING, class::ERROR_RESPONSE, get_transaction_id());
        msg.add_attribute(StunAttribute::Software("ignored".to_string()));
        let ec = ErrorCode::new(error_code::UNKNOWN_ATTRIBUTE, "Unknown Attribute");
        let encoded = msg.encode(Some(&ec), Some(&b"key"[..]), true, 0x20).unwrap();

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        assert_eq!(decoded.class(), class::ERROR_RESPONSE);
        assert_eq!(decoded.attributes, vec![StunAttribute::ErrorCode(ec)]);
    }

    #[test]
    fn test_decode_unknown_required_attribute() {
        let mut msg = StunMessage::new(method::BINDING, class::REQUEST, get_transaction_id());
        msg.add_attribute(StunAttribute::Priority(1));
        let mut encoded = msg.encode(None, None, false, 0).unwrap();
        // append type 0x0002 with a 4-byte value, and an unknown optional type
        encoded.extend_from_slice(&[0x00, 0x02, 0x00, 0x04, 1, 2, 3, 4]);
        encoded.extend_from_slice(&[0x80, 0x99, 0x00, 0x01, 7, 0, 0, 0]);
        encoded[3] += 16;

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        assert_eq!(unknown.as_slice(), &[0x0002]);
        assert_eq!(decoded.attributes, vec![StunAttribute::Priority(1)]);
    }

    #[test]
    fn test_decode_stops_on_bad_attribute() {
        let mut msg = StunMessage::new(method::BINDING, class::REQUEST, get_transaction_id());
        msg.add_attribute(StunAttribute::Priority(7));
        let mut encoded = msg.encode(None, None, false, 0).unwrap();
        // LIFETIME must be 4 bytes long
        encoded.extend_from_slice(&[0x00, 0x0d, 0x00, 0x02, 1, 2, 0, 0]);
        encoded.extend_from_slice(&[0x00, 0x24, 0x00, 0x04, 0, 0, 0, 9]);
        encoded[3] += 16;

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        assert_eq!(decoded.attributes, vec![StunAttribute::Priority(7)]);
    }

    #[test]
    fn test_decode_truncated() {
        let mut unknown = UnknownTypes::new();
        assert!(matches!(
            StunMessage::from_bytes(&BINDING_RESPONSE[..19], &mut unknown),
            Err(StunError::MalformedMessage)
        ));
        // declared length larger than what follows the header
        assert!(matches!(
            StunMessage::from_bytes(&BINDING_RESPONSE[..60], &mut unknown),
            Err(StunError::MalformedMessage)
        ));
    }

    #[test]
    fn test_xor_mapped_address_v6_roundtrip() {
        let addr = StunAddress::new("2001:db8::ff00:42:8329".parse().unwrap(), 31337);
        let mut msg = StunMessage::new(method::BINDING, class::SUCCESS_RESPONSE, get_transaction_id());
        msg.add_attribute(StunAttribute::XorMappedAddress(addr))
            .add_attribute(StunAttribute::MappedAddress(addr));
        let encoded = msg.encode(None, None, false, 0x20).unwrap();

        let mut unknown = UnknownTypes::new();
        let decoded = StunMessage::from_bytes(&encoded, &mut unknown).unwrap();
        assert_eq!(decoded.attributes, msg.attributes);
        // on the wire the two values differ
        assert_ne!(&encoded[24..44], &encoded[48..68]);
    }
}
