/**
 * The STUN-specific module: wire codec, Binding handler and message processor.
 * This file contains the protocol constant definitions shared by all of them.
 */

pub mod address;
pub mod attribute;
pub mod binding;
pub mod error;
pub mod message;
pub mod processor;
pub mod reader;

/// length of a STUN header is 20 bytes
pub const HEADER_LENGTH: usize = 20;

/// size of the transaction id carried in every header
pub const TRANSACTION_ID_LENGTH: usize = 12;

/// This value is included in STUN messages to help differentiate them from other types of network traffic and to
/// ensure that the messages are processed correctly by STUN servers and clients. The Magic Cookie value is 0x2112A442
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// The CRC32 of a message is XORed with this value ("STUN" in ASCII) to form the FINGERPRINT
pub const FINGERPRINT_XOR: u32 = 0x5354554E;

/// Bytes added to the message length by a MESSAGE-INTEGRITY attribute (header + HMAC-SHA1 digest)
pub const INTEGRITY_SIZE: u16 = 24;

/// Bytes added to the message length by a FINGERPRINT attribute (header + CRC32)
pub const FINGERPRINT_SIZE: u16 = 8;

/// A transaction id is kept as its raw 12 bytes, exactly as found on the wire
pub type TransactionId = [u8; TRANSACTION_ID_LENGTH];

// Methods
pub mod method {
    /// The core STUN method: the response reports the address the request arrived from
    pub const BINDING: u16 = 0x001;

    /// TURN methods, RFC 5766
    pub const ALLOCATE: u16 = 0x003;
    pub const REFRESH: u16 = 0x004;
    pub const SEND: u16 = 0x006;
    pub const DATA: u16 = 0x007;
    pub const CREATE_PERMISSION: u16 = 0x008;
    pub const CHANNEL_BIND: u16 = 0x009;
}

// Classes, as extracted from the two interleaved class bits of the message type
pub mod class {
    pub const REQUEST: u8 = 0x0;
    pub const INDICATION: u8 = 0x1;
    pub const SUCCESS_RESPONSE: u8 = 0x2;
    pub const ERROR_RESPONSE: u8 = 0x3;
}

/*
   Comprehension-required range (0x0000-0x7FFF):
     0x0001: MAPPED-ADDRESS
     0x0003: CHANGE-REQUEST
     0x0006: USERNAME
     0x0008: MESSAGE-INTEGRITY
     0x0009: ERROR-CODE
     0x000A: UNKNOWN-ATTRIBUTES
     0x000C: CHANNEL-NUMBER
     0x000D: LIFETIME
     0x0012: XOR-PEER-ADDRESS
     0x0013: DATA
     0x0014: REALM
     0x0015: NONCE
     0x0016: XOR-RELAYED-ADDRESS
     0x0017: REQUESTED-ADDRESS-FAMILY
     0x0018: EVEN-PORT
     0x0019: REQUESTED-TRANSPORT
     0x001A: DONT-FRAGMENT
     0x0020: XOR-MAPPED-ADDRESS
     0x0022: RESERVATION-TOKEN
     0x0024: PRIORITY
     0x0025: USE-CANDIDATE
     0x0026: PADDING
     0x0027: RESPONSE-PORT

   Comprehension-optional range (0x8000-0xFFFF)
     0x8022: SOFTWARE
     0x8023: ALTERNATE-SERVER
     0x8028: FINGERPRINT
     0x8029: ICE-CONTROLLED
     0x802A: ICE-CONTROLLING
     0x802B: RESPONSE-ORIGIN
     0x802C: OTHER-ADDRESS
*/

// Attribute Types
pub mod attribute_type {
    /// The reflexive address of the client, not obfuscated. Kept in responses for RFC 3489 clients.
    pub const MAPPED_ADDRESS: u16 = 0x0001;

    /// Two flags, "change IP" and "change port", asking the server to answer from a different address.
    pub const CHANGE_REQUEST: u16 = 0x0003;

    pub const USERNAME: u16 = 0x0006;

    /// HMAC-SHA1 over the message up to (and excluding) this attribute.
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;

    pub const ERROR_CODE: u16 = 0x0009;
    pub const UNKNOWN_ATTRIBUTES: u16 = 0x000A;
    pub const CHANNEL_NUMBER: u16 = 0x000C;
    pub const LIFETIME: u16 = 0x000D;
    pub const XOR_PEER_ADDRESS: u16 = 0x0012;
    pub const DATA: u16 = 0x0013;
    pub const REALM: u16 = 0x0014;
    pub const NONCE: u16 = 0x0015;
    pub const XOR_RELAYED_ADDRESS: u16 = 0x0016;
    pub const REQUESTED_ADDRESS_FAMILY: u16 = 0x0017;
    pub const EVEN_PORT: u16 = 0x0018;
    pub const REQUESTED_TRANSPORT: u16 = 0x0019;
    pub const DONT_FRAGMENT: u16 = 0x001A;

    /// The reflexive address of the client, XORed with the magic cookie (and the transaction id for IPv6).
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;

    pub const RESERVATION_TOKEN: u16 = 0x0022;
    pub const PRIORITY: u16 = 0x0024;
    pub const USE_CANDIDATE: u16 = 0x0025;
    pub const PADDING: u16 = 0x0026;
    pub const RESPONSE_PORT: u16 = 0x0027;

    /// Name and version of the software that sent the message.
    pub const SOFTWARE: u16 = 0x8022;

    pub const ALTERNATE_SERVER: u16 = 0x8023;

    /// CRC32 of the message up to this attribute, XORed with 0x5354554E.
    pub const FINGERPRINT: u16 = 0x8028;

    pub const ICE_CONTROLLED: u16 = 0x8029;
    pub const ICE_CONTROLLING: u16 = 0x802A;

    /// The address a response was sent from.
    pub const RESPONSE_ORIGIN: u16 = 0x802B;

    /// The address a client should use to reach the alternate server.
    pub const OTHER_ADDRESS: u16 = 0x802C;

    /// Types below this value must be understood by the receiver.
    pub const COMPREHENSION_OPTIONAL: u16 = 0x8000;
}

// Error Codes
pub mod error_code {
    /// Bad Request (400)
    pub const BAD_REQUEST: u16 = 400;

    /// Unauthorized (401)
    pub const UNAUTHORIZED: u16 = 401;

    /// Unknown Attribute (420)
    pub const UNKNOWN_ATTRIBUTE: u16 = 420;

    /// Server Error (500)
    pub const SERVER_ERROR: u16 = 500;
}
