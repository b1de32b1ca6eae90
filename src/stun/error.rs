use thiserror::Error;

/**
 * Errors produced by the STUN codec, the Binding handler and the alternate relay.
 *
 * Decode errors are local to one inbound buffer: the caller drops the buffer and
 * carries on with the next one. Encode errors abort the response being built.
 */
#[derive(Error, Debug)]
pub enum StunError {
    /// Any structural decode failure: short read, bad length, bad attribute shape
    #[error("malformed STUN message")]
    MalformedMessage,

    #[error("unsupported address family 0x{0:02x}")]
    UnsupportedFamily(u8),

    #[error("MESSAGE-INTEGRITY mismatch")]
    IntegrityMismatch,

    #[error("missing required attribute MESSAGE-INTEGRITY")]
    MissingIntegrity,

    #[error("FINGERPRINT mismatch")]
    FingerprintMismatch,

    #[error("missing required attribute FINGERPRINT")]
    MissingFingerprint,

    /// A value that cannot be put on the wire for its type; this is a programming error
    #[error("unencodable attribute 0x{0:04x}")]
    UnencodableAttribute(u16),

    /// No live control connection to the alternate server
    #[error("alternate server not running")]
    AlternateUnavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StunResult<T> = Result<T, StunError>;
