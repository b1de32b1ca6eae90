/**
 * STUN address codec: the (family, IP, port) triple shared by all address attributes,
 * and the XOR transform used by the XOR-* variants.
 * See RFC 5389 Section 15.1 and 15.2
 * https://datatracker.ietf.org/doc/html/rfc5389#section-15.1
 */
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::{
    error::{StunError, StunResult},
    reader::StunReader,
    TransactionId, MAGIC_COOKIE,
};

pub const FAMILY_IPV4: u8 = 0x01;
pub const FAMILY_IPV6: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StunAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl StunAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn family(&self) -> u8 {
        match self.ip {
            IpAddr::V4(_) => FAMILY_IPV4,
            IpAddr::V6(_) => FAMILY_IPV6,
        }
    }

    /**
     * Apply the XOR transform in place.
     *
     * The port is XORed with the high 16 bits of the magic cookie, an IPv4 address with the whole
     * cookie, and an IPv6 address with the cookie followed by the 12 transaction id bytes.
     * Applying it twice with the same transaction id restores the original value.
     */
    pub fn xor(&mut self, transaction_id: &TransactionId) -> &mut Self {
        self.port ^= (MAGIC_COOKIE >> 16) as u16;
        self.ip = match self.ip {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) ^ MAGIC_COOKIE)),
            IpAddr::V6(v6) => {
                let mut octets = v6.octets();
                xor_ipv6(&mut octets, transaction_id);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
        };
        self
    }

    /// Copy of this address with the XOR transform applied
    pub fn xored(mut self, transaction_id: &TransactionId) -> Self {
        self.xor(transaction_id);
        self
    }

    /**
     * Decode an address value: 1 reserved byte, the family, the port and 4 or 16 address bytes.
     * When a transaction id is supplied the XOR transform is undone before returning.
     */
    pub fn decode(
        reader: &mut StunReader,
        transaction_id: Option<&TransactionId>,
    ) -> StunResult<Self> {
        if reader.remaining() < 4 {
            return Err(StunError::MalformedMessage);
        }
        reader.skip(1);
        let family = reader.read_u8()?;
        let port = reader.read_u16()?;

        let ip = match family {
            FAMILY_IPV4 => IpAddr::V4(Ipv4Addr::from(reader.read_array::<4>()?)),
            FAMILY_IPV6 => IpAddr::V6(Ipv6Addr::from(reader.read_array::<16>()?)),
            other => return Err(StunError::UnsupportedFamily(other)),
        };

        let mut addr = StunAddress::new(ip, port);
        if let Some(tid) = transaction_id {
            addr.xor(tid);
        }
        Ok(addr)
    }

    /**
     * Encode the 8-byte (IPv4) or 20-byte (IPv6) address value, XORed when a transaction id is given.
     */
    pub fn encode(&self, transaction_id: Option<&TransactionId>) -> Vec<u8> {
        let addr = match transaction_id {
            Some(tid) => self.xored(tid),
            None => *self,
        };

        let mut buf = Vec::with_capacity(20);
        buf.push(0);
        buf.push(addr.family());
        buf.extend_from_slice(&addr.port.to_be_bytes());
        match addr.ip {
            IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
            IpAddr::V6(v6) => buf.extend_from_slice(&v6.octets()),
        }
        buf
    }
}

fn xor_ipv6(octets: &mut [u8; 16], transaction_id: &TransactionId) {
    let magic = MAGIC_COOKIE.to_be_bytes();
    for i in 0..4 {
        octets[i] ^= magic[i];
    }
    for (i, b) in transaction_id.iter().enumerate() {
        octets[4 + i] ^= b;
    }
}

impl From<SocketAddr> for StunAddress {
    fn from(addr: SocketAddr) -> Self {
        StunAddress::new(addr.ip(), addr.port())
    }
}

impl From<StunAddress> for SocketAddr {
    fn from(addr: StunAddress) -> Self {
        SocketAddr::new(addr.ip, addr.port)
    }
}

impl fmt::Display for StunAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SocketAddr::from(*self).fmt(f)
    }
}
