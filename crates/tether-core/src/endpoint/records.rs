//! Binary record layout for the persisted endpoint list.
//!
//! Each endpoint is one self-describing record, little-endian:
//!
//! ```text
//! [i32 LE: address_len][address_len bytes: IPv4 (4) or IPv6 (16)][i32 LE: port]
//! ```
//!
//! Records are concatenated with no header. An empty input is a valid list
//! of zero endpoints.

use super::Endpoint;
use crate::{Result, TetherError};
use bytes::{Buf, BufMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const LEN_FIELD: usize = 4;
const PORT_FIELD: usize = 4;

/// Append one record for `endpoint` to `buf`.
pub fn put_record<B: BufMut>(buf: &mut B, endpoint: &Endpoint) {
    match endpoint.address() {
        IpAddr::V4(v4) => {
            buf.put_i32_le(4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_i32_le(16);
            buf.put_slice(&v6.octets());
        }
    }
    buf.put_i32_le(i32::from(endpoint.port()));
}

/// Encoded size of one record.
pub fn record_len(endpoint: &Endpoint) -> usize {
    let addr_len = if endpoint.address().is_ipv4() { 4 } else { 16 };
    LEN_FIELD + addr_len + PORT_FIELD
}

/// Decode records until `input` is exhausted, handing each to `sink`.
///
/// Returns the number of records decoded. On a malformed record the error
/// carries the byte offset of that record; records handed to `sink` before
/// the failure stay delivered.
pub fn read_records(input: &[u8], mut sink: impl FnMut(Endpoint)) -> Result<usize> {
    let total = input.len();
    let mut buf = input;
    let mut count = 0;

    while buf.has_remaining() {
        let offset = total - buf.remaining();

        if buf.remaining() < LEN_FIELD {
            return Err(corrupt(offset, "truncated address length"));
        }
        let addr_len = buf.get_i32_le();

        let address = match addr_len {
            4 | 16 if buf.remaining() < addr_len as usize => {
                return Err(corrupt(offset, "truncated address bytes"));
            }
            4 => {
                let mut octets = [0u8; 4];
                buf.copy_to_slice(&mut octets);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let mut octets = [0u8; 16];
                buf.copy_to_slice(&mut octets);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(corrupt(
                    offset,
                    format!("unsupported address length {}", other),
                ));
            }
        };

        if buf.remaining() < PORT_FIELD {
            return Err(corrupt(offset, "truncated port"));
        }
        let port = buf.get_i32_le();
        let port = u16::try_from(port)
            .map_err(|_| corrupt(offset, format!("port {} out of range", port)))?;

        sink(Endpoint::new(address, port));
        count += 1;
    }

    Ok(count)
}

fn corrupt(offset: usize, reason: impl Into<String>) -> TetherError {
    TetherError::CorruptPersistedState {
        offset,
        reason: reason.into(),
    }
}
