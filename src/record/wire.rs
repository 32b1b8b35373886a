//! The byte-packed wire format: 4-byte header
//! `{version:3, num_mech:6, num_mod:5, mech_len:9, mod_len:9}`, network byte
//! order, followed by `mech_len` bytes of mechanisms then `mod_len` bytes of
//! modifiers. Each mechanism starts with a 2-byte header
//! `{prefix_type:3, mech_type:4, parm_len:9}`; each modifier starts with
//! `{name_len:8, data_len:8}`.
//!
//! This in-memory crate walks `CompiledRecord`'s `Vec`s directly and never
//! needs this format to evaluate a record; it exists purely for interchange
//! with anything that wants the historical byte layout. Domain-specs are
//! carried on the wire as their canonical macro-string text rather than a
//! per-token byte encoding, and are re-lexed on decode - this is exactly the
//! "different internal layout, same observable stringification" latitude.

use crate::error::{ErrorKind, SpfError};
use crate::record::{Cidr, CompiledRecord, DomainSpec, Mechanism, MechanismBody, Modifier};
use crate::spf::Qualifier;
use std::net::{Ipv4Addr, Ipv6Addr};

const VERSION: u8 = 1;

fn prefix_type(q: Qualifier) -> u8 {
    match q {
        Qualifier::Pass => 0,
        Qualifier::Fail => 1,
        Qualifier::SoftFail => 2,
        Qualifier::Neutral => 3,
    }
}

fn qualifier_from_prefix_type(b: u8) -> Result<Qualifier, SpfError> {
    match b {
        0 => Ok(Qualifier::Pass),
        1 => Ok(Qualifier::Fail),
        2 => Ok(Qualifier::SoftFail),
        3 => Ok(Qualifier::Neutral),
        _ => Err(SpfError::new(ErrorKind::Syntax)),
    }
}

fn mech_type(body: &MechanismBody) -> u8 {
    match body {
        MechanismBody::A { .. } => 0,
        MechanismBody::Mx { .. } => 1,
        MechanismBody::Ptr { .. } => 2,
        MechanismBody::Ip4 { .. } => 3,
        MechanismBody::Ip6 { .. } => 4,
        MechanismBody::Include { .. } => 5,
        MechanismBody::Exists { .. } => 6,
        MechanismBody::All => 7,
        MechanismBody::Redirect { .. } => 8,
        MechanismBody::Unknown { .. } => 15,
    }
}

const CIDR_NONE: u8 = 0xFF;

fn encode_domain(buf: &mut Vec<u8>, spec: &DomainSpec) {
    let text = crate::record::token::stringify_tokens(&spec.tokens);
    buf.extend_from_slice(text.as_bytes());
}

fn encode_mechanism_payload(body: &MechanismBody) -> Vec<u8> {
    let mut buf = Vec::new();
    match body {
        MechanismBody::A { domain, cidr } | MechanismBody::Mx { domain, cidr } => {
            buf.push(domain.is_some() as u8);
            buf.push(cidr.v4.unwrap_or(CIDR_NONE));
            buf.push(cidr.v6.unwrap_or(CIDR_NONE));
            if let Some(d) = domain {
                encode_domain(&mut buf, d);
            }
        }
        MechanismBody::Ptr { domain } => {
            buf.push(domain.is_some() as u8);
            if let Some(d) = domain {
                encode_domain(&mut buf, d);
            }
        }
        MechanismBody::Ip4 { addr, prefix } => {
            buf.extend_from_slice(&addr.octets());
            buf.push(*prefix);
        }
        MechanismBody::Ip6 { addr, prefix } => {
            buf.extend_from_slice(&addr.octets());
            buf.push(*prefix);
        }
        MechanismBody::Include { domain } | MechanismBody::Exists { domain } | MechanismBody::Redirect { domain } => {
            encode_domain(&mut buf, domain);
        }
        MechanismBody::All => {}
        MechanismBody::Unknown { name } => buf.extend_from_slice(name.as_bytes()),
    }
    buf
}

/// Serializes a compiled record to the §6 wire format.
pub fn to_bytes(record: &CompiledRecord) -> Result<Vec<u8>, SpfError> {
    if record.mechanisms.len() > 63 {
        return Err(SpfError::new(ErrorKind::BigMech));
    }
    if record.modifiers.len() > 31 {
        return Err(SpfError::new(ErrorKind::BigMod));
    }

    let mut mech_area = Vec::new();
    for mech in &record.mechanisms {
        let payload = encode_mechanism_payload(&mech.body);
        if payload.len() > 511 {
            return Err(SpfError::new(ErrorKind::BigMech));
        }
        let header: u16 = ((prefix_type(mech.qualifier) as u16) << 13)
            | ((mech_type(&mech.body) as u16) << 9)
            | (payload.len() as u16 & 0x1FF);
        mech_area.extend_from_slice(&header.to_be_bytes());
        mech_area.extend_from_slice(&payload);
    }

    let mut mod_area = Vec::new();
    for modifier in &record.modifiers {
        let mut data = Vec::new();
        encode_domain(&mut data, &modifier.domain);
        if modifier.name.len() > 255 || data.len() > 255 {
            return Err(SpfError::new(ErrorKind::BigMod));
        }
        mod_area.push(modifier.name.len() as u8);
        mod_area.push(data.len() as u8);
        mod_area.extend_from_slice(modifier.name.as_bytes());
        mod_area.extend_from_slice(&data);
    }

    if mech_area.len() > 511 || mod_area.len() > 511 {
        return Err(SpfError::new(ErrorKind::BigDns));
    }

    let header: u32 = ((VERSION as u32) << 29)
        | ((record.mechanisms.len() as u32 & 0x3F) << 23)
        | ((record.modifiers.len() as u32 & 0x1F) << 18)
        | ((mech_area.len() as u32 & 0x1FF) << 9)
        | (mod_area.len() as u32 & 0x1FF);

    let mut out = Vec::with_capacity(4 + mech_area.len() + mod_area.len());
    out.extend_from_slice(&header.to_be_bytes());
    out.extend_from_slice(&mech_area);
    out.extend_from_slice(&mod_area);
    Ok(out)
}

fn take<'a>(buf: &'a [u8], n: usize) -> Result<(&'a [u8], &'a [u8]), SpfError> {
    if buf.len() < n {
        return Err(SpfError::new(ErrorKind::Syntax));
    }
    Ok(buf.split_at(n))
}

fn decode_domain(bytes: &[u8]) -> Result<DomainSpec, SpfError> {
    let text = std::str::from_utf8(bytes).map_err(|_| SpfError::new(ErrorKind::InvalidChar))?;
    DomainSpec::parse(text)
}

/// Parses the §6 wire format back into a [`CompiledRecord`].
pub fn from_bytes(buf: &[u8]) -> Result<CompiledRecord, SpfError> {
    let (header_bytes, rest) = take(buf, 4)?;
    let header = u32::from_be_bytes([header_bytes[0], header_bytes[1], header_bytes[2], header_bytes[3]]);
    let num_mech = (header >> 23) & 0x3F;
    let num_mod = (header >> 18) & 0x1F;
    let mech_len = ((header >> 9) & 0x1FF) as usize;
    let mod_len = (header & 0x1FF) as usize;

    let (mech_area, rest) = take(rest, mech_len)?;
    let (mod_area, _rest) = take(rest, mod_len)?;

    let mut mechanisms = Vec::new();
    let mut cursor = mech_area;
    for _ in 0..num_mech {
        let (hdr, after_hdr) = take(cursor, 2)?;
        let h = u16::from_be_bytes([hdr[0], hdr[1]]);
        let qualifier = qualifier_from_prefix_type(((h >> 13) & 0x7) as u8)?;
        let kind = ((h >> 9) & 0xF) as u8;
        let parm_len = (h & 0x1FF) as usize;
        let (payload, after_payload) = take(after_hdr, parm_len)?;
        cursor = after_payload;

        let body = decode_mechanism_body(kind, payload)?;
        mechanisms.push(Mechanism {
            qualifier,
            body,
            from_local_policy: false,
        });
    }

    let mut modifiers = Vec::new();
    let mut cursor = mod_area;
    for _ in 0..num_mod {
        let (hdr, after_hdr) = take(cursor, 2)?;
        let name_len = hdr[0] as usize;
        let data_len = hdr[1] as usize;
        let (name_bytes, after_name) = take(after_hdr, name_len)?;
        let (data_bytes, after_data) = take(after_name, data_len)?;
        cursor = after_data;

        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| SpfError::new(ErrorKind::InvalidChar))?
            .to_owned();
        let domain = decode_domain(data_bytes)?;
        modifiers.push(Modifier { name, domain });
    }

    Ok(CompiledRecord { mechanisms, modifiers })
}

fn decode_mechanism_body(kind: u8, payload: &[u8]) -> Result<MechanismBody, SpfError> {
    match kind {
        0 | 1 => {
            let (flags, rest) = take(payload, 3)?;
            let has_domain = flags[0] != 0;
            let v4 = if flags[1] != CIDR_NONE { Some(flags[1]) } else { None };
            let v6 = if flags[2] != CIDR_NONE { Some(flags[2]) } else { None };
            let domain = if has_domain {
                Some(decode_domain(rest)?)
            } else {
                None
            };
            let cidr = Cidr { v4, v6 };
            Ok(if kind == 0 {
                MechanismBody::A { domain, cidr }
            } else {
                MechanismBody::Mx { domain, cidr }
            })
        }
        2 => {
            let (flags, rest) = take(payload, 1)?;
            let domain = if flags[0] != 0 {
                Some(decode_domain(rest)?)
            } else {
                None
            };
            Ok(MechanismBody::Ptr { domain })
        }
        3 => {
            let (addr_bytes, rest) = take(payload, 4)?;
            let (prefix_bytes, _) = take(rest, 1)?;
            let addr = Ipv4Addr::new(addr_bytes[0], addr_bytes[1], addr_bytes[2], addr_bytes[3]);
            Ok(MechanismBody::Ip4 {
                addr,
                prefix: prefix_bytes[0],
            })
        }
        4 => {
            let (addr_bytes, rest) = take(payload, 16)?;
            let (prefix_bytes, _) = take(rest, 1)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(addr_bytes);
            Ok(MechanismBody::Ip6 {
                addr: Ipv6Addr::from(octets),
                prefix: prefix_bytes[0],
            })
        }
        5 => Ok(MechanismBody::Include {
            domain: decode_domain(payload)?,
        }),
        6 => Ok(MechanismBody::Exists {
            domain: decode_domain(payload)?,
        }),
        7 => Ok(MechanismBody::All),
        8 => Ok(MechanismBody::Redirect {
            domain: decode_domain(payload)?,
        }),
        15 => {
            let name = std::str::from_utf8(payload)
                .map_err(|_| SpfError::new(ErrorKind::InvalidChar))?
                .to_owned();
            Ok(MechanismBody::Unknown { name })
        }
        _ => Err(SpfError::new(ErrorKind::UnknownMech)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::compile::compile;

    fn roundtrip(text: &str) {
        let out = compile(text, 10);
        assert!(out.error.is_none(), "{text}: {:?}", out.error);
        let bytes = to_bytes(&out.record).unwrap();
        let decoded = from_bytes(&bytes).unwrap();
        assert_eq!(out.record, decoded, "{text}");
    }

    #[test]
    fn round_trips_through_wire_bytes() {
        roundtrip("v=spf1 ip4:192.0.2.0/24 -all");
        roundtrip("v=spf1 a:mail.example.com/24 mx -all");
        roundtrip("v=spf1 include:other.example ~all");
        roundtrip("v=spf1 ip6:2001:db8::/32 -all");
        roundtrip("v=spf1 redirect=_spf.example.com exp=explain.example.com");
        roundtrip("v=spf1 exists:%{ir}.bl.example -all");
    }

    #[test]
    fn header_packs_into_four_bytes() {
        let out = compile("v=spf1 a mx -all", 10);
        let bytes = to_bytes(&out.record).unwrap();
        assert!(bytes.len() >= 4);
        assert_eq!((bytes[0] >> 5) & 0x7, VERSION);
    }
}
