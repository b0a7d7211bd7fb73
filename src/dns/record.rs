use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

use super::{DecodeError, RecordClass, RecordType, name};

/// Typed rdata for the record types the resolver understands; everything
/// else is carried opaquely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(String),
    NS(String),
    PTR(String),
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    TXT(Vec<String>),
    MX {
        preference: u16,
        exchange: String,
    },
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    OPT {
        ext_rcode: u8,
        version: u8,
        dnssec_ok: bool,
        data: Bytes,
    },
    Raw(Bytes),
}

impl RData {
    pub fn as_address(&self) -> Option<IpAddr> {
        match self {
            RData::A(addr) => Some(IpAddr::V4(*addr)),
            RData::AAAA(addr) => Some(IpAddr::V6(*addr)),
            _ => None,
        }
    }

    /// The domain name this rdata points at, for alias and delegation types.
    pub fn referenced_name(&self) -> Option<&str> {
        match self {
            RData::CNAME(target) | RData::NS(target) | RData::PTR(target) => Some(target),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl DnsRecord {
    pub fn new(name: &str, ttl: u32, rdata: RData) -> Self {
        let rtype = match &rdata {
            RData::A(_) => RecordType::A,
            RData::AAAA(_) => RecordType::AAAA,
            RData::CNAME(_) => RecordType::CNAME,
            RData::NS(_) => RecordType::NS,
            RData::PTR(_) => RecordType::PTR,
            RData::SOA { .. } => RecordType::SOA,
            RData::TXT(_) => RecordType::TXT,
            RData::MX { .. } => RecordType::MX,
            RData::SRV { .. } => RecordType::SRV,
            RData::OPT { .. } => RecordType::OPT,
            RData::Raw(_) => RecordType::Unknown(0),
        };
        DnsRecord {
            name: name::normalize(name),
            rtype,
            rclass: RecordClass::IN,
            ttl,
            rdata,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        name::write_name(out, &self.name)?;
        out.extend_from_slice(&u16::from(self.rtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());

        let mut rdata = Vec::new();
        self.encode_rdata(&mut rdata)?;
        if rdata.len() > u16::MAX as usize {
            return Err(DecodeError::InvalidRecord);
        }
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata);
        Ok(())
    }

    fn encode_rdata(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        match &self.rdata {
            RData::A(addr) => out.extend_from_slice(&addr.octets()),
            RData::AAAA(addr) => out.extend_from_slice(&addr.octets()),
            RData::CNAME(target) | RData::NS(target) | RData::PTR(target) => {
                name::write_name(out, target)?;
            }
            RData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                name::write_name(out, mname)?;
                name::write_name(out, rname)?;
                for field in [serial, refresh, retry, expire, minimum] {
                    out.extend_from_slice(&field.to_be_bytes());
                }
            }
            RData::TXT(strings) => {
                for s in strings {
                    if s.len() > 255 {
                        return Err(DecodeError::InvalidRecord);
                    }
                    out.push(s.len() as u8);
                    out.extend_from_slice(s.as_bytes());
                }
            }
            RData::MX {
                preference,
                exchange,
            } => {
                out.extend_from_slice(&preference.to_be_bytes());
                name::write_name(out, exchange)?;
            }
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                name::write_name(out, target)?;
            }
            RData::OPT { data, .. } => out.extend_from_slice(data),
            RData::Raw(data) => out.extend_from_slice(data),
        }
        Ok(())
    }

    /// Decode one resource record starting at `offset`. Rdata containing
    /// domain names is parsed against the full packet so compression
    /// pointers resolve.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let (raw_name, after_name) = name::parse_name(buf, offset)?;
        let fixed = buf
            .get(after_name..after_name + 10)
            .ok_or(DecodeError::InvalidRecord)?;
        let rtype: RecordType = u16::from_be_bytes([fixed[0], fixed[1]]).into();
        let rclass: RecordClass = u16::from_be_bytes([fixed[2], fixed[3]]).into();
        let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;

        let rdata_start = after_name + 10;
        let rdata_end = rdata_start + rdlength;
        let rdata_buf = buf
            .get(rdata_start..rdata_end)
            .ok_or(DecodeError::InvalidRecord)?;

        let rdata = match rtype {
            RecordType::A => {
                let octets: [u8; 4] =
                    rdata_buf.try_into().map_err(|_| DecodeError::InvalidRecord)?;
                RData::A(Ipv4Addr::from(octets))
            }
            RecordType::AAAA => {
                let octets: [u8; 16] =
                    rdata_buf.try_into().map_err(|_| DecodeError::InvalidRecord)?;
                RData::AAAA(Ipv6Addr::from(octets))
            }
            RecordType::CNAME => RData::CNAME(name::parse_name(buf, rdata_start)?.0),
            RecordType::NS => RData::NS(name::parse_name(buf, rdata_start)?.0),
            RecordType::PTR => RData::PTR(name::parse_name(buf, rdata_start)?.0),
            RecordType::SOA => Self::decode_soa(buf, rdata_start, rdata_end)?,
            RecordType::TXT => Self::decode_txt(rdata_buf)?,
            RecordType::MX => {
                if rdata_buf.len() < 2 {
                    return Err(DecodeError::InvalidRecord);
                }
                RData::MX {
                    preference: u16::from_be_bytes([rdata_buf[0], rdata_buf[1]]),
                    exchange: name::parse_name(buf, rdata_start + 2)?.0,
                }
            }
            RecordType::SRV => {
                if rdata_buf.len() < 6 {
                    return Err(DecodeError::InvalidRecord);
                }
                RData::SRV {
                    priority: u16::from_be_bytes([rdata_buf[0], rdata_buf[1]]),
                    weight: u16::from_be_bytes([rdata_buf[2], rdata_buf[3]]),
                    port: u16::from_be_bytes([rdata_buf[4], rdata_buf[5]]),
                    target: name::parse_name(buf, rdata_start + 6)?.0,
                }
            }
            RecordType::OPT => {
                // The TTL field of an OPT pseudo-record carries the extended
                // rcode, version, and flags (RFC 6891 §6.1.3).
                RData::OPT {
                    ext_rcode: (ttl >> 24) as u8,
                    version: (ttl >> 16) as u8,
                    dnssec_ok: ttl & 0x8000 != 0,
                    data: Bytes::copy_from_slice(rdata_buf),
                }
            }
            _ => RData::Raw(Bytes::copy_from_slice(rdata_buf)),
        };

        Ok((
            DnsRecord {
                name: raw_name,
                rtype,
                rclass,
                ttl,
                rdata,
            },
            rdata_end,
        ))
    }

    fn decode_soa(buf: &[u8], rdata_start: usize, rdata_end: usize) -> Result<RData, DecodeError> {
        let (mname, after_mname) = name::parse_name(buf, rdata_start)?;
        let (rname, after_rname) = name::parse_name(buf, after_mname)?;
        let fields = buf
            .get(after_rname..after_rname + 20)
            .ok_or(DecodeError::InvalidRecord)?;
        if after_rname + 20 > rdata_end {
            return Err(DecodeError::InvalidRecord);
        }
        let word = |i: usize| u32::from_be_bytes([fields[i], fields[i + 1], fields[i + 2], fields[i + 3]]);
        Ok(RData::SOA {
            mname,
            rname,
            serial: word(0),
            refresh: word(4),
            retry: word(8),
            expire: word(12),
            minimum: word(16),
        })
    }

    fn decode_txt(rdata_buf: &[u8]) -> Result<RData, DecodeError> {
        let mut strings = Vec::new();
        let mut pos = 0;
        while pos < rdata_buf.len() {
            let len = rdata_buf[pos] as usize;
            let chunk = rdata_buf
                .get(pos + 1..pos + 1 + len)
                .ok_or(DecodeError::InvalidRecord)?;
            strings.push(String::from_utf8_lossy(chunk).into_owned());
            pos += 1 + len;
        }
        Ok(RData::TXT(strings))
    }
}
