use bitstream_io::{BigEndian, BitReader, BitWriter};
use bytes::Bytes;

use super::{
    DecodeError, DnsHeader, DnsQuestion, DnsRecord, RData, RecordClass, RecordType, ResponseCode,
};

/// A full DNS message, query or response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

impl DnsMessage {
    pub fn query(id: u16, question: DnsQuestion, recursion_desired: bool) -> Self {
        DnsMessage {
            header: DnsHeader {
                id,
                rd: recursion_desired,
                qdcount: 1,
                ..DnsHeader::default()
            },
            questions: vec![question],
            ..DnsMessage::default()
        }
    }

    pub fn update_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = self.additionals.len() as u16;
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from_u8(self.header.rcode)
    }

    pub fn is_truncated(&self) -> bool {
        self.header.tc
    }

    pub fn first_question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    /// Attach an EDNS0 OPT pseudo-record advertising `payload_size`
    /// (RFC 6891). The payload size rides in the class field.
    pub fn add_opt(&mut self, payload_size: u16) {
        self.additionals.push(DnsRecord {
            name: String::new(),
            rtype: RecordType::OPT,
            rclass: RecordClass::Unknown(payload_size),
            ttl: 0,
            rdata: RData::OPT {
                ext_rcode: 0,
                version: crate::constants::EDNS_VERSION,
                dnssec_ok: false,
                data: Bytes::new(),
            },
        });
    }

    /// The peer's advertised EDNS0 payload size, if an OPT record is present.
    pub fn opt_payload_size(&self) -> Option<u16> {
        self.additionals
            .iter()
            .find(|r| r.rtype == RecordType::OPT)
            .map(|r| u16::from(r.rclass))
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut message = self.clone();
        message.update_counts();

        let mut buf = Vec::with_capacity(512);
        {
            let mut writer = BitWriter::<_, BigEndian>::new(&mut buf);
            message.header.write_to(&mut writer)?;
        }

        for question in &message.questions {
            question.encode(&mut buf)?;
        }
        for record in message
            .answers
            .iter()
            .chain(&message.authorities)
            .chain(&message.additionals)
        {
            record.encode(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < DnsHeader::WIRE_LEN {
            return Err(DecodeError::InvalidHeader);
        }
        let mut reader = BitReader::<_, BigEndian>::new(&buf[..DnsHeader::WIRE_LEN]);
        let header = DnsHeader::read_from(&mut reader)?;

        let mut offset = DnsHeader::WIRE_LEN;
        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (question, next) = DnsQuestion::decode(buf, offset)?;
            questions.push(question);
            offset = next;
        }

        let mut decode_section = |count: u16, offset: &mut usize| -> Result<Vec<DnsRecord>, DecodeError> {
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (record, next) = DnsRecord::decode(buf, *offset)?;
                records.push(record);
                *offset = next;
            }
            Ok(records)
        };

        let answers = decode_section(header.ancount, &mut offset)?;
        let authorities = decode_section(header.nscount, &mut offset)?;
        let additionals = decode_section(header.arcount, &mut offset)?;

        Ok(DnsMessage {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}
