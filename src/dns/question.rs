use super::{DecodeError, RecordClass, RecordType, name};

/// A single question. Equality is by normalized name, type, and class.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl DnsQuestion {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        DnsQuestion {
            name: name::normalize(name),
            qtype,
            qclass: RecordClass::IN,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        name::write_name(out, &self.name)?;
        out.extend_from_slice(&u16::from(self.qtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let (raw_name, after_name) = name::parse_name(buf, offset)?;
        let fixed = buf
            .get(after_name..after_name + 4)
            .ok_or(DecodeError::InvalidQuestion)?;
        let qtype = u16::from_be_bytes([fixed[0], fixed[1]]).into();
        let qclass = u16::from_be_bytes([fixed[2], fixed[3]]).into();
        Ok((
            DnsQuestion {
                name: raw_name,
                qtype,
                qclass,
            },
            after_name + 4,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_round_trip_normalizes_case() {
        let question = DnsQuestion::new("WWW.Example.ORG", RecordType::AAAA);
        assert_eq!(question.name, "www.example.org");

        let mut buf = Vec::new();
        question.encode(&mut buf).unwrap();
        let (parsed, end) = DnsQuestion::decode(&buf, 0).unwrap();
        assert_eq!(parsed, question);
        assert_eq!(end, buf.len());
    }
}
