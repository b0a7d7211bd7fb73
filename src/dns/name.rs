use super::DecodeError;

const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_JUMPS: usize = 5;

/// Normalize a hostname to the form used for cache keys and question
/// equality: ASCII lowercase with the trailing dot stripped.
pub fn normalize(name: &str) -> String {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    trimmed.to_ascii_lowercase()
}

/// Append a domain name in uncompressed wire format.
pub fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), DecodeError> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.is_empty() {
        out.push(0);
        return Ok(());
    }

    let mut total = 0;
    for label in trimmed.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(DecodeError::InvalidLabel);
        }
        total += label.len() + 1;
        if total > MAX_NAME_LEN {
            return Err(DecodeError::NameTooLong);
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// Parse a possibly-compressed domain name starting at `start`, returning
/// the lowercased dotted name and the offset just past it in the original
/// byte stream. Pointer chains are bounded to defeat malicious loops.
pub fn parse_name(buf: &[u8], start: usize) -> Result<(String, usize), DecodeError> {
    let mut name = String::new();
    let mut offset = start;
    let mut jumps = 0;
    let mut end_after_first_pointer = None;

    loop {
        let len = *buf.get(offset).ok_or(DecodeError::InvalidLabel)? as usize;

        if len & 0xC0 == 0xC0 {
            let low = *buf.get(offset + 1).ok_or(DecodeError::InvalidLabel)?;
            if end_after_first_pointer.is_none() {
                end_after_first_pointer = Some(offset + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(DecodeError::InvalidLabel);
            }
            offset = (((len & 0x3F) as usize) << 8) | low as usize;
            continue;
        }

        if len == 0 {
            let end = end_after_first_pointer.unwrap_or(offset + 1);
            return Ok((name, end));
        }

        if len > MAX_LABEL_LEN {
            return Err(DecodeError::InvalidLabel);
        }

        let label_start = offset + 1;
        let label_end = label_start + len;
        let label = buf
            .get(label_start..label_end)
            .ok_or(DecodeError::InvalidLabel)?;
        if name.len() + label.len() + 1 > MAX_NAME_LEN {
            return Err(DecodeError::NameTooLong);
        }
        if !name.is_empty() {
            name.push('.');
        }
        for &b in label {
            name.push(b.to_ascii_lowercase() as char);
        }
        offset = label_end;
    }
}

/// Skip over a possibly-compressed domain name, returning the offset just
/// past it.
pub fn skip_name(buf: &[u8], start: usize) -> Result<usize, DecodeError> {
    let mut offset = start;
    loop {
        let len = *buf.get(offset).ok_or(DecodeError::InvalidLabel)? as usize;
        if len & 0xC0 == 0xC0 {
            if offset + 2 > buf.len() {
                return Err(DecodeError::InvalidLabel);
            }
            return Ok(offset + 2);
        }
        if len == 0 {
            return Ok(offset + 1);
        }
        if len > MAX_LABEL_LEN {
            return Err(DecodeError::InvalidLabel);
        }
        offset += 1 + len;
    }
}

/// Decode `xn--` (punycode) labels into their Unicode form. Labels that are
/// not ACE-encoded, or fail to decode, pass through unchanged.
pub fn decode_idn(name: &str) -> String {
    name.split('.')
        .map(|label| {
            label
                .strip_prefix("xn--")
                .and_then(decode_punycode)
                .unwrap_or_else(|| label.to_string())
        })
        .collect::<Vec<_>>()
        .join(".")
}

// RFC 3492 parameters.
const BASE: u32 = 36;
const TMIN: u32 = 1;
const TMAX: u32 = 26;
const SKEW: u32 = 38;
const DAMP: u32 = 700;
const INITIAL_BIAS: u32 = 72;
const INITIAL_N: u32 = 128;

fn adapt(mut delta: u32, num_points: u32, first_time: bool) -> u32 {
    delta /= if first_time { DAMP } else { 2 };
    delta += delta / num_points;
    let mut k = 0;
    while delta > ((BASE - TMIN) * TMAX) / 2 {
        delta /= BASE - TMIN;
        k += BASE;
    }
    k + ((BASE - TMIN + 1) * delta) / (delta + SKEW)
}

fn decode_digit(c: char) -> Option<u32> {
    match c {
        'a'..='z' => Some(c as u32 - 'a' as u32),
        'A'..='Z' => Some(c as u32 - 'A' as u32),
        '0'..='9' => Some(c as u32 - '0' as u32 + 26),
        _ => None,
    }
}

fn decode_punycode(input: &str) -> Option<String> {
    let (mut output, extended): (Vec<char>, &str) = match input.rfind('-') {
        Some(pos) => (input[..pos].chars().collect(), &input[pos + 1..]),
        None => (Vec::new(), input),
    };

    let mut n = INITIAL_N;
    let mut i: u32 = 0;
    let mut bias = INITIAL_BIAS;
    let mut chars = extended.chars().peekable();

    while chars.peek().is_some() {
        let old_i = i;
        let mut w: u32 = 1;
        let mut k = BASE;
        loop {
            let digit = decode_digit(chars.next()?)?;
            i = i.checked_add(digit.checked_mul(w)?)?;
            let t = if k <= bias {
                TMIN
            } else if k >= bias + TMAX {
                TMAX
            } else {
                k - bias
            };
            if digit < t {
                break;
            }
            w = w.checked_mul(BASE - t)?;
            k += BASE;
        }
        let len = output.len() as u32 + 1;
        bias = adapt(i - old_i, len, old_i == 0);
        n = n.checked_add(i / len)?;
        i %= len;
        output.insert(i as usize, char::from_u32(n)?);
        i += 1;
    }

    Some(output.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Example.ORG."), "example.org");
        assert_eq!(normalize("example.org"), "example.org");
        assert_eq!(normalize("."), "");
    }

    #[test]
    fn test_write_and_parse_round_trip() {
        let mut buf = Vec::new();
        write_name(&mut buf, "www.Example.org").unwrap();
        let (name, end) = parse_name(&buf, 0).unwrap();
        assert_eq!(name, "www.example.org");
        assert_eq!(end, buf.len());
    }

    #[test]
    fn test_parse_compressed_name() {
        let packet = [
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0, // offset 0
            3, b'w', b'w', b'w', 0xC0, 0x00, // offset 13: www + pointer to 0
        ];
        let (name, end) = parse_name(&packet, 13).unwrap();
        assert_eq!(name, "www.example.com");
        assert_eq!(end, 19);
        assert_eq!(skip_name(&packet, 13).unwrap(), 19);
    }

    #[test]
    fn test_pointer_loop_is_rejected() {
        let packet = [0xC0, 0x00];
        assert!(parse_name(&packet, 0).is_err());
    }

    #[test]
    fn test_root_name() {
        let mut buf = Vec::new();
        write_name(&mut buf, "").unwrap();
        assert_eq!(buf, [0]);
        let (name, end) = parse_name(&buf, 0).unwrap();
        assert_eq!(name, "");
        assert_eq!(end, 1);
    }

    #[test]
    fn test_oversized_label_is_rejected() {
        let long = "a".repeat(64);
        let mut buf = Vec::new();
        assert!(write_name(&mut buf, &long).is_err());
    }

    #[test]
    fn test_decode_idn() {
        // "münchen" in ACE form
        assert_eq!(decode_idn("xn--mnchen-3ya.example"), "münchen.example");
        // non-ACE labels pass through
        assert_eq!(decode_idn("plain.example"), "plain.example");
        // malformed ACE labels pass through
        assert_eq!(decode_idn("xn--\u{ff}.example"), "xn--\u{ff}.example");
    }
}
