//! Minimal RLP encoder for legacy transactions.

/// One RLP item: a byte string or a list of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    /// Unsigned integer as a minimal big-endian byte string (zero is empty).
    pub fn uint(value: u128) -> Self {
        Item::Bytes(trim_leading_zeros(&value.to_be_bytes()).to_vec())
    }

    /// 32-byte scalar (signature r or s) with leading zeros stripped.
    pub fn scalar(bytes: &[u8]) -> Self {
        Item::Bytes(trim_leading_zeros(bytes).to_vec())
    }

    pub fn bytes(bytes: &[u8]) -> Self {
        Item::Bytes(bytes.to_vec())
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn encode_length(len: usize, offset: u8, out: &mut Vec<u8>) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let len_bytes = trim_leading_zeros(&(len as u64).to_be_bytes()).to_vec();
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
}

pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(item, &mut out);
    out
}

fn encode_into(item: &Item, out: &mut Vec<u8>) {
    match item {
        Item::Bytes(bytes) => {
            if bytes.len() == 1 && bytes[0] < 0x80 {
                out.push(bytes[0]);
            } else {
                encode_length(bytes.len(), 0x80, out);
                out.extend_from_slice(bytes);
            }
        }
        Item::List(items) => {
            let mut payload = Vec::new();
            for inner in items {
                encode_into(inner, &mut payload);
            }
            encode_length(payload.len(), 0xc0, out);
            out.extend_from_slice(&payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_canonical_examples() {
        assert_eq!(encode(&Item::bytes(b"dog")), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(encode(&Item::uint(0)), vec![0x80]);
        assert_eq!(encode(&Item::uint(15)), vec![0x0f]);
        assert_eq!(encode(&Item::uint(1024)), vec![0x82, 0x04, 0x00]);
        assert_eq!(encode(&Item::List(vec![])), vec![0xc0]);
        assert_eq!(
            encode(&Item::List(vec![Item::bytes(b"cat"), Item::bytes(b"dog")])),
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn test_encode_long_string() {
        let text = b"Lorem ipsum dolor sit amet, consectetur adipisicing elit";
        let encoded = encode(&Item::bytes(text));
        assert_eq!(&encoded[..2], &[0xb8, 0x38]);
        assert_eq!(&encoded[2..], &text[..]);
    }
}
