//! Decoder for the legacy host serialization format (`a:1:{s:3:"key";i:5;}`).
//!
//! Older sites stored filter conditions in this format instead of JSON. Only
//! the value kinds a filter blob can contain are supported: null, bool, int,
//! float, string, array and plain object. Anything else is rejected.

use super::node::{FilterNode, Scalar};

/// Nesting bound; filter blobs are shallow, hostile input is not.
const MAX_DEPTH: usize = 256;

/// Decode a whole legacy blob. Returns `None` on any syntax error or trailing data.
pub fn decode(raw: &str) -> Option<FilterNode> {
    let mut parser = Parser {
        input: raw.as_bytes(),
        pos: 0,
    };
    let node = parser.value(0)?;
    parser.input[parser.pos..]
        .iter()
        .all(u8::is_ascii_whitespace)
        .then_some(node)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn value(&mut self, depth: usize) -> Option<FilterNode> {
        if depth > MAX_DEPTH {
            return None;
        }
        match self.bump()? {
            b'N' => {
                self.expect(b';')?;
                Some(FilterNode::Scalar(Scalar::Null))
            }
            b'b' => {
                self.expect(b':')?;
                match self.until(b';')? {
                    "0" => Some(FilterNode::Scalar(Scalar::Bool(false))),
                    "1" => Some(FilterNode::Scalar(Scalar::Bool(true))),
                    _ => None,
                }
            }
            b'i' => {
                self.expect(b':')?;
                let v = self.until(b';')?.parse::<i64>().ok()?;
                Some(FilterNode::Scalar(Scalar::Int(v)))
            }
            b'd' => {
                self.expect(b':')?;
                let v = self.until(b';')?.parse::<f64>().ok()?;
                Some(FilterNode::Scalar(Scalar::Float(v)))
            }
            b's' => {
                self.expect(b':')?;
                let text = self.quoted()?;
                self.expect(b';')?;
                Some(FilterNode::Scalar(Scalar::Text(text)))
            }
            b'a' => {
                self.expect(b':')?;
                self.entries(depth)
            }
            b'O' => {
                self.expect(b':')?;
                // Class name is irrelevant to filter extraction.
                self.quoted()?;
                self.expect(b':')?;
                self.entries(depth)
            }
            _ => None,
        }
    }

    /// `<count>:{<key><value>...}`
    fn entries(&mut self, depth: usize) -> Option<FilterNode> {
        let count = self.until(b':')?.parse::<usize>().ok()?;
        self.expect(b'{')?;
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let key = self.key()?;
            let value = self.value(depth + 1)?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        Some(FilterNode::Mapping(entries))
    }

    fn key(&mut self) -> Option<String> {
        match self.bump()? {
            b'i' => {
                self.expect(b':')?;
                let k = self.until(b';')?;
                k.parse::<i64>().ok().map(|v| v.to_string())
            }
            b's' => {
                self.expect(b':')?;
                let k = self.quoted()?;
                self.expect(b';')?;
                // Non-public object properties carry a "\0Class\0" or "\0*\0" prefix.
                Some(match k.rfind('\0') {
                    Some(idx) if k.starts_with('\0') => k[idx + 1..].to_string(),
                    _ => k,
                })
            }
            _ => None,
        }
    }

    /// `<byte length>:"<bytes>"`
    fn quoted(&mut self) -> Option<String> {
        let len = self.until(b':')?.parse::<usize>().ok()?;
        self.expect(b'"')?;
        let end = self.pos.checked_add(len)?;
        let bytes = self.input.get(self.pos..end)?;
        self.pos = end;
        self.expect(b'"')?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn bump(&mut self) -> Option<u8> {
        let b = *self.input.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn expect(&mut self, want: u8) -> Option<()> {
        (self.bump()? == want).then_some(())
    }

    /// Text up to (not including) `stop`; consumes `stop`.
    fn until(&mut self, stop: u8) -> Option<&str> {
        let rest = self.input.get(self.pos..)?;
        let offset = rest.iter().position(|b| *b == stop)?;
        let text = std::str::from_utf8(&rest[..offset]).ok()?;
        self.pos += offset + 1;
        Some(text)
    }
}
