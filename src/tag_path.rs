//! Tag-name parsing and IOI (EPATH) encoding.
//!
//! A tag expression is a dotted path of symbolic segments, where the last
//! segment may carry an array subscript (`MyArr[3]`) or be a plain decimal
//! bit index (`Flags.15`). The IOI builder compiles such an expression into
//! the CIP request-path byte sequence: ANSI extended symbolic segments
//! (`0x91`), padded to even length, followed by 8/16/32-bit element
//! segments (`0x28`/`0x29`/`0x2A`) for subscripts. Terminal bit indices
//! emit no path bytes; they are handled by the read/write framing.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{EtherNetIpError, Result};

lazy_static! {
    /// Accepts plain identifiers plus the `Program:<name>` scope form.
    static ref SEGMENT_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(:[A-Za-z_][A-Za-z0-9_]*)?$").unwrap();
}

/// A parsed tag expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag {
    /// The expression exactly as supplied.
    pub full: String,
    /// The expression with any trailing `[i]` subscript or terminal bit
    /// index stripped. This is the key under which the tag's data type is
    /// cached.
    pub base: String,
    /// Trailing array subscript or bit index; 0 when neither is present.
    pub index: u32,
}

fn tag_error(tag: &str, reason: impl Into<String>) -> EtherNetIpError {
    EtherNetIpError::Tag {
        tag: tag.to_string(),
        reason: reason.into(),
    }
}

/// Splits a trailing-subscript segment (`name[idx]`) into its name and
/// index. Multi-dimensional subscripts (`[i,j]`) are rejected: their path
/// encoding is unconfirmed and guessing would address the wrong element.
fn parse_subscript<'a>(tag: &str, segment: &'a str) -> Result<(&'a str, u32)> {
    let open = segment
        .rfind('[')
        .ok_or_else(|| tag_error(tag, "unmatched ']'"))?;
    let name = &segment[..open];
    let inside = &segment[open + 1..segment.len() - 1];
    if inside.contains(',') {
        return Err(tag_error(
            tag,
            "multi-dimensional subscripts are not supported",
        ));
    }
    let index = inside
        .parse::<u32>()
        .map_err(|_| tag_error(tag, format!("invalid array subscript '[{}]'", inside)))?;
    Ok((name, index))
}

/// Parses a tag expression into `(full, base, index)`.
///
/// - `MyArr[3]` → base `MyArr`, index 3
/// - `Program:MainProgram.first.1` → base `Program:MainProgram.first`, index 1
/// - `Program:MainProgram.sint` → base is the full expression, index 0
pub fn parse(tag: &str) -> Result<ParsedTag> {
    if tag.is_empty() {
        return Err(tag_error(tag, "empty tag"));
    }

    if tag.ends_with(']') {
        let open = tag.rfind('[').ok_or_else(|| tag_error(tag, "unmatched ']'"))?;
        let inside = &tag[open + 1..tag.len() - 1];
        if inside.contains(',') {
            return Err(tag_error(
                tag,
                "multi-dimensional subscripts are not supported",
            ));
        }
        let index = inside
            .parse::<u32>()
            .map_err(|_| tag_error(tag, format!("invalid array subscript '[{}]'", inside)))?;
        let base = &tag[..open];
        if base.is_empty() {
            return Err(tag_error(tag, "subscript without a tag name"));
        }
        return Ok(ParsedTag {
            full: tag.to_string(),
            base: base.to_string(),
            index,
        });
    }

    if let Some(bit) = bit_index(tag) {
        let cut = tag.rfind('.').unwrap();
        let base = &tag[..cut];
        if base.is_empty() {
            return Err(tag_error(tag, "bit index without a tag name"));
        }
        return Ok(ParsedTag {
            full: tag.to_string(),
            base: base.to_string(),
            index: u32::from(bit),
        });
    }

    Ok(ParsedTag {
        full: tag.to_string(),
        base: tag.to_string(),
        index: 0,
    })
}

/// Returns the terminal bit index, if the expression ends in one.
///
/// The final dotted segment is a bit index when it parses as a decimal
/// integer in the signed 8-bit range; subscripted expressions never carry
/// one.
pub fn bit_index(tag: &str) -> Option<u8> {
    if tag.ends_with(']') {
        return None;
    }
    let last = tag.rsplit('.').next()?;
    if last.len() == tag.len() {
        // Single-segment expressions have no bit position to strip.
        return None;
    }
    match last.parse::<i8>() {
        Ok(v) if v >= 0 => Some(v as u8),
        _ => None,
    }
}

fn push_symbolic(path: &mut Vec<u8>, tag: &str, name: &str) -> Result<()> {
    if !SEGMENT_NAME.is_match(name) {
        return Err(tag_error(tag, format!("invalid segment name '{}'", name)));
    }
    if name.len() > u8::MAX as usize {
        return Err(tag_error(tag, format!("segment name too long: '{}'", name)));
    }
    path.push(0x91);
    path.push(name.len() as u8);
    path.extend_from_slice(name.as_bytes());
    if name.len() % 2 != 0 {
        path.push(0x00);
    }
    Ok(())
}

fn push_element(path: &mut Vec<u8>, index: u32) {
    if index < 256 {
        path.push(0x28);
        path.push(index as u8);
    } else if index < 65_536 {
        path.push(0x29);
        path.push(0x00);
        path.extend_from_slice(&(index as u16).to_le_bytes());
    } else {
        path.push(0x2A);
        path.push(0x00);
        path.extend_from_slice(&index.to_le_bytes());
    }
}

/// Compiles a tag expression into its IOI byte sequence.
///
/// With `bool_array` set, a subscript on the terminal segment is
/// floor-divided by 32 before encoding: DWORD bit-array elements pack 32
/// bits each, so the path must address the containing word.
pub fn build_ioi(tag: &str, bool_array: bool) -> Result<Vec<u8>> {
    let mut path = Vec::with_capacity(tag.len() + 8);
    let segments: Vec<&str> = tag.split('.').collect();
    let last = segments.len() - 1;

    for (i, segment) in segments.iter().enumerate() {
        if segment.ends_with(']') {
            let (name, mut index) = parse_subscript(tag, segment)?;
            if bool_array && i == last {
                index /= 32;
            }
            push_symbolic(&mut path, tag, name)?;
            push_element(&mut path, index);
        } else if segment.parse::<i8>().map(|v| v >= 0).unwrap_or(false) {
            // Terminal bit index: no path bytes, handled by the framer.
            if i != last {
                return Err(tag_error(
                    tag,
                    format!("numeric segment '{}' is only valid in last position", segment),
                ));
            }
        } else {
            push_symbolic(&mut path, tag, segment)?;
        }
    }

    if path.is_empty() {
        return Err(tag_error(tag, "expression contains no addressable segment"));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks an IOI byte sequence back into a dotted expression so the
    /// encoder can be checked by round-trip.
    fn decode_ioi(mut path: &[u8]) -> String {
        let mut parts: Vec<String> = Vec::new();
        while !path.is_empty() {
            match path[0] {
                0x91 => {
                    let len = path[1] as usize;
                    let name = std::str::from_utf8(&path[2..2 + len]).unwrap().to_string();
                    parts.push(name);
                    let consumed = 2 + len + (len % 2);
                    path = &path[consumed..];
                }
                0x28 => {
                    let last = parts.last_mut().unwrap();
                    last.push_str(&format!("[{}]", path[1]));
                    path = &path[2..];
                }
                0x29 => {
                    let idx = u16::from_le_bytes([path[2], path[3]]);
                    let last = parts.last_mut().unwrap();
                    last.push_str(&format!("[{}]", idx));
                    path = &path[4..];
                }
                0x2A => {
                    let idx = u32::from_le_bytes([path[2], path[3], path[4], path[5]]);
                    let last = parts.last_mut().unwrap();
                    last.push_str(&format!("[{}]", idx));
                    path = &path[6..];
                }
                other => panic!("unexpected segment byte 0x{:02X}", other),
            }
        }
        parts.join(".")
    }

    #[test]
    fn test_parse_plain_and_scoped_names() {
        let p = parse("Program:MainProgram.first").unwrap();
        assert_eq!(p.full, "Program:MainProgram.first");
        assert_eq!(p.base, "Program:MainProgram.first");
        assert_eq!(p.index, 0);
    }

    #[test]
    fn test_parse_subscript() {
        let p = parse("MyArr[3]").unwrap();
        assert_eq!(p.base, "MyArr");
        assert_eq!(p.index, 3);

        let p = parse("A.B[65536]").unwrap();
        assert_eq!(p.base, "A.B");
        assert_eq!(p.index, 65_536);
    }

    #[test]
    fn test_parse_bit_index() {
        let p = parse("Flags.15").unwrap();
        assert_eq!(p.base, "Flags");
        assert_eq!(p.index, 15);

        let p = parse("Program:MainProgram.first.1").unwrap();
        assert_eq!(p.base, "Program:MainProgram.first");
        assert_eq!(p.index, 1);
    }

    #[test]
    fn test_bit_index_bounds() {
        // 127 is the last value inside the signed 8-bit range.
        assert_eq!(bit_index("T.127"), Some(127));
        assert_eq!(bit_index("T.0"), Some(0));
        assert_eq!(bit_index("T.128"), None);
        assert_eq!(bit_index("T.x"), None);
        assert_eq!(bit_index("T[3]"), None);
        assert_eq!(bit_index("15"), None);
    }

    #[test]
    fn test_multi_dimensional_subscripts_are_rejected() {
        let err = parse("MyArr[3,4]").unwrap_err();
        assert!(err.to_string().contains("multi-dimensional"));
        assert!(build_ioi("MyArr[3,4]", false).is_err());
    }

    #[test]
    fn test_ioi_symbolic_padding() {
        // Odd-length names get a trailing pad byte; even-length names do not.
        let path = build_ioi("Motor", false).unwrap();
        assert_eq!(path, vec![0x91, 5, b'M', b'o', b't', b'o', b'r', 0x00]);

        let path = build_ioi("Pump", false).unwrap();
        assert_eq!(path, vec![0x91, 4, b'P', b'u', b'm', b'p']);
        assert_eq!(path.len() % 2, 0);
    }

    #[test]
    fn test_ioi_element_segment_widths() {
        let path = build_ioi("A[0]", false).unwrap();
        assert_eq!(&path[4..], &[0x28, 0x00]);

        let path = build_ioi("A[255]", false).unwrap();
        assert_eq!(&path[4..], &[0x28, 0xFF]);

        let path = build_ioi("A[256]", false).unwrap();
        assert_eq!(&path[4..], &[0x29, 0x00, 0x00, 0x01]);

        let path = build_ioi("A[65536]", false).unwrap();
        assert_eq!(&path[4..], &[0x2A, 0x00, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_ioi_round_trip_reference_set() {
        for tag in [
            "A",
            "A.B",
            "A[0]",
            "A[255]",
            "A[256]",
            "A[65536]",
            "Program:P.X.Y[3]",
        ] {
            let path = build_ioi(tag, false).unwrap();
            assert_eq!(path.len() % 2, 0, "odd path length for {}", tag);
            assert_eq!(decode_ioi(&path), tag, "round trip failed for {}", tag);
        }
    }

    #[test]
    fn test_ioi_skips_terminal_bit_index() {
        // `Flags.15` addresses the word `Flags`; the bit lives in the framer.
        assert_eq!(
            build_ioi("Flags.15", false).unwrap(),
            build_ioi("Flags", false).unwrap()
        );
    }

    #[test]
    fn test_ioi_bool_array_divides_terminal_subscript() {
        let direct = build_ioi("Bits[65]", true).unwrap();
        let expected = build_ioi("Bits[2]", false).unwrap();
        assert_eq!(direct, expected);

        // Only the terminal segment is affected.
        let nested = build_ioi("S[65].Bits[65]", true).unwrap();
        let expected = {
            let mut p = build_ioi("S[65]", false).unwrap();
            p.extend_from_slice(&build_ioi("Bits[2]", false).unwrap());
            p
        };
        assert_eq!(nested, expected);
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(parse("").is_err());
        assert!(parse("[3]").is_err());
        assert!(build_ioi("a..b", false).is_err());
        assert!(build_ioi("3.Tag", false).is_err());
        assert!(build_ioi("Bad-Name", false).is_err());
        assert!(build_ioi("5", false).is_err());
    }
}
