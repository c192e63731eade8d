/// Decodes the escape sequences of a string literal or template chunk (delimiters already
/// stripped). Malformed escapes are kept verbatim.
pub fn decode_literal(raw: &str) -> String {
  if !raw.contains('\\') {
    return raw.to_string();
  };
  let mut out = String::with_capacity(raw.len());
  let mut rest = raw;
  while let Some(pos) = rest.find('\\') {
    out.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];
    match decode_escape_sequence(after) {
      Some((consumed, ch)) => {
        if let Some(ch) = ch {
          out.push(ch);
        };
        rest = &after[consumed..];
      }
      None => {
        out.push('\\');
        rest = after;
      }
    };
  }
  out.push_str(rest);
  out
}

fn hex_digits(raw: &str, n: usize) -> Option<u32> {
  let digits = raw.get(..n)?;
  if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
    return None;
  };
  u32::from_str_radix(digits, 16).ok()
}

/// Returns the number of bytes consumed after the backslash and the decoded character, which
/// is `None` for line continuations.
fn decode_escape_sequence(raw: &str) -> Option<(usize, Option<char>)> {
  let first = raw.chars().next()?;
  let res = match first {
    '\r' => {
      if raw[1..].starts_with('\n') {
        (2, None)
      } else {
        (1, None)
      }
    }
    '\n' | '\u{2028}' | '\u{2029}' => (first.len_utf8(), None),
    'b' => (1, Some('\x08')),
    'f' => (1, Some('\x0c')),
    'n' => (1, Some('\n')),
    'r' => (1, Some('\r')),
    't' => (1, Some('\t')),
    'v' => (1, Some('\x0b')),
    '0'..='7' => {
      let mut consumed = 1;
      let mut value = first.to_digit(8)?;
      for ch in raw[1..].chars().take(2) {
        match ch.to_digit(8) {
          Some(d) if value * 8 + d <= 0xff => {
            value = value * 8 + d;
            consumed += 1;
          }
          _ => break,
        };
      }
      (consumed, Some(char::from_u32(value)?))
    }
    'x' => (3, Some(char::from_u32(hex_digits(&raw[1..], 2)?)?)),
    'u' => {
      let after_u = &raw[1..];
      if let Some(braced) = after_u.strip_prefix('{') {
        let end = braced.find('}')?;
        let cp = u32::from_str_radix(&braced[..end], 16).ok()?;
        (end + 3, Some(char::from_u32(cp)?))
      } else {
        let unit = hex_digits(after_u, 4)?;
        if (0xd800..0xdc00).contains(&unit) {
          // A high surrogate only forms a character together with an escaped low surrogate.
          let low = after_u[4..]
            .strip_prefix("\\u")
            .and_then(|r| hex_digits(r, 4))
            .filter(|low| (0xdc00..0xe000).contains(low));
          match low {
            Some(low) => {
              let cp = 0x10000 + ((unit - 0xd800) << 10) + (low - 0xdc00);
              (11, Some(char::from_u32(cp)?))
            }
            None => (5, Some('\u{FFFD}')),
          }
        } else if (0xdc00..0xe000).contains(&unit) {
          (5, Some('\u{FFFD}'))
        } else {
          (5, Some(char::from_u32(unit)?))
        }
      }
    }
    c => (c.len_utf8(), Some(c)),
  };
  Some(res)
}

#[cfg(test)]
mod tests {
  use super::decode_literal;

  #[test]
  fn decodes_escapes() {
    assert_eq!(decode_literal(r"plain"), "plain");
    assert_eq!(decode_literal(r"a\nb"), "a\nb");
    assert_eq!(decode_literal(r"\x41B\u{43}"), "ABC");
    assert_eq!(decode_literal(r"\'\\"), "'\\");
    assert_eq!(decode_literal(r"\101"), "A");
    assert_eq!(decode_literal(r"😀"), "😀");
    assert_eq!(decode_literal("a\\\nb"), "ab");
    assert_eq!(decode_literal(r"\xZZ"), r"\xZZ");
  }
}
