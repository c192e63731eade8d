//! JavaScript regular expressions run on the `regex` crate.
use regex::Regex;
use regex::RegexBuilder;

#[derive(Clone, Debug)]
pub struct JsRegex {
  pub source: String,
  pub flags: String,
  regex: Regex,
}

impl JsRegex {
  /// Compiles `source` with JavaScript `flags`. `None` for the sticky flag, unknown flags, and
  /// syntax the `regex` crate does not support (backreferences, lookaround).
  pub fn new(source: &str, flags: &str) -> Option<JsRegex> {
    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
      match flag {
        'd' | 'g' | 'u' => {}
        'i' => {
          builder.case_insensitive(true);
        }
        'm' => {
          builder.multi_line(true);
        }
        's' => {
          builder.dot_matches_new_line(true);
        }
        _ => return None,
      };
    }
    let regex = builder.build().ok()?;
    Some(JsRegex {
      source: source.to_string(),
      flags: flags.to_string(),
      regex,
    })
  }

  /// Parses the text of a literal such as `/a+/gi`.
  pub fn from_literal(text: &str) -> Option<JsRegex> {
    let body = text.strip_prefix('/')?;
    let end = body.rfind('/')?;
    JsRegex::new(&body[..end], &body[end + 1..])
  }

  /// A pattern matching `needle` literally, as `replace` does with a string pattern.
  pub fn literal(needle: &str) -> Option<JsRegex> {
    JsRegex::new(&regex::escape(needle), "")
  }

  pub fn to_literal(&self) -> String {
    format!("/{}/{}", self.source, self.flags)
  }

  pub fn is_global(&self) -> bool {
    self.flags.contains('g')
  }

  /// `String.prototype.replace`: the first match, or every match for a global pattern.
  pub fn replace(&self, haystack: &str, replacement: &str) -> Option<String> {
    let template = replacement_template(replacement, self.regex.captures_len() - 1)?;
    let limit = if self.is_global() { 0 } else { 1 };
    Some(
      self
        .regex
        .replacen(haystack, limit, template.as_str())
        .into_owned(),
    )
  }

  /// `RegExp.prototype.test`. Global patterns advance `lastIndex` between calls, which is not
  /// tracked, so their result is unknown.
  pub fn test(&self, haystack: &str) -> Option<bool> {
    if self.is_global() {
      return None;
    };
    Some(self.regex.is_match(haystack))
  }
}

/// Rewrites a JavaScript replacement string into `regex` replacement syntax. `$n`/`$nn` refer to
/// a group only when that group exists, otherwise they are literal text. `None` for the
/// `` $` ``, `$'` and `$<name>` forms.
pub fn replacement_template(replacement: &str, groups: usize) -> Option<String> {
  let chars: Vec<char> = replacement.chars().collect();
  let mut out = String::with_capacity(replacement.len());
  let mut i = 0;
  while i < chars.len() {
    let ch = chars[i];
    i += 1;
    if ch != '$' {
      out.push(ch);
      continue;
    };
    match chars.get(i) {
      Some('$') => {
        out.push_str("$$");
        i += 1;
      }
      Some('&') => {
        out.push_str("${0}");
        i += 1;
      }
      Some('`' | '\'' | '<') => return None,
      Some(c) if c.is_ascii_digit() => {
        let one = *c as usize - '0' as usize;
        let two = chars
          .get(i + 1)
          .and_then(|c| c.to_digit(10))
          .map(|d| one * 10 + d as usize);
        match two {
          Some(n) if (1..=groups).contains(&n) => {
            out.push_str(&format!("${{{n}}}"));
            i += 2;
          }
          _ if (1..=groups).contains(&one) => {
            out.push_str(&format!("${{{one}}}"));
            i += 1;
          }
          _ => out.push_str("$$"),
        };
      }
      _ => out.push_str("$$"),
    };
  }
  Some(out)
}
