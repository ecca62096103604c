//! Sans-IO encoding primitives for the tabular document sections.
//!
//! Attribute maps are linearized as `name<value>` groups concatenated with no
//! separator. Values are escaped with a compact scheme that is deliberately
//! distinct from (and incompatible with) XML escaping: `&lt;`, `&gt;`,
//! `&quot;`, `&amp;`, and `&x<hex>;` for control characters.

/// Escape an attribute value for embedding in a `name<value>` group.
///
/// Angle brackets, quotes and ampersands become named escapes; control
/// characters become `&x<hex>;`.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    escape_into(&mut out, value);
    out
}

/// Escape `value` and append it to `out`.
pub fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '&' => out.push_str("&amp;"),
            c if (c as u32) < 0x20 => {
                out.push_str("&x");
                out.push_str(&format!("{:X}", c as u32));
                out.push(';');
            }
            c => out.push(c),
        }
    }
}

/// Reverse [escape].
///
/// Unknown or truncated escapes pass through literally. Any
/// `&x<hex>;`-shaped substring is resolved as an escape, even if the
/// producer meant it literally; [escape] always encodes `&` as `&amp;`, so
/// values round-trip, but foreign pre-escaped data keeps the historical
/// ambiguity of the format.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match parse_escape(tail) {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse one escape at the start of `s` (which begins with `&`). Returns the
/// decoded character and the byte length consumed.
fn parse_escape(s: &str) -> Option<(char, usize)> {
    let semi = s.find(';')?;
    let body = &s[1..semi];
    let c = match body {
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "amp" => '&',
        _ => {
            let hex = body.strip_prefix('x')?;
            let code = u32::from_str_radix(hex, 16).ok()?;
            char::from_u32(code)?
        }
    };
    Some((c, semi + 1))
}

/// Linearize attribute name/value pairs into a single `name<value>` string.
pub fn linearize<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (name, value) in pairs {
        out.push_str(name);
        out.push('<');
        escape_into(&mut out, value);
        out.push('>');
    }
    out
}

/// Parse a linearized `name<value>` string back into pairs.
///
/// A truncated trailing group (no closing `>`) is dropped; groups with an
/// empty name are skipped.
pub fn parse_linearized(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(lt) = rest.find('<') {
        let name = &rest[..lt];
        let tail = &rest[lt + 1..];
        let Some(gt) = tail.find('>') else {
            break;
        };
        if !name.is_empty() {
            out.push((name.to_string(), unescape(&tail[..gt])));
        }
        rest = &tail[gt + 1..];
    }
    out
}

/// Hex-encode a glyph bitmap for a font table cell.
pub fn encode_glyph(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a hex glyph bitmap cell. Returns `None` for malformed hex.
pub fn decode_glyph(s: &str) -> Option<Vec<u8>> {
    hex::decode(s).ok()
}
