//! Minimal XML extraction for the EC2/IAM query responses.
//!
//! The query APIs return small, flat documents; rather than pull in a
//! full parser this walks tag boundaries directly. Nesting of a tag
//! inside itself is handled by depth counting, which matters for the
//! IAM shapes where `<member>` lists contain further `<member>` lists.

/// Locate the next opening `<tag ...>` at or after `from`.
///
/// Returns the match offset, the offset just past the `>`, and whether
/// the element was self-closing. A match is only accepted when the tag
/// name ends at a delimiter, so `<item>` never matches `<itemSet>`.
fn next_open(xml: &str, from: usize, tag: &str) -> Option<(usize, usize, bool)> {
    let prefix = format!("<{tag}");
    let mut search = from;
    while let Some(rel) = xml[search..].find(&prefix) {
        let at = search + rel;
        let rest = &xml[at + prefix.len()..];
        match rest.chars().next() {
            Some('>') => return Some((at, at + prefix.len() + 1, false)),
            Some(c) if c.is_ascii_whitespace() || c == '/' => {
                let close_rel = rest.find('>')?;
                let gt = at + prefix.len() + close_rel;
                let self_closing = xml[..gt].ends_with('/');
                return Some((at, gt + 1, self_closing));
            }
            _ => search = at + prefix.len(),
        }
    }
    None
}

/// Inner content of every `<tag>...</tag>` element, in document order.
///
/// Matches at any depth of the document, but the content of a matched
/// element is skipped over as a whole, so nested same-name elements are
/// returned inside their parent's slice rather than as separate hits.
pub fn blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some((_, content_start, self_closing)) = next_open(xml, cursor, tag) {
        if self_closing {
            out.push(&xml[content_start..content_start]);
            cursor = content_start;
            continue;
        }
        let mut depth = 1usize;
        let mut scan = content_start;
        let mut content_end = None;
        while depth > 0 {
            let open = next_open(xml, scan, tag);
            let close_rel = xml[scan..].find(&close);
            match (open, close_rel) {
                (Some((o_start, o_after, o_self)), Some(c_rel)) if o_start < scan + c_rel => {
                    if !o_self {
                        depth += 1;
                    }
                    scan = o_after;
                }
                (_, Some(c_rel)) => {
                    depth -= 1;
                    if depth == 0 {
                        content_end = Some(scan + c_rel);
                    }
                    scan = scan + c_rel + close.len();
                }
                (_, None) => break,
            }
        }
        match content_end {
            Some(end) => {
                out.push(&xml[content_start..end]);
                cursor = end + close.len();
            }
            None => break,
        }
    }
    out
}

/// Unescaped text of the first `<tag>` element, if any.
pub fn first_text(xml: &str, tag: &str) -> Option<String> {
    blocks(xml, tag).first().map(|b| unescape(b.trim()))
}

/// Unescaped text of every `<tag>` element.
pub fn texts(xml: &str, tag: &str) -> Vec<String> {
    blocks(xml, tag).iter().map(|b| unescape(b.trim())).collect()
}

/// Resolve the five predefined entities; anything else passes through.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        let tail = &rest[at..];
        let (replacement, consumed) = if tail.starts_with("&lt;") {
            ("<", 4)
        } else if tail.starts_with("&gt;") {
            (">", 4)
        } else if tail.starts_with("&amp;") {
            ("&", 5)
        } else if tail.starts_with("&quot;") {
            ("\"", 6)
        } else if tail.starts_with("&apos;") {
            ("'", 6)
        } else {
            ("&", 1)
        };
        out.push_str(replacement);
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}
