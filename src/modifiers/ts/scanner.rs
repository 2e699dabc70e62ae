//! Lightweight structural scanner for JS/TS sources.
//!
//! The transforms in this family never need a full syntax tree; they need to
//! know which bytes are *code* as opposed to comments, string literals,
//! template literals and regex literals, and they need balanced-delimiter
//! matching over those code bytes. The mask produced here is what keeps an
//! `import` inside a template literal or a `{children}` inside a comment
//! from being treated as structure.

/// Returns a per-byte mask where `true` marks executable code. String,
/// template and regex literal *interiors* and all comment bytes are `false`;
/// template interpolation bodies (`${...}`) are code again.
pub fn code_mask(src: &str) -> Vec<bool> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        Line,
        Block,
        Single,
        Double,
        Template,
        Regex { in_class: bool },
    }

    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut mask = vec![false; len];
    let mut state = State::Code;
    // brace depth of the surrounding code; template interpolations record
    // the depth at which they opened so the closing `}` can be recognized
    let mut brace_depth = 0usize;
    let mut interp_stack: Vec<usize> = Vec::new();
    // last significant code byte, used to decide `/` = regex vs division
    let mut prev_code: u8 = 0;

    let mut i = 0;
    while i < len {
        let b = bytes[i];
        match state {
            State::Code => match b {
                b'/' if i + 1 < len && bytes[i + 1] == b'/' => {
                    state = State::Line;
                    i += 2;
                    continue;
                }
                b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                    state = State::Block;
                    i += 2;
                    continue;
                }
                b'/' if regex_can_start(prev_code) => {
                    state = State::Regex { in_class: false };
                }
                b'\'' => state = State::Single,
                b'"' => state = State::Double,
                b'`' => state = State::Template,
                _ => {
                    if b == b'}' && interp_stack.last() == Some(&brace_depth) {
                        interp_stack.pop();
                        state = State::Template;
                        i += 1;
                        continue;
                    }
                    mask[i] = true;
                    match b {
                        b'{' => brace_depth += 1,
                        b'}' => brace_depth = brace_depth.saturating_sub(1),
                        _ => {}
                    }
                    if !b.is_ascii_whitespace() {
                        prev_code = b;
                    }
                }
            },
            State::Line => {
                if b == b'\n' {
                    state = State::Code;
                }
            }
            State::Block => {
                if b == b'*' && i + 1 < len && bytes[i + 1] == b'/' {
                    state = State::Code;
                    i += 2;
                    continue;
                }
            }
            State::Single | State::Double => {
                let quote = if state == State::Single { b'\'' } else { b'"' };
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == quote || b == b'\n' {
                    state = State::Code;
                    prev_code = quote;
                }
            }
            State::Template => {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == b'`' {
                    state = State::Code;
                    prev_code = b'`';
                } else if b == b'$' && i + 1 < len && bytes[i + 1] == b'{' {
                    interp_stack.push(brace_depth);
                    state = State::Code;
                    i += 2;
                    continue;
                }
            }
            State::Regex { in_class } => {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                match b {
                    b'[' => state = State::Regex { in_class: true },
                    b']' if in_class => state = State::Regex { in_class: false },
                    b'/' if !in_class => {
                        state = State::Code;
                        // a literal value just ended; `/` after it divides
                        prev_code = b'0';
                    }
                    b'\n' => {
                        // unterminated; bail back to code to stay robust
                        state = State::Code;
                    }
                    _ => {}
                }
            }
        }
        i += 1;
    }
    mask
}

/// Whether a `/` following this byte starts a regex literal rather than a
/// division. Values and identifiers divide; operators and openers do not.
/// `<` is excluded so JSX closing tags (`</body>`) never read as regexes.
fn regex_can_start(prev: u8) -> bool {
    !matches!(prev, b')' | b']' | b'}' | b'<')
        && !prev.is_ascii_alphanumeric()
        && prev != b'_'
        && prev != b'$'
        && prev != b'"'
        && prev != b'\''
        && prev != b'`'
}

pub fn is_code(mask: &[bool], idx: usize) -> bool {
    mask.get(idx).copied().unwrap_or(false)
}

/// Next occurrence of `pat` at or after `from` whose first byte is code.
pub fn find_code(src: &str, mask: &[bool], pat: &str, from: usize) -> Option<usize> {
    let mut offset = from;
    while offset <= src.len() {
        let found = src[offset..].find(pat)? + offset;
        if is_code(mask, found) {
            return Some(found);
        }
        offset = found + 1;
    }
    None
}

/// Index of the delimiter matching the opener at `open` (`{`, `(` or `[`),
/// honoring the code mask.
pub fn find_matching(src: &str, mask: &[bool], open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let open_byte = *bytes.get(open)?;
    let close_byte = match open_byte {
        b'{' => b'}',
        b'(' => b')',
        b'[' => b']',
        _ => return None,
    };
    if !is_code(mask, open) {
        return None;
    }
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if !is_code(mask, i) {
            continue;
        }
        if b == open_byte {
            depth += 1;
        } else if b == close_byte {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Byte offset right after the directive prologue: an optional shebang,
/// leading comments/blank lines and string directives such as
/// `'use client';`. New imports are inserted here when the file has none.
pub fn prologue_end(src: &str, mask: &[bool]) -> usize {
    let mut offset = 0;
    if src.starts_with("#!") {
        offset = src[offset..].find('\n').map(|i| offset + i + 1).unwrap_or(src.len());
    }
    loop {
        let rest = &src[offset..];
        let Some(line_len) = rest.find('\n').map(|i| i + 1).or_else(|| {
            if rest.is_empty() {
                None
            } else {
                Some(rest.len())
            }
        }) else {
            return offset;
        };
        let line = &rest[..line_len];
        let trimmed = line.trim();
        let comment_only = !trimmed.is_empty()
            && (offset..offset + line_len)
                .all(|i| !is_code(mask, i) || src.as_bytes()[i].is_ascii_whitespace());
        let directive = (trimmed.starts_with('\'') || trimmed.starts_with('"'))
            && trimmed.trim_end_matches(';').len() >= 2
            && {
                let inner = trimmed.trim_end_matches(';');
                inner.ends_with(inner.chars().next().unwrap_or('\''))
            };
        if trimmed.is_empty() || comment_only || directive {
            offset += line_len;
            if offset >= src.len() {
                return offset;
            }
        } else {
            return offset;
        }
    }
}

/// The dominant string quote in the file, used when synthesizing imports.
pub fn preferred_quote(src: &str) -> char {
    let singles = src.matches("from '").count() + src.matches("import '").count();
    let doubles = src.matches("from \"").count() + src.matches("import \"").count();
    if doubles > singles {
        '"'
    } else {
        '\''
    }
}
