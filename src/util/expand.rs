//! `$VAR` / `${VAR}` expansion against a variable lookup.
//!
//! Unknown references are left verbatim so that shell-level variables survive into the
//! container command line. `$$` is not special.

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand `$NAME` and `${NAME}` references in `s` using `lookup`.
pub fn expand_vars<F>(s: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' || i + 1 >= chars.len() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if chars[i + 1] == '{' {
            if let Some(rel) = chars[i + 2..].iter().position(|c| *c == '}') {
                let name: String = chars[i + 2..i + 2 + rel].iter().collect();
                let end = i + 2 + rel + 1;
                match lookup(&name) {
                    Some(v) if !name.is_empty() => out.push_str(&v),
                    _ => out.extend(&chars[i..end]),
                }
                i = end;
                continue;
            }
            out.push('$');
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < chars.len() && is_var_char(chars[end]) {
            end += 1;
        }
        if end == start {
            out.push('$');
            i += 1;
            continue;
        }
        let name: String = chars[start..end].iter().collect();
        match lookup(&name) {
            Some(v) => out.push_str(&v),
            None => out.extend(&chars[i..end]),
        }
        i = end;
    }
    out
}
