#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell quoting, masked command previews, variable expansion, naming.

pub mod expand;
pub mod id;

pub use expand::expand_vars;
pub use id::{container_name, container_user};

/// Placeholder rendered instead of a masked argument in any loggable representation.
pub const MASK: &str = "********";

/// Join arguments for logging, replacing every masked argument with [`MASK`].
///
/// Masks shorter than `args` leave the remaining arguments unmasked.
pub fn shell_join_masked(args: &[String], masks: &[bool]) -> String {
    args.iter()
        .enumerate()
        .map(|(i, a)| {
            if masks.get(i).copied().unwrap_or(false) {
                MASK.to_string()
            } else {
                shell_escape(a)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@+,".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

/// Minimal shell-like tokenizer supporting single and double quotes.
/// Does not support escapes; quotes preserve spaces.
pub fn shell_like_split_args(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for ch in s.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
            }
            '"' if !in_single => {
                in_double = !in_double;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() {
                    out.push(current.clone());
                    current.clear();
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_simple() {
        assert_eq!(shell_escape("abc-123_./:@"), "abc-123_./:@");
        assert_eq!(shell_escape("PATH=/bin"), "PATH=/bin");
    }

    #[test]
    fn test_shell_escape_with_spaces_and_quotes() {
        assert_eq!(shell_escape("a b c"), "'a b c'");
        assert_eq!(shell_escape("O'Reilly"), "'O'\"'\"'Reilly'");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_shell_join_masked_hides_only_masked_args() {
        let args = vec![
            "docker".to_string(),
            "--env".to_string(),
            "SECRET=x".to_string(),
            "--env".to_string(),
            "PATH=/bin".to_string(),
        ];
        let preview = shell_join_masked(&args, &[false, false, true]);
        assert_eq!(preview, "docker --env ******** --env PATH=/bin");
        assert!(!preview.contains("SECRET=x"));
    }

    #[test]
    fn test_shell_like_split_args_quotes_and_spaces() {
        assert_eq!(
            shell_like_split_args("  sleep   'a b'  \"c d\" "),
            vec!["sleep".to_string(), "a b".to_string(), "c d".to_string()]
        );
        assert!(shell_like_split_args("   ").is_empty());
    }
}
