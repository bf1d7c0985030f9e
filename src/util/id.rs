#[cfg(unix)]
use nix::unistd::{getgid, getuid};

/// Container name for a build: `<project>-<number>` with every character outside
/// `[A-Za-z0-9_.-]` in the project name replaced by `_`.
pub fn container_name(project: &str, build_number: u64) -> String {
    let sanitized: String = project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}-{build_number}")
}

/// Effective `uid:gid` for processes run inside the container.
///
/// The uid always comes from the host; a non-empty `group` override replaces the host gid.
pub fn container_user(group: Option<&str>) -> String {
    #[cfg(unix)]
    let (uid, gid) = (u32::from(getuid()), u32::from(getgid()));
    #[cfg(not(unix))]
    let (uid, gid) = (0u32, 0u32);

    match group.map(str::trim).filter(|g| !g.is_empty()) {
        Some(g) => format!("{uid}:{g}"),
        None => format!("{uid}:{gid}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_sanitizes_project() {
        assert_eq!(container_name("My Project!", 42), "My_Project_-42");
        assert_eq!(container_name("team/app.v2_x-y", 7), "team_app.v2_x-y-7");
    }

    #[test]
    fn test_container_user_group_override() {
        let user = container_user(Some("docker"));
        assert!(user.ends_with(":docker"), "got {user}");
        let user = container_user(Some("  "));
        let parts: Vec<&str> = user.split(':').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[1].parse::<u32>().is_ok(), "got {user}");
    }
}
