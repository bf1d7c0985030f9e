/*!
Test support helpers shared across integration tests.

- FakeDocker: a `/bin/sh` stand-in for the container runtime that records every invocation
- write_config(dir, fake, extra): a build config pointing at the fake runtime

Behavior switches are marker files in the fake's directory (see FakeDocker::set).
*/

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const FAKE_CONTAINER_ID: &str = "cid123";
pub const FAKE_IMAGE_ID: &str = "sha256:feedbeef";

const SCRIPT: &str = r#"#!/bin/sh
DIR="__DIR__"
{ for a in "$@"; do printf '%s\037' "$a"; done; printf '\n'; } >> "$DIR/calls.log"
if [ "$1" = "-H" ]; then shift 2; fi
case "$1" in
  inspect)
    [ -f "$DIR/image_present" ] && exit 0
    exit 1 ;;
  pull)
    [ -f "$DIR/pull_fails" ] && exit 1
    echo "pulled $2"
    exit 0 ;;
  build)
    [ -f "$DIR/build_fails" ] && exit 1
    iid=""
    while [ $# -gt 0 ]; do
      if [ "$1" = "--iidfile" ]; then iid="$2"; fi
      shift
    done
    if [ -n "$iid" ] && [ ! -f "$DIR/iid_empty" ]; then
      printf 'sha256:feedbeef\n' > "$iid"
    fi
    echo "Successfully built 0123456789ab"
    exit 0 ;;
  run)
    for a in "$@"; do
      if [ "$a" = "route" ]; then
        [ -f "$DIR/route_fails" ] && exit 1
        echo "default via 172.17.0.1 dev eth0"
        exit 0
      fi
      [ "$a" = "/bin/true" ] && exit 0
    done
    [ -f "$DIR/run_fails" ] && exit 125
    echo "cid123"
    exit 0 ;;
  exec)
    last=""
    for a in "$@"; do last="$a"; done
    if [ "$last" = "env" ]; then
      printf 'PATH=/usr/local/bin:/usr/bin:/bin\r\nHOME=/root\r\nHOSTNAME=cid123\r\n'
      exit 0
    fi
    [ -f "$DIR/exec_killed" ] && kill -KILL $$
    [ -f "$DIR/exec_status" ] && exit "$(cat "$DIR/exec_status")"
    exit 0 ;;
  kill)
    [ -f "$DIR/kill_fails" ] && exit 1
    echo "$2"
    exit 0 ;;
  rm)
    [ -f "$DIR/rm_fails" ] && exit 1
    exit 0 ;;
  --version)
    echo "Docker version 99.0.0, build fake"
    exit 0 ;;
esac
exit 0
"#;

pub struct FakeDocker {
    pub dir: tempfile::TempDir,
    pub exe: PathBuf,
}

impl FakeDocker {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tmpdir");
        let exe = dir.path().join("docker");
        let script = SCRIPT.replace("__DIR__", &dir.path().display().to_string());
        fs::write(&exe, script).expect("write fake docker");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = fs::metadata(&exe).expect("meta").permissions();
            perm.set_mode(0o755);
            fs::set_permissions(&exe, perm).expect("chmod");
        }
        FakeDocker { dir, exe }
    }

    /// Turn on a behavior switch, e.g. `image_present`, `kill_fails`, `exec_status`.
    pub fn set(&self, marker: &str, content: &str) {
        fs::write(self.dir.path().join(marker), content).expect("write marker");
    }

    /// Turn a behavior switch back off.
    pub fn unset(&self, marker: &str) {
        let _ = fs::remove_file(self.dir.path().join(marker));
    }

    /// Every recorded invocation, argv without the program name.
    pub fn calls(&self) -> Vec<Vec<String>> {
        let text = fs::read_to_string(self.dir.path().join("calls.log")).unwrap_or_default();
        text.lines()
            .map(|l| {
                l.split('\u{1f}')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .collect()
    }

    /// Invocations whose subcommand (after any `-H <host>`) is `sub`.
    pub fn calls_of(&self, sub: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| subcommand(c) == Some(sub))
            .collect()
    }

    /// `run --detach` invocations, i.e. real container starts (not bridge probes).
    pub fn detached_runs(&self) -> Vec<Vec<String>> {
        self.calls_of("run")
            .into_iter()
            .filter(|c| c.iter().any(|a| a == "--detach"))
            .collect()
    }
}

pub fn subcommand(call: &[String]) -> Option<&str> {
    match call.first().map(String::as_str) {
        Some("-H") => call.get(2).map(String::as_str),
        other => other,
    }
}

/// Value following `flag` in `call`, for each occurrence.
pub fn flag_values<'a>(call: &'a [String], flag: &str) -> Vec<&'a str> {
    call.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .collect()
}

/// Write `docker-build-env.yml` in `dir` using the fake runtime; `extra` is appended verbatim.
pub fn write_config(dir: &Path, fake: &FakeDocker, extra: &str) -> PathBuf {
    let cfg = dir.join("docker-build-env.yml");
    let text = format!(
        "project: \"My Project!\"\n\
         build_number: 42\n\
         workspace: .\n\
         state_file: state/session.json\n\
         docker:\n  executable: {}\n\
         {extra}",
        fake.exe.display()
    );
    fs::write(&cfg, text).expect("write config");
    cfg
}
