use nix::unistd::close;
use psh_types::{RedirectKind, ShellError};
use std::fs::{File, OpenOptions};
use std::os::unix::io::{IntoRawFd, RawFd};
use tracing::debug;

/// The descriptors a stage's textual redirections resolved to. `None` means
/// "inherit from the pipeline wiring" for that direction.
///
/// The resolver transfers raw-descriptor ownership to the caller; `close_all`
/// releases whatever was opened when the pipeline aborts before spawning.
#[derive(Debug, Default)]
pub struct StageIo {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
}

impl StageIo {
    pub fn close_all(&mut self) {
        if let Some(fd) = self.stdin.take() {
            close(fd).ok();
        }
        if let Some(fd) = self.stdout.take() {
            close(fd).ok();
        }
    }
}

fn is_operator(token: &str) -> bool {
    matches!(token, "<" | ">" | "|" | "&")
}

/// Scans one stage's token vector for `<`/`>`, opens the target files, and
/// strips the redirection tokens so the exec call never sees them.
///
/// Only what is textually present in this stage is resolved here; whether a
/// redirection is legal at this pipeline position is the execution engine's
/// call.
pub fn resolve(tokens: &mut Vec<String>) -> Result<StageIo, ShellError> {
    let mut io = StageIo::default();
    let mut i = 0;

    while i < tokens.len() {
        let kind = match tokens[i].as_str() {
            "<" => RedirectKind::Input,
            ">" => RedirectKind::Output,
            _ => {
                i += 1;
                continue;
            }
        };

        let slot = match kind {
            RedirectKind::Input => &mut io.stdin,
            RedirectKind::Output => &mut io.stdout,
        };
        if slot.is_some() {
            io.close_all();
            return Err(ShellError::InvalidSyntax);
        }

        let target = match tokens.get(i + 1) {
            Some(t) if !is_operator(t) => t.clone(),
            _ => {
                io.close_all();
                return Err(ShellError::MissingRedirectTarget);
            }
        };

        let opened = match kind {
            RedirectKind::Input => File::open(&target),
            RedirectKind::Output => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&target),
        };
        let file = match opened {
            Ok(file) => file,
            Err(err) => {
                io.close_all();
                return Err(ShellError::RedirectOpenFailed(err));
            }
        };

        debug!("resolved {kind} redirection to {target:?}");
        match kind {
            RedirectKind::Input => io.stdin = Some(file.into_raw_fd()),
            RedirectKind::Output => io.stdout = Some(file.into_raw_fd()),
        }
        tokens.drain(i..i + 2);
    }

    Ok(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use std::io::Write;

    fn tokens(line: &str) -> Vec<String> {
        let mut p = parser::parse(line).unwrap();
        assert_eq!(p.stage_count(), 1);
        p.stages.remove(0).tokens
    }

    #[test]
    fn plain_stage_inherits_everything() {
        let mut argv = tokens("ls -l");
        let io = resolve(&mut argv).unwrap();
        assert!(io.stdin.is_none());
        assert!(io.stdout.is_none());
        assert_eq!(argv, ["ls", "-l"]);
    }

    #[test]
    fn output_redirect_is_stripped_and_opened() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let line = format!("ls -l > {}", target.display());

        let mut argv = tokens(&line);
        let mut io = resolve(&mut argv).unwrap();
        assert_eq!(argv, ["ls", "-l"]);
        assert!(io.stdin.is_none());
        assert!(io.stdout.is_some());
        assert!(target.exists());
        io.close_all();
    }

    #[test]
    fn packed_and_spaced_redirects_resolve_identically() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");

        let mut packed = tokens(&format!("ls>{}", target.display()));
        let mut spaced = tokens(&format!("ls > {}", target.display()));
        let mut a = resolve(&mut packed).unwrap();
        let mut b = resolve(&mut spaced).unwrap();
        assert_eq!(packed, spaced);
        assert_eq!(packed, ["ls"]);
        a.close_all();
        b.close_all();
    }

    #[test]
    fn input_redirect_opens_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("in");
        let mut file = std::fs::File::create(&target).unwrap();
        writeln!(file, "abc").unwrap();

        let mut argv = tokens(&format!("wc -c < {}", target.display()));
        let mut io = resolve(&mut argv).unwrap();
        assert_eq!(argv, ["wc", "-c"]);
        assert!(io.stdin.is_some());
        io.close_all();
    }

    #[test]
    fn missing_input_file_is_an_open_failure() {
        let mut argv = vec![
            "cat".to_string(),
            "<".to_string(),
            "/nonexistent-psh-input".to_string(),
        ];
        assert!(matches!(
            resolve(&mut argv),
            Err(ShellError::RedirectOpenFailed(_))
        ));
    }

    #[test]
    fn operator_as_target_is_a_missing_target() {
        let mut argv = tokens("a < > b");
        assert!(matches!(
            resolve(&mut argv),
            Err(ShellError::MissingRedirectTarget)
        ));
    }

    #[test]
    fn duplicate_direction_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one");
        let two = dir.path().join("two");
        let mut argv = tokens(&format!("ls > {} > {}", one.display(), two.display()));
        assert!(matches!(resolve(&mut argv), Err(ShellError::InvalidSyntax)));
    }
}
