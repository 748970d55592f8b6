use super::ShellProxy;
use psh_types::{Context, ExitStatus, ShellError};

/// Builtin `cd`. The target argument is required; a missing argument and a
/// target that is not a directory are reported the same way.
pub fn command(_ctx: &Context, argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus {
    let Some(dir) = argv.get(1) else {
        eprintln!("Error: {}", ShellError::NoSuchDirectory);
        return ExitStatus::ExitedWith(1);
    };

    let dir = shellexpand::tilde(dir).into_owned();
    match proxy.changepwd(&dir) {
        Ok(()) => ExitStatus::ExitedWith(0),
        Err(err) => {
            eprintln!("Error: {err}");
            ExitStatus::ExitedWith(1)
        }
    }
}
