use super::ShellProxy;
use psh_types::{Context, ExitStatus, ShellError};
use std::fs::File;
use std::io::Write;
use std::mem;
use std::os::unix::io::FromRawFd;

/// Builtin `pwd`. Prints the working directory to the context's output
/// descriptor, or into a file when the stage carries a trailing `> file`.
/// Any other trailing argument is rejected.
pub fn command(ctx: &Context, argv: Vec<String>, _proxy: &mut dyn ShellProxy) -> ExitStatus {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(err) => {
            eprintln!("Error: cannot read working directory: {err}");
            return ExitStatus::ExitedWith(1);
        }
    };

    match argv.len() {
        1 => {
            // Borrow the raw descriptor without adopting it; the shell still
            // owns outfile.
            let mut file = unsafe { File::from_raw_fd(ctx.outfile) };
            writeln!(file, "{}", cwd.display()).ok();
            mem::forget(file);
            ExitStatus::ExitedWith(0)
        }
        3 if argv[1] == ">" => match File::create(&argv[2]) {
            Ok(mut file) => {
                writeln!(file, "{}", cwd.display()).ok();
                ExitStatus::ExitedWith(0)
            }
            Err(err) => {
                eprintln!("Error: {}", ShellError::RedirectOpenFailed(err));
                ExitStatus::ExitedWith(1)
            }
        },
        _ => {
            eprintln!("Error: {}", ShellError::InvalidArgument);
            ExitStatus::ExitedWith(1)
        }
    }
}
