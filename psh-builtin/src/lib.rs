use once_cell::sync::Lazy;
use psh_types::{Context, ExitStatus, ShellError};
use std::collections::HashMap;
use tracing::debug;

pub mod cd;
pub mod pwd;

/// Interface builtin commands use to act on the shell without linking
/// against it directly.
pub trait ShellProxy {
    /// Asks the main loop to stop accepting input. The loop itself decides
    /// whether outstanding jobs allow the shell to actually terminate.
    fn exit_shell(&mut self);

    /// Changes the shell's working directory.
    fn changepwd(&mut self, path: &str) -> Result<(), ShellError>;
}

/// Signature every builtin command conforms to. `argv[0]` is the command
/// name, exactly as the stage tokenized.
pub type BuiltinCommand =
    fn(ctx: &Context, argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus;

static BUILTIN_COMMAND: Lazy<HashMap<&str, BuiltinCommand>> = Lazy::new(|| {
    let mut builtin = HashMap::new();
    builtin.insert("exit", exit as BuiltinCommand);
    builtin.insert("cd", cd::command as BuiltinCommand);
    builtin.insert("pwd", pwd::command as BuiltinCommand);
    builtin
});

/// Looks up a builtin command by name.
pub fn get_command(name: &str) -> Option<BuiltinCommand> {
    BUILTIN_COMMAND.get(name).copied()
}

/// Builtin `exit`: requests shell termination.
pub fn exit(_ctx: &Context, _argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus {
    debug!("exit requested");
    proxy.exit_shell();
    ExitStatus::ExitedWith(0)
}
