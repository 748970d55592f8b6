pub const PROMPT: &str = "psh$ ";

pub fn print_preprompt<W: std::io::Write>(out: &mut W) {
    let _ = write!(out, "{PROMPT}");
    let _ = out.flush();
}
