use psh_types::ShellError;

/// One program invocation within a pipeline: its argument vector, still
/// containing any redirection tokens (the redirect resolver strips those
/// later, in place).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub tokens: Vec<String>,
}

/// A parsed command line: one or more stages connected by pipes, plus the
/// background flag and the original text kept for the completion banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub background: bool,
    pub line: String,
}

impl Pipeline {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// An empty input line parses to a pipeline with zero stages; callers
    /// treat it as a no-op.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Pads `<`, `>` and `&` with spaces so they always tokenize as standalone
/// operators regardless of user spacing (`ls>out` == `ls > out`).
fn pad_operators(line: &str) -> String {
    let mut padded = String::with_capacity(line.len() + 8);
    for ch in line.chars() {
        match ch {
            '<' | '>' | '&' => {
                padded.push(' ');
                padded.push(ch);
                padded.push(' ');
            }
            _ => padded.push(ch),
        }
    }
    padded
}

/// Splits a raw command line into pipeline stages and each stage into
/// tokens.
pub fn parse(line: &str) -> Result<Pipeline, ShellError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Pipeline {
            stages: Vec::new(),
            background: false,
            line: String::new(),
        });
    }

    // A pipeline can neither start nor end on an operator.
    let first = trimmed.chars().next().unwrap_or(' ');
    let last = trimmed.chars().last().unwrap_or(' ');
    if matches!(first, '|' | '<' | '>') || matches!(last, '|' | '<' | '>') {
        return Err(ShellError::InvalidSyntax);
    }

    let mut rest = pad_operators(trimmed).trim_end().to_string();
    let background = rest.ends_with('&');
    if background {
        rest.truncate(rest.len() - 1);
    }
    // `&` anywhere but as the final token, or more than once, is malformed.
    if rest.contains('&') {
        return Err(ShellError::InvalidSyntax);
    }

    let mut stages = Vec::new();
    for stage_text in rest.split('|') {
        let tokens: Vec<String> = stage_text.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return Err(ShellError::InvalidSyntax);
        }
        stages.push(Stage { tokens });
    }

    Ok(Pipeline {
        stages,
        background,
        line: trimmed.to_string(),
    })
}
