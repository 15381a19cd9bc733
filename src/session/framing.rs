//! Wire framing for the interactive remote shell.
//!
//! A session is one shared, stateful byte stream. Every handshake and every
//! command completion is delimited by a fresh marker so output from an
//! earlier command can never be taken for the end of a later one.

use shell_escape::unix::escape;

/// Result of locating a completion line in accumulated stdout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Completion {
    /// Output the command produced, without the guard newline.
    pub stdout: String,
    /// Exit code reported on the completion line.
    pub exit_code: i32,
}

/// Builds the remote command that announces a ready shell.
#[must_use]
pub fn handshake_command(marker: &str, remote_shell: &str) -> String {
    format!("echo {marker} ; {remote_shell}")
}

/// Returns `true` when `line` is the handshake announcement for `marker`.
#[must_use]
pub fn is_handshake_line(line: &str, marker: &str) -> bool {
    line.starts_with(marker)
}

/// Builds the line written to the shell for one command.
///
/// The leading newline in the echoed text keeps the completion line on its
/// own line when the command's output lacks a trailing newline.
#[must_use]
pub fn execute_line(command: &str, marker: &str) -> String {
    format!("{command} ; echo -e \"\\n@{marker}@$?\"\n")
}

/// Quotes `args` into a single shell command line.
#[must_use]
pub fn render_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Looks for the first line of `buffer` that starts with `@<marker>@`.
///
/// Returns `Ok(None)` until that line is complete.
///
/// # Errors
///
/// Returns the offending line when the text after the marker is not an
/// integer exit code.
pub fn find_completion(buffer: &str, marker: &str) -> Result<Option<Completion>, String> {
    let tag = format!("@{marker}@");
    for (start, _) in buffer.match_indices(&tag) {
        let at_line_start = start == 0 || buffer.as_bytes().get(start - 1) == Some(&b'\n');
        if !at_line_start {
            continue;
        }
        let rest = buffer.get(start..).unwrap_or_default();
        let Some(line_len) = rest.find('\n') else {
            return Ok(None);
        };
        let line = rest.get(..line_len).unwrap_or_default();
        let code_text = line.get(tag.len()..).unwrap_or_default().trim();
        let exit_code = code_text.parse::<i32>().map_err(|_| line.to_owned())?;

        let before = buffer.get(..start).unwrap_or_default();
        let stdout = before.strip_suffix('\n').unwrap_or(before).to_owned();
        return Ok(Some(Completion { stdout, exit_code }));
    }
    Ok(None)
}
