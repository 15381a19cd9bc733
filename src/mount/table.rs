//! Parsers for the kernel mount table.
//!
//! `mount` prints `<source> on <target> type <fstype> (<options>)`, which is
//! ambiguous once paths contain spaces. [`parse_mount_output`] splits on the
//! keyword separators first and only falls back to whitespace fields for
//! lines that do not follow the layout. `/proc/mounts` escapes whitespace as
//! octal sequences and is unambiguous.

/// One row of the mount table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted device or remote location.
    pub source: String,
    /// Directory the source is mounted on.
    pub target: String,
    /// Filesystem type.
    pub fstype: String,
    /// Comma separated mount options.
    pub options: String,
}

/// Parses the output of `mount` run without arguments.
#[must_use]
pub fn parse_mount_output(output: &str) -> Vec<MountEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_mount_line(line).or_else(|| parse_by_fields(line)))
        .collect()
}

fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let (source, rest) = line.split_once(" on ")?;
    let (target, tail) = rest.rsplit_once(" type ")?;
    let (fstype, options) = tail.split_once(' ').unwrap_or((tail, ""));
    Some(MountEntry {
        source: source.to_owned(),
        target: target.to_owned(),
        fstype: fstype.to_owned(),
        options: options
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .to_owned(),
    })
}

fn parse_by_fields(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let source = fields.next()?;
    let target = fields.nth(1)?;
    let fstype = fields.nth(1).unwrap_or_default();
    Some(MountEntry {
        source: source.to_owned(),
        target: target.to_owned(),
        fstype: fstype.to_owned(),
        options: String::new(),
    })
}

/// Returns the third space separated field of a `mount` line, the target
/// for paths without spaces.
#[must_use]
pub fn field_target(line: &str) -> Option<&str> {
    line.split(' ').nth(2)
}

/// Parses the contents of `/proc/mounts`.
#[must_use]
pub fn parse_proc_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next().unwrap_or_default();
            let options = fields.next().unwrap_or_default();
            Some(MountEntry {
                source: unescape_octal(source),
                target: unescape_octal(target),
                fstype: fstype.to_owned(),
                options: options.to_owned(),
            })
        })
        .collect()
}

/// Returns `true` when any entry is mounted on `path`, ignoring trailing
/// slashes on both sides.
#[must_use]
pub fn is_mount_target(entries: &[MountEntry], path: &str) -> bool {
    let wanted = normalise(path);
    entries.iter().any(|entry| normalise(&entry.target) == wanted)
}

fn normalise(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

fn unescape_octal(field: &str) -> String {
    let mut bytes = Vec::with_capacity(field.len());
    let mut rest = field.as_bytes();
    while let Some((&first, tail)) = rest.split_first() {
        let escaped = (first == b'\\')
            .then(|| tail.get(..3).and_then(octal_value))
            .flatten();
        match escaped {
            Some(value) => {
                bytes.push(value);
                rest = tail.get(3..).unwrap_or_default();
            }
            None => {
                bytes.push(first);
                rest = tail;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn octal_value(digits: &[u8]) -> Option<u8> {
    digits.iter().try_fold(0_u8, |acc, digit| {
        let value = digit.checked_sub(b'0').filter(|value| *value < 8)?;
        acc.checked_mul(8)?.checked_add(value)
    })
}
