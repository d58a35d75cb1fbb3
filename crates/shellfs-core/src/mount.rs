//! Mount table entries parsed from `/proc/self/mountinfo`.

/// One mounted filesystem on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mount source, e.g. `/dev/sda1` or `tmpfs`.
    pub name: String,
    /// Mount point.
    pub dir: String,
    pub fstype: String,
    /// Comma-separated per-mount and superblock options.
    pub options: String,
    /// Device id built from the major:minor pair.
    pub dev: u64,
}

impl MountEntry {
    pub fn has_option(&self, requested: &str) -> bool {
        self.options.split(',').any(|opt| opt == requested)
    }

    pub fn is_ignored(&self) -> bool {
        self.has_option("ignore")
    }

    pub fn is_read_only(&self) -> bool {
        self.has_option("ro")
    }
}

/// Parse mountinfo text. Malformed lines are skipped.
///
/// Line shape (see proc(5)):
/// `id parent major:minor root mount-point options [optional...] - fstype source super-options`
pub fn parse_mountinfo(text: &str) -> Vec<MountEntry> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let separator = fields.iter().position(|f| *f == "-")?;
    if separator < 6 || fields.len() < separator + 3 {
        return None;
    }

    let (major, minor) = fields[2].split_once(':')?;
    let dev = makedev(major.parse().ok()?, minor.parse().ok()?);

    let mut options = fields[5].to_string();
    if let Some(super_options) = fields.get(separator + 3) {
        options.push(',');
        options.push_str(super_options);
    }

    Some(MountEntry {
        name: unescape(fields[separator + 2]),
        dir: unescape(fields[4]),
        fstype: fields[separator + 1].to_string(),
        options,
        dev,
    })
}

/// glibc `makedev`.
fn makedev(major: u64, minor: u64) -> u64 {
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

/// Undo the kernel's octal escaping of space, tab, newline and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
