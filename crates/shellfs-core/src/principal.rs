//! User and group principals resolved on the remote host.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::{GROUP_FIELD_COUNT, PASSWD_FIELD_COUNT};

/// Reserved id for principals known only by name.
pub const SPECIAL_ID: i64 = -1;

static ID_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^uid=(\d+)\(.*?\) gid=(\d+)\(.*?\) groups=(\d+)\(.*?\)\n$")
        .expect("id output pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    User,
    Group,
}

/// A named identity with a numeric id.
///
/// Two principals are equal when kind and id match; principals with the
/// special id `-1` compare by name instead.
#[derive(Debug, Clone)]
pub struct Principal {
    id: i64,
    name: String,
    kind: PrincipalKind,
}

impl Principal {
    pub fn user(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: PrincipalKind::User,
        }
    }

    pub fn group(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: PrincipalKind::Group,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    pub fn is_special(&self) -> bool {
        self.id == SPECIAL_ID
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        if self.kind != other.kind || self.id != other.id {
            return false;
        }
        !self.is_special() || self.name == other.name
    }
}

impl Eq for Principal {}

impl Hash for Principal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.is_special() {
            self.name.hash(state);
        } else {
            self.id.hash(state);
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// uid from `id <name>` output.
pub(crate) fn parse_id_output(output: &str) -> Option<i64> {
    ID_OUTPUT.captures(output)?.get(1)?.as_str().parse().ok()
}

/// uid from a `getent passwd` record.
pub(crate) fn parse_passwd_record(output: &str) -> Option<i64> {
    colon_field(output, PASSWD_FIELD_COUNT, 2)
}

/// gid from a `getent group` record.
pub(crate) fn parse_group_record(output: &str) -> Option<i64> {
    colon_field(output, GROUP_FIELD_COUNT, 2)
}

fn colon_field(output: &str, expected: usize, index: usize) -> Option<i64> {
    let line = output.lines().next()?;
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != expected {
        return None;
    }
    fields[index].parse().ok()
}
