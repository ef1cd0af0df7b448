use core::fmt;
use nix::errno::Errno;

use crate::diag::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
/// Where a value sits, before any dereference.
pub enum Place {
    /// A numeric address in hexadecimal form (e.g. `0x404028`).
    Address(u64),
    /// A register name, written with a `%` prefix (e.g. `%rdi`).
    Register(String),
    /// An ELF symbol naming a static or global.
    Symbol(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A value location given on the command line.
///
/// - `0xADDR` / `SYMBOL`: the value lives in memory there.
/// - `%REG`: the value only exists in a register.
/// - `*LOC`: `LOC` holds a pointer to the value.
pub struct Location {
    place: Place,
    pointer: bool,
}

fn parse_address(s: &str) -> Option<u64> {
    s.strip_prefix("0x")
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

impl Location {
    #[must_use]
    pub fn place(&self) -> &Place {
        &self.place
    }

    #[must_use]
    /// Whether the location holds a pointer to the value rather than the
    /// value itself.
    pub fn is_pointer(&self) -> bool {
        self.pointer
    }
}

impl TryFrom<&str> for Location {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let (pointer, rest) = match s.strip_prefix('*') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let place = if let Some(register) = rest.strip_prefix('%') {
            if !is_identifier(register) {
                return Err(Error::from(Errno::EINVAL));
            }
            Place::Register(register.to_string())
        } else if rest.starts_with("0x") {
            Place::Address(parse_address(rest).ok_or_else(|| Error::from(Errno::EINVAL))?)
        } else if is_identifier(rest) {
            Place::Symbol(rest.to_string())
        } else {
            return Err(Error::from(Errno::EINVAL));
        };

        Ok(Self { place, pointer })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer {
            write!(f, "*")?;
        }
        match &self.place {
            Place::Address(addr) => write!(f, "{addr:#x}"),
            Place::Register(name) => write!(f, "%{name}"),
            Place::Symbol(name) => write!(f, "{name}"),
        }
    }
}
