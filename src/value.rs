use core::fmt;

/// Address reported by a host for a value that has no load address.
pub const INVALID_ADDRESS: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Where an inspected value lives in the target process.
pub enum Storage {
    /// The value is in target memory at the given load address. Hosts that
    /// cannot materialize an address report `INVALID_ADDRESS` or `0`.
    Memory(u64),
    /// The value only exists in a register and was never spilled.
    Register,
    /// The value is a pointer; the payload is the pointee address.
    Pointer(u64),
}

/// A value handle borrowed from the host for the duration of one dispatch.
///
/// Each binding implements this once over its own notion of a value (a
/// ptrace location, a GDB expression, ...). The dispatch algorithm only ever
/// sees this trait.
pub trait Value {
    /// Type name as reported by the host.
    fn type_name(&self) -> &str;

    /// Storage class and, when known, the associated address.
    fn storage(&self) -> Storage;

    /// Second-chance address of the value's storage, queried when the load
    /// address is missing. Hosts without such a lookup keep the default.
    fn address_of(&self) -> Option<u64> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Outcome of address resolution.
pub enum Address {
    /// Address to hand to the renderer.
    Resolved(u64),
    /// No usable address; `attempted` is the last candidate that was rejected.
    Unresolvable {
        /// The rejected candidate (`INVALID_ADDRESS` when none was reported).
        attempted: u64,
    },
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Resolved(addr) => write!(f, "{addr:#x}"),
            Address::Unresolvable { attempted } => {
                write!(f, "unresolvable ({attempted:#x})")
            }
        }
    }
}

#[must_use]
/// Whether `addr` can be passed to a renderer.
pub fn is_valid(addr: u64) -> bool {
    addr != 0 && addr != INVALID_ADDRESS
}

/// Compute the address of `value` in the target process.
///
/// A pointer resolves to its own value, untouched, even when null: the
/// dispatcher rejects null pointers before calling anything. Otherwise the
/// load address is used, falling back to `Value::address_of` when the host
/// reported none.
pub fn resolve<V: Value + ?Sized>(value: &V) -> Address {
    let load = match value.storage() {
        Storage::Pointer(pointee) => return Address::Resolved(pointee),
        Storage::Memory(addr) => addr,
        Storage::Register => INVALID_ADDRESS,
    };
    if is_valid(load) {
        return Address::Resolved(load);
    }

    match value.address_of() {
        Some(addr) if is_valid(addr) => Address::Resolved(addr),
        Some(addr) => Address::Unresolvable { attempted: addr },
        None => Address::Unresolvable { attempted: load },
    }
}
