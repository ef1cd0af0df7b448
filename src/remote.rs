use log::{debug, warn};

use crate::diag::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// What a successful remote call handed back.
pub struct Returned {
    /// Integer/pointer return value of the called function.
    pub pointer: u64,
    /// Human-readable rendering of the return value, when the evaluation
    /// engine produced one by itself.
    pub summary: Option<String>,
}

impl Returned {
    #[must_use]
    pub fn pointer(pointer: u64) -> Self {
        Self {
            pointer,
            summary: None,
        }
    }
}

/// The evaluation engine of a stopped target process.
///
/// This is the only capability the dispatcher needs from a debugger: run a
/// function of the target with integer arguments, and read a C string out of
/// its memory. Both operations block until the target hands control back.
pub trait Target {
    /// Call `function` inside the target with integer `args`.
    ///
    /// # Errors
    ///
    /// Returns the engine's error (unknown symbol, target not stopped,
    /// signal raised during the call, ...). The message is shown to the user
    /// verbatim.
    fn call(&mut self, function: &str, args: &[u64]) -> Result<Returned>;

    /// Read the NUL-terminated string at `addr`, at most `max` bytes,
    /// without the terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory cannot be read.
    fn read_c_string(&mut self, addr: u64, max: usize) -> Result<Vec<u8>>;
}

#[must_use]
/// Source form of a call expression, as submitted to expression evaluators.
pub fn expression(function: &str, args: &[u64]) -> String {
    let args = args
        .iter()
        .map(|arg| format!("{arg:#x}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{function}({args})")
}

/// Run `renderer(addr)` in the target.
///
/// # Errors
///
/// Propagates the engine error unchanged; no retry is attempted.
pub fn invoke<T: Target + ?Sized>(
    target: &mut T,
    renderer: &str,
    addr: u64,
) -> Result<Returned> {
    debug!("calling {}", expression(renderer, &[addr]));
    let returned = target.call(renderer, &[addr])?;
    debug!(
        "{renderer} returned {:#x} (summary: {})",
        returned.pointer,
        returned.summary.is_some()
    );
    Ok(returned)
}

/// Best-effort `free_fn(pointer)`.
///
/// The rendered string has already been produced when this runs, so a
/// failure is only logged.
pub fn release<T: Target + ?Sized>(target: &mut T, free_fn: &str, pointer: u64) {
    debug!("calling {}", expression(free_fn, &[pointer]));
    if let Err(e) = target.call(free_fn, &[pointer]) {
        warn!("{free_fn}({pointer:#x}) failed: {}", e.message());
    }
}

/// Collect the NUL-terminated string at `addr` from aligned blocks of
/// `chunk` bytes, at most `max` bytes, without the terminator.
///
/// `read` is handed the aligned start of each block and returns the bytes
/// it could fetch there.
///
/// # Errors
///
/// Propagates the first failing read, and fails if a block comes back too
/// short to contain `addr`.
pub fn walk_c_string<F>(addr: u64, max: usize, chunk: u64, mut read: F) -> Result<Vec<u8>>
where
    F: FnMut(u64) -> Result<Vec<u8>>,
{
    let mut bytes = Vec::new();
    let mut cursor = addr & !(chunk - 1);
    #[allow(clippy::cast_possible_truncation)]
    let mut skip = (addr - cursor) as usize;

    while bytes.len() < max {
        let block = read(cursor)?;
        if block.len() <= skip {
            return Err(Error::from(format!(
                "Cannot access memory at address {:#x}",
                cursor + skip as u64
            )));
        }
        for byte in block.into_iter().skip(skip) {
            if byte == 0 || bytes.len() == max {
                return Ok(bytes);
            }
            bytes.push(byte);
        }
        skip = 0;
        cursor += chunk;
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing {
        calls: Vec<String>,
    }

    impl Target for Failing {
        fn call(&mut self, function: &str, args: &[u64]) -> Result<Returned> {
            self.calls.push(expression(function, args));
            Err("The program being debugged was signaled (SIGSEGV)".into())
        }

        fn read_c_string(&mut self, _: u64, _: usize) -> Result<Vec<u8>> {
            Err("unreachable".into())
        }
    }

    #[test]
    fn test_expression_formatting() {
        assert_eq!(
            expression("debug_print_bytes", &[0x7ffe_1000]),
            "debug_print_bytes(0x7ffe1000)"
        );
        assert_eq!(expression("f", &[1, 2]), "f(0x1, 0x2)");
        assert_eq!(expression("f", &[]), "f()");
    }

    #[test]
    fn test_invoke_propagates_engine_error() {
        let mut target = Failing { calls: Vec::new() };
        let err = invoke(&mut target, "debug_print_bytes", 0x10).unwrap_err();
        assert_eq!(
            err.message(),
            "The program being debugged was signaled (SIGSEGV)"
        );
        assert_eq!(target.calls, vec!["debug_print_bytes(0x10)"]);
    }

    #[test]
    fn test_release_swallows_failure() {
        let mut target = Failing { calls: Vec::new() };
        release(&mut target, "debug_print_free", 0x20);
        assert_eq!(target.calls, vec!["debug_print_free(0x20)"]);
    }

    struct Memory {
        base: u64,
        bytes: Vec<u8>,
        reads: Vec<u64>,
    }

    impl Memory {
        fn new(base: u64, text: &[u8]) -> Self {
            Self {
                base,
                bytes: text.to_vec(),
                reads: Vec::new(),
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        fn read(&mut self, addr: u64, chunk: u64) -> Result<Vec<u8>> {
            self.reads.push(addr);
            if addr < self.base || addr >= self.base + self.bytes.len() as u64 {
                return Err(format!("Cannot access memory at address {addr:#x}").into());
            }
            let start = (addr - self.base) as usize;
            let end = (start + chunk as usize).min(self.bytes.len());
            Ok(self.bytes[start..end].to_vec())
        }
    }

    #[test]
    fn test_walk_unaligned_start() {
        let mut text = b"xxxodd3\0".to_vec();
        text.resize(64, 0);
        let mut memory = Memory::new(0x1000, &text);

        let out = walk_c_string(0x1003, 2048, 8, |a| memory.read(a, 8)).expect("read");
        assert_eq!(out, b"odd3");
        assert_eq!(memory.reads, vec![0x1000]);
    }

    #[test]
    fn test_walk_crosses_blocks() {
        let mut text = vec![b'a'; 100];
        text.push(0);
        text.resize(192, 0);
        let mut memory = Memory::new(0x2000, &text);

        let out = walk_c_string(0x2001, 2048, 64, |a| memory.read(a, 64)).expect("read");
        assert_eq!(out.len(), 99);
        assert_eq!(memory.reads, vec![0x2000, 0x2040]);
    }

    #[test]
    fn test_walk_stops_at_cap() {
        let text = vec![b'x'; 3008];
        let mut memory = Memory::new(0x3000, &text);

        let out = walk_c_string(0x3000, 2048, 64, |a| memory.read(a, 64)).expect("read");
        assert_eq!(out.len(), 2048);
        assert!(out.iter().all(|b| *b == b'x'));
        assert_eq!(memory.reads.len(), 32);
    }

    #[test]
    fn test_walk_unreadable() {
        let mut memory = Memory::new(0x4000, b"abc");
        assert!(walk_c_string(0x8000, 2048, 8, |a| memory.read(a, 8)).is_err());

        // The string runs off the end of readable memory.
        let mut memory = Memory::new(0x4000, b"abcdefgh");
        let err = walk_c_string(0x4000, 2048, 8, |a| memory.read(a, 8)).unwrap_err();
        assert!(err.message().contains("0x4008"), "{}", err.message());
    }

    #[test]
    fn test_walk_short_block() {
        let err = walk_c_string(0x5006, 2048, 8, |_| Ok(vec![1, 2])).unwrap_err();
        assert!(err.message().contains("0x5006"), "{}", err.message());
    }
}
