use log::debug;
use nix::{sys::ptrace, unistd::Pid};
use std::collections::HashMap;

use crate::{diag::Result, hwaccess::Registers};

const INT3: i64 = 0xcc;

/// Software breakpoints (`int3`) planted in the traced process.
///
/// Each breakpoint remembers the word it overwrote so it can be restored
/// when hit or removed.
pub struct Manager {
    pid: Pid,
    breakpoints: HashMap<u64, i64>,
}

impl Manager {
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            breakpoints: HashMap::new(),
        }
    }

    fn poke(&self, addr: u64, word: i64) -> Result<()> {
        unsafe { ptrace::write(self.pid, addr as ptrace::AddressType, word as *mut _) }?;
        Ok(())
    }

    /// Plant a breakpoint at `addr`. Planting twice at the same address is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the ptrace operation fails.
    pub fn insert(&mut self, addr: u64) -> Result<()> {
        if self.breakpoints.contains_key(&addr) {
            return Ok(());
        }

        let instruction = ptrace::read(self.pid, addr as ptrace::AddressType)?;
        self.poke(addr, (instruction & !0xff) | INT3)?;
        self.breakpoints.insert(addr, instruction);
        debug!("breakpoint set at {addr:#x}");
        Ok(())
    }

    /// Restore the original instruction at `addr`, if a breakpoint is there.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the ptrace operation fails.
    pub fn remove(&mut self, addr: u64) -> Result<()> {
        if let Some(instruction) = self.breakpoints.remove(&addr) {
            self.poke(addr, instruction)?;
        }
        Ok(())
    }

    /// Remove every remaining breakpoint.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if a ptrace operation fails.
    pub fn clear(&mut self) -> Result<()> {
        let addrs: Vec<u64> = self.breakpoints.keys().copied().collect();
        for addr in addrs {
            self.remove(addr)?;
        }
        Ok(())
    }

    /// Handle a `SIGTRAP` stop with registers `regs`.
    ///
    /// If the trap came from one of our breakpoints, the breakpoint is
    /// removed and the instruction pointer rewound onto the restored
    /// instruction.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the ptrace operation fails.
    ///
    /// # Returns
    ///
    /// The address of the breakpoint that was hit, or `None` when the trap
    /// did not come from this manager.
    pub fn hit(&mut self, regs: &mut Registers) -> Result<Option<u64>> {
        let addr = regs.rip().wrapping_sub(1);
        if !self.breakpoints.contains_key(&addr) {
            return Ok(None);
        }

        self.remove(addr)?;
        regs.set_rip(addr);
        regs.write()?;
        debug!("breakpoint hit at {addr:#x}");
        Ok(Some(addr))
    }
}
