use core::fmt;

use libc::user_regs_struct;
use nix::{errno::Errno, sys::ptrace, unistd::Pid};

use crate::diag::{Error, Result};

/// Number of integer arguments passed in registers by the `x86_64` System V
/// calling convention.
pub const CALL_PARAMS: usize = 6;

/// Register state of the traced process.
///
/// `Registers` stores a snapshot of the platform `user_regs_struct` for a
/// given `Pid`. A snapshot taken before injecting a call is written back
/// unchanged once the call returns. Currently this module assumes the
/// `x86_64` register layout.
#[derive(Clone)]
pub struct Registers {
    pid: Pid,
    regs: user_regs_struct,
}

impl Registers {
    /// Read the current register state for `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `ptrace::getregs` call fails.
    pub fn read(pid: Pid) -> Result<Self> {
        Ok(Self {
            pid,
            regs: ptrace::getregs(pid)?,
        })
    }

    /// Write the snapshot back to the tracee.
    ///
    /// # Errors
    ///
    /// Returns an error if `ptrace::setregs` fails.
    pub fn write(&self) -> Result<()> {
        ptrace::setregs(self.pid, self.regs)?;
        Ok(())
    }

    #[must_use]
    /// Instruction pointer (RIP).
    pub fn rip(&self) -> u64 {
        self.regs.rip
    }

    pub fn set_rip(&mut self, value: u64) {
        self.regs.rip = value;
    }

    #[must_use]
    /// Stack pointer (RSP).
    pub fn rsp(&self) -> u64 {
        self.regs.rsp
    }

    #[must_use]
    /// Integer return value of the last call (RAX).
    pub fn rax(&self) -> u64 {
        self.regs.rax
    }

    /// Set up a call to `function` with integer `args`, returning with the
    /// stack pointer at `sp` (which must already hold the return address).
    ///
    /// `orig_rax` is cleared so the kernel does not restart an interrupted
    /// syscall on top of the injected call.
    ///
    /// # Errors
    ///
    /// Returns `E2BIG` if more than `CALL_PARAMS` arguments are given.
    pub fn prepare_call(&mut self, function: u64, args: &[u64], sp: u64) -> Result<()> {
        if args.len() > CALL_PARAMS {
            return Err(Error::from(Errno::E2BIG));
        }

        let slots = [
            &mut self.regs.rdi,
            &mut self.regs.rsi,
            &mut self.regs.rdx,
            &mut self.regs.rcx,
            &mut self.regs.r8,
            &mut self.regs.r9,
        ];
        for (slot, arg) in slots.into_iter().zip(args) {
            *slot = *arg;
        }

        // Variadic callees read the number of vector arguments from al.
        self.regs.rax = 0;
        self.regs.orig_rax = u64::MAX;
        self.regs.rsp = sp;
        self.regs.rip = function;
        Ok(())
    }

    #[must_use]
    /// Value of the general purpose register called `name` (`rdi`, `r8`, ...).
    pub fn get(&self, name: &str) -> Option<u64> {
        let value = match name {
            "rax" => self.regs.rax,
            "rbx" => self.regs.rbx,
            "rcx" => self.regs.rcx,
            "rdx" => self.regs.rdx,
            "rsi" => self.regs.rsi,
            "rdi" => self.regs.rdi,
            "rbp" => self.regs.rbp,
            "rsp" => self.regs.rsp,
            "r8" => self.regs.r8,
            "r9" => self.regs.r9,
            "r10" => self.regs.r10,
            "r11" => self.regs.r11,
            "r12" => self.regs.r12,
            "r13" => self.regs.r13,
            "r14" => self.regs.r14,
            "r15" => self.regs.r15,
            "rip" => self.regs.rip,
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rip: {:#x} rsp: {:#x} rax: {:#x} rdi: {:#x} rsi: {:#x} orig_rax: {:#x}",
            self.regs.rip,
            self.regs.rsp,
            self.regs.rax,
            self.regs.rdi,
            self.regs.rsi,
            self.regs.orig_rax
        )
    }
}
