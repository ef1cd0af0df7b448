use log::{debug, trace, warn};
use nix::{
    sys::{
        ptrace,
        signal::Signal,
        wait::{waitpid, WaitStatus},
    },
    unistd::Pid,
};

use crate::{
    breakpoint,
    diag::{Error, Result},
    hwaccess::Registers,
    param::{Location, Place},
    process::Image,
    remote::{self, Returned, Target},
    value::{Storage, Value},
};

const RED_ZONE: u64 = 128;
const WORD: u64 = 8;

/// A value of the traced process, located from the command line.
pub struct Variable {
    type_name: String,
    storage: Storage,
    symbol: Option<u64>,
}

impl Value for Variable {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn storage(&self) -> Storage {
        self.storage
    }

    /// Address of the ELF symbol the location was named after.
    fn address_of(&self) -> Option<u64> {
        self.symbol
    }
}

/// A stopped, ptrace-attached process used as an evaluation engine.
///
/// Calls are injected directly: the registers are saved, a call frame is
/// built on the stack whose return address points at an `int3` planted on
/// the program entry point, the process runs until it traps there, and the
/// saved registers are written back.
pub struct Inferior<'a> {
    pid: Pid,
    image: &'a Image,
    trap: u64,
}

impl<'a> Inferior<'a> {
    #[must_use]
    pub fn new(pid: Pid, image: &'a Image) -> Self {
        Self {
            pid,
            image,
            trap: image.entry(),
        }
    }

    /// Read the word at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not mapped in the process.
    pub fn peek(&self, addr: u64) -> Result<u64> {
        let word = ptrace::read(self.pid, addr as ptrace::AddressType)
            .map_err(|e| format!("Cannot access memory at address {addr:#x} ({e})"))?;
        #[allow(clippy::cast_sign_loss)]
        let word = word as u64;
        Ok(word)
    }

    fn poke(&self, addr: u64, word: u64) -> Result<()> {
        unsafe { ptrace::write(self.pid, addr as ptrace::AddressType, word as *mut _) }?;
        Ok(())
    }

    fn symbol(&self, name: &str) -> Result<u64> {
        self.image
            .symbol(name)
            .ok_or_else(|| Error::from(format!("No symbol \"{name}\" in current context.")))
    }

    /// Build the value handle for a `type_name` value at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown symbols or registers, and when a pointer
    /// location cannot be read.
    pub fn variable(&self, type_name: &str, location: &Location) -> Result<Variable> {
        let (storage, symbol) = match (location.place(), location.is_pointer()) {
            (Place::Address(addr), false) => (Storage::Memory(*addr), None),
            (Place::Symbol(name), false) => {
                let addr = self.symbol(name)?;
                (Storage::Memory(addr), Some(addr))
            }
            (Place::Register(name), false) => {
                self.register(name)?;
                (Storage::Register, None)
            }
            (Place::Address(addr), true) => (Storage::Pointer(self.peek(*addr)?), None),
            (Place::Symbol(name), true) => {
                (Storage::Pointer(self.peek(self.symbol(name)?)?), None)
            }
            (Place::Register(name), true) => (Storage::Pointer(self.register(name)?), None),
        };
        debug!("{type_name} @ {location}: {storage:?}");

        Ok(Variable {
            type_name: type_name.to_string(),
            storage,
            symbol,
        })
    }

    fn register(&self, name: &str) -> Result<u64> {
        Registers::read(self.pid)?
            .get(name)
            .ok_or_else(|| Error::from(format!("Invalid register `{name}'")))
    }

    fn run_call(&self, breakpoints: &mut breakpoint::Manager) -> Result<u64> {
        ptrace::cont(self.pid, None)?;

        match waitpid(self.pid, None)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                let mut regs = Registers::read(self.pid)?;
                if breakpoints.hit(&mut regs)? == Some(self.trap) {
                    Ok(regs.rax())
                } else {
                    Err(Error::from(format!(
                        "The program being debugged stopped at {:#x} while in a function called from the debugger.",
                        regs.rip()
                    )))
                }
            }
            WaitStatus::Stopped(_, signal) => Err(Error::from(format!(
                "The program being debugged was signaled while in a function called from the debugger ({signal:?})."
            ))),
            WaitStatus::Exited(_, code) => Err(Error::from(format!(
                "The program being debugged exited with code {code} while in a function called from the debugger."
            ))),
            WaitStatus::Signaled(_, signal, _) => Err(Error::from(format!(
                "The program being debugged was killed by {signal:?} while in a function called from the debugger."
            ))),
            status => Err(Error::from(format!(
                "Unexpected stop while in a function called from the debugger: {status:?}"
            ))),
        }
    }
}

impl Target for Inferior<'_> {
    fn call(&mut self, function: &str, args: &[u64]) -> Result<Returned> {
        let addr = self.symbol(function)?;

        let saved = Registers::read(self.pid)?;
        trace!("registers before {function}: {saved}");

        let mut regs = saved.clone();
        let sp = ((saved.rsp() - RED_ZONE) & !0xf) - WORD;
        regs.prepare_call(addr, args, sp)?;
        self.poke(sp, self.trap)?;

        let mut breakpoints = breakpoint::Manager::new(self.pid);
        let outcome = breakpoints
            .insert(self.trap)
            .and_then(|()| regs.write())
            .and_then(|()| self.run_call(&mut breakpoints));
        let restored = breakpoints.clear().and_then(|()| saved.write());

        settle(function, outcome, restored)
    }

    fn read_c_string(&mut self, addr: u64, max: usize) -> Result<Vec<u8>> {
        remote::walk_c_string(addr, max, WORD, |cursor| {
            Ok(self.peek(cursor)?.to_le_bytes().to_vec())
        })
    }
}

/// Combine the outcome of an injected call with the outcome of putting the
/// process back as it was.
fn settle(function: &str, outcome: Result<u64>, restored: Result<()>) -> Result<Returned> {
    match (outcome, restored) {
        (Ok(rax), Ok(())) => Ok(Returned::pointer(rax)),
        (Ok(rax), Err(e)) => {
            if rax != 0 {
                warn!("{function} returned {rax:#x}, which is not released");
            }
            Err(e)
        }
        (Err(e), restored) => {
            if let Err(r) = restored {
                warn!("cannot restore registers after {function}: {}", r.message());
            }
            Err(e)
        }
    }
}
