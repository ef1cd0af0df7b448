use log::debug;
use nix::{
    sys::{
        ptrace,
        signal::Signal,
        wait::{waitpid, WaitStatus},
    },
    unistd::{execve, fork, ForkResult, Pid},
};
use std::ffi::CString;

use crate::{breakpoint, diag::Result, hwaccess::Registers};

/// A trait for implementing ptrace-based process tracers.
///
/// The `trace` method is invoked with the PID of the freshly forked child,
/// which stops on its first instruction once `execve` succeeds.
pub trait Tracer {
    /// Drive the traced child `pid` and return its exit code.
    ///
    /// # Errors
    ///
    /// Returns `Err` when any ptrace/wait/IO operation fails while tracing.
    fn trace(&self, pid: Pid) -> Result<i32>;
}

fn tracee(args: &[CString], env: &[CString]) -> Result<i32> {
    ptrace::traceme()?;
    execve(&args[0], args, env)?;

    Ok(0)
}

/// Fork and execute the target program, running `tracer` against the
/// resulting child process.
///
/// # Arguments
///
/// * `tracer` - The tracer driving the child.
/// * `args` - Command-line arguments of the program (the first element is
///   the program path).
/// * `env` - Environment variables for the child process.
///
/// # Errors
///
/// Returns `Err` if the fork fails or if the tracer returns an error.
pub fn run<T: Tracer>(tracer: &T, args: &[CString], env: &[CString]) -> Result<i32> {
    match unsafe { fork() }? {
        ForkResult::Parent { child: pid, .. } => tracer.trace(pid),
        ForkResult::Child => tracee(args, env),
    }
}

#[must_use]
/// Exit or signal code if `status` denotes termination.
///
/// A human-readable summary is printed to stderr on termination. Returns
/// `None` for non-terminating statuses such as `Stopped`.
pub fn terminated(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Signaled(_, signal, coredump) => {
            let coredump_str = if coredump { " (core dumped)" } else { "" };
            eprintln!("+++ killed by {signal:?}{coredump_str} +++");
            Some(signal as i32)
        }
        WaitStatus::Exited(_, code) => {
            eprintln!("+++ exited with {code} +++");
            Some(code)
        }
        _ => None,
    }
}

/// Resume `pid` until it executes the instruction at `addr`.
///
/// Signals other than our breakpoint trap are passed on to the program.
///
/// # Errors
///
/// Returns `Err` when a ptrace or wait operation fails.
///
/// # Returns
///
/// `Ok(None)` when stopped at `addr` (with the original instruction
/// restored), `Ok(Some(code))` if the program terminated first.
pub fn run_to(pid: Pid, addr: u64) -> Result<Option<i32>> {
    let mut breakpoints = breakpoint::Manager::new(pid);
    breakpoints.insert(addr)?;

    let mut signal = None;
    loop {
        ptrace::cont(pid, signal)?;
        signal = None;

        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                let mut regs = Registers::read(pid)?;
                if breakpoints.hit(&mut regs)? == Some(addr) {
                    debug!("stopped at {addr:#x}");
                    return Ok(None);
                }
            }
            WaitStatus::Stopped(_, sig) => signal = Some(sig),
            status => {
                if let Some(code) = terminated(status) {
                    return Ok(Some(code));
                }
            }
        }
    }
}

/// Resume `pid` until it terminates, passing signals on.
///
/// # Errors
///
/// Returns `Err` when a ptrace or wait operation fails.
pub fn finish(pid: Pid) -> Result<i32> {
    let mut signal = None;
    loop {
        ptrace::cont(pid, signal)?;
        signal = None;

        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            WaitStatus::Stopped(_, sig) => signal = Some(sig),
            status => {
                if let Some(code) = terminated(status) {
                    return Ok(code);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_signaled() {
        let status = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGKILL, false);
        assert_eq!(terminated(status), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn test_terminated_exited() {
        let status = WaitStatus::Exited(Pid::from_raw(1), 3);
        assert_eq!(terminated(status), Some(3));
    }

    #[test]
    fn test_terminated_other() {
        let status = WaitStatus::Stopped(Pid::from_raw(1), Signal::SIGSTOP);
        assert!(terminated(status).is_none());
    }
}
