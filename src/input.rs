use nix::{
    errno::Errno,
    unistd::{access, AccessFlags},
};
use std::{env, ffi::CString, path::Path};

use crate::diag::{Error, Result};

fn is_executable(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|p| access(p, AccessFlags::X_OK).is_ok())
}

/// Locate `program` as given, or else in the directories of `PATH`.
///
/// # Errors
///
/// Will return `Err` (`ENOENT`) if no executable file is found.
pub fn resolve(program: &str) -> Result<String> {
    if is_executable(Path::new(program)) {
        return Ok(program.to_string());
    }

    env::var_os("PATH")
        .and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(program))
                .find(|path| is_executable(path))
                .and_then(|path| path.to_str().map(String::from))
        })
        .ok_or_else(|| Error::from(Errno::ENOENT))
}

#[derive(Debug, PartialEq, Eq)]
/// A command line of the form `OPERAND... PROGRAM [ARGS...]`.
pub struct Invocation {
    /// The leading operands, in the order they were named.
    pub operands: Vec<String>,
    /// Path of the program to debug, resolved through `PATH`.
    pub program: String,
    /// Arguments passed on to the program.
    pub args: Vec<String>,
}

impl Invocation {
    /// Parse the process command line, expecting one leading operand per
    /// entry of `names` before the program.
    ///
    /// # Errors
    ///
    /// Will return `Err` and print a usage line if operands are missing, or
    /// if the program cannot be found.
    pub fn parse(names: &[&str]) -> Result<Self> {
        let mut argv = env::args();
        let this = argv.next().ok_or_else(|| Error::from(Errno::EINVAL))?;
        Self::from_args(argv, names).inspect_err(|_| {
            eprintln!("Usage: {this} {} program [args]", names.join(" "));
        })
    }

    fn from_args<I>(argv: I, names: &[&str]) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut argv = argv.into_iter();
        let operands: Vec<String> = argv.by_ref().take(names.len()).collect();
        if operands.len() < names.len() {
            return Err(Error::from(Errno::EINVAL));
        }

        let program = argv.next().ok_or_else(|| Error::from(Errno::EINVAL))?;
        Ok(Self {
            operands,
            program: resolve(&program)?,
            args: argv.collect(),
        })
    }

    /// `argv` of the program for `execve`, program path first.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an argument contains a NUL byte.
    pub fn argv(&self) -> Result<Vec<CString>> {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|arg| CString::new(arg.as_str()).map_err(Error::from))
            .collect()
    }
}

/// The environment of this process, in `execve` form.
///
/// # Errors
///
/// Will return `Err` if failing to convert environment variables to `CString`.
pub fn env() -> Result<Vec<CString>> {
    env::vars_os()
        .map(|(key, val)| {
            let e = "Error: OsString conversion failed";
            let key_str = key.into_string().map_err(|_| Error::from(e))?;
            let val_str = val.into_string().map_err(|_| Error::from(e))?;
            CString::new(format!("{key_str}={val_str}")).map_err(Error::from)
        })
        .collect()
}
