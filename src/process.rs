use goblin::elf::{self, header::ET_DYN, section_header::SHN_UNDEF, sym::STT_OBJECT};
use log::debug;
use nix::{errno::Errno, unistd::Pid};
use procfs::process::{MMapPath, Process};
use std::{collections::HashMap, fs, path::Path};

use crate::diag::{Error, Result};

const PAGE_MASK: u64 = !0xfff;

/// Symbols of the traced executable, relocated to where it is loaded.
pub struct Image {
    entry: u64,
    symbols: HashMap<String, u64>,
}

impl Image {
    /// Parse the executable at `path`, loaded in process `pid`.
    ///
    /// # Errors
    ///
    /// Will return `Err` upon failure to read or parse the ELF file, or to
    /// find the executable's mapping for a position-independent binary.
    pub fn build(path: &str, pid: Pid) -> Result<Self> {
        let buffer = fs::read(Path::new(path))?;
        let elf = elf::Elf::parse(&buffer)?;

        let bias = if elf.header.e_type == ET_DYN {
            let lowest = elf
                .program_headers
                .iter()
                .filter(|ph| ph.p_type == elf::program_header::PT_LOAD)
                .map(|ph| ph.p_vaddr & PAGE_MASK)
                .min()
                .ok_or_else(|| Error::from(Errno::ENOEXEC))?;
            Self::load_address(path, pid)? - lowest
        } else {
            0
        };

        let mut symbols = HashMap::new();
        let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
        for (syms, strtab) in tables {
            for sym in syms.iter() {
                if sym.st_shndx == SHN_UNDEF as usize || sym.st_value == 0 {
                    continue;
                }
                if !sym.is_function() && sym.st_type() != STT_OBJECT {
                    continue;
                }
                if let Some(name) = strtab.get_at(sym.st_name) {
                    symbols
                        .entry(name.to_string())
                        .or_insert(sym.st_value + bias);
                }
            }
        }
        debug!(
            "{path}: {} symbols, load bias {bias:#x}",
            symbols.len()
        );

        Ok(Self {
            entry: elf.header.e_entry + bias,
            symbols,
        })
    }

    fn load_address(path: &str, pid: Pid) -> Result<u64> {
        let absolute_path = fs::canonicalize(path)?;

        let process = Process::new(pid.into())?;
        process
            .maps()?
            .into_iter()
            .find(|map| {
                map.offset == 0
                    && matches!(&map.pathname, MMapPath::Path(buf) if buf == &absolute_path)
            })
            .map(|map| map.address.0)
            .ok_or_else(|| Error::from(Errno::ENODATA))
    }

    #[must_use]
    /// Runtime address of the program entry point.
    pub fn entry(&self) -> u64 {
        self.entry
    }

    #[must_use]
    /// Runtime address of the function or object called `name`.
    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }
}
