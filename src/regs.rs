//! # Registers
//!
//! The register file of an x86_64 tracee, as a snapshot in the layout of the kernel's
//! `user_regs_struct`. Registers are always read and written as a whole [`RegisterSet`], one
//! trace call per snapshot.
//!
//! Debug information refers to registers by their DWARF number, which differs from the snapshot
//! layout. The static [`REGISTER_DESCRIPTORS`] table maps both names and DWARF numbers to the
//! same [`Register`] slot.

use std::fmt::Display;
use std::str::FromStr;

use nix::libc::user_regs_struct;

use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};

/// Number of registers in a [`RegisterSet`]
pub const REGISTER_COUNT: usize = 27;

/// A register slot, in the order of the kernel's `user_regs_struct`
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    r15,
    r14,
    r13,
    r12,
    rbp,
    rbx,
    r11,
    r10,
    r9,
    r8,
    rax,
    rcx,
    rdx,
    rsi,
    rdi,
    orig_rax,
    rip,
    cs,
    eflags,
    rsp,
    ss,
    fs_base,
    gs_base,
    ds,
    es,
    fs,
    gs,
}

/// Describes one [`Register`]: its DWARF number (if it has one) and its name
#[derive(Debug, Clone, Copy)]
pub struct RegisterDescriptor {
    pub register: Register,
    pub dwarf: Option<u16>,
    pub name: &'static str,
}

const fn desc(register: Register, dwarf: Option<u16>, name: &'static str) -> RegisterDescriptor {
    RegisterDescriptor {
        register,
        dwarf,
        name,
    }
}

/// All registers, in snapshot order
pub static REGISTER_DESCRIPTORS: [RegisterDescriptor; REGISTER_COUNT] = [
    desc(Register::r15, Some(15), "r15"),
    desc(Register::r14, Some(14), "r14"),
    desc(Register::r13, Some(13), "r13"),
    desc(Register::r12, Some(12), "r12"),
    desc(Register::rbp, Some(6), "rbp"),
    desc(Register::rbx, Some(3), "rbx"),
    desc(Register::r11, Some(11), "r11"),
    desc(Register::r10, Some(10), "r10"),
    desc(Register::r9, Some(9), "r9"),
    desc(Register::r8, Some(8), "r8"),
    desc(Register::rax, Some(0), "rax"),
    desc(Register::rcx, Some(2), "rcx"),
    desc(Register::rdx, Some(1), "rdx"),
    desc(Register::rsi, Some(4), "rsi"),
    desc(Register::rdi, Some(5), "rdi"),
    desc(Register::orig_rax, None, "orig_rax"),
    desc(Register::rip, None, "rip"),
    desc(Register::cs, Some(51), "cs"),
    desc(Register::eflags, Some(49), "eflags"),
    desc(Register::rsp, Some(7), "rsp"),
    desc(Register::ss, Some(52), "ss"),
    desc(Register::fs_base, Some(58), "fs_base"),
    desc(Register::gs_base, Some(59), "gs_base"),
    desc(Register::ds, Some(53), "ds"),
    desc(Register::es, Some(50), "es"),
    desc(Register::fs, Some(54), "fs"),
    desc(Register::gs, Some(55), "gs"),
];

impl Register {
    /// Index of this register in a [`RegisterSet`]
    #[inline]
    pub fn slot(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        REGISTER_DESCRIPTORS[self.slot()].name
    }

    pub fn from_name(name: &str) -> Result<Self> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.register)
            .ok_or_else(|| DebuggerError::UnknownRegisterName(name.to_string()))
    }

    pub fn from_dwarf(number: u16) -> Result<Self> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.dwarf == Some(number))
            .map(|d| d.register)
            .ok_or(DebuggerError::UnknownDwarfRegister(number))
    }
}

impl FromStr for Register {
    type Err = DebuggerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<gimli::Register> for Register {
    type Error = DebuggerError;

    fn try_from(value: gimli::Register) -> std::result::Result<Self, Self::Error> {
        Self::from_dwarf(value.0)
    }
}

/// A full snapshot of the registers of a stopped tracee
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSet([u64; REGISTER_COUNT]);

impl RegisterSet {
    #[inline]
    pub fn get(&self, reg: Register) -> u64 {
        self.0[reg.slot()]
    }

    #[inline]
    pub fn set(&mut self, reg: Register, value: u64) {
        self.0[reg.slot()] = value;
    }

    pub fn pc(&self) -> Addr {
        self.get(Register::rip).into()
    }

    pub fn set_pc(&mut self, pc: Addr) {
        self.set(Register::rip, pc.into());
    }

    pub fn frame_base(&self) -> Addr {
        self.get(Register::rbp).into()
    }

    /// Iterates over all registers in snapshot order
    pub fn iter(&self) -> impl Iterator<Item = (Register, u64)> + '_ {
        REGISTER_DESCRIPTORS
            .iter()
            .map(|d| (d.register, self.get(d.register)))
    }
}

impl std::fmt::Debug for RegisterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (reg, value) in self.iter() {
            map.entry(&reg.name(), &format_args!("{value:#018x}"));
        }
        map.finish()
    }
}

impl Display for RegisterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (reg, value) in self.iter() {
            writeln!(f, "{:>10} {value:#018x}", reg.name())?;
        }
        Ok(())
    }
}

impl From<user_regs_struct> for RegisterSet {
    fn from(r: user_regs_struct) -> Self {
        RegisterSet([
            r.r15, r.r14, r.r13, r.r12, r.rbp, r.rbx, r.r11, r.r10, r.r9, r.r8, r.rax, r.rcx, r.rdx,
            r.rsi, r.rdi, r.orig_rax, r.rip, r.cs, r.eflags, r.rsp, r.ss, r.fs_base, r.gs_base,
            r.ds, r.es, r.fs, r.gs,
        ])
    }
}

impl From<RegisterSet> for user_regs_struct {
    fn from(set: RegisterSet) -> Self {
        let [r15, r14, r13, r12, rbp, rbx, r11, r10, r9, r8, rax, rcx, rdx, rsi, rdi, orig_rax, rip, cs, eflags, rsp, ss, fs_base, gs_base, ds, es, fs, gs] =
            set.0;
        user_regs_struct {
            r15,
            r14,
            r13,
            r12,
            rbp,
            rbx,
            r11,
            r10,
            r9,
            r8,
            rax,
            rcx,
            rdx,
            rsi,
            rdi,
            orig_rax,
            rip,
            cs,
            eflags,
            rsp,
            ss,
            fs_base,
            gs_base,
            ds,
            es,
            fs,
            gs,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_descriptor_order_matches_slots() {
        for (idx, d) in REGISTER_DESCRIPTORS.iter().enumerate() {
            assert_eq!(d.register.slot(), idx, "{} is out of order", d.name);
        }
    }

    #[test]
    fn test_lookup_by_name_and_dwarf() {
        assert_eq!(Register::from_name("rax").unwrap(), Register::rax);
        assert_eq!("rbp".parse::<Register>().unwrap(), Register::rbp);
        assert_eq!(Register::from_dwarf(6).unwrap(), Register::rbp);
        assert_eq!(Register::from_dwarf(7).unwrap(), Register::rsp);
        assert_eq!(
            Register::try_from(gimli::Register(1)).unwrap(),
            Register::rdx
        );
        assert!(matches!(
            Register::from_name("xmm0"),
            Err(DebuggerError::UnknownRegisterName(n)) if n == "xmm0"
        ));
        assert!(matches!(
            Register::from_dwarf(16),
            Err(DebuggerError::UnknownDwarfRegister(16))
        ));
    }

    #[test]
    fn test_register_set_roundtrip_through_user_regs() {
        let mut set = RegisterSet::default();
        for (idx, d) in REGISTER_DESCRIPTORS.iter().enumerate() {
            set.set(d.register, 0x1000 + idx as u64);
        }
        let raw: user_regs_struct = set.into();
        assert_eq!(raw.rip, 0x1000 + Register::rip.slot() as u64);
        assert_eq!(raw.gs, 0x1000 + Register::gs.slot() as u64);
        assert_eq!(RegisterSet::from(raw), set);
    }

    #[test]
    fn test_pc_and_frame_base() {
        let mut set = RegisterSet::default();
        set.set_pc(Addr::from(0x401000usize));
        set.set(Register::rbp, 0x7ffe0000);
        assert_eq!(set.pc(), Addr::from(0x401000usize));
        assert_eq!(set.frame_base(), Addr::from(0x7ffe0000usize));
    }
}
