//! # Variables
//!
//! Evaluates the DWARF location expressions of local variables. The expression machine itself
//! is [`gimli::Evaluation`]; whenever it needs something from the tracee (a register, a word of
//! memory, the frame base) it asks a [`LocationContext`].

use std::fmt::Display;

use gimli::{EvaluationResult, Location};
use tracing::trace;

use crate::addr::{Addr, StaticAddr};
use crate::consts::CFA_OFFSET;
use crate::dbginfo::{FunctionInfo, LocationExpr, VariableInfo};
use crate::errors::{DebuggerError, Result};
use crate::regs::{Register, RegisterSet};
use crate::tracee::Tracee;
use crate::translate::AddressTranslator;
use crate::Word;

/// Answers the questions a location expression asks about the stopped tracee
pub trait LocationContext {
    /// Value of the register with this DWARF number
    fn register(&mut self, dwarf_reg: u16) -> Result<u64>;
    /// `size` bytes of memory at `addr`, zero extended
    fn read_memory(&mut self, addr: u64, size: u8) -> Result<u64>;
    /// The canonical frame address of the current frame
    fn call_frame_cfa(&mut self) -> Result<u64>;
    /// Relocates an address from the debug information
    fn relocate(&mut self, addr: u64) -> u64;
}

/// Where the value of a variable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation {
    Address(Addr),
    Register(Register),
}

impl Display for VariableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Register(reg) => write!(f, "reg {reg}"),
        }
    }
}

/// A variable together with its current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableValue {
    pub name: String,
    pub location: VariableLocation,
    pub value: Word,
}

impl Display for VariableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) = {:#x}", self.name, self.location, self.value)
    }
}

/// Evaluates a location expression
///
/// `frame_base` is the `DW_AT_frame_base` of the enclosing function, needed by expressions
/// like `DW_OP_fbreg`.
pub fn evaluate_location(
    loc: &LocationExpr,
    frame_base: Option<&LocationExpr>,
    ctx: &mut dyn LocationContext,
) -> Result<VariableLocation> {
    let mut evaluation = loc.expr.clone().evaluation(loc.encoding);
    let mut res = evaluation.evaluate()?;
    loop {
        res = match res {
            EvaluationResult::Complete => break,
            EvaluationResult::RequiresMemory { address, size, .. } => {
                let value = ctx.read_memory(address, size)?;
                evaluation.resume_with_memory(gimli::Value::Generic(value))?
            }
            EvaluationResult::RequiresRegister { register, .. } => {
                let value = ctx.register(register.0)?;
                evaluation.resume_with_register(gimli::Value::Generic(value))?
            }
            EvaluationResult::RequiresFrameBase => {
                let base = match frame_base {
                    None => {
                        return Err(DebuggerError::UnsupportedLocation(
                            "frame base required but the function has none".to_string(),
                        ))
                    }
                    Some(fb) => match evaluate_location(fb, None, ctx)? {
                        VariableLocation::Address(addr) => addr.u64(),
                        VariableLocation::Register(reg) => ctx.register(dwarf_number(reg)?)?,
                    },
                };
                evaluation.resume_with_frame_base(base)?
            }
            EvaluationResult::RequiresCallFrameCfa => {
                let cfa = ctx.call_frame_cfa()?;
                evaluation.resume_with_call_frame_cfa(cfa)?
            }
            EvaluationResult::RequiresRelocatedAddress(addr) => {
                let relocated = ctx.relocate(addr);
                evaluation.resume_with_relocated_address(relocated)?
            }
            other => {
                return Err(DebuggerError::UnsupportedLocation(format!(
                    "expression needs {other:?}"
                )))
            }
        };
    }

    let pieces = evaluation.result();
    trace!("location pieces: {pieces:?}");
    match pieces.first().map(|p| &p.location) {
        Some(Location::Address { address }) => Ok(VariableLocation::Address((*address).into())),
        Some(Location::Register { register }) => {
            Ok(VariableLocation::Register(Register::try_from(*register)?))
        }
        Some(other) => Err(DebuggerError::UnsupportedLocation(format!("{other:?}"))),
        None => Err(DebuggerError::UnsupportedLocation(
            "expression has no result".to_string(),
        )),
    }
}

fn dwarf_number(reg: Register) -> Result<u16> {
    crate::regs::REGISTER_DESCRIPTORS[reg.slot()]
        .dwarf
        .ok_or_else(|| DebuggerError::UnsupportedLocation(format!("{reg} has no DWARF number")))
}

/// A [`LocationContext`] backed by a stopped tracee
pub struct TraceeContext<'a, T: Tracee> {
    tracee: &'a T,
    regs: RegisterSet,
    translator: &'a AddressTranslator,
}

impl<'a, T: Tracee> TraceeContext<'a, T> {
    pub fn new(tracee: &'a T, translator: &'a AddressTranslator) -> Result<Self> {
        Ok(Self {
            regs: tracee.read_registers()?,
            tracee,
            translator,
        })
    }

    /// Evaluates where `var` lives and reads its value
    pub fn read_variable(
        &mut self,
        func: &FunctionInfo,
        var: &VariableInfo,
    ) -> Result<VariableValue> {
        let loc = var.location.as_ref().ok_or_else(|| {
            DebuggerError::UnsupportedLocation(format!("{} has no location", var.name))
        })?;
        let location = evaluate_location(loc, func.frame_base.as_ref(), self)?;
        let value = match location {
            VariableLocation::Address(addr) => self.tracee.read_word(addr)?,
            VariableLocation::Register(reg) => self.regs.get(reg),
        };
        Ok(VariableValue {
            name: var.name.clone(),
            location,
            value,
        })
    }
}

impl<T: Tracee> LocationContext for TraceeContext<'_, T> {
    fn register(&mut self, dwarf_reg: u16) -> Result<u64> {
        Ok(self.regs.get(Register::from_dwarf(dwarf_reg)?))
    }

    fn read_memory(&mut self, addr: u64, size: u8) -> Result<u64> {
        let word = self.tracee.read_word(addr.into())?;
        Ok(match size {
            0 | 8.. => word,
            n => word & ((1u64 << (u32::from(n) * 8)) - 1),
        })
    }

    fn call_frame_cfa(&mut self) -> Result<u64> {
        let frame_base = self.regs.get(Register::rbp);
        frame_base
            .checked_add(CFA_OFFSET)
            .ok_or(DebuggerError::MemoryFault(frame_base.into()))
    }

    fn relocate(&mut self, addr: u64) -> u64 {
        self.translator.to_runtime(StaticAddr::from(addr)).u64()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dbginfo::VariableKind;
    use crate::testing::*;
    use gimli::constants::{DW_OP_addr, DW_OP_call_frame_cfa, DW_OP_fbreg, DW_OP_reg0, DW_OP_reg6};

    const ENCODING: gimli::Encoding = gimli::Encoding {
        format: gimli::Format::Dwarf32,
        version: 4,
        address_size: 8,
    };

    fn expr(bytes: &[u8]) -> LocationExpr {
        LocationExpr::new(bytes, ENCODING)
    }

    fn var(name: &str, bytes: &[u8]) -> VariableInfo {
        VariableInfo {
            name: name.to_string(),
            kind: VariableKind::Variable,
            location: Some(expr(bytes)),
        }
    }

    fn function(frame_base: &[u8]) -> FunctionInfo {
        let mut f = FunctionInfo::new(0x30, "f2", 0x1170usize.into(), 0x11a0usize.into());
        f.frame_base = Some(expr(frame_base));
        f
    }

    fn tracee() -> FakeTracee {
        program_tracee()
            .start_at(rt(0x1178))
            // int foo = 2, at rbp - 20
            .word(Addr::from(FB_F2 - 20), 0xdead_0000_0000_0002)
            .word(rt(0x4010), 77)
            .register(Register::rax, 0x2a)
            .build()
    }

    #[test]
    fn test_frame_base_relative_with_cfa() {
        let tracee = tracee();
        let translator = AddressTranslator::new(Addr::from(BIAS));
        let mut ctx = TraceeContext::new(&tracee, &translator).unwrap();

        // fbreg -36 with frame base = cfa = rbp + 16
        let value = ctx
            .read_variable(
                &function(&[DW_OP_call_frame_cfa.0]),
                &var("foo", &[DW_OP_fbreg.0, 0x5c]),
            )
            .unwrap();
        assert_eq!(
            value.location,
            VariableLocation::Address(Addr::from(FB_F2 - 20))
        );
        assert_eq!(value.value, 0xdead_0000_0000_0002);
    }

    #[test]
    fn test_cfa_of_frame_base_at_the_end_of_memory() {
        let tracee = FakeTracee::builder()
            .state(rt(0x1178), Addr::from(usize::MAX - 3))
            .build();
        let translator = AddressTranslator::new(Addr::from(BIAS));
        let mut ctx = TraceeContext::new(&tracee, &translator).unwrap();

        assert!(matches!(
            ctx.call_frame_cfa(),
            Err(DebuggerError::MemoryFault(_))
        ));
        assert!(ctx
            .read_variable(
                &function(&[DW_OP_call_frame_cfa.0]),
                &var("foo", &[DW_OP_fbreg.0, 0x5c]),
            )
            .is_err());
    }

    #[test]
    fn test_frame_base_in_register() {
        let tracee = tracee();
        let translator = AddressTranslator::new(Addr::from(BIAS));
        let mut ctx = TraceeContext::new(&tracee, &translator).unwrap();

        // fbreg -20 with frame base = rbp
        let value = ctx
            .read_variable(&function(&[DW_OP_reg6.0]), &var("foo", &[DW_OP_fbreg.0, 0x6c]))
            .unwrap();
        assert_eq!(
            value.location,
            VariableLocation::Address(Addr::from(FB_F2 - 20))
        );
    }

    #[test]
    fn test_register_location_does_not_read_memory() {
        let tracee = tracee();
        let translator = AddressTranslator::new(Addr::from(BIAS));
        let mut ctx = TraceeContext::new(&tracee, &translator).unwrap();

        let value = ctx
            .read_variable(&function(&[DW_OP_reg6.0]), &var("ret", &[DW_OP_reg0.0]))
            .unwrap();
        assert_eq!(value.location, VariableLocation::Register(Register::rax));
        assert_eq!(value.value, 0x2a);
    }

    #[test]
    fn test_static_address_is_relocated() {
        let tracee = tracee();
        let translator = AddressTranslator::new(Addr::from(BIAS));
        let mut ctx = TraceeContext::new(&tracee, &translator).unwrap();

        let mut bytes = vec![DW_OP_addr.0];
        bytes.extend_from_slice(&0x4010u64.to_le_bytes());
        let value = ctx
            .read_variable(&function(&[DW_OP_reg6.0]), &var("counter", &bytes))
            .unwrap();
        assert_eq!(value.location, VariableLocation::Address(rt(0x4010)));
        assert_eq!(value.value, 77);
    }

    #[test]
    fn test_missing_location_and_frame_base() {
        let tracee = tracee();
        let translator = AddressTranslator::new(Addr::from(BIAS));
        let mut ctx = TraceeContext::new(&tracee, &translator).unwrap();

        let no_loc = VariableInfo {
            location: None,
            ..var("x", &[])
        };
        assert!(matches!(
            ctx.read_variable(&function(&[DW_OP_reg6.0]), &no_loc),
            Err(DebuggerError::UnsupportedLocation(_))
        ));

        let no_fb = FunctionInfo::new(0x30, "f2", 0x1170usize.into(), 0x11a0usize.into());
        assert!(matches!(
            ctx.read_variable(&no_fb, &var("foo", &[DW_OP_fbreg.0, 0x6c])),
            Err(DebuggerError::UnsupportedLocation(_))
        ));
    }

    #[test]
    fn test_read_memory_truncates_to_size() {
        let tracee = tracee();
        let translator = AddressTranslator::new(Addr::from(BIAS));
        let mut ctx = TraceeContext::new(&tracee, &translator).unwrap();
        let addr = (FB_F2 - 20) as u64;
        assert_eq!(ctx.read_memory(addr, 4).unwrap(), 2);
        assert_eq!(ctx.read_memory(addr, 8).unwrap(), 0xdead_0000_0000_0002);
    }
}
