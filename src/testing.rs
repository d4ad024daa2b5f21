//! In-memory stand-ins for a traced process and for the debug information of a small program
//!
//! [`FakeTracee`] runs a scripted execution path: a list of `(pc, frame base)` states. Running
//! stops at the first state whose code byte is `int3` and reports a breakpoint trap with the pc
//! one byte past it, the way the kernel does. Stepping moves one state forward. Running off the
//! end of the path exits the process.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::addr::{Addr, StaticAddr};
use crate::consts::{INT3_BYTE, SI_KERNEL, TRAP_BRKPT, TRAP_TRACE, WORD_BYTES};
use crate::dbginfo::{DebugInfo, FunctionInfo, LineEntry, LineTable, Symbol, SymbolKind};
use crate::errors::{DebuggerError, Result};
use crate::memorymap::{MemoryPermissions, MemoryRegion, ProcessMemoryMap};
use crate::regs::{Register, RegisterSet};
use crate::tracee::{Tracee, WaitOutcome};
use crate::Word;

/// Filler for code bytes of the scripted path
pub const NOP: u8 = 0x90;

#[derive(Debug, Clone, Copy)]
struct State {
    pc: Addr,
    frame_base: Addr,
}

#[derive(Debug, Clone)]
pub struct FakeTracee {
    memory: BTreeMap<usize, u8>,
    regs: RegisterSet,
    path: Vec<State>,
    cursor: usize,
    signals: HashMap<usize, Signal>,
    pending: Option<WaitOutcome>,
    load_base: Addr,
    exit_code: i32,
    resumes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTraceeBuilder {
    memory: BTreeMap<usize, u8>,
    regs: RegisterSet,
    path: Vec<State>,
    start: usize,
    signals: HashMap<usize, Signal>,
    load_base: Addr,
    exit_code: i32,
}

impl FakeTraceeBuilder {
    pub fn bytes(mut self, addr: Addr, bytes: &[u8]) -> Self {
        for (idx, b) in bytes.iter().enumerate() {
            self.memory.insert(addr.usize() + idx, *b);
        }
        self
    }

    pub fn word(self, addr: Addr, value: Word) -> Self {
        self.bytes(addr, &value.to_le_bytes())
    }

    pub fn register(mut self, reg: Register, value: u64) -> Self {
        self.regs.set(reg, value);
        self
    }

    /// Appends a state to the execution path
    pub fn state(mut self, pc: Addr, frame_base: Addr) -> Self {
        self.path.push(State { pc, frame_base });
        self
    }

    /// Starts at the first state with this pc
    pub fn start_at(mut self, pc: Addr) -> Self {
        self.start = self
            .path
            .iter()
            .position(|s| s.pc == pc)
            .expect("start pc is not on the path");
        self
    }

    /// Delivers `sig` when execution reaches the first state with this pc
    pub fn signal_at(mut self, pc: Addr, sig: Signal) -> Self {
        let idx = self
            .path
            .iter()
            .position(|s| s.pc == pc)
            .expect("signal pc is not on the path");
        self.signals.insert(idx, sig);
        self
    }

    pub fn load_base(mut self, base: Addr) -> Self {
        self.load_base = base;
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn build(mut self) -> FakeTracee {
        for state in &self.path {
            for idx in 0..WORD_BYTES {
                self.memory.entry(state.pc.usize() + idx).or_insert(NOP);
            }
        }
        let mut tracee = FakeTracee {
            memory: self.memory,
            regs: self.regs,
            path: self.path,
            cursor: self.start,
            signals: self.signals,
            // what the kernel reports after the exec
            pending: Some(WaitOutcome::Stopped {
                signal: Signal::SIGTRAP,
                code: 0,
            }),
            load_base: self.load_base,
            exit_code: self.exit_code,
            resumes: 0,
        };
        tracee.apply_state();
        tracee
    }
}

impl FakeTracee {
    pub fn builder() -> FakeTraceeBuilder {
        FakeTraceeBuilder::default()
    }

    pub fn byte(&self, addr: Addr) -> u8 {
        self.memory[&addr.usize()]
    }

    pub fn pc(&self) -> Addr {
        self.regs.pc()
    }

    pub fn has_exited(&self) -> bool {
        self.cursor >= self.path.len()
    }

    /// Number of `cont` and `step` requests so far
    pub fn resumes(&self) -> usize {
        self.resumes
    }

    fn apply_state(&mut self) {
        if let Some(state) = self.path.get(self.cursor) {
            self.regs.set_pc(state.pc);
            self.regs.set(Register::rbp, state.frame_base.into());
        }
    }

    fn trap_at_cursor(&self) -> bool {
        self.path
            .get(self.cursor)
            .is_some_and(|s| self.memory.get(&s.pc.usize()) == Some(&INT3_BYTE))
    }

    fn hit_trap(&mut self, code: i32) {
        let pc = self.path[self.cursor].pc;
        self.regs.set_pc(pc + 1);
        self.pending = Some(WaitOutcome::Stopped {
            signal: Signal::SIGTRAP,
            code,
        });
    }

    fn exit(&mut self) {
        self.cursor = self.path.len();
        self.pending = Some(WaitOutcome::Exited(self.exit_code));
    }
}

impl Tracee for FakeTracee {
    fn pid(&self) -> Pid {
        Pid::from_raw(4242)
    }

    fn read_word(&self, addr: Addr) -> Result<Word> {
        let mut bytes = [0u8; WORD_BYTES];
        for (idx, b) in bytes.iter_mut().enumerate() {
            *b = *self
                .memory
                .get(&(addr.usize() + idx))
                .ok_or(DebuggerError::MemoryFault(addr))?;
        }
        Ok(Word::from_le_bytes(bytes))
    }

    fn write_word(&mut self, addr: Addr, value: Word) -> Result<()> {
        if (0..WORD_BYTES).any(|idx| !self.memory.contains_key(&(addr.usize() + idx))) {
            return Err(DebuggerError::MemoryFault(addr));
        }
        for (idx, b) in value.to_le_bytes().into_iter().enumerate() {
            self.memory.insert(addr.usize() + idx, b);
        }
        Ok(())
    }

    fn read_registers(&self) -> Result<RegisterSet> {
        Ok(self.regs)
    }

    fn write_registers(&mut self, regs: &RegisterSet) -> Result<()> {
        self.regs = *regs;
        Ok(())
    }

    fn cont(&mut self, _sig: Option<Signal>) -> Result<()> {
        self.resumes += 1;
        while self.cursor < self.path.len() {
            self.apply_state();
            if let Some(sig) = self.signals.remove(&self.cursor) {
                self.pending = Some(WaitOutcome::Stopped {
                    signal: sig,
                    code: 0,
                });
                return Ok(());
            }
            if self.trap_at_cursor() {
                self.hit_trap(TRAP_BRKPT);
                return Ok(());
            }
            self.cursor += 1;
        }
        self.exit();
        Ok(())
    }

    fn step(&mut self, _sig: Option<Signal>) -> Result<()> {
        self.resumes += 1;
        if self.has_exited() {
            self.exit();
            return Ok(());
        }
        if self.trap_at_cursor() {
            self.hit_trap(SI_KERNEL);
            return Ok(());
        }
        self.cursor += 1;
        if self.has_exited() {
            self.exit();
            return Ok(());
        }
        self.apply_state();
        if let Some(sig) = self.signals.remove(&self.cursor) {
            self.pending = Some(WaitOutcome::Stopped {
                signal: sig,
                code: 0,
            });
        } else {
            self.pending = Some(WaitOutcome::Stopped {
                signal: Signal::SIGTRAP,
                code: TRAP_TRACE,
            });
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<WaitOutcome> {
        Ok(self.pending.take().expect("wait without a resume"))
    }

    fn memory_map(&self) -> Result<ProcessMemoryMap> {
        Ok(ProcessMemoryMap::new(vec![MemoryRegion {
            start_address: self.load_base,
            end_address: self.load_base + 0x1000,
            permissions: MemoryPermissions {
                read: true,
                execute: true,
                private: true,
                ..Default::default()
            },
            offset: 0,
            path: Some("/tmp/fake".to_string()),
        }]))
    }

    fn kill(&mut self) -> Result<()> {
        self.cursor = self.path.len();
        self.pending = Some(WaitOutcome::Signaled(Signal::SIGKILL));
        Ok(())
    }
}

// ---------------- a small program ----------------------------------------------------------------

pub const SOURCE_FILE: &str = "/home/user/prog/test.c";

pub fn entry(addr: usize, line: u64) -> LineEntry {
    LineEntry {
        file: Rc::from(Path::new(SOURCE_FILE)),
        line,
        address: StaticAddr::from(addr),
        is_stmt: true,
        end_sequence: false,
    }
}

pub fn end_of_sequence(addr: usize) -> LineEntry {
    LineEntry {
        end_sequence: true,
        ..entry(addr, 0)
    }
}

/// Where the example program is loaded
pub const BIAS: usize = 0x5555_5555_4000;
/// Frame bases of main, f1, f2 and rec
pub const FB_MAIN: usize = 0x7ffe_0100;
pub const FB_F1: usize = 0x7ffe_00e0;
pub const FB_F2: usize = 0x7ffe_00c0;
pub const FB_REC: usize = 0x7ffe_00a0;
/// Where main returns to, outside of any known function
pub const LIBC_RETURN: usize = 0x9000;

/// Runtime address of a static address of the example program
pub fn rt(addr: usize) -> Addr {
    Addr::from(BIAS + addr)
}

/// Debug information of this program:
///
/// ```c
/// 3  int main() {
/// 4      f1();
/// 5      puts("done");
/// 6      return 0;
///    }
///
/// 10 void f1() {
/// 11     f2();
/// 12     puts("f1");
/// 13 }
///
/// 16 void f2() {
/// 17     int foo = 2;
/// 18 }
///
/// 20 void rec(int n) {
/// 21     if (n == 0) return;
/// 22     rec(n - 1);
/// 23     puts("rec");
/// 24 }
/// ```
pub fn program_info() -> DebugInfo {
    let functions = vec![
        FunctionInfo::new(0x10, "main", 0x1100usize.into(), 0x1140usize.into()),
        FunctionInfo::new(0x20, "f1", 0x1140usize.into(), 0x1170usize.into()),
        FunctionInfo::new(0x30, "f2", 0x1170usize.into(), 0x11a0usize.into()),
        FunctionInfo::new(0x40, "rec", 0x1200usize.into(), 0x1240usize.into()),
    ];
    let table = LineTable::new(
        Some("test.c".to_string()),
        vec![
            entry(0x1100, 3),
            entry(0x1108, 4),
            entry(0x1111, 5),
            entry(0x1118, 6),
            entry(0x1140, 10),
            entry(0x1148, 11),
            entry(0x1151, 12),
            entry(0x1158, 13),
            entry(0x1170, 16),
            entry(0x1178, 17),
            entry(0x1180, 18),
            end_of_sequence(0x11a0),
            entry(0x1200, 20),
            entry(0x1208, 21),
            entry(0x1210, 22),
            entry(0x1219, 23),
            entry(0x1220, 24),
            end_of_sequence(0x1240),
        ],
    );
    let symbols = vec![
        Symbol {
            name: "main".to_string(),
            kind: SymbolKind::Func,
            addr: 0x1100usize.into(),
        },
        Symbol {
            name: "counter".to_string(),
            kind: SymbolKind::Object,
            addr: 0x4010usize.into(),
        },
    ];
    DebugInfo::new(functions, vec![table], symbols, true)
}

/// The stack frames of main -> f1 -> f2 and the code at main's return address
fn with_call_stack(builder: FakeTraceeBuilder) -> FakeTraceeBuilder {
    builder
        .load_base(Addr::from(BIAS))
        .word(Addr::from(FB_MAIN), 0)
        .word(Addr::from(FB_MAIN + 8), rt(LIBC_RETURN).into())
        .word(Addr::from(FB_F1), FB_MAIN as Word)
        .word(Addr::from(FB_F1 + 8), rt(0x1111).into())
        .word(Addr::from(FB_F2), FB_F1 as Word)
        .word(Addr::from(FB_F2 + 8), rt(0x1151).into())
        .bytes(rt(LIBC_RETURN), &[NOP; WORD_BYTES])
}

/// A tracee running main -> f1 -> f2 and back, then exiting
pub fn program_tracee() -> FakeTraceeBuilder {
    let (main, f1, f2) = (Addr::from(FB_MAIN), Addr::from(FB_F1), Addr::from(FB_F2));
    with_call_stack(FakeTracee::builder())
        // main
        .state(rt(0x1100), main)
        .state(rt(0x1104), main)
        .state(rt(0x1108), main)
        .state(rt(0x110c), main)
        // f1, prologue runs with main's frame base
        .state(rt(0x1140), main)
        .state(rt(0x1141), main)
        .state(rt(0x1144), f1)
        .state(rt(0x1148), f1)
        .state(rt(0x114c), f1)
        // f2
        .state(rt(0x1170), f1)
        .state(rt(0x1171), f1)
        .state(rt(0x1174), f2)
        .state(rt(0x1178), f2)
        .state(rt(0x1180), f2)
        .state(rt(0x1184), f1)
        // back in f1
        .state(rt(0x1151), f1)
        .state(rt(0x1158), f1)
        .state(rt(0x115c), main)
        // back in main
        .state(rt(0x1111), main)
        .state(rt(0x1118), main)
        .state(rt(0x1120), main)
}

/// A tracee in `rec(1)` called from main, which calls `rec(0)`
pub fn recursive_tracee() -> FakeTraceeBuilder {
    let (main, rec1, rec0) = (
        Addr::from(FB_MAIN),
        Addr::from(FB_REC),
        Addr::from(FB_REC - 0x20),
    );
    with_call_stack(FakeTracee::builder())
        .word(rec1, FB_MAIN as Word)
        .word(rec1 + 8, rt(0x1111).into())
        .word(rec0, FB_REC as Word)
        .word(rec0 + 8, rt(0x1219).into())
        // rec(1)
        .state(rt(0x1208), rec1)
        .state(rt(0x120c), rec1)
        .state(rt(0x1210), rec1)
        .state(rt(0x1214), rec1)
        // rec(0)
        .state(rt(0x1200), rec1)
        .state(rt(0x1204), rec0)
        .state(rt(0x1208), rec0)
        .state(rt(0x120c), rec0)
        .state(rt(0x1230), rec1)
        // back in rec(1)
        .state(rt(0x1219), rec1)
        .state(rt(0x1220), rec1)
        .state(rt(0x1230), main)
        // main
        .state(rt(0x1111), main)
        .state(rt(0x1118), main)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fake_runs_to_traps_and_steps() {
        let mut t = program_tracee().build();
        assert_eq!(t.pc(), rt(0x1100));
        assert!(matches!(t.wait().unwrap(), WaitOutcome::Stopped { signal: Signal::SIGTRAP, .. }));

        t.step(None).unwrap();
        assert_eq!(
            t.wait().unwrap(),
            WaitOutcome::Stopped {
                signal: Signal::SIGTRAP,
                code: TRAP_TRACE
            }
        );
        assert_eq!(t.pc(), rt(0x1104));

        let word = t.read_word(rt(0x1148)).unwrap();
        t.write_word(rt(0x1148), (word & !0xff) | INT3_BYTE as Word)
            .unwrap();
        t.cont(None).unwrap();
        assert_eq!(
            t.wait().unwrap(),
            WaitOutcome::Stopped {
                signal: Signal::SIGTRAP,
                code: TRAP_BRKPT
            }
        );
        assert_eq!(t.pc(), rt(0x1149));

        t.write_word(rt(0x1148), word).unwrap();
        t.cont(None).unwrap();
        assert_eq!(t.wait().unwrap(), WaitOutcome::Exited(0));
        assert!(t.has_exited());
        assert_eq!(t.resumes(), 3);
    }

    #[test]
    fn test_fake_memory_faults() {
        let mut t = FakeTracee::builder().build();
        assert!(matches!(
            t.read_word(Addr::from(0x10usize)),
            Err(DebuggerError::MemoryFault(_))
        ));
        assert!(t.write_word(Addr::from(0x10usize), 1).is_err());
    }
}
