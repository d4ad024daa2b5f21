//! # Breakpoints
//!
//! A software breakpoint replaces the first byte of an instruction with `int3`. The original byte
//! is saved when the breakpoint is enabled and spliced back in when it is disabled.
//!
//! While a [`Breakpoint`] is enabled, the byte in the tracee's memory is [`INT3_BYTE`]. While it
//! is disabled, the byte is the original one.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::addr::Addr;
use crate::consts::WORD_BYTES;
use crate::errors::{DebuggerError, Result};
use crate::tracee::Tracee;
use crate::Word;

pub use crate::consts::INT3_BYTE;

pub const WORD_MASK: Word = 0x00000000000000ff;
pub const WORD_MASK_INV: Word = !WORD_MASK;
pub const INT3: Word = INT3_BYTE as Word;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Breakpoint {
    addr: Addr,
    saved_data: Option<u8>,
}

impl Breakpoint {
    pub fn new(addr: Addr) -> Self {
        Self {
            addr,
            saved_data: None,
        }
    }

    #[inline]
    pub fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.saved_data.is_some()
    }

    /// The original byte, if the breakpoint is enabled
    #[inline]
    pub fn saved_data(&self) -> Option<u8> {
        self.saved_data
    }

    /// Writes the trap instruction, saving the original byte first
    ///
    /// Does nothing if the breakpoint is already enabled.
    pub fn enable(&mut self, tracee: &mut impl Tracee) -> Result<()> {
        if self.is_enabled() {
            return Ok(());
        }

        let data_word = tracee.read_word(self.addr)?;
        trace!("original word: {data_word:016x}");
        let saved = (data_word & WORD_MASK) as u8;
        let data_word_modified = (data_word & WORD_MASK_INV) | INT3;
        trace!("modified word: {data_word_modified:016x}");
        tracee.write_word(self.addr, data_word_modified)?;
        self.saved_data = Some(saved);

        Ok(())
    }

    /// Restores the original byte
    ///
    /// Does nothing if the breakpoint is already disabled.
    pub fn disable(&mut self, tracee: &mut impl Tracee) -> Result<()> {
        let Some(saved) = self.saved_data else {
            return Ok(());
        };

        let data_word = tracee.read_word(self.addr)?;
        trace!("breakpo: {data_word:016x}");
        let data_word_restored = (data_word & WORD_MASK_INV) | saved as Word;
        trace!("restore: {data_word_restored:016x}");
        tracee.write_word(self.addr, data_word_restored)?;
        self.saved_data = None;

        Ok(())
    }
}

/// All breakpoints of a session, keyed by their runtime address
#[derive(Debug, Clone, Default)]
pub struct Breakpoints {
    sites: HashMap<Addr, Breakpoint>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn contains(&self, addr: Addr) -> bool {
        self.sites.contains_key(&addr)
    }

    pub fn get(&self, addr: Addr) -> Option<&Breakpoint> {
        self.sites.get(&addr)
    }

    pub fn is_enabled_at(&self, addr: Addr) -> bool {
        self.get(addr).is_some_and(Breakpoint::is_enabled)
    }

    /// Addresses of all breakpoints, sorted
    pub fn addrs(&self) -> Vec<Addr> {
        let mut addrs: Vec<Addr> = self.sites.keys().copied().collect();
        addrs.sort();
        addrs
    }

    /// Creates and enables a breakpoint at `addr`
    ///
    /// Returns `false` if a breakpoint already exists there, in which case nothing changes.
    pub fn insert(&mut self, tracee: &mut impl Tracee, addr: Addr) -> Result<bool> {
        if self.contains(addr) {
            debug!("breakpoint at {addr} already exists");
            return Ok(false);
        }
        let mut bp = Breakpoint::new(addr);
        bp.enable(tracee)?;
        self.sites.insert(addr, bp);
        Ok(true)
    }

    /// Disables and forgets the breakpoint at `addr`
    ///
    /// # Errors
    ///
    /// [`DebuggerError::UnknownBreakpoint`] if there is no breakpoint at `addr`. If restoring
    /// the original byte fails, the breakpoint stays tracked.
    pub fn remove(&mut self, tracee: &mut impl Tracee, addr: Addr) -> Result<()> {
        let bp = self
            .sites
            .get_mut(&addr)
            .ok_or(DebuggerError::UnknownBreakpoint(addr))?;
        bp.disable(tracee)?;
        self.sites.remove(&addr);
        Ok(())
    }

    /// Forgets a breakpoint without touching memory, for a tracee that no longer exists
    pub fn forget(&mut self, addr: Addr) {
        if self.sites.remove(&addr).is_none() {
            warn!("forgot a breakpoint at {addr} that did not exist");
        }
    }

    pub fn clear(&mut self) {
        self.sites.clear();
    }

    pub fn disable_at(&mut self, tracee: &mut impl Tracee, addr: Addr) -> Result<()> {
        self.sites
            .get_mut(&addr)
            .ok_or(DebuggerError::UnknownBreakpoint(addr))?
            .disable(tracee)
    }

    pub fn enable_at(&mut self, tracee: &mut impl Tracee, addr: Addr) -> Result<()> {
        self.sites
            .get_mut(&addr)
            .ok_or(DebuggerError::UnknownBreakpoint(addr))?
            .enable(tracee)
    }

    /// Replaces trap bytes of enabled breakpoints in a word read at `addr` with the original
    /// bytes
    pub fn hide_traps(&self, addr: Addr, mut word: Word) -> Word {
        for idx in 0..WORD_BYTES {
            let Some(byte_addr) = addr.checked_add(idx) else {
                break;
            };
            if let Some(saved) = self.get(byte_addr).and_then(Breakpoint::saved_data) {
                word = replace_byte(word, idx, saved);
            }
        }
        word
    }

    /// Prepares a word the user wants written at `addr`
    ///
    /// For every enabled breakpoint inside the word, the new byte becomes the saved original
    /// byte and the trap byte stays in place.
    pub fn keep_traps(&mut self, addr: Addr, mut word: Word) -> Word {
        for idx in 0..WORD_BYTES {
            let Some(byte_addr) = addr.checked_add(idx) else {
                break;
            };
            if let Some(bp) = self.sites.get_mut(&byte_addr) {
                if bp.is_enabled() {
                    bp.saved_data = Some(byte_at(word, idx));
                    word = replace_byte(word, idx, INT3_BYTE);
                }
            }
        }
        word
    }
}

#[inline]
fn byte_at(word: Word, idx: usize) -> u8 {
    (word >> (idx * 8)) as u8
}

#[inline]
fn replace_byte(word: Word, idx: usize, byte: u8) -> Word {
    let shift = idx * 8;
    (word & !(WORD_MASK << shift)) | ((byte as Word) << shift)
}
