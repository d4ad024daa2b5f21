//! # Address translation
//!
//! A position independent executable is loaded at some base address chosen at runtime, while its
//! debug information is written relative to address zero. The difference is the load bias.
//! Every address going from the kernel into a debug info query passes through
//! [`AddressTranslator::to_static`], and every address coming out of the debug info passes
//! through [`AddressTranslator::to_runtime`].

use tracing::{debug, info};

use crate::addr::{Addr, StaticAddr};
use crate::errors::{DebuggerError, Result};
use crate::tracee::Tracee;

/// Converts between [`StaticAddr`] and [`Addr`] with a fixed load bias
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTranslator {
    bias: Addr,
}

impl AddressTranslator {
    pub fn new(bias: Addr) -> Self {
        Self { bias }
    }

    /// Learns the load bias from a stopped tracee
    ///
    /// For a position independent executable, the bias is the start of the first mapping in the
    /// tracee's memory map. Otherwise the executable is not relocated and the bias is zero.
    ///
    /// # Errors
    ///
    /// Fails if the memory map of the tracee cannot be read.
    pub fn resolve(tracee: &impl Tracee, position_independent: bool) -> Result<Self> {
        let bias = if position_independent {
            tracee.memory_map()?.base_address().unwrap_or_default()
        } else {
            debug!("executable is not position independent, no load bias");
            Addr::default()
        };
        info!("load bias is {bias}");
        Ok(Self::new(bias))
    }

    pub fn bias(&self) -> Addr {
        self.bias
    }

    /// Runtime address to the address used by the debug information
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::AddressOutOfRange`] if `addr` lies below the load bias.
    pub fn to_static(&self, addr: Addr) -> Result<StaticAddr> {
        addr.checked_sub(self.bias)
            .map(StaticAddr::from)
            .ok_or(DebuggerError::AddressOutOfRange {
                addr,
                bias: self.bias,
            })
    }

    /// Address used by the debug information to the runtime address
    pub fn to_runtime(&self, addr: StaticAddr) -> Addr {
        self.bias + addr.usize()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::FakeTracee;

    #[test]
    fn test_roundtrip() {
        let tr = AddressTranslator::new(Addr::from(0x5555_5555_4000usize));
        for raw in [0usize, 1, 0x1139, 0x2000, 0xffff_ffff] {
            let s = StaticAddr::from(raw);
            assert_eq!(tr.to_static(tr.to_runtime(s)).unwrap(), s);
        }
        for raw in [0x5555_5555_4000usize, 0x5555_5555_5139, 0x7fff_ffff_0000] {
            let a = Addr::from(raw);
            assert_eq!(tr.to_runtime(tr.to_static(a).unwrap()), a);
        }
    }

    #[test]
    fn test_below_bias_is_an_error() {
        let tr = AddressTranslator::new(Addr::from(0x4000usize));
        assert!(matches!(
            tr.to_static(Addr::from(0x3fffusize)),
            Err(DebuggerError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn test_zero_bias_is_identity() {
        let tr = AddressTranslator::new(Addr::default());
        assert_eq!(
            tr.to_static(Addr::from(0x401136usize)).unwrap(),
            StaticAddr::from(0x401136usize)
        );
    }

    #[test]
    fn test_resolve_from_memory_map() {
        let tracee = FakeTracee::builder()
            .load_base(Addr::from(0x5555_5555_4000usize))
            .build();
        let pie = AddressTranslator::resolve(&tracee, true).unwrap();
        assert_eq!(pie.bias(), Addr::from(0x5555_5555_4000usize));
        let fixed = AddressTranslator::resolve(&tracee, false).unwrap();
        assert_eq!(fixed.bias(), Addr::default());
    }
}
