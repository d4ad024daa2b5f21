//! # Addresses
//!
//! Two address spaces meet in a debugger: what the kernel reports for the running process
//! ([`Addr`], a runtime address) and what the debug information of the executable encodes
//! ([`StaticAddr`]). They are separate types so they cannot be mixed up by accident. The only
//! way to convert between them is the [`AddressTranslator`](crate::translate::AddressTranslator).

use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::Word;

pub type RawPointer = *mut std::ffi::c_void;

/// An address in the address space of the running tracee
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Addr(usize);

/// An address as recorded in the debug information of the executable
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct StaticAddr(usize);

impl Addr {
    pub fn usize(&self) -> usize {
        self.0
    }
    pub fn u64(&self) -> u64 {
        self.0 as u64
    }
    pub fn raw_pointer(&self) -> RawPointer {
        self.0 as RawPointer
    }
    pub fn checked_sub(&self, rhs: Addr) -> Option<usize> {
        self.0.checked_sub(rhs.0)
    }
    /// `None` if the result would wrap around the end of the address space
    pub fn checked_add(&self, rhs: usize) -> Option<Addr> {
        self.0.checked_add(rhs).map(Self)
    }
}

impl StaticAddr {
    pub fn usize(&self) -> usize {
        self.0
    }
    pub fn u64(&self) -> u64 {
        self.0 as u64
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", { self.0 })
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Display for StaticAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", { self.0 })
    }
}

impl std::fmt::Debug for StaticAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "static:{:#x}", self.0)
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<usize> for Addr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs
    }
}

impl Sub<usize> for Addr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl SubAssign<usize> for Addr {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 -= rhs
    }
}

impl Add<usize> for StaticAddr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub for StaticAddr {
    type Output = usize;
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<RawPointer> for Addr {
    fn from(value: RawPointer) -> Self {
        Addr(value as usize)
    }
}

impl From<Addr> for RawPointer {
    fn from(value: Addr) -> Self {
        value.0 as RawPointer
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Addr(value)
    }
}

impl From<Word> for Addr {
    fn from(value: Word) -> Self {
        Addr(value as usize)
    }
}

impl From<Addr> for Word {
    fn from(value: Addr) -> Self {
        value.0 as Word
    }
}

impl From<usize> for StaticAddr {
    fn from(value: usize) -> Self {
        StaticAddr(value)
    }
}

impl From<u64> for StaticAddr {
    fn from(value: u64) -> Self {
        StaticAddr(value as usize)
    }
}

impl From<StaticAddr> for u64 {
    fn from(value: StaticAddr) -> Self {
        value.0 as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_arithmetic() {
        let a = Addr::from(100usize);
        assert_eq!((a + 50).usize(), 150);
        assert_eq!((a - 50).usize(), 50);
        assert_eq!(a.checked_sub(Addr::from(101usize)), None);
        assert_eq!(a.checked_sub(Addr::from(40usize)), Some(60));
        assert_eq!(a.checked_add(8), Some(Addr::from(108usize)));
        assert_eq!(Addr::from(usize::MAX - 3).checked_add(8), None);

        let s = StaticAddr::from(0x1139usize);
        assert_eq!((s + 4) - s, 4);
    }

    #[test]
    fn test_addr_conversions() {
        let a = Addr::from(0x1234usize);
        assert_eq!(a.u64(), 0x1234u64);
        assert_eq!(Word::from(a), 0x1234);
        assert_eq!(Addr::from(0x1234 as Word), a);
        assert_eq!(format!("{}", a), "0x0000000000001234");
        assert_eq!(format!("{}", StaticAddr::from(0x1234usize)), "0x1234");
    }
}
