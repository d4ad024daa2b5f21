//! # Memory Map Module
//!
//! Describes the layout of the tracee's virtual address space, as read from
//! `/proc/<pid>/maps` with the [`proc_maps`] crate.
//!
//! The debugger needs the map for one thing in particular: for a position independent
//! executable, the start of the first mapping is where the executable was loaded, which is the
//! load bias between static and runtime addresses.

use std::fmt::{self, Display};

use crate::addr::Addr;

/// A single contiguous region of the tracee's memory
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub start_address: Addr,
    /// Exclusive
    pub end_address: Addr,
    pub permissions: MemoryPermissions,
    /// Offset within the mapped file (if any)
    pub offset: usize,
    /// Path to the mapped file, if any
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPermissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub private: bool,
}

impl MemoryRegion {
    pub fn size(&self) -> usize {
        self.end_address.usize() - self.start_address.usize()
    }

    pub fn contains(&self, addr: Addr) -> bool {
        self.start_address <= addr && addr < self.end_address
    }
}

/// The complete memory map of a tracee, in the order the kernel lists it
#[derive(Debug, Clone, Default)]
pub struct ProcessMemoryMap {
    pub regions: Vec<MemoryRegion>,
}

impl ProcessMemoryMap {
    pub fn new(regions: Vec<MemoryRegion>) -> Self {
        Self { regions }
    }

    /// Start of the first region, which is the load address of the main executable
    pub fn base_address(&self) -> Option<Addr> {
        self.regions.first().map(|r| r.start_address)
    }

    pub fn region_of(&self, addr: Addr) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn total_mapped(&self) -> usize {
        self.regions.iter().map(|r| r.size()).sum()
    }
}

impl From<Vec<proc_maps::MapRange>> for ProcessMemoryMap {
    fn from(ranges: Vec<proc_maps::MapRange>) -> Self {
        let regions = ranges
            .iter()
            .map(|range| {
                let start = range.start();
                MemoryRegion {
                    start_address: Addr::from(start),
                    end_address: Addr::from(start + range.size()),
                    permissions: MemoryPermissions {
                        read: range.is_read(),
                        write: range.is_write(),
                        execute: range.is_exec(),
                        private: range.flags.len() >= 4 && &range.flags[3..4] == "p",
                    },
                    offset: range.offset,
                    path: range.filename().map(|p| p.to_string_lossy().to_string()),
                }
            })
            .collect();

        ProcessMemoryMap { regions }
    }
}

impl Display for MemoryPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.read { "r" } else { "-" },
            if self.write { "w" } else { "-" },
            if self.execute { "x" } else { "-" },
            if self.private { "p" } else { "s" },
        )
    }
}

impl Display for ProcessMemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} regions, {} bytes mapped",
            self.regions.len(),
            self.total_mapped()
        )?;
        for (i, region) in self.regions.iter().enumerate() {
            writeln!(
                f,
                "#{:<3} {:016x}-{:016x} {} {:>8x} {}",
                i,
                region.start_address.usize(),
                region.end_address.usize(),
                region.permissions,
                region.offset,
                region.path.as_deref().unwrap_or("[anonymous]")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn region(start: usize, end: usize, path: &str) -> MemoryRegion {
        MemoryRegion {
            start_address: Addr::from(start),
            end_address: Addr::from(end),
            permissions: MemoryPermissions {
                read: true,
                execute: true,
                private: true,
                ..Default::default()
            },
            offset: 0,
            path: Some(path.to_string()),
        }
    }

    #[test]
    fn test_base_address_is_first_region() {
        let map = ProcessMemoryMap::new(vec![
            region(0x5555_5555_4000, 0x5555_5555_5000, "/tmp/test"),
            region(0x7fff_f7dd_0000, 0x7fff_f7df_0000, "/usr/lib/libc.so.6"),
        ]);
        assert_eq!(map.base_address(), Some(Addr::from(0x5555_5555_4000usize)));
        assert_eq!(map.total_mapped(), 0x1000 + 0x20000);
        assert_eq!(
            map.region_of(Addr::from(0x7fff_f7dd_0010usize))
                .and_then(|r| r.path.as_deref()),
            Some("/usr/lib/libc.so.6")
        );
        assert!(map.region_of(Addr::from(0x10usize)).is_none());
        assert!(ProcessMemoryMap::default().base_address().is_none());
    }

    #[test]
    fn test_permissions_display() {
        let r = region(0, 0x1000, "x");
        assert_eq!(r.permissions.to_string(), "r-xp");
    }
}
