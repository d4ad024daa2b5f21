//! # Debug Information
//!
//! The read-only view of the executable's debug information that the debugger consumes:
//! functions with their address ranges and local variables, the line tables, and the ELF
//! symbols.
//!
//! All addresses in here are [`StaticAddr`]s. [`DebugInfo`] is usually loaded from an executable
//! with [`crate::dwarf_parse::load`], but it is a plain table and can be built by hand as well.
//! The debugger only queries it through the [`DebugInfoIndex`] trait.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::addr::StaticAddr;
use crate::errors::{DebuggerError, Result};

/// The [`gimli::Reader`] used for all DWARF data
pub type GimliReader = gimli::EndianRcSlice<gimli::LittleEndian>;

/// Name of the function at which a backtrace ends
pub const ENTRY_FUNCTION: &str = "main";

/// A DWARF location expression together with the encoding of its unit
#[derive(Debug, Clone)]
pub struct LocationExpr {
    pub expr: gimli::Expression<GimliReader>,
    pub encoding: gimli::Encoding,
}

impl LocationExpr {
    pub fn new(bytes: &[u8], encoding: gimli::Encoding) -> Self {
        Self {
            expr: gimli::Expression(GimliReader::new(Rc::from(bytes), gimli::LittleEndian)),
            encoding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Variable,
    Parameter,
}

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub kind: VariableKind,
    pub location: Option<LocationExpr>,
}

/// A function with code, as described by a `DW_TAG_subprogram`
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// Identifies the function, usually the offset of its DWARF entry
    pub offset: usize,
    pub name: String,
    pub low: StaticAddr,
    /// Exclusive
    pub high: StaticAddr,
    pub decl_line: Option<u64>,
    pub frame_base: Option<LocationExpr>,
    pub variables: Vec<VariableInfo>,
}

impl FunctionInfo {
    pub fn new(offset: usize, name: impl Into<String>, low: StaticAddr, high: StaticAddr) -> Self {
        Self {
            offset,
            name: name.into(),
            low,
            high,
            decl_line: None,
            frame_base: None,
            variables: Vec::new(),
        }
    }

    #[inline]
    pub fn contains(&self, addr: StaticAddr) -> bool {
        self.low <= addr && addr < self.high
    }
}

impl PartialEq for FunctionInfo {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.name == other.name && self.low == other.low
    }
}

/// A file and line in the source code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u64,
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// One row of a line table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub file: Rc<Path>,
    pub line: u64,
    pub address: StaticAddr,
    pub is_stmt: bool,
    /// The first address after a sequence; this row covers no code
    pub end_sequence: bool,
}

impl LineEntry {
    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            file: self.file.to_path_buf(),
            line: self.line,
        }
    }

    /// Whether this entry and `other` belong to the same source line
    pub fn same_line(&self, other: &LineEntry) -> bool {
        self.line == other.line && self.file == other.file
    }
}

/// The rows of the line program of one compilation unit, ordered by address
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    unit_name: Option<String>,
    entries: Vec<LineEntry>,
}

impl LineTable {
    pub fn new(unit_name: Option<String>, mut entries: Vec<LineEntry>) -> Self {
        // a sequence may start where another one ends, the end goes first
        entries.sort_by_key(|e| (e.address, !e.end_sequence));
        Self { unit_name, entries }
    }

    pub fn unit_name(&self) -> Option<&str> {
        self.unit_name.as_deref()
    }

    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }

    /// Index of the row covering `addr`, that is the last row at or before it
    pub fn find_address(&self, addr: StaticAddr) -> Option<usize> {
        let idx = self.entries.partition_point(|e| e.address <= addr);
        if idx == 0 || self.entries[idx - 1].end_sequence {
            None
        } else {
            Some(idx - 1)
        }
    }

    /// A cursor on the row covering `addr`
    pub fn cursor_at(&self, addr: StaticAddr) -> Option<LineCursor<'_>> {
        self.find_address(addr).map(|idx| LineCursor { table: self, idx })
    }

    /// A cursor on the first row at or after `addr`
    pub fn cursor_from(&self, addr: StaticAddr) -> LineCursor<'_> {
        LineCursor {
            table: self,
            idx: self.entries.partition_point(|e| e.address < addr),
        }
    }
}

/// Walks a [`LineTable`] back and forth
///
/// [`LineCursor::entry`] returns `None` once the cursor moved past either end of the table.
#[derive(Debug, Clone)]
pub struct LineCursor<'a> {
    table: &'a LineTable,
    idx: usize,
}

impl<'a> LineCursor<'a> {
    pub fn entry(&self) -> Option<&'a LineEntry> {
        self.table.entries.get(self.idx)
    }

    pub fn advance(&mut self) -> Option<&'a LineEntry> {
        if self.idx < self.table.entries.len() {
            self.idx += 1;
        }
        self.entry()
    }

    pub fn retreat(&mut self) -> Option<&'a LineEntry> {
        if self.idx == 0 {
            self.idx = self.table.entries.len();
        } else {
            self.idx -= 1;
        }
        self.entry()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
}

impl Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoType => "notype",
            Self::Object => "object",
            Self::Func => "func",
            Self::Section => "section",
            Self::File => "file",
        };
        write!(f, "{s}")
    }
}

/// A linkage symbol from the symbol tables of the executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub addr: StaticAddr,
}

impl Symbol {
    pub fn demangled(&self) -> String {
        format!("{:#}", rustc_demangle::demangle(&self.name))
    }
}

/// The queries the debugger makes against the debug information
///
/// All queries take and return [`StaticAddr`]s. A query that finds nothing fails with a
/// recoverable error, usually [`DebuggerError::NoDebugInfoForAddress`].
pub trait DebugInfoIndex {
    /// All functions with code
    fn functions(&self) -> &[FunctionInfo];

    /// The function whose `[low, high)` range contains `addr`
    fn function_at(&self, addr: StaticAddr) -> Result<&FunctionInfo> {
        self.functions()
            .iter()
            .find(|f| f.contains(addr))
            .ok_or(DebuggerError::NoDebugInfoForAddress(addr))
    }

    fn functions_by_name(&self, name: &str) -> Vec<&FunctionInfo> {
        self.functions().iter().filter(|f| f.name == name).collect()
    }

    fn line_tables(&self) -> &[LineTable];

    /// The line table with a row covering `addr`
    fn line_table_at(&self, addr: StaticAddr) -> Result<&LineTable> {
        self.line_tables()
            .iter()
            .find(|t| t.find_address(addr).is_some())
            .ok_or(DebuggerError::NoDebugInfoForAddress(addr))
    }

    /// The row covering `addr`
    fn line_entry_at(&self, addr: StaticAddr) -> Result<&LineEntry> {
        self.line_table_at(addr)?
            .cursor_at(addr)
            .and_then(|c| c.entry())
            .ok_or(DebuggerError::NoDebugInfoForAddress(addr))
    }

    /// Statement rows for a source line, the first one of every line table whose file ends with
    /// `file`
    fn entries_for_source_line(&self, file: &Path, line: u64) -> Vec<&LineEntry> {
        self.line_tables()
            .iter()
            .filter_map(|t| {
                t.entries()
                    .iter()
                    .find(|e| e.is_stmt && !e.end_sequence && e.line == line && e.file.ends_with(file))
            })
            .collect()
    }

    fn symbols(&self) -> &[Symbol];

    fn symbols_by_name(&self, name: &str) -> Vec<&Symbol> {
        self.symbols().iter().filter(|s| s.name == name).collect()
    }

    /// Whether the executable is relocated when loaded
    fn is_position_independent(&self) -> bool;

    /// The function at which a backtrace ends
    fn entry_function(&self) -> &str;
}

/// Debug information held in memory
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    functions: Vec<FunctionInfo>,
    line_tables: Vec<LineTable>,
    symbols: Vec<Symbol>,
    position_independent: bool,
}

impl DebugInfo {
    pub fn new(
        functions: Vec<FunctionInfo>,
        line_tables: Vec<LineTable>,
        symbols: Vec<Symbol>,
        position_independent: bool,
    ) -> Self {
        Self {
            functions,
            line_tables,
            symbols,
            position_independent,
        }
    }
}

impl DebugInfoIndex for DebugInfo {
    fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    fn line_tables(&self) -> &[LineTable] {
        &self.line_tables
    }

    fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    fn is_position_independent(&self) -> bool {
        self.position_independent
    }

    fn entry_function(&self) -> &str {
        ENTRY_FUNCTION
    }
}
