//! # Loading debug information
//!
//! Reads an ELF executable with [`object`] and its DWARF sections with [`gimli`], and flattens
//! everything the debugger needs into a [`DebugInfo`]:
//!
//! * every `DW_TAG_subprogram` that has code, with its frame base and the variables and
//!   parameters declared in it (including those in nested lexical blocks)
//! * the line table of every compilation unit
//! * the linkage symbols of `.symtab` and `.dynsym`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gimli::{
    AttributeValue, DW_AT_decl_line, DW_AT_frame_base, DW_AT_high_pc, DW_AT_linkage_name,
    DW_AT_location, DW_AT_low_pc, DW_AT_name, DW_TAG_formal_parameter, DW_TAG_lexical_block,
    DW_TAG_subprogram, DW_TAG_variable, Reader, Unit,
};
use object::{Object, ObjectSection, ObjectSymbol};
use tracing::{debug, info, warn};

use crate::addr::StaticAddr;
use crate::dbginfo::{
    DebugInfo, FunctionInfo, GimliReader, LineEntry, LineTable, LocationExpr, Symbol, SymbolKind,
    VariableInfo, VariableKind,
};
use crate::errors::Result;

type Dwarf = gimli::Dwarf<GimliReader>;
type TreeNode<'abbrev, 'unit, 'tree> = gimli::EntriesTreeNode<'abbrev, 'unit, 'tree, GimliReader>;

/// Reads the debug information of the executable at `path`
///
/// # Errors
///
/// Fails if the file cannot be read, is not an object file, or if its DWARF data is malformed.
/// An executable without any debug information loads fine, it just has no functions or line
/// tables.
pub fn load(path: impl AsRef<Path>) -> Result<DebugInfo> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let object_info = object::File::parse(&*data)?;
    let position_independent = object_info.kind() == object::ObjectKind::Dynamic;

    let loader = |section: gimli::SectionId| -> std::result::Result<GimliReader, gimli::Error> {
        let data = object_info
            .section_by_name(section.name())
            .and_then(|s| s.uncompressed_data().ok())
            .unwrap_or_default();
        Ok(GimliReader::new(Rc::from(&*data), gimli::LittleEndian))
    };
    let dwarf = Dwarf::load(loader)?;

    let mut functions = Vec::new();
    let mut line_tables = Vec::new();
    let mut paths = PathCache::default();

    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let mut tree = unit.entries_tree(None)?;
        collect_functions(&dwarf, &unit, tree.root()?, &mut functions)?;
        if let Some(table) = parse_line_table(&dwarf, &unit, &mut paths)? {
            debug!(
                "line table of {} with {} rows",
                table.unit_name().unwrap_or("an unnamed unit"),
                table.entries().len()
            );
            line_tables.push(table);
        }
    }

    let symbols = parse_symbols(&object_info);

    if functions.is_empty() {
        warn!("{} has no debug information for any function", path.display());
    }
    info!(
        "loaded {} functions, {} line tables and {} symbols from {}",
        functions.len(),
        line_tables.len(),
        symbols.len(),
        path.display()
    );

    Ok(DebugInfo::new(
        functions,
        line_tables,
        symbols,
        position_independent,
    ))
}

fn collect_functions(
    dwarf: &Dwarf,
    unit: &Unit<GimliReader>,
    node: TreeNode<'_, '_, '_>,
    out: &mut Vec<FunctionInfo>,
) -> Result<()> {
    if node.entry().tag() == DW_TAG_subprogram {
        match parse_function(dwarf, unit, node) {
            Ok(Some(func)) => out.push(func),
            Ok(None) => (),
            Err(e) => debug!("could not parse a function of the debug information: {e}"),
        }
        return Ok(());
    }

    let mut children = node.children();
    while let Some(child) = children.next()? {
        collect_functions(dwarf, unit, child, out)?;
    }
    Ok(())
}

/// Parses a subprogram, or returns [`None`] if it has no name or no code
fn parse_function(
    dwarf: &Dwarf,
    unit: &Unit<GimliReader>,
    node: TreeNode<'_, '_, '_>,
) -> Result<Option<FunctionInfo>> {
    let entry = node.entry();
    let name = match parse_string(dwarf, unit, entry.attr_value(DW_AT_name)?)? {
        Some(n) => n,
        None => match parse_string(dwarf, unit, entry.attr_value(DW_AT_linkage_name)?)? {
            Some(n) => n,
            None => return Ok(None),
        },
    };
    let Some(low) = parse_addr_low(dwarf, unit, entry.attr_value(DW_AT_low_pc)?)? else {
        return Ok(None);
    };
    let Some(high) = parse_addr_high(dwarf, unit, entry.attr_value(DW_AT_high_pc)?, low)? else {
        warn!("function {name} has a low pc but no high pc");
        return Ok(None);
    };

    let mut func = FunctionInfo::new(entry.offset().0, name, low, high);
    func.decl_line = entry
        .attr_value(DW_AT_decl_line)?
        .and_then(|v| v.udata_value());
    func.frame_base = parse_location(unit, entry.attr_value(DW_AT_frame_base)?);

    let mut children = node.children();
    while let Some(child) = children.next()? {
        collect_variables(dwarf, unit, child, &mut func.variables)?;
    }
    Ok(Some(func))
}

fn collect_variables(
    dwarf: &Dwarf,
    unit: &Unit<GimliReader>,
    node: TreeNode<'_, '_, '_>,
    out: &mut Vec<VariableInfo>,
) -> Result<()> {
    let entry = node.entry();
    let kind = match entry.tag() {
        DW_TAG_variable => VariableKind::Variable,
        DW_TAG_formal_parameter => VariableKind::Parameter,
        DW_TAG_lexical_block => {
            let mut children = node.children();
            while let Some(child) = children.next()? {
                collect_variables(dwarf, unit, child, out)?;
            }
            return Ok(());
        }
        _ => return Ok(()),
    };

    let Some(name) = parse_string(dwarf, unit, entry.attr_value(DW_AT_name)?)? else {
        return Ok(());
    };
    let location = parse_location(unit, entry.attr_value(DW_AT_location)?);
    out.push(VariableInfo {
        name,
        kind,
        location,
    });
    Ok(())
}

fn parse_string(
    dwarf: &Dwarf,
    unit: &Unit<GimliReader>,
    value: Option<AttributeValue<GimliReader>>,
) -> Result<Option<String>> {
    Ok(match value {
        Some(v) => Some(
            dwarf
                .attr_string(unit, v)?
                .to_string_lossy()?
                .into_owned(),
        ),
        None => None,
    })
}

fn parse_addr_low(
    dwarf: &Dwarf,
    unit: &Unit<GimliReader>,
    value: Option<AttributeValue<GimliReader>>,
) -> Result<Option<StaticAddr>> {
    Ok(match value {
        Some(v) => dwarf.attr_address(unit, v)?.map(StaticAddr::from),
        None => None,
    })
}

/// `DW_AT_high_pc` is either an address or an offset from the low pc
fn parse_addr_high(
    dwarf: &Dwarf,
    unit: &Unit<GimliReader>,
    value: Option<AttributeValue<GimliReader>>,
    low: StaticAddr,
) -> Result<Option<StaticAddr>> {
    let Some(v) = value else {
        return Ok(None);
    };
    if let Some(len) = v.udata_value() {
        return Ok(Some(low + len as usize));
    }
    Ok(dwarf.attr_address(unit, v)?.map(StaticAddr::from))
}

/// Only single expressions are understood, location lists are ignored
fn parse_location(
    unit: &Unit<GimliReader>,
    value: Option<AttributeValue<GimliReader>>,
) -> Option<LocationExpr> {
    match value? {
        AttributeValue::Exprloc(expr) => Some(LocationExpr {
            expr,
            encoding: unit.encoding(),
        }),
        other => {
            debug!("unsupported location attribute: {other:?}");
            None
        }
    }
}

/// Hands out one shared path per distinct source file
#[derive(Debug, Default)]
struct PathCache {
    paths: HashMap<PathBuf, Rc<Path>>,
}

impl PathCache {
    fn get(&mut self, path: PathBuf) -> Rc<Path> {
        self.paths
            .entry(path)
            .or_insert_with_key(|p| Rc::from(p.as_path()))
            .clone()
    }
}

fn parse_line_table(
    dwarf: &Dwarf,
    unit: &Unit<GimliReader>,
    paths: &mut PathCache,
) -> Result<Option<LineTable>> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(None);
    };
    let comp_dir = match &unit.comp_dir {
        Some(dir) => Some(PathBuf::from(dir.to_string_lossy()?.into_owned())),
        None => None,
    };
    let unit_name = match &unit.name {
        Some(name) => Some(name.to_string_lossy()?.into_owned()),
        None => None,
    };

    let mut entries = Vec::new();
    let mut rows = program.rows();
    while let Some((header, row)) = rows.next_row()? {
        let Some(file) = row.file(header) else {
            debug!("line table row without a file at {:#x}", row.address());
            continue;
        };

        // pushing an absolute path replaces what came before
        let mut path = comp_dir.clone().unwrap_or_default();
        if let Some(dir) = file.directory(header) {
            if let Some(dir) = parse_string(dwarf, unit, Some(dir))? {
                path.push(dir);
            }
        }
        if let Some(name) = parse_string(dwarf, unit, Some(file.path_name()))? {
            path.push(name);
        }

        entries.push(LineEntry {
            file: paths.get(path),
            line: row.line().map(|l| l.get()).unwrap_or(0),
            address: StaticAddr::from(row.address()),
            is_stmt: row.is_stmt(),
            end_sequence: row.end_sequence(),
        });
    }

    Ok(Some(LineTable::new(unit_name, entries)))
}

fn symbol_kind(kind: object::SymbolKind) -> SymbolKind {
    match kind {
        object::SymbolKind::Text => SymbolKind::Func,
        object::SymbolKind::Data | object::SymbolKind::Tls => SymbolKind::Object,
        object::SymbolKind::Section => SymbolKind::Section,
        object::SymbolKind::File => SymbolKind::File,
        _ => SymbolKind::NoType,
    }
}

fn parse_symbols(object_info: &object::File<'_>) -> Vec<Symbol> {
    object_info
        .symbols()
        .chain(object_info.dynamic_symbols())
        .filter_map(|sym| {
            let name = sym.name().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(Symbol {
                name: name.to_string(),
                kind: symbol_kind(sym.kind()),
                addr: StaticAddr::from(sym.address()),
            })
        })
        .collect()
}
