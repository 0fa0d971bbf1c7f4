use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

/// Symbol table built from a linker-produced map file.
///
/// The file is parsed once, line by line, into a name -> address table.
/// Collision policy: the first definition of a name in file order wins;
/// later bindings of the same name are dropped.
#[derive(Debug)]
pub struct MapFile {
    path: PathBuf,
    symbols: HashMap<String, u64>,
}

#[derive(Debug)]
pub enum MapError {
    Io { path: PathBuf, source: io::Error },
    MissingSymbol { symbol: String, map: PathBuf },
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Io { path, source } => {
                write!(f, "cannot read map file {}: {}", path.display(), source)
            }
            MapError::MissingSymbol { symbol, map } => {
                write!(f, "symbol {} not found in {}", symbol, map.display())
            }
        }
    }
}

impl std::error::Error for MapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapError::Io { source, .. } => Some(source),
            MapError::MissingSymbol { .. } => None,
        }
    }
}

impl MapFile {
    /// Reads and parses a map file into a symbol table.
    pub fn load(path: &Path) -> Result<Self, MapError> {
        let content = fs::read_to_string(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(path, &content))
    }

    fn parse(path: &Path, content: &str) -> Self {
        // GNU ld symbol line: address first, then the name.
        //   "                0x0000000000007c00                __entry_start = ."
        let addr_then_name =
            Regex::new(r"^\s*0x([0-9a-fA-F]+)\s+([A-Za-z_][A-Za-z0-9_.$]*)").unwrap();
        // Assignment line: name first, then the address.
        //   "__entry_start = 0x00007c20"
        let name_then_addr =
            Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.$]*)\s*=\s*0x([0-9a-fA-F]+)").unwrap();

        let mut symbols = HashMap::new();
        for line in content.lines() {
            let binding = if let Some(caps) = addr_then_name.captures(line) {
                u64::from_str_radix(&caps[1], 16)
                    .ok()
                    .map(|addr| (caps[2].to_string(), addr))
            } else if let Some(caps) = name_then_addr.captures(line) {
                u64::from_str_radix(&caps[2], 16)
                    .ok()
                    .map(|addr| (caps[1].to_string(), addr))
            } else {
                None
            };

            if let Some((name, addr)) = binding {
                // First definition wins.
                symbols.entry(name).or_insert(addr);
            }
        }

        MapFile {
            path: path.to_path_buf(),
            symbols,
        }
    }

    /// Looks up a symbol address. Absence is not an error here; whether a
    /// symbol is required is the caller's policy.
    pub fn address(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    /// Looks up a symbol address that the caller cannot proceed without.
    pub fn require(&self, name: &str) -> Result<u64, MapError> {
        self.address(name).ok_or_else(|| MapError::MissingSymbol {
            symbol: name.to_string(),
            map: self.path.clone(),
        })
    }

    /// Path the table was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct symbols in the table.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
