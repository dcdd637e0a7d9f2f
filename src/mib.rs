//! MIB: logical-name-to-register mapping
//!
//! A Memory Information Block maps human-readable names to (address,
//! function code, span, decode rule) per slave. The caller defines
//! entries; the master only reads them to build requests and interpret
//! responses. Validation happens at definition time so a read/write call
//! never trips over a malformed entry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::DecodeRule;
use crate::constants::{BROADCAST_SLAVE_ID, MAX_SLAVE_ID};
use crate::error::{ModbusError, Result};
use crate::pdu::FunctionCode;

/// One logical register mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MibEntry {
    /// Logical name, unique within a slave's MIB
    pub name: String,
    /// Start address within the function code's address space
    pub address: u16,
    /// Function code used to access the entry
    pub function_code: FunctionCode,
    /// Registers (or bits, for coil spaces) spanned by the entry
    #[serde(default = "default_count")]
    pub count: u16,
    /// Decode rule applied to the raw words
    #[serde(default)]
    pub rule: DecodeRule,
}

fn default_count() -> u16 {
    1
}

impl MibEntry {
    /// Shorthand for a single-register entry with a decode rule
    pub fn new(
        name: impl Into<String>,
        address: u16,
        function_code: FunctionCode,
        rule: DecodeRule,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            function_code,
            count: 1,
            rule,
        }
    }

    /// Builder-style span override for multi-register entries
    pub fn with_count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    /// One-past-the-end address of the entry's span
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.count)
    }
}

/// Per-slave collections of MIB entries, in definition order
#[derive(Debug, Clone, Default)]
pub struct Mib {
    slaves: HashMap<u8, Vec<MibEntry>>,
}

impl Mib {
    /// Create an empty MIB
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry table for `slave_id`, validating every entry.
    /// Broadcast id 0 cannot carry a MIB; reads need a concrete slave.
    pub fn define_slave(&mut self, slave_id: u8, entries: Vec<MibEntry>) -> Result<()> {
        if slave_id == BROADCAST_SLAVE_ID || slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::Config(format!(
                "Slave id {} out of range 1-{}",
                slave_id, MAX_SLAVE_ID
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &entries {
            if entry.name.is_empty() {
                return Err(ModbusError::Config(
                    "MIB entry with empty name".to_string(),
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ModbusError::Config(format!(
                    "Duplicate MIB entry name: {}",
                    entry.name
                )));
            }
            if entry.count == 0 {
                return Err(ModbusError::Config(format!(
                    "MIB entry {} spans zero registers",
                    entry.name
                )));
            }
            let limit = entry.function_code.read_limit();
            if entry.count > limit {
                return Err(ModbusError::Config(format!(
                    "MIB entry {} spans {} units, limit for FC{:02X} is {}",
                    entry.name,
                    entry.count,
                    entry.function_code.to_u8(),
                    limit
                )));
            }
            if entry.end_address() > u32::from(u16::MAX) + 1 {
                return Err(ModbusError::Config(format!(
                    "MIB entry {} overruns the 16-bit address space",
                    entry.name
                )));
            }
        }

        debug!("MIB defined: slave={}, entries={}", slave_id, entries.len());
        self.slaves.insert(slave_id, entries);
        Ok(())
    }

    /// Look up one entry by logical name
    pub fn lookup(&self, slave_id: u8, name: &str) -> Option<&MibEntry> {
        self.slaves
            .get(&slave_id)
            .and_then(|entries| entries.iter().find(|e| e.name == name))
    }

    /// All entries for a slave, in definition order
    pub fn entries_for(&self, slave_id: u8) -> &[MibEntry] {
        self.slaves
            .get(&slave_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
