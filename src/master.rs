//! Read/write orchestrator
//!
//! [`ModbusMaster`] ties the stack together: it resolves logical names
//! through its MIB, groups resolved entries into minimal wire requests
//! (one per maximal contiguous address run, bounded by protocol limits),
//! executes them through the transaction manager and maps raw words back
//! to typed values. Batch calls never fail wholesale: every requested name
//! gets exactly one per-entry result.

use std::collections::HashMap;

use tracing::debug;

use crate::codec::{decode_words, encode_value, DecodeRegistry, Value};
use crate::constants::{MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::{ModbusError, Result, WriteError};
use crate::frame::WireMode;
use crate::mib::{Mib, MibEntry};
use crate::pdu::{FunctionCode, PduBuilder};
use crate::transaction::{RetryPolicy, TransactionManager};
use crate::transport::{ModbusTransport, SerialConfig, SerialFraming, SerialTransport, TcpConfig, TcpTransport};

/// Which MIB entries a read call targets
#[derive(Debug, Clone)]
pub enum Selector {
    /// Every entry defined for the slave, in definition order
    All,
    /// An explicit ordered list of logical names
    Names(Vec<String>),
}

impl Selector {
    /// Convenience constructor from any string list
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector::Names(names.into_iter().map(Into::into).collect())
    }
}

/// Per-name outcomes of a read call, in selector order
#[derive(Debug)]
pub struct ReadResult {
    entries: Vec<(String, Result<Value>)>,
}

impl ReadResult {
    /// Outcome for one name
    pub fn get(&self, name: &str) -> Option<&Result<Value>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Decoded value for one name, if it succeeded
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// All outcomes in selector order
    pub fn iter(&self) -> impl Iterator<Item = &(String, Result<Value>)> {
        self.entries.iter()
    }

    /// Number of requested names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was requested
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every entry decoded successfully
    pub fn all_ok(&self) -> bool {
        self.entries.iter().all(|(_, r)| r.is_ok())
    }
}

impl IntoIterator for ReadResult {
    type Item = (String, Result<Value>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Per-name outcomes of a write call, in input order
#[derive(Debug)]
pub struct WriteResult {
    entries: Vec<(String, Result<()>)>,
}

impl WriteResult {
    /// Outcome for one name
    pub fn get(&self, name: &str) -> Option<&Result<()>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// All outcomes in input order
    pub fn iter(&self) -> impl Iterator<Item = &(String, Result<()>)> {
        self.entries.iter()
    }

    /// True when every entry was written
    pub fn all_ok(&self) -> bool {
        self.entries.iter().all(|(_, r)| r.is_ok())
    }
}

/// One wire request covering a contiguous address run
struct Run {
    function_code: FunctionCode,
    start: u16,
    quantity: u16,
    /// (result slot, entry) pairs covered by this run
    members: Vec<(usize, MibEntry)>,
}

/// Modbus master connection: one transport, one MIB, one decode registry
pub struct ModbusMaster {
    transactions: TransactionManager,
    mib: Mib,
    registry: DecodeRegistry,
}

impl ModbusMaster {
    /// Connect over Modbus TCP
    pub async fn connect_tcp(config: TcpConfig, policy: RetryPolicy) -> Result<Self> {
        let transport = TcpTransport::connect(config).await?;
        Ok(Self::from_transport(
            Box::new(transport),
            WireMode::Tcp,
            policy,
        ))
    }

    /// Connect over Modbus RTU on a serial port
    pub async fn connect_rtu(config: SerialConfig, policy: RetryPolicy) -> Result<Self> {
        let transport = SerialTransport::connect(config, SerialFraming::Rtu).await?;
        Ok(Self::from_transport(
            Box::new(transport),
            WireMode::Rtu,
            policy,
        ))
    }

    /// Connect over Modbus ASCII on a serial port
    pub async fn connect_ascii(config: SerialConfig, policy: RetryPolicy) -> Result<Self> {
        let transport = SerialTransport::connect(config, SerialFraming::Ascii).await?;
        Ok(Self::from_transport(
            Box::new(transport),
            WireMode::Ascii,
            policy,
        ))
    }

    /// Build a master over an already-open transport. Useful for custom
    /// channels and for driving the stack against a simulated slave.
    pub fn from_transport(
        transport: Box<dyn ModbusTransport>,
        mode: WireMode,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transactions: TransactionManager::new(transport, mode, policy),
            mib: Mib::new(),
            registry: DecodeRegistry::new(),
        }
    }

    /// Define (replace) the MIB entries for a slave
    pub fn define_slave(&mut self, slave_id: u8, entries: Vec<MibEntry>) -> Result<()> {
        self.mib.define_slave(slave_id, entries)
    }

    /// MIB view, for lookups and enumeration
    pub fn mib(&self) -> &Mib {
        &self.mib
    }

    /// Custom decode rule registry
    pub fn registry_mut(&mut self) -> &mut DecodeRegistry {
        &mut self.registry
    }

    /// Tear down and re-establish the physical channel
    pub async fn reconnect(&self) -> Result<()> {
        self.transactions.reconnect().await
    }

    /// Close the physical channel
    pub async fn close(&self) -> Result<()> {
        self.transactions.close().await
    }

    /// Read the selected logical names from one slave.
    ///
    /// Unknown names yield a per-entry `NotFound`; a failed wire exchange
    /// marks every entry of that run with the same error. The result
    /// preserves selector order exactly.
    pub async fn read(&self, slave_id: u8, selector: Selector) -> ReadResult {
        let names: Vec<String> = match selector {
            Selector::All => self
                .mib
                .entries_for(slave_id)
                .iter()
                .map(|e| e.name.clone())
                .collect(),
            Selector::Names(names) => names,
        };

        let mut results: Vec<Option<Result<Value>>> = vec![None; names.len()];
        let mut resolved: Vec<(usize, MibEntry)> = Vec::new();

        for (slot, name) in names.iter().enumerate() {
            match self.mib.lookup(slave_id, name) {
                Some(entry) if entry.function_code.is_read() => {
                    resolved.push((slot, entry.clone()));
                }
                Some(entry) => {
                    results[slot] = Some(Err(ModbusError::Config(format!(
                        "Entry {} uses write-only FC{:02X}",
                        name,
                        entry.function_code.to_u8()
                    ))));
                }
                None => {
                    results[slot] = Some(Err(ModbusError::NotFound(name.clone())));
                }
            }
        }

        let runs = build_runs(resolved, |fc| fc.read_limit());
        debug!(
            "Read: slave={}, names={}, runs={}",
            slave_id,
            names.len(),
            runs.len()
        );

        for run in runs {
            self.execute_read_run(slave_id, run, &mut results).await;
        }

        ReadResult {
            entries: names
                .into_iter()
                .zip(results)
                .map(|(name, result)| {
                    let result = result.unwrap_or_else(|| {
                        Err(ModbusError::Config("No result produced".to_string()))
                    });
                    (name, result)
                })
                .collect(),
        }
    }

    async fn execute_read_run(
        &self,
        slave_id: u8,
        run: Run,
        results: &mut [Option<Result<Value>>],
    ) {
        let request = match PduBuilder::read_request(run.function_code, run.start, run.quantity) {
            Ok(pdu) => pdu,
            Err(e) => {
                for (slot, _) in &run.members {
                    results[*slot] = Some(Err(e.clone()));
                }
                return;
            }
        };

        let words = match self.transactions.execute(slave_id, request).await {
            Ok(pdu) => {
                if run.function_code.is_bit_level() {
                    pdu.parse_bits(run.quantity)
                        .map(|bits| bits.into_iter().map(u16::from).collect::<Vec<u16>>())
                } else {
                    pdu.parse_registers(run.quantity)
                }
            }
            Err(e) => Err(e),
        };

        match words {
            Ok(words) => {
                for (slot, entry) in &run.members {
                    let offset = (entry.address - run.start) as usize;
                    let span = &words[offset..offset + entry.count as usize];
                    results[*slot] = Some(
                        decode_words(span, &entry.rule, &self.registry)
                            .map_err(ModbusError::from),
                    );
                }
            }
            Err(e) => {
                // A failed request yields no bytes to slice; the whole run
                // shares the error
                for (slot, _) in &run.members {
                    results[*slot] = Some(Err(e.clone()));
                }
            }
        }
    }

    /// Write named values to one slave.
    ///
    /// Values are encoded through each entry's decode rule inverse;
    /// contiguous writable entries are batched into multi-write requests,
    /// isolated entries use single-write requests. Entries with read-only
    /// function codes or irreversible rules fail with `NotWritable`.
    pub async fn write(&self, slave_id: u8, values: Vec<(String, Value)>) -> WriteResult {
        let mut results: Vec<Option<Result<()>>> = vec![None; values.len()];
        // Encoded entries ready for batching, per address space
        let mut registers: Vec<(usize, MibEntry, Vec<u16>)> = Vec::new();
        let mut coils: Vec<(usize, MibEntry, Vec<bool>)> = Vec::new();

        for (slot, (name, value)) in values.iter().enumerate() {
            let entry = match self.mib.lookup(slave_id, name) {
                Some(entry) => entry.clone(),
                None => {
                    results[slot] = Some(Err(ModbusError::NotFound(name.clone())));
                    continue;
                }
            };

            if matches!(
                entry.function_code,
                FunctionCode::ReadDiscreteInputs | FunctionCode::ReadInputRegisters
            ) {
                results[slot] = Some(Err(WriteError::NotWritable(format!(
                    "{} maps to a read-only address space",
                    name
                ))
                .into()));
                continue;
            }

            match encode_value(value, &entry.rule, entry.count, &self.registry) {
                Ok(words) if entry.function_code.is_bit_level() => {
                    if words.len() != entry.count as usize {
                        results[slot] = Some(Err(WriteError::ValueOutOfRange(format!(
                            "{} encoded to {} bits, entry spans {}",
                            name,
                            words.len(),
                            entry.count
                        ))
                        .into()));
                        continue;
                    }
                    let bits = words.iter().map(|&w| w != 0).collect();
                    coils.push((slot, entry, bits));
                }
                Ok(words) => {
                    if words.len() != entry.count as usize {
                        results[slot] = Some(Err(WriteError::ValueOutOfRange(format!(
                            "{} encoded to {} words, entry spans {}",
                            name,
                            words.len(),
                            entry.count
                        ))
                        .into()));
                        continue;
                    }
                    registers.push((slot, entry, words));
                }
                Err(e) => {
                    results[slot] = Some(Err(e.into()));
                }
            }
        }

        for run in build_write_runs(registers, MAX_WRITE_REGISTERS) {
            self.execute_register_write(slave_id, run, &mut results).await;
        }
        for run in build_write_runs(coils, MAX_WRITE_COILS) {
            self.execute_coil_write(slave_id, run, &mut results).await;
        }

        WriteResult {
            entries: values
                .into_iter()
                .zip(results)
                .map(|((name, _), result)| {
                    let result = result
                        .unwrap_or_else(|| Err(ModbusError::Config("No result produced".into())));
                    (name, result)
                })
                .collect(),
        }
    }

    async fn execute_register_write(
        &self,
        slave_id: u8,
        run: WriteRun<u16>,
        results: &mut [Option<Result<()>>],
    ) {
        let request = if run.payload.len() == 1 {
            PduBuilder::write_single_register(run.start, run.payload[0])
        } else {
            PduBuilder::write_multiple_registers(run.start, &run.payload)
        };

        self.finish_write_run(slave_id, request, &run.slots, results)
            .await;
    }

    async fn execute_coil_write(
        &self,
        slave_id: u8,
        run: WriteRun<bool>,
        results: &mut [Option<Result<()>>],
    ) {
        let request = if run.payload.len() == 1 {
            PduBuilder::write_single_coil(run.start, run.payload[0])
        } else {
            PduBuilder::write_multiple_coils(run.start, &run.payload)
        };

        self.finish_write_run(slave_id, request, &run.slots, results)
            .await;
    }

    async fn finish_write_run(
        &self,
        slave_id: u8,
        request: Result<crate::pdu::ModbusPdu>,
        slots: &[usize],
        results: &mut [Option<Result<()>>],
    ) {
        let outcome = match request {
            Ok(pdu) => self.transactions.execute(slave_id, pdu).await.map(|_| ()),
            Err(e) => Err(e),
        };

        for &slot in slots {
            results[slot] = Some(outcome.clone());
        }
    }
}

/// Split resolved read entries into maximal contiguous runs per function
/// code, bounded by `limit(fc)` units per request.
fn build_runs(resolved: Vec<(usize, MibEntry)>, limit: impl Fn(FunctionCode) -> u16) -> Vec<Run> {
    let mut groups: HashMap<u8, Vec<(usize, MibEntry)>> = HashMap::new();
    for (slot, entry) in resolved {
        groups
            .entry(entry.function_code.to_u8())
            .or_default()
            .push((slot, entry));
    }

    // Deterministic run order: by function code, then address
    let mut fcs: Vec<u8> = groups.keys().copied().collect();
    fcs.sort_unstable();

    let mut runs = Vec::new();
    for fc in fcs {
        let mut members = groups.remove(&fc).unwrap_or_default();
        members.sort_by_key(|(_, e)| e.address);

        let mut current: Option<Run> = None;
        for (slot, entry) in members {
            let max = limit(entry.function_code);
            match current.as_mut() {
                Some(run)
                    if u32::from(run.start) + u32::from(run.quantity)
                        == u32::from(entry.address)
                        && run.quantity + entry.count <= max =>
                {
                    run.quantity += entry.count;
                    run.members.push((slot, entry));
                }
                _ => {
                    if let Some(done) = current.take() {
                        runs.push(done);
                    }
                    current = Some(Run {
                        function_code: entry.function_code,
                        start: entry.address,
                        quantity: entry.count,
                        members: vec![(slot, entry)],
                    });
                }
            }
        }
        if let Some(done) = current.take() {
            runs.push(done);
        }
    }

    runs
}

/// A contiguous write request: start address, flattened payload and the
/// result slots it answers for.
struct WriteRun<T> {
    start: u16,
    payload: Vec<T>,
    slots: Vec<usize>,
}

/// Batch encoded write entries into contiguous runs bounded by `limit`
fn build_write_runs<T: Clone>(
    mut entries: Vec<(usize, MibEntry, Vec<T>)>,
    limit: u16,
) -> Vec<WriteRun<T>> {
    entries.sort_by_key(|(_, e, _)| e.address);

    let mut runs: Vec<WriteRun<T>> = Vec::new();
    let mut current: Option<(WriteRun<T>, u32)> = None; // run + next address

    for (slot, entry, payload) in entries {
        match current.as_mut() {
            Some((run, next))
                if *next == u32::from(entry.address)
                    && run.payload.len() + payload.len() <= limit as usize =>
            {
                run.payload.extend(payload);
                run.slots.push(slot);
                *next = entry.end_address();
            }
            _ => {
                if let Some((done, _)) = current.take() {
                    runs.push(done);
                }
                let next = entry.end_address();
                current = Some((
                    WriteRun {
                        start: entry.address,
                        payload,
                        slots: vec![slot],
                    },
                    next,
                ));
            }
        }
    }
    if let Some((done, _)) = current.take() {
        runs.push(done);
    }

    runs
}
