//! Transaction sequencing over one transport
//!
//! Modbus is half-duplex per physical link: exactly one request may be in
//! flight at a time. The manager holds the transport behind a mutex for
//! the whole request/response exchange, correlates responses (transaction
//! id on TCP, position on serial), discards stale frames, and applies the
//! retry policy. Retries reuse the request bytes encoded for the first
//! attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::{BROADCAST_SLAVE_ID, MAX_SLAVE_ID, RESPONSE_BUFFER_SIZE};
use crate::error::{ModbusError, Result};
use crate::frame::{FrameCodec, WireMode};
use crate::pdu::{FunctionCode, ModbusPdu};
use crate::transport::ModbusTransport;

/// Timeout and retry policy for one transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per transaction (first try included)
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Response deadline per attempt, milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_attempts() -> u32 {
    3
}
fn default_response_timeout_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// Per-attempt response deadline as a `Duration`
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

struct LinkState {
    transport: Box<dyn ModbusTransport>,
    next_transaction_id: u16,
}

/// Sequences transactions over one exclusive transport
pub struct TransactionManager {
    link: Mutex<LinkState>,
    codec: FrameCodec,
    policy: RetryPolicy,
}

impl TransactionManager {
    /// Create a manager owning `transport`, framing per `mode`
    pub fn new(transport: Box<dyn ModbusTransport>, mode: WireMode, policy: RetryPolicy) -> Self {
        Self {
            link: Mutex::new(LinkState {
                transport,
                next_transaction_id: 1,
            }),
            codec: FrameCodec::new(mode),
            policy,
        }
    }

    /// Wire mode of the underlying link
    pub fn mode(&self) -> WireMode {
        self.codec.mode()
    }

    /// Tear down and re-establish the physical channel
    pub async fn reconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        link.transport.reconnect().await
    }

    /// Close the physical channel
    pub async fn close(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        link.transport.close().await
    }

    /// Execute one request/response exchange and return the response PDU.
    ///
    /// Broadcast requests (slave id 0) are write-only, sent once, and
    /// return an empty PDU without waiting for a response.
    pub async fn execute(&self, slave_id: u8, request: ModbusPdu) -> Result<ModbusPdu> {
        let request_fc = request
            .function_code()
            .ok_or_else(|| ModbusError::Config("Empty request PDU".to_string()))?;

        if slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::Config(format!(
                "Slave id {} out of range 0-{}",
                slave_id, MAX_SLAVE_ID
            )));
        }

        let mut link = self.link.lock().await;

        if slave_id == BROADCAST_SLAVE_ID {
            let writable = FunctionCode::from_u8(request_fc)
                .map(FunctionCode::is_write)
                .unwrap_or(false);
            if !writable {
                return Err(ModbusError::Config(
                    "Broadcast (slave id 0) is valid for write requests only".to_string(),
                ));
            }
            let frame = self.codec.encode(slave_id, &request, 0);
            link.transport.send(&frame).await?;
            debug!("Broadcast FC{:02X} sent, no response expected", request_fc);
            return Ok(ModbusPdu::new());
        }

        // One encoding per transaction; retries resend the same bytes so a
        // TCP response can be matched regardless of which attempt it answers
        let transaction_id = link.next_transaction_id;
        link.next_transaction_id = link.next_transaction_id.wrapping_add(1);
        let frame = self.codec.encode(slave_id, &request, transaction_id);

        let mut last_error = ModbusError::Timeout("No attempt made".to_string());

        for attempt in 1..=self.policy.attempts {
            if attempt > 1 {
                warn!(
                    "Retry {}/{} for slave {} FC{:02X}: {}",
                    attempt, self.policy.attempts, slave_id, request_fc, last_error
                );
            }

            if let Err(e) = link.transport.send(&frame).await {
                last_error = e;
                continue;
            }

            match self
                .await_response(&mut link, slave_id, request_fc, transaction_id)
                .await
            {
                Ok(pdu) => return Ok(pdu),
                Err(e) => last_error = e,
            }
        }

        Err(ModbusError::Communication {
            attempts: self.policy.attempts,
            last: last_error.to_string(),
        })
    }

    /// Wait for a correlated response until the attempt deadline.
    /// Mismatched frames (stale transaction id, foreign slave or function)
    /// are discarded and the wait continues.
    async fn await_response(
        &self,
        link: &mut LinkState,
        slave_id: u8,
        request_fc: u8,
        transaction_id: u16,
    ) -> Result<ModbusPdu> {
        let deadline = Instant::now() + self.policy.response_timeout();
        let mut buffer = [0u8; RESPONSE_BUFFER_SIZE];

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or_else(|| ModbusError::Timeout("Response deadline elapsed".to_string()))?;

            let len = link.transport.receive(&mut buffer, remaining).await?;
            let frame = self.codec.decode(&buffer[..len])?;

            if let Some(tid) = frame.transaction_id {
                if tid != transaction_id {
                    debug!(
                        "Discarding stale frame: tid={:04X}, expected {:04X}",
                        tid, transaction_id
                    );
                    continue;
                }
            }
            if frame.slave_id != slave_id {
                debug!(
                    "Discarding frame from slave {}, expected {}",
                    frame.slave_id, slave_id
                );
                continue;
            }
            let response_fc = frame.pdu.function_code().unwrap_or(0) & 0x7F;
            if response_fc != request_fc {
                debug!(
                    "Discarding FC{:02X} response, expected FC{:02X}",
                    response_fc, request_fc
                );
                continue;
            }

            return Ok(frame.pdu);
        }
    }
}
