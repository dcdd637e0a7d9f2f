//! Transport layer: byte channels beneath the frame codec
//!
//! A [`ModbusTransport`] owns one physical channel exclusively and moves
//! whole ADUs: `send` writes one request frame, `receive` returns one
//! complete response frame within a deadline. Reconnection is an explicit
//! operation so callers can distinguish link-level failures (reconnect)
//! from protocol-level ones (resend).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MIN_RTU_FRAME_LEN};
use crate::error::{ModbusError, Result};

/// Byte-level transport abstraction.
///
/// One complete ADU per `receive` call; framing detection (MBAP length,
/// inter-byte silence, CRLF terminator) is the transport's job because it
/// depends on the physical channel.
#[async_trait]
pub trait ModbusTransport: Send {
    /// Send one request frame
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive one complete response frame into `buffer`, returning its
    /// length. Fails with `Timeout` if no complete frame arrives within
    /// `deadline`.
    async fn receive(&mut self, buffer: &mut [u8], deadline: Duration) -> Result<usize>;

    /// Tear down and re-establish the physical channel
    async fn reconnect(&mut self) -> Result<()>;

    /// Close the channel
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Server hostname or IP address
    pub host: String,
    /// Server port (Modbus default: 502)
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_tcp_port() -> u16 {
    502
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

impl TcpConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::None
    }
}

/// Serial (RTU/ASCII) transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub device: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity
    #[serde(default)]
    pub parity: Parity,
    /// Inter-byte silence that terminates an RTU frame, milliseconds
    #[serde(default = "default_byte_timeout_ms")]
    pub byte_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_byte_timeout_ms() -> u64 {
    50
}

impl SerialConfig {
    /// Inter-byte timeout as a `Duration`
    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }
}

/// Frame-end detection strategy for serial channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialFraming {
    /// Frame ends after inter-byte silence (binary RTU)
    Rtu,
    /// Frame ends at CRLF (ASCII)
    Ascii,
}

// ============================================================================
// TCP transport
// ============================================================================

/// Modbus TCP transport over a `TcpStream`
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a disconnected transport; `reconnect` establishes the link
    pub fn new(config: TcpConfig) -> Self {
        Self {
            stream: None,
            config,
        }
    }

    /// Connect immediately
    pub async fn connect(config: TcpConfig) -> Result<Self> {
        let mut transport = Self::new(config);
        transport.reconnect().await?;
        Ok(transport)
    }

    async fn open_stream(config: &TcpConfig) -> Result<TcpStream> {
        let addr = format!("{}:{}", config.host, config.port);
        debug!("TCP connecting: {}", addr);

        match timeout(config.connect_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(stream)
            }
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(ModbusError::Connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            }
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(ModbusError::Timeout(format!("Connection to {addr} timed out")))
            }
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::Connection("Not connected".to_string()))?;

        stream.write_all(frame).await.map_err(|e| {
            error!("TCP TX: {}", e);
            ModbusError::Io(format!("TCP send error: {e}"))
        })?;
        debug!("TCP TX: {}B", frame.len());
        Ok(())
    }

    async fn receive(&mut self, buffer: &mut [u8], deadline: Duration) -> Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::Connection("Not connected".to_string()))?;

        // MBAP header first: transaction id(2) + protocol id(2) + length(2)
        let mut header = [0u8; MBAP_HEADER_LEN];
        match timeout(deadline, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!("TCP header RX: {}", e);
                return Err(ModbusError::Io(format!("TCP header read error: {e}")));
            }
            Err(_) => {
                debug!("TCP header timeout");
                return Err(ModbusError::Timeout("TCP header read timeout".to_string()));
            }
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length == 0 || length > MAX_MBAP_LENGTH {
            error!("TCP invalid len: {}", length);
            return Err(ModbusError::Io(format!("Invalid TCP frame length: {length}")));
        }

        let total = MBAP_HEADER_LEN + length;
        if buffer.len() < total {
            return Err(ModbusError::Io(format!(
                "Buffer too small: need {}, have {}",
                total,
                buffer.len()
            )));
        }

        buffer[..MBAP_HEADER_LEN].copy_from_slice(&header);
        match timeout(deadline, stream.read_exact(&mut buffer[MBAP_HEADER_LEN..total])).await {
            Ok(Ok(_)) => {
                debug!("TCP RX: {}B", total);
                Ok(total)
            }
            Ok(Err(e)) => {
                error!("TCP body RX: {}", e);
                Err(ModbusError::Io(format!("TCP body read error: {e}")))
            }
            Err(_) => {
                debug!("TCP body timeout");
                Err(ModbusError::Timeout("TCP body read timeout".to_string()))
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.stream = None;
        self.stream = Some(Self::open_stream(&self.config).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream = None;
        debug!("TCP closed");
        Ok(())
    }
}

// ============================================================================
// Serial transport (RTU and ASCII)
// ============================================================================

/// Serial transport over a `SerialStream`, shared by RTU and ASCII modes
#[derive(Debug)]
pub struct SerialTransport {
    port: Option<SerialStream>,
    config: SerialConfig,
    framing: SerialFraming,
}

impl SerialTransport {
    /// Create a disconnected transport; `reconnect` opens the port
    pub fn new(config: SerialConfig, framing: SerialFraming) -> Self {
        Self {
            port: None,
            config,
            framing,
        }
    }

    /// Open the port immediately
    pub async fn connect(config: SerialConfig, framing: SerialFraming) -> Result<Self> {
        let mut transport = Self::new(config, framing);
        transport.reconnect().await?;
        Ok(transport)
    }

    fn open_port(config: &SerialConfig) -> Result<SerialStream> {
        debug!("Serial: {} @{}baud", config.device, config.baud_rate);

        let parity = match config.parity {
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::None => tokio_serial::Parity::None,
        };
        let data_bits = match config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let stop_bits = match config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        match tokio_serial::new(&config.device, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(config.byte_timeout())
            .open_native_async()
        {
            Ok(port) => {
                info!("Serial opened: {}", config.device);
                Ok(port)
            }
            Err(e) => {
                error!("Serial err: {} - {}", config.device, e);
                Err(ModbusError::Connection(format!(
                    "Failed to open serial port {}: {e}",
                    config.device
                )))
            }
        }
    }

    /// RTU framing: accumulate until inter-byte silence after at least a
    /// minimal frame, bounded by the overall deadline.
    async fn receive_rtu(
        port: &mut SerialStream,
        buffer: &mut [u8],
        deadline: Duration,
        byte_timeout: Duration,
    ) -> Result<usize> {
        let mut total = 0usize;
        let start = std::time::Instant::now();

        loop {
            if start.elapsed() >= deadline {
                if total < MIN_RTU_FRAME_LEN {
                    debug!("RTU timeout: {}B", total);
                    return Err(ModbusError::Timeout(
                        "RTU frame incomplete: total timeout".to_string(),
                    ));
                }
                break;
            }

            let remaining = &mut buffer[total..];
            if remaining.is_empty() {
                error!("RTU overflow: {}B", total);
                return Err(ModbusError::Io("RTU frame exceeds buffer size".to_string()));
            }
            let read_size = remaining.len().min(128);

            match timeout(byte_timeout, port.read(&mut remaining[..read_size])).await {
                Ok(Ok(0)) => {
                    error!("Serial closed");
                    return Err(ModbusError::Connection(
                        "Serial connection closed".to_string(),
                    ));
                }
                Ok(Ok(bytes)) => {
                    total += bytes;
                }
                Ok(Err(e)) => {
                    error!("RTU RX: {}", e);
                    return Err(ModbusError::Io(format!("Serial read error: {e}")));
                }
                Err(_) => {
                    // Inter-byte silence marks frame end once we have a
                    // plausible frame; a short fragment is a dead exchange
                    if total >= MIN_RTU_FRAME_LEN {
                        break;
                    } else if total > 0 {
                        debug!("RTU partial: {}B", total);
                        return Err(ModbusError::Timeout(
                            "RTU frame incomplete: inter-byte timeout".to_string(),
                        ));
                    }
                }
            }
        }

        debug!("RTU RX: {}B", total);
        Ok(total)
    }

    /// ASCII framing: accumulate until the CRLF terminator, bounded by the
    /// overall deadline.
    async fn receive_ascii(
        port: &mut SerialStream,
        buffer: &mut [u8],
        deadline: Duration,
    ) -> Result<usize> {
        let mut total = 0usize;
        let start = std::time::Instant::now();

        loop {
            if total >= 2 && &buffer[total - 2..total] == b"\r\n" {
                debug!("ASCII RX: {}B", total);
                return Ok(total);
            }

            let elapsed = start.elapsed();
            if elapsed >= deadline {
                debug!("ASCII timeout: {}B", total);
                return Err(ModbusError::Timeout(
                    "ASCII frame incomplete: total timeout".to_string(),
                ));
            }

            let remaining = &mut buffer[total..];
            if remaining.is_empty() {
                error!("ASCII overflow: {}B", total);
                return Err(ModbusError::Io(
                    "ASCII frame exceeds buffer size".to_string(),
                ));
            }
            let read_size = remaining.len().min(128);

            match timeout(deadline - elapsed, port.read(&mut remaining[..read_size])).await {
                Ok(Ok(0)) => {
                    error!("Serial closed");
                    return Err(ModbusError::Connection(
                        "Serial connection closed".to_string(),
                    ));
                }
                Ok(Ok(bytes)) => {
                    total += bytes;
                }
                Ok(Err(e)) => {
                    error!("ASCII RX: {}", e);
                    return Err(ModbusError::Io(format!("Serial read error: {e}")));
                }
                Err(_) => {
                    debug!("ASCII timeout: {}B", total);
                    return Err(ModbusError::Timeout(
                        "ASCII frame incomplete: total timeout".to_string(),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl ModbusTransport for SerialTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::Connection("Not connected".to_string()))?;

        port.write_all(frame).await.map_err(|e| {
            error!("Serial TX: {}", e);
            ModbusError::Io(format!("Serial send error: {e}"))
        })?;
        port.flush().await.map_err(|e| {
            error!("Serial flush: {}", e);
            ModbusError::Io(format!("Serial flush error: {e}"))
        })?;
        debug!("Serial TX: {}B", frame.len());
        Ok(())
    }

    async fn receive(&mut self, buffer: &mut [u8], deadline: Duration) -> Result<usize> {
        let byte_timeout = self.config.byte_timeout();
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::Connection("Not connected".to_string()))?;

        match self.framing {
            SerialFraming::Rtu => Self::receive_rtu(port, buffer, deadline, byte_timeout).await,
            SerialFraming::Ascii => Self::receive_ascii(port, buffer, deadline).await,
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.port = None;
        self.port = Some(Self::open_port(&self.config)?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.port = None;
        debug!("Serial closed: {}", self.config.device);
        Ok(())
    }
}
