//! Buffer sizing, packet framing and line settings.

use crate::cdc_acm::{ParityType, StopBits};

/// Receive FIFO size in bytes
pub const FIFO_RX_SIZE: usize = 1024;

/// Transmit FIFO size in bytes
pub const FIFO_TX_SIZE: usize = 1024;

/// Max packet size of the full-speed bulk endpoints
pub const MAX_PACKET_SIZE: usize = 64;

/// Payload bytes per IN packet. One byte of margin is left for the peer's framing.
pub const PACKET_PAYLOAD: usize = MAX_PACKET_SIZE - 1;

/// Coalescing timer period in milliseconds
pub const COALESCE_PERIOD_MS: u32 = 20;

/// Directions the application intends to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UartMode {
    Tx,
    Rx,
    RxTx,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Rts,
    Cts,
    RtsCts,
}

/// UART line settings passed to [`Port::configure`](crate::Port::configure).
///
/// The physical layer is USB so none of these change how bytes move. They are kept so the
/// application can report them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineSettings {
    pub mode: UartMode,
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8 or 16)
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: ParityType,
    pub flow_control: FlowControl,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            mode: UartMode::RxTx,
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: ParityType::None,
            flow_control: FlowControl::None,
        }
    }
}
