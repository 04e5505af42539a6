//! UART-style byte port carried over a USB CDC-ACM interface, for
//! [usb-device](https://crates.io/crates/usb-device).
//!
//! The [`Port`] owns a receive FIFO and a transmit FIFO. Application writes are queued and
//! coalesced into USB packets of at most [`PACKET_PAYLOAD`](config::PACKET_PAYLOAD) bytes: short
//! writes wait for a coalescing timer, a full packet's worth is sent straight away, and each IN
//! completion chains the next packet. Writes never drop bytes; when the transmit FIFO is full the
//! caller spins until the host has taken enough data. Received packets are pushed into the receive
//! FIFO from the USB interrupt and dropped once it is full.
//!
//! The port is driven from three contexts: the application, the USB interrupt (through
//! [`BridgeClass`]) and the timer callback. All of them use `&Port`; shared state lives in
//! [`Guarded`] sections.
//!
//! Example
//! =======
//!
//! ```no_run
//! # use usb_device::class_prelude::*;
//! # struct Timer;
//! # impl usbd_uart::CoalescingTimer for Timer { fn arm(&mut self, _period_ms: u32) {} }
//! # fn dummy(usb_bus: UsbBusAllocator<impl UsbBus>) {
//! use usb_device::prelude::*;
//! use usbd_uart::{config, BridgeClass, CdcAcmClass, LineSettings, Port, USB_CLASS_CDC};
//!
//! static mut RX: [u8; config::FIFO_RX_SIZE] = [0; config::FIFO_RX_SIZE];
//! static mut TX: [u8; config::FIFO_TX_SIZE] = [0; config::FIFO_TX_SIZE];
//!
//! let class = CdcAcmClass::new(&usb_bus, config::MAX_PACKET_SIZE as u16);
//! let port = Port::new(0, class, Timer);
//! port.configure(LineSettings::default(), unsafe { &mut *core::ptr::addr_of_mut!(RX) }, unsafe {
//!     &mut *core::ptr::addr_of_mut!(TX)
//! });
//!
//! let mut usb_dev = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(0x16c0, 0x27dd))
//!     .product("Serial port")
//!     .device_class(USB_CLASS_CDC)
//!     .build();
//!
//! // In the USB interrupt handler:
//! let mut bridge = BridgeClass::new(&port);
//! usb_dev.poll(&mut [&mut bridge]);
//! port.with_endpoints(|class| class.set_device_state(usb_dev.state()));
//!
//! // In the timer callback: port.on_timer_fired();
//!
//! // In the application:
//! port.put_bytes(b"hello").ok();
//! if let Ok(byte) = port.get_byte() {
//!     // ...
//! }
//! # }
//! ```

#![no_std]

mod buffer;
mod cdc_acm;
pub mod config;
mod guard;
mod hw;
mod io;
mod receive;
mod serial_port;
mod transmit;

pub use crate::buffer::RingBuffer;
pub use crate::cdc_acm::*;
pub use crate::config::{FlowControl, LineSettings, UartMode};
pub use crate::guard::*;
pub use crate::hw::{BoundedSpin, BusyWait, CoalescingTimer, Endpoints, Spin, Stalled};
pub use crate::serial_port::*;
pub use crate::transmit::Trigger;
pub use embedded_io;
pub use usb_device::{Result, UsbError};
