use core::slice;

use crate::buffer::RingBuffer;
use crate::config::LineSettings;
use crate::guard::{CriticalSection, Guarded, InterruptMask};
use crate::hw::{BusyWait, CoalescingTimer, Endpoints, Spin, Stalled};
use crate::transmit::TransmitState;

/// Errors reported by the port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The host has not finished enumerating the device.
    NotConfigured,
    /// No buffers are bound to the port; call [`Port::configure`] first.
    PortClosed,
    /// A bounded [`BusyWait`] policy gave up waiting on the USB host.
    Stalled,
}

impl From<Stalled> for Error {
    fn from(_: Stalled) -> Self {
        Error::Stalled
    }
}

/// Signals delivered to the registered notification target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// At least one packet was taken off the OUT endpoint.
    ReceiveDataAvailable,
}

/// A notification target. The port only borrows it.
pub type Notify<'a> = &'a (dyn Fn(Notification) + Sync);

pub(crate) type Fifo<'a> = Option<RingBuffer<&'a mut [u8]>>;

/// UART-like byte port carried over a USB bulk endpoint pair.
///
/// All methods take `&self` so one port can be shared between the application, the USB interrupt
/// handler and the coalescing timer callback. Each piece of shared state sits in its own
/// [`Guarded`] section using the mask `M`.
///
/// The interrupt-side entry points are [`Port::on_transmit_complete`],
/// [`Port::on_receive_packet`], [`Port::on_timer_fired`] and [`Port::on_bus_reset`].
pub struct Port<'a, E, T, M = CriticalSection, W = Spin>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    pub(crate) id: u8,
    pub(crate) state: Guarded<TransmitState, M>,
    pub(crate) tx: Guarded<Fifo<'a>, M>,
    pub(crate) rx: Guarded<Fifo<'a>, M>,
    pub(crate) endpoints: Guarded<E, M>,
    pub(crate) timer: Guarded<T, M>,
    pub(crate) notify: Guarded<Option<Notify<'a>>, M>,
    settings: Guarded<Option<LineSettings>, M>,
    pub(crate) wait: W,
}

impl<'a, E, T> Port<'a, E, T>
where
    E: Endpoints,
    T: CoalescingTimer,
{
    /// Creates an unconfigured port guarded by a global critical section that spins without a
    /// timeout.
    pub fn new(id: u8, endpoints: E, timer: T) -> Self {
        Port::with_policy(id, endpoints, timer, CriticalSection, Spin)
    }
}

impl<'a, E, T, M, W> Port<'a, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask + Clone,
    W: BusyWait,
{
    /// Creates an unconfigured port with an explicit masking and busy-wait policy.
    pub fn with_policy(id: u8, endpoints: E, timer: T, mask: M, wait: W) -> Self {
        Port {
            id,
            state: Guarded::new(mask.clone(), TransmitState::new()),
            tx: Guarded::new(mask.clone(), None),
            rx: Guarded::new(mask.clone(), None),
            endpoints: Guarded::new(mask.clone(), endpoints),
            timer: Guarded::new(mask.clone(), timer),
            notify: Guarded::new(mask.clone(), None),
            settings: Guarded::new(mask, None),
            wait,
        }
    }
}

impl<'a, E, T, M, W> Port<'a, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Binds the receive and transmit FIFOs to the port and records the line settings.
    ///
    /// Any data left from a previous configuration is discarded.
    pub fn configure(&self, settings: LineSettings, rx_store: &'a mut [u8], tx_store: &'a mut [u8]) {
        log::debug!(
            "port {}: configured, rx {} bytes, tx {} bytes, {:?}",
            self.id,
            rx_store.len(),
            tx_store.len(),
            settings
        );

        self.rx.lock(|rx| *rx = Some(RingBuffer::new(rx_store)));
        self.tx.lock(|tx| *tx = Some(RingBuffer::new(tx_store)));
        self.settings.lock(|s| *s = Some(settings));
    }

    /// Unbinds the FIFOs and hands their stores back for a later [`Port::configure`].
    ///
    /// A busy-wait already in progress is not interrupted.
    pub fn deinit(&self) -> Option<(&'a mut [u8], &'a mut [u8])> {
        let rx = self.rx.lock(|rx| rx.take());
        let tx = self.tx.lock(|tx| tx.take());
        self.settings.lock(|s| *s = None);

        log::debug!("port {}: deinit", self.id);
        Some((rx?.into_store(), tx?.into_store()))
    }

    /// Whether FIFOs are currently bound.
    pub fn is_open(&self) -> bool {
        self.tx.lock(|tx| tx.is_some())
    }

    /// Line settings given to the last [`Port::configure`].
    pub fn line_settings(&self) -> Option<LineSettings> {
        self.settings.lock(|s| *s)
    }

    /// Registers (or clears) the target invoked from the receive interrupt.
    ///
    /// The target runs inside the interrupt handler and must not block.
    pub fn set_notify(&self, notify: Option<Notify<'a>>) {
        self.notify.lock(|n| *n = notify);
    }

    /// Runs `f` on the endpoint collaborator inside a guarded section.
    pub fn with_endpoints<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        self.endpoints.lock(f)
    }

    /// Queues `data` for transmission.
    ///
    /// Whenever the transmit FIFO is full a send is forced and the call spins until space frees, so
    /// no byte is ever dropped. With the default [`Spin`] policy a host that stops reading blocks
    /// this call forever.
    pub fn put_bytes(&self, data: &[u8]) -> Result<(), Error> {
        for &byte in data {
            match self.push_tx(byte) {
                Some(true) => {}
                Some(false) => {
                    self.send_now();

                    let mut closed = false;
                    self.wait.wait_until(|| match self.push_tx(byte) {
                        Some(pushed) => pushed,
                        None => {
                            closed = true;
                            true
                        }
                    })?;

                    if closed {
                        return Err(Error::PortClosed);
                    }
                }
                None => return Err(Error::PortClosed),
            }
        }

        self.write_requested();
        Ok(())
    }

    pub fn put_byte(&self, byte: u8) -> Result<(), Error> {
        self.put_bytes(slice::from_ref(&byte))
    }

    /// Takes one received byte.
    ///
    /// Returns `WouldBlock` when nothing has been received and [`Error::NotConfigured`] until the
    /// host has enumerated the device, whatever the FIFO holds.
    pub fn get_byte(&self) -> nb::Result<u8, Error> {
        if !self.endpoints.lock(|ep| ep.is_configured()) {
            return Err(nb::Error::Other(Error::NotConfigured));
        }

        match self.rx.lock(|rx| rx.as_mut().map(RingBuffer::pop)) {
            Some(Some(byte)) => Ok(byte),
            Some(None) => Err(nb::Error::WouldBlock),
            None => Err(nb::Error::Other(Error::PortClosed)),
        }
    }

    /// Takes as many received bytes as fit into `data` and returns how many were read.
    pub fn read(&self, data: &mut [u8]) -> Result<usize, Error> {
        if !self.endpoints.lock(|ep| ep.is_configured()) {
            return Err(Error::NotConfigured);
        }

        self.rx.lock(|rx| {
            let rx = rx.as_mut().ok_or(Error::PortClosed)?;
            let count = rx.peek_into(data);
            rx.discard(count);
            Ok(count)
        })
    }

    /// Number of received bytes waiting to be read.
    pub fn available_read(&self) -> usize {
        self.rx.lock(|rx| rx.as_ref().map_or(0, RingBuffer::len))
    }

    /// Free space in the transmit FIFO.
    pub fn available_write(&self) -> usize {
        self.tx.lock(|tx| tx.as_ref().map_or(0, RingBuffer::available_write))
    }

    fn push_tx(&self, byte: u8) -> Option<bool> {
        self.tx.lock(|tx| tx.as_mut().map(|tx| tx.push(byte)))
    }
}

impl<E, T, M, W> embedded_hal::serial::Write<u8> for Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    type Error = Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.put_byte(word).map_err(nb::Error::Other)
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        <Port<'_, E, T, M, W>>::flush(self)
    }
}

impl<E, T, M, W> embedded_hal::serial::Read<u8> for Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.get_byte()
    }
}
