use usb_device::UsbError;

use crate::config::MAX_PACKET_SIZE;
use crate::guard::InterruptMask;
use crate::hw::{BusyWait, CoalescingTimer, Endpoints};
use crate::serial_port::{Notification, Port};

impl<E, T, M, W> Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    /// OUT endpoint callback, called from the USB interrupt when a packet has arrived.
    ///
    /// Bytes that do not fit in the receive FIFO are dropped; the earliest bytes of the packet are
    /// kept. The notification target, if any, is invoked before returning.
    pub fn on_receive_packet(&self) {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let count = match self.endpoints.lock(|ep| ep.read_packet(&mut packet)) {
            Ok(count) => count,
            Err(UsbError::WouldBlock) => return,
            Err(err) => {
                log::warn!("port {}: OUT packet lost: {:?}", self.id, err);
                return;
            }
        };

        let stored = self.rx.lock(|rx| match rx {
            Some(rx) => packet[..count].iter().take_while(|&&b| rx.push(b)).count(),
            None => 0,
        });

        log::trace!("port {}: received {} bytes", self.id, count);
        if stored < count {
            log::debug!(
                "port {}: rx overrun, dropped {} of {} bytes",
                self.id,
                count - stored,
                count
            );
        }

        if let Some(notify) = self.notify.lock(|n| *n) {
            notify(Notification::ReceiveDataAvailable);
        }
    }
}
