//! Transmit path: coalescing scheduler and packetizer.
//!
//! Writes are held back for up to [`COALESCE_PERIOD_MS`] so that short writes share one packet.
//! Once a full packet's worth is queued it is sent straight away and every IN completion chains
//! the next packet, so sustained output does not wait for the timer.
//!
//! Only one packet is ever in flight. Sending requires claiming the endpoint, which atomically
//! checks and clears the ready flag; whoever holds the claim is the only one touching the IN
//! endpoint until the completion interrupt releases it.

use core::mem;

use crate::config::{COALESCE_PERIOD_MS, MAX_PACKET_SIZE, PACKET_PAYLOAD};
use crate::guard::InterruptMask;
use crate::hw::{BusyWait, CoalescingTimer, Endpoints};
use crate::serial_port::{Error, Port};

/// Events that drive the transmit scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// The application queued bytes.
    WriteRequested,
    /// The coalescing timer expired.
    TimerFired,
}

pub(crate) struct TransmitState {
    /// The IN endpoint can take a new packet.
    pub endpoint_ready: bool,
    /// The coalescing timer is pending.
    pub timer_armed: bool,
}

impl TransmitState {
    pub const fn new() -> Self {
        TransmitState {
            endpoint_ready: true,
            timer_armed: false,
        }
    }
}

impl<E, T, M, W> Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    pub fn on_trigger(&self, trigger: Trigger) {
        match trigger {
            Trigger::WriteRequested => self.write_requested(),
            Trigger::TimerFired => self.timer_fired(),
        }
    }

    /// Coalescing timer callback.
    ///
    /// Spins until any in-flight packet has completed, so it must run in a context the USB
    /// interrupt can preempt.
    pub fn on_timer_fired(&self) {
        self.on_trigger(Trigger::TimerFired);
    }

    /// IN endpoint completion, called from the USB interrupt. Chains the next packet if a full one
    /// is already queued.
    pub fn on_transmit_complete(&self) {
        self.state.lock(|s| s.endpoint_ready = true);
        self.write_requested();
    }

    /// USB bus reset. Whatever packet was in flight is gone.
    pub fn on_bus_reset(&self) {
        log::debug!("port {}: bus reset", self.id);
        self.state.lock(|s| s.endpoint_ready = true);
    }

    /// Sends one packet now if anything is queued, bypassing the coalescing delay.
    ///
    /// Returns `Ok` once the transmit FIFO is empty and the host has acknowledged the last packet,
    /// `WouldBlock` otherwise.
    pub fn flush(&self) -> nb::Result<(), Error> {
        if self.tx_pending() == 0 {
            return if self.state.lock(|s| s.endpoint_ready) {
                Ok(())
            } else {
                Err(nb::Error::WouldBlock)
            };
        }

        if self.claim_endpoint() {
            self.send_claimed();
        }
        Err(nb::Error::WouldBlock)
    }

    pub(crate) fn write_requested(&self) {
        let pending = self.tx_pending();
        if pending >= PACKET_PAYLOAD {
            self.send_now();
        } else if pending > 0 && self.state.lock(|s| !mem::replace(&mut s.timer_armed, true)) {
            self.timer.lock(|t| t.arm(COALESCE_PERIOD_MS));
        }
    }

    /// Re-arms the timer as an overflow guard and sends straight away unless a packet is already
    /// in flight, in which case its completion picks up the queued bytes.
    pub(crate) fn send_now(&self) {
        self.state.lock(|s| s.timer_armed = true);
        self.timer.lock(|t| t.arm(COALESCE_PERIOD_MS));

        if self.claim_endpoint() {
            self.send_claimed();
        }
    }

    fn timer_fired(&self) {
        self.state.lock(|s| s.timer_armed = false);

        if self.wait.wait_until(|| self.claim_endpoint()).is_err() {
            log::warn!("port {}: IN endpoint stuck busy, retrying later", self.id);
            self.state.lock(|s| s.timer_armed = true);
            self.timer.lock(|t| t.arm(COALESCE_PERIOD_MS));
            return;
        }
        self.send_claimed();
    }

    fn claim_endpoint(&self) -> bool {
        self.state.lock(|s| mem::replace(&mut s.endpoint_ready, false))
    }

    fn release_endpoint(&self) {
        self.state.lock(|s| s.endpoint_ready = true);
    }

    fn tx_pending(&self) -> usize {
        self.tx.lock(|tx| tx.as_ref().map_or(0, |tx| tx.len()))
    }

    /// Moves up to one packet from the transmit FIFO to the IN endpoint. The caller must hold the
    /// endpoint claim; it is released here if nothing ends up in flight.
    ///
    /// Bytes leave the FIFO only once the hardware accepted them.
    fn send_claimed(&self) -> usize {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let count = self.tx.lock(|tx| {
            tx.as_ref()
                .map_or(0, |tx| tx.peek_into(&mut packet[..PACKET_PAYLOAD]))
        });

        if count == 0 {
            self.release_endpoint();
            return 0;
        }

        match self.endpoints.lock(|ep| ep.write_packet(&packet[..count])) {
            Ok(()) => {
                self.tx.lock(|tx| {
                    if let Some(tx) = tx {
                        tx.discard(count);
                    }
                });
                log::trace!("port {}: sent {} bytes", self.id, count);
                count
            }
            Err(err) => {
                log::warn!("port {}: IN packet rejected: {:?}", self.id, err);
                self.release_endpoint();
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::Trigger;
    use crate::config::{LineSettings, COALESCE_PERIOD_MS, PACKET_PAYLOAD};
    use crate::hw::mock::{MockEndpoints, MockTimer};
    use crate::Port;
    use std::vec::Vec;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn short_writes_coalesce_behind_one_timer() {
        let ep = MockEndpoints::configured();
        let timer = MockTimer::default();
        let (mut rx, mut tx) = ([0u8; 1024], [0u8; 1024]);
        let port = Port::new(0, ep.clone(), timer.clone());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        port.put_bytes(b"abc").unwrap();
        port.put_bytes(b"def").unwrap();

        assert_eq!(ep.bus().writes, 0);
        assert_eq!(timer.log().arms, 1);
        assert_eq!(timer.log().last_period_ms, Some(COALESCE_PERIOD_MS));

        port.on_timer_fired();
        assert_eq!(ep.in_flight().as_deref(), Some(&b"abcdef"[..]));
    }

    #[test]
    fn write_request_on_empty_fifo_does_nothing() {
        let ep = MockEndpoints::configured();
        let timer = MockTimer::default();
        let (mut rx, mut tx) = ([0u8; 64], [0u8; 64]);
        let port = Port::new(0, ep.clone(), timer.clone());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        port.on_trigger(Trigger::WriteRequested);
        port.on_trigger(Trigger::WriteRequested);

        assert_eq!(ep.bus().writes, 0);
        assert_eq!(timer.log().arms, 0);
    }

    #[test]
    fn full_packet_sends_immediately_and_rearms() {
        let ep = MockEndpoints::configured();
        let timer = MockTimer::default();
        let (mut rx, mut tx) = ([0u8; 1024], [0u8; 1024]);
        let port = Port::new(0, ep.clone(), timer.clone());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        let data = pattern(PACKET_PAYLOAD + 10);
        port.put_bytes(&data).unwrap();

        assert_eq!(ep.in_flight().unwrap(), &data[..PACKET_PAYLOAD]);
        assert_eq!(timer.log().arms, 1);

        // Below the threshold again: no second send, the pending timer is left alone.
        port.put_bytes(b"x").unwrap();
        assert_eq!(ep.bus().writes, 1);
        assert_eq!(timer.log().arms, 1);
    }

    #[test]
    fn completion_chains_full_packets() {
        let ep = MockEndpoints::configured();
        let timer = MockTimer::default();
        let (mut rx, mut tx) = ([0u8; 1024], [0u8; 1024]);
        let port = Port::new(0, ep.clone(), timer.clone());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        let data = pattern(PACKET_PAYLOAD * 3 + 5);
        port.put_bytes(&data).unwrap();
        assert_eq!(ep.bus().writes, 1);

        assert!(ep.complete());
        port.on_transmit_complete();
        assert!(ep.complete());
        port.on_transmit_complete();
        assert_eq!(ep.bus().writes, 3);

        // Five bytes left, below the threshold: the chain stops and waits for the timer.
        assert!(ep.complete());
        port.on_transmit_complete();
        assert_eq!(ep.bus().writes, 3);
        assert_eq!(ep.in_flight(), None);

        port.on_timer_fired();
        assert!(ep.complete());
        port.on_transmit_complete();

        assert_eq!(ep.delivered_bytes(), data);
        assert_eq!(ep.bus().overlaps, 0);
        assert_eq!(port.flush(), Ok(()));
    }

    #[test]
    fn write_while_in_flight_waits_for_completion() {
        let ep = MockEndpoints::configured();
        let timer = MockTimer::default();
        let (mut rx, mut tx) = ([0u8; 1024], [0u8; 1024]);
        let port = Port::new(0, ep.clone(), timer.clone());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        port.put_bytes(&pattern(PACKET_PAYLOAD)).unwrap();
        port.put_bytes(&pattern(PACKET_PAYLOAD)).unwrap();

        assert_eq!(ep.bus().writes, 1);
        assert_eq!(ep.bus().overlaps, 0);
        assert_eq!(port.flush(), Err(nb::Error::WouldBlock));
        assert_eq!(ep.bus().writes, 1);

        assert!(ep.complete());
        port.on_transmit_complete();
        assert_eq!(ep.bus().writes, 2);
    }

    #[test]
    fn timer_with_empty_fifo_leaves_endpoint_ready() {
        let ep = MockEndpoints::configured();
        let (mut rx, mut tx) = ([0u8; 64], [0u8; 64]);
        let port = Port::new(0, ep.clone(), MockTimer::default());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        port.on_timer_fired();
        port.on_timer_fired();

        assert_eq!(ep.bus().writes, 0);
        assert_eq!(port.flush(), Ok(()));
    }

    #[test]
    fn rejected_packet_keeps_bytes_queued() {
        let ep = MockEndpoints::configured();
        let (mut rx, mut tx) = ([0u8; 64], [0u8; 64]);
        let port = Port::new(0, ep.clone(), MockTimer::default());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        port.put_bytes(b"keep").unwrap();
        ep.bus().fail_next_write = true;
        port.on_timer_fired();
        assert_eq!(ep.in_flight(), None);

        port.on_timer_fired();
        assert_eq!(ep.in_flight().as_deref(), Some(&b"keep"[..]));
    }

    #[test]
    fn bus_reset_releases_endpoint() {
        let ep = MockEndpoints::configured();
        let (mut rx, mut tx) = ([0u8; 256], [0u8; 256]);
        let port = Port::new(0, ep.clone(), MockTimer::default());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        port.put_bytes(&pattern(PACKET_PAYLOAD * 2)).unwrap();
        assert_eq!(ep.bus().writes, 1);

        // The host never acknowledges; the reset drops the packet on the floor.
        ep.bus().in_flight = None;
        port.on_bus_reset();
        port.on_timer_fired();
        assert_eq!(ep.bus().writes, 2);
    }
}
