//! Collaborators the port drives but does not implement.

use usb_device::UsbError;

/// The bulk IN/OUT endpoint pair carrying the byte stream.
pub trait Endpoints {
    /// Copies `data` into the IN endpoint buffer, sets its length and marks it valid. Issues
    /// exactly one packet.
    fn write_packet(&mut self, data: &[u8]) -> Result<(), UsbError>;

    /// Copies the packet waiting on the OUT endpoint into `buf`, marks the endpoint ready for the
    /// next packet and returns the packet length.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, UsbError>;

    /// Whether the host has finished enumerating the device.
    fn is_configured(&self) -> bool;
}

/// A one-shot software timer whose expiry calls [`Port::on_timer_fired`](crate::Port::on_timer_fired).
pub trait CoalescingTimer {
    /// Schedules one expiry `period_ms` from now. Arming a pending timer restarts it.
    fn arm(&mut self, period_ms: u32);
}

/// Returned when a [`BusyWait`] policy gives up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stalled;

/// The single primitive behind every busy-wait in the port.
pub trait BusyWait {
    /// Polls `ready` until it returns `true`.
    fn wait_until(&self, ready: impl FnMut() -> bool) -> Result<(), Stalled>;
}

/// Spins forever. A stalled USB host blocks the caller indefinitely.
#[derive(Clone, Copy, Debug, Default)]
pub struct Spin;

impl BusyWait for Spin {
    fn wait_until(&self, mut ready: impl FnMut() -> bool) -> Result<(), Stalled> {
        while !ready() {
            core::hint::spin_loop();
        }
        Ok(())
    }
}

/// Spins for at most `max_polls` polls of the condition.
#[derive(Clone, Copy, Debug)]
pub struct BoundedSpin {
    pub max_polls: u32,
}

impl BusyWait for BoundedSpin {
    fn wait_until(&self, mut ready: impl FnMut() -> bool) -> Result<(), Stalled> {
        for _ in 0..self.max_polls {
            if ready() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(Stalled)
    }
}
