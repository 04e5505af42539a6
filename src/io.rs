use crate::guard::InterruptMask;
use crate::hw::{BusyWait, CoalescingTimer, Endpoints};
use crate::serial_port::{Error, Port};

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::NotConfigured | Error::PortClosed => embedded_io::ErrorKind::NotConnected,
            Error::Stalled => embedded_io::ErrorKind::TimedOut,
        }
    }
}

impl<E, T, M, W> embedded_io::ErrorType for Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    type Error = Error;
}

impl<E, T, M, W> embedded_io::Read for Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        // We are required by `embedded-io` to keep waiting until at least one byte is read.
        let port: &Self = self;
        let mut result = Ok(0);
        port.wait.wait_until(|| {
            result = <Port<'_, E, T, M, W>>::read(port, buf);
            !matches!(result, Ok(0))
        })?;
        result
    }
}

impl<E, T, M, W> embedded_io::ReadReady for Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.available_read() != 0)
    }
}

impl<E, T, M, W> embedded_io::Write for Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.put_bytes(buf)?;
        Ok(buf.len())
    }

    /// Blocks until everything queued has been acknowledged by the host.
    fn flush(&mut self) -> Result<(), Self::Error> {
        let port: &Self = self;
        let mut result = Ok(());
        port.wait.wait_until(|| match <Port<'_, E, T, M, W>>::flush(port) {
            Err(nb::Error::WouldBlock) => false,
            Err(nb::Error::Other(err)) => {
                result = Err(err);
                true
            }
            Ok(()) => true,
        })?;
        result
    }
}

impl<E, T, M, W> embedded_io::WriteReady for Port<'_, E, T, M, W>
where
    E: Endpoints,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.available_write() != 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LineSettings;
    use crate::guard::CriticalSection;
    use crate::hw::mock::{MockEndpoints, MockTimer};
    use crate::hw::BoundedSpin;
    use crate::Port;
    use embedded_io::{Error as _, ErrorKind, Read, ReadReady, Write, WriteReady};

    #[test]
    fn blocking_flush_waits_for_acknowledge() {
        let ep = MockEndpoints::configured();
        let (mut rx, mut tx) = ([0u8; 64], [0u8; 64]);
        let mut port = Port::with_policy(
            0,
            ep.clone(),
            MockTimer::default(),
            CriticalSection,
            BoundedSpin { max_polls: 1000 },
        );
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        assert_eq!(port.write_ready(), Ok(true));
        assert_eq!(Write::write(&mut port, b"ping"), Ok(4));

        // The packet goes out but the host never acknowledges it.
        let err = Write::flush(&mut port).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert_eq!(ep.in_flight().as_deref(), Some(&b"ping"[..]));

        assert!(ep.complete());
        port.on_transmit_complete();
        assert_eq!(Write::flush(&mut port), Ok(()));
        assert_eq!(ep.delivered_bytes(), b"ping");
    }

    #[test]
    fn read_returns_available_bytes() {
        let ep = MockEndpoints::configured();
        let (mut rx, mut tx) = ([0u8; 64], [0u8; 64]);
        let mut port = Port::new(0, ep.clone(), MockTimer::default());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        assert_eq!(port.read_ready(), Ok(false));
        ep.queue_rx(b"pong");
        port.on_receive_packet();
        assert_eq!(port.read_ready(), Ok(true));

        let mut buf = [0u8; 16];
        assert_eq!(Read::read(&mut port, &mut buf), Ok(4));
        assert_eq!(&buf[..4], b"pong");
    }

    #[test]
    fn read_before_enumeration_fails() {
        let ep = MockEndpoints::default();
        let (mut rx, mut tx) = ([0u8; 8], [0u8; 8]);
        let mut port = Port::new(0, ep, MockTimer::default());
        port.configure(LineSettings::default(), &mut rx, &mut tx);

        let mut buf = [0u8; 4];
        assert_eq!(
            Read::read(&mut port, &mut buf),
            Err(crate::Error::NotConfigured)
        );
    }
}
