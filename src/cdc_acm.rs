use usb_device::class_prelude::*;
use usb_device::device::UsbDeviceState;
use usb_device::Result;

use crate::guard::InterruptMask;
use crate::hw::{BusyWait, CoalescingTimer, Endpoints};
use crate::serial_port::Port;

/// This should be used as `device_class` when building the `UsbDevice`.
pub const USB_CLASS_CDC: u8 = 0x02;

const USB_CLASS_CDC_DATA: u8 = 0x0a;
const CDC_SUBCLASS_ACM: u8 = 0x02;
const CDC_PROTOCOL_NONE: u8 = 0x00;

const CS_INTERFACE: u8 = 0x24;
const CDC_TYPE_HEADER: u8 = 0x00;
const CDC_TYPE_CALL_MANAGEMENT: u8 = 0x01;
const CDC_TYPE_ACM: u8 = 0x02;
const CDC_TYPE_UNION: u8 = 0x06;

const REQ_SEND_ENCAPSULATED_COMMAND: u8 = 0x00;
const REQ_SET_LINE_CODING: u8 = 0x20;
const REQ_GET_LINE_CODING: u8 = 0x21;
const REQ_SET_CONTROL_LINE_STATE: u8 = 0x22;

/// Packet-level CDC-ACM class: descriptors, line coding and control line requests, and the bulk
/// endpoint pair used as the port's [`Endpoints`].
///
/// Nothing the host sets here changes how bytes move; it is only recorded for the application.
pub struct CdcAcmClass<'a, B: UsbBus> {
    comm_if: InterfaceNumber,
    comm_ep: EndpointIn<'a, B>,
    data_if: InterfaceNumber,
    read_ep: EndpointOut<'a, B>,
    write_ep: EndpointIn<'a, B>,
    line_coding: LineCoding,
    dtr: bool,
    rts: bool,
    device_state: UsbDeviceState,
}

impl<B: UsbBus> CdcAcmClass<'_, B> {
    /// Creates a new CdcAcmClass with the provided UsbBus and max_packet_size in bytes. For
    /// full-speed devices, max_packet_size has to be one of 8, 16, 32 or 64.
    pub fn new(alloc: &UsbBusAllocator<B>, max_packet_size: u16) -> CdcAcmClass<'_, B> {
        CdcAcmClass {
            comm_if: alloc.interface(),
            comm_ep: alloc.interrupt(8, 255),
            data_if: alloc.interface(),
            read_ep: alloc.bulk(max_packet_size),
            write_ep: alloc.bulk(max_packet_size),
            line_coding: LineCoding::default(),
            dtr: false,
            rts: false,
            device_state: UsbDeviceState::Default,
        }
    }

    /// Gets the maximum packet size in bytes.
    pub fn max_packet_size(&self) -> u16 {
        // The size is the same for both endpoints.
        self.read_ep.max_packet_size()
    }

    /// Gets the current line coding. The line coding contains information that's mainly relevant
    /// for USB to UART serial port emulators, and can be ignored if not relevant.
    pub fn line_coding(&self) -> &LineCoding {
        &self.line_coding
    }

    /// Gets the DTR (data terminal ready) state
    pub fn dtr(&self) -> bool {
        self.dtr
    }

    /// Gets the RTS (request to send) state
    pub fn rts(&self) -> bool {
        self.rts
    }

    /// Records the device state reported by `UsbDevice::state()`. Call it after every poll.
    pub fn set_device_state(&mut self, state: UsbDeviceState) {
        self.device_state = state;
    }

    /// Gets the address of the IN endpoint.
    pub fn write_ep_address(&self) -> EndpointAddress {
        self.write_ep.address()
    }

    /// Gets the address of the OUT endpoint.
    pub fn read_ep_address(&self) -> EndpointAddress {
        self.read_ep.address()
    }
}

impl<B: UsbBus> Endpoints for CdcAcmClass<'_, B> {
    fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        self.write_ep.write(data).map(|_| ())
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read_ep.read(buf)
    }

    fn is_configured(&self) -> bool {
        self.device_state == UsbDeviceState::Configured
    }
}

impl<B: UsbBus> UsbClass<B> for CdcAcmClass<'_, B> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> Result<()> {
        writer.iad(
            self.comm_if,
            2,
            USB_CLASS_CDC,
            CDC_SUBCLASS_ACM,
            CDC_PROTOCOL_NONE,
        )?;

        writer.interface(
            self.comm_if,
            USB_CLASS_CDC,
            CDC_SUBCLASS_ACM,
            CDC_PROTOCOL_NONE,
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_HEADER, // bDescriptorSubtype
                0x10,
                0x01, // bcdCDC (1.10)
            ],
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_ACM, // bDescriptorSubtype
                0x00,         // bmCapabilities
            ],
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_UNION,      // bDescriptorSubtype
                self.comm_if.into(), // bControlInterface
                self.data_if.into(), // bSubordinateInterface
            ],
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_CALL_MANAGEMENT, // bDescriptorSubtype
                0x00,                     // bmCapabilities
                self.data_if.into(),      // bDataInterface
            ],
        )?;

        writer.endpoint(&self.comm_ep)?;

        writer.interface(self.data_if, USB_CLASS_CDC_DATA, 0x00, 0x00)?;

        writer.endpoint(&self.write_ep)?;
        writer.endpoint(&self.read_ep)?;

        Ok(())
    }

    fn reset(&mut self) {
        self.line_coding = LineCoding::default();
        self.dtr = false;
        self.rts = false;
        self.device_state = UsbDeviceState::Default;
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = xfer.request();

        if !(req.request_type == control::RequestType::Class
            && req.recipient == control::Recipient::Interface
            && req.index == u8::from(self.comm_if) as u16)
        {
            return;
        }

        match req.request {
            // REQ_GET_ENCAPSULATED_COMMAND is not really supported - it will be rejected below.
            REQ_GET_LINE_CODING if req.length == 7 => {
                let line_coding = self.line_coding;
                xfer.accept(|data| {
                    data[0..4].copy_from_slice(&line_coding.data_rate.to_le_bytes());
                    data[4] = line_coding.stop_bits as u8;
                    data[5] = line_coding.parity_type as u8;
                    data[6] = line_coding.data_bits;

                    Ok(7)
                })
                .ok();
            }
            _ => {
                xfer.reject().ok();
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = xfer.request();

        if !(req.request_type == control::RequestType::Class
            && req.recipient == control::Recipient::Interface
            && req.index == u8::from(self.comm_if) as u16)
        {
            return;
        }

        match req.request {
            REQ_SEND_ENCAPSULATED_COMMAND => {
                // We don't actually support encapsulated commands but pretend we do for standards
                // compatibility.
                xfer.accept().ok();
            }
            REQ_SET_LINE_CODING if xfer.data().len() >= 7 => {
                let data = xfer.data();
                self.line_coding.data_rate = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                self.line_coding.stop_bits = data[4].into();
                self.line_coding.parity_type = data[5].into();
                self.line_coding.data_bits = data[6];
                log::debug!("line coding set to {:?}", self.line_coding);

                xfer.accept().ok();
            }
            REQ_SET_CONTROL_LINE_STATE => {
                self.dtr = (req.value & 0x0001) != 0;
                self.rts = (req.value & 0x0002) != 0;

                xfer.accept().ok();
            }
            _ => {
                xfer.reject().ok();
            }
        };
    }
}

/// Routes the USB stack's callbacks for a [`CdcAcmClass`] owned by a [`Port`].
///
/// Hand one of these to `UsbDevice::poll` from the USB interrupt handler. IN completions and OUT
/// packets on the class's bulk endpoints reach [`Port::on_transmit_complete`] and
/// [`Port::on_receive_packet`]; everything else is forwarded to the class.
pub struct BridgeClass<'p, 'a, B, T, M, W>
where
    B: UsbBus,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    port: &'p Port<'a, CdcAcmClass<'a, B>, T, M, W>,
}

impl<'p, 'a, B, T, M, W> BridgeClass<'p, 'a, B, T, M, W>
where
    B: UsbBus,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    pub fn new(port: &'p Port<'a, CdcAcmClass<'a, B>, T, M, W>) -> Self {
        BridgeClass { port }
    }
}

impl<B, T, M, W> UsbClass<B> for BridgeClass<'_, '_, B, T, M, W>
where
    B: UsbBus,
    T: CoalescingTimer,
    M: InterruptMask,
    W: BusyWait,
{
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> Result<()> {
        self.port
            .with_endpoints(|class| class.get_configuration_descriptors(writer))
    }

    fn reset(&mut self) {
        self.port.with_endpoints(|class| class.reset());
        self.port.on_bus_reset();
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        self.port.with_endpoints(|class| class.control_in(xfer));
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        self.port.with_endpoints(|class| class.control_out(xfer));
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if self.port.with_endpoints(|class| class.write_ep_address() == addr) {
            self.port.on_transmit_complete();
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if self.port.with_endpoints(|class| class.read_ep_address() == addr) {
            self.port.on_receive_packet();
        }
    }
}

/// Number of stop bits for LineCoding
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopBits {
    /// 1 stop bit
    One = 0,

    /// 1.5 stop bits
    OnePointFive = 1,

    /// 2 stop bits
    Two = 2,
}

impl From<u8> for StopBits {
    fn from(value: u8) -> Self {
        match value {
            1 => StopBits::OnePointFive,
            2 => StopBits::Two,
            _ => StopBits::One,
        }
    }
}

/// Parity for LineCoding
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParityType {
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

impl From<u8> for ParityType {
    fn from(value: u8) -> Self {
        match value {
            1 => ParityType::Odd,
            2 => ParityType::Even,
            3 => ParityType::Mark,
            4 => ParityType::Space,
            _ => ParityType::None,
        }
    }
}

/// Line coding parameters
///
/// This is provided by the host for specifying the standard UART parameters such as baud rate. Can
/// be ignored if you don't plan to interface with a physical UART.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineCoding {
    stop_bits: StopBits,
    data_bits: u8,
    parity_type: ParityType,
    data_rate: u32,
}

impl LineCoding {
    /// Gets the number of stop bits for UART communication.
    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits
    }

    /// Gets the number of data bits for UART communication.
    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    /// Gets the parity type for UART communication.
    pub fn parity_type(&self) -> ParityType {
        self.parity_type
    }

    /// Gets the data rate in bits per second for UART communication.
    pub fn data_rate(&self) -> u32 {
        self.data_rate
    }
}

impl Default for LineCoding {
    fn default() -> Self {
        LineCoding {
            stop_bits: StopBits::One,
            data_bits: 8,
            parity_type: ParityType::None,
            data_rate: 8_000,
        }
    }
}

/// Fails with the offending value if the host asked for a data bit count a UART cannot carry.
impl TryFrom<&LineCoding> for crate::config::LineSettings {
    type Error = u8;

    fn try_from(coding: &LineCoding) -> core::result::Result<Self, u8> {
        match coding.data_bits {
            5 | 6 | 7 | 8 | 16 => Ok(crate::config::LineSettings {
                baud_rate: coding.data_rate,
                data_bits: coding.data_bits,
                stop_bits: coding.stop_bits,
                parity: coding.parity_type,
                ..Default::default()
            }),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LineCoding, ParityType, StopBits};
    use crate::config::LineSettings;

    #[test]
    fn line_coding_codes() {
        assert_eq!(StopBits::from(2), StopBits::Two);
        assert_eq!(StopBits::from(9), StopBits::One);
        assert_eq!(ParityType::from(4), ParityType::Space);
        assert_eq!(ParityType::from(7), ParityType::None);
    }

    #[test]
    fn host_line_coding_maps_to_settings() {
        let coding = LineCoding {
            stop_bits: StopBits::Two,
            data_bits: 7,
            parity_type: ParityType::Even,
            data_rate: 57_600,
        };

        let settings = LineSettings::try_from(&coding).unwrap();
        assert_eq!(settings.baud_rate, 57_600);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.parity, ParityType::Even);

        let bad = LineCoding {
            data_bits: 9,
            ..coding
        };
        assert_eq!(LineSettings::try_from(&bad), Err(9));
    }
}
