//! Serial port discovery
//!
//! USB-RS485 adapters are listed first, Bluetooth and debug consoles last.

use crate::core::events::{EventHub, PollEventKind};
use crate::core::transport::TransportError;

const USB_MARKERS: &[&str] = &["usbserial", "usbmodem", "wchusbserial", "slab_usbto", "ttyusb", "ttyacm"];
const NOISE_MARKERS: &[&str] = &["bluetooth", "debug-console", "internalmodem"];

fn is_usb(port: &str) -> bool {
    let lower = port.to_lowercase();
    USB_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_noise(port: &str) -> bool {
    let lower = port.to_lowercase();
    NOISE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Order port names: USB adapters, then other ports, then noise
///
/// Relative order inside each group is kept.
pub fn order_ports(ports: Vec<String>) -> Vec<String> {
    let (usb, rest): (Vec<_>, Vec<_>) = ports.into_iter().partition(|p| is_usb(p));
    let (noise, other): (Vec<_>, Vec<_>) = rest.into_iter().partition(|p| is_noise(p));
    usb.into_iter().chain(other).chain(noise).collect()
}

/// List available serial ports, preferred first
pub fn list_preferred() -> Result<Vec<String>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Io(e.to_string()))?
        .into_iter()
        .map(|p| p.port_name)
        .collect();
    Ok(order_ports(ports))
}

/// List ports and report the result on `events`
pub fn refresh(events: &EventHub) -> Result<Vec<String>, TransportError> {
    let ports = list_preferred()?;
    events.emit(PollEventKind::PortsRefreshed { ports: ports.clone() });
    Ok(ports)
}
