//! I/O port bus.
//!
//! CP/M itself never touches the ports; the bus exists so `IN`/`OUT` have
//! defined behavior and so tests can observe port traffic.

/// Two-operation capability for the 8080's 256 I/O ports.
pub trait IoBus {
    /// `IN port` — read a byte from a port.
    fn input(&mut self, _port: u8) -> u8 {
        0xFF
    }

    /// `OUT port` — write a byte to a port.
    fn output(&mut self, _port: u8, _value: u8) {}
}

/// Default bus: reads 0xFF, discards writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl IoBus for NullBus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bus_reads_high() {
        let mut bus = NullBus;
        assert_eq!(bus.input(0x00), 0xFF);
        assert_eq!(bus.input(0xFE), 0xFF);
        bus.output(0x10, 0x55); // discarded
    }
}
