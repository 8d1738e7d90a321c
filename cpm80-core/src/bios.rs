//! BIOS jump table handlers.
//!
//! The jump table occupies the top of memory from [`addr::BIOS_BASE`],
//! three bytes per entry. Each entry is a RET sled in guest RAM; the real
//! handlers below run on the host via the CPU call hook, so a handled CALL
//! never actually lands in the table.

use tracing::trace;

use crate::bdos::addr;
use crate::cpu::Cpu;
use crate::terminal::Terminal;

/// Entry offsets from the BIOS base.
pub const BOOT: u16 = 0x00;
pub const WBOOT: u16 = 0x03;
pub const CONST: u16 = 0x06;
pub const CONIN: u16 = 0x09;
pub const CONOUT: u16 = 0x0C;
pub const LIST: u16 = 0x0F;
pub const PUNCH: u16 = 0x12;
pub const READER: u16 = 0x15;
pub const HOME: u16 = 0x18;
pub const SELDSK: u16 = 0x1B;
pub const SETTRK: u16 = 0x1E;
pub const SETSEC: u16 = 0x21;
pub const SETDMA: u16 = 0x24;
pub const READ: u16 = 0x27;
pub const WRITE: u16 = 0x2A;

/// Handle a call into the BIOS band. `offset` is the target address minus
/// [`addr::BIOS_BASE`].
pub fn handle<T: Terminal>(offset: u16, cpu: &mut Cpu, term: &mut T) {
    trace!(offset = format_args!("{offset:#04x}"), "bios call");
    match offset {
        // BOOT/WBOOT end the running transient.
        BOOT | WBOOT => cpu.halted = true,
        CONST => cpu.a = if term.key_available() { 0xFF } else { 0x00 },
        CONIN => cpu.a = crate::bdos::terminal_byte(term),
        CONOUT => term.write_char(char::from(cpu.c)),
        LIST | PUNCH => {}
        READER => cpu.a = 0x1A, // EOF: no paper tape attached
        HOME | SELDSK | SETTRK | SETSEC | SETDMA => {
            cpu.a = 0;
            cpu.set_hl(0);
        }
        READ | WRITE => cpu.a = 0,
        // Anything else in the band is a no-op success.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::BufferedTerminal;

    #[test]
    fn const_reports_key_availability() {
        let (mut term, _out) = BufferedTerminal::headless("x");
        let mut cpu = Cpu::new();
        handle(CONST, &mut cpu, &mut term);
        assert_eq!(cpu.a, 0xFF);
        term.read_char();
        handle(CONST, &mut cpu, &mut term);
        assert_eq!(cpu.a, 0x00);
    }

    #[test]
    fn conin_reads_and_conout_writes() {
        let (mut term, out) = BufferedTerminal::headless("A");
        let mut cpu = Cpu::new();
        handle(CONIN, &mut cpu, &mut term);
        assert_eq!(cpu.a, b'A');
        cpu.c = b'B';
        handle(CONOUT, &mut cpu, &mut term);
        assert_eq!(out.contents(), "B");
    }

    #[test]
    fn wboot_halts_the_cpu() {
        let (mut term, _out) = BufferedTerminal::headless("");
        let mut cpu = Cpu::new();
        handle(WBOOT, &mut cpu, &mut term);
        assert!(cpu.halted);
    }

    #[test]
    fn disk_entries_return_success() {
        let (mut term, _out) = BufferedTerminal::headless("");
        let mut cpu = Cpu::new();
        cpu.a = 0x55;
        cpu.set_hl(0x1234);
        handle(SELDSK, &mut cpu, &mut term);
        assert_eq!(cpu.a, 0);
        assert_eq!(cpu.hl(), 0);
        cpu.a = 0x55;
        handle(WRITE, &mut cpu, &mut term);
        assert_eq!(cpu.a, 0);
    }

    #[test]
    fn reader_returns_eof() {
        let (mut term, _out) = BufferedTerminal::headless("");
        let mut cpu = Cpu::new();
        handle(READER, &mut cpu, &mut term);
        assert_eq!(cpu.a, 0x1A);
    }
}
