//! The assembled CP/M machine.
//!
//! Wires the CPU, memory, I/O bus, virtual disk, terminal, and BDOS state
//! together, installs the call interceptors that route the well-known
//! entry points into host code, and loads/launches `.COM` transients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bdos::{self, addr, fcb, BdosState};
use crate::bios;
use crate::bus::NullBus;
use crate::cpu::{Cpu, Interceptor};
use crate::disk::VirtualDisk;
use crate::error::{CpmError, CpmResult};
use crate::memory::Memory;
use crate::terminal::Terminal;

/// Runaway guard: a transient gets this many instructions before the
/// stepper gives up and returns to the CCP.
pub const INSTRUCTION_BUDGET: u64 = 100_000_000;

/// Host-side transient program, registered by name with the CCP.
pub type ProgramHandler = Box<dyn FnMut(&mut dyn Terminal, &mut VirtualDisk, &str) + Send>;

/// One emulated CP/M personal computer.
pub struct Machine<T: Terminal> {
    pub(crate) cpu: Cpu,
    pub(crate) mem: Memory,
    pub(crate) bus: NullBus,
    pub disk: VirtualDisk,
    pub(crate) term: T,
    pub(crate) bdos: BdosState,
    pub(crate) programs: HashMap<String, ProgramHandler>,
    pub(crate) running: Arc<AtomicBool>,
}

/// Per-step view over the host state, handed to the CPU as its call/RST
/// interception hooks. BDOS needs the CPU and the CPU needs a hook into
/// BDOS; the cycle is broken by building this view fresh for each step.
struct HostBridge<'a, T: Terminal> {
    bdos: &'a mut BdosState,
    disk: &'a mut VirtualDisk,
    term: &'a mut T,
}

impl<T: Terminal> Interceptor for HostBridge<'_, T> {
    fn on_call(&mut self, target: u16, cpu: &mut Cpu, mem: &mut Memory) -> bool {
        match target {
            addr::BDOS_ENTRY => {
                // Entered as if called: push the resume address, dispatch,
                // exit through an emulated RET. Net effect on SP is nil.
                cpu.sp = cpu.sp.wrapping_sub(2);
                mem.write_word(cpu.sp, cpu.pc);
                bdos::dispatch(cpu, mem, self.bdos, self.disk, self.term);
                cpu.pc = mem.read_word(cpu.sp);
                cpu.sp = cpu.sp.wrapping_add(2);
                true
            }
            addr::WBOOT_VECTOR => {
                // Warm boot: end the transient. Nothing pushed, nothing
                // popped; the stepping loop observes the halt.
                cpu.halted = true;
                true
            }
            target if target >= addr::BIOS_BASE => {
                bios::handle(target - addr::BIOS_BASE, cpu, self.term);
                true
            }
            _ => false,
        }
    }
}

impl<T: Terminal> Machine<T> {
    pub fn new(term: T) -> Self {
        Self {
            cpu: Cpu::new(),
            mem: Memory::new(),
            bus: NullBus,
            disk: VirtualDisk::new(),
            term,
            bdos: BdosState::new(),
            programs: HashMap::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Register a host-side transient; the CCP matches `name`
    /// case-insensitively before it looks at the disk.
    pub fn register_program(&mut self, name: &str, handler: ProgramHandler) {
        self.programs.insert(name.to_lowercase(), handler);
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.term
    }

    /// Read one byte of guest memory. Inspection surface for tests and
    /// host-side tooling; the guest itself goes through the CPU.
    pub fn peek(&self, at: u16) -> u8 {
        self.mem.read(at)
    }

    /// Shared stop flag; store `false` to ask the machine to wind down
    /// from another thread.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stop the machine: the CCP loop exits at its next turn and any
    /// running transient stops stepping.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.cpu.halted = true;
    }

    /// Cold boot: build the system memory image, print the banner, and
    /// hand the console to the CCP until EXIT or shutdown.
    pub fn start(&mut self) -> CpmResult<()> {
        self.install_system();
        self.term.write_str("\r\n59K CP/M vers 2.2\r\n");
        self.ccp_loop()
    }

    /// Lay out the system image: page-zero vectors, the single RET at the
    /// BDOS base, and RET sleds across the whole BIOS band so even an
    /// un-intercepted jump into the table lands on defined behavior.
    fn install_system(&mut self) {
        self.mem.clear();
        for at in (addr::BIOS_BASE..=0xFFFF).step_by(3) {
            self.mem.write(at, 0xC9);
        }
        self.install_page_zero();
        self.mem.write(addr::BDOS_BASE, 0xC9);
        self.bdos.reset();
    }

    fn install_page_zero(&mut self) {
        self.mem.write(addr::WBOOT_VECTOR, 0xC3); // JMP WBOOT
        self.mem.write_word(0x0001, addr::BIOS_BASE + bios::WBOOT);
        self.mem.write(addr::BDOS_ENTRY, 0xC3); // JMP BDOS
        self.mem.write_word(0x0006, addr::BDOS_BASE);
    }

    /// Load a `.COM` image into the TPA and run it to completion.
    ///
    /// Page zero is rebuilt, the first two arguments land in the two
    /// FCBs, and the upper-cased command tail goes to 0x0080. A pushed
    /// 0x0000 makes a plain `RET` equivalent to a warm boot.
    pub fn run_com_file(&mut self, bytes: &[u8], command: &str, args: &str) -> CpmResult<()> {
        const TPA_CAPACITY: usize = (addr::BDOS_BASE - addr::TPA) as usize;
        if bytes.len() > TPA_CAPACITY {
            return Err(CpmError::ProgramTooLarge(bytes.len()));
        }
        debug!(command, args, len = bytes.len(), "launching transient");

        for at in 0x0000..addr::TPA {
            self.mem.write(at, 0);
        }
        self.install_page_zero();
        self.mem.load(addr::TPA, bytes);

        let mut words = args.split_whitespace();
        let fcb1 = fcb::build(words.next().unwrap_or(""));
        self.mem.load(addr::FCB1, &fcb1);
        let fcb2 = fcb::build(words.next().unwrap_or(""));
        self.mem.load(addr::FCB2, &fcb2);

        let tail = if args.trim().is_empty() {
            String::new()
        } else {
            format!(" {}", args.trim().to_uppercase())
        };
        let tail = &tail.as_bytes()[..tail.len().min(127)];
        self.mem.write(addr::CMDLINE, tail.len() as u8);
        self.mem.load(addr::CMDLINE + 1, tail);
        self.mem.write(addr::CMDLINE + 1 + tail.len() as u16, 0);

        self.cpu.reset();
        self.cpu.pc = addr::TPA;
        self.cpu.sp = addr::BDOS_BASE - 2;
        self.cpu.sp = self.cpu.sp.wrapping_sub(2);
        self.mem.write_word(self.cpu.sp, addr::WBOOT_VECTOR);
        self.bdos.reset();

        let running = Arc::clone(&self.running);
        let mut steps: u64 = 0;
        while steps < INSTRUCTION_BUDGET {
            if !running.load(Ordering::Relaxed) {
                self.cpu.halted = true;
            }
            if self.cpu.halted {
                break;
            }
            if self.cpu.pc == addr::WBOOT_VECTOR {
                // RET or JMP back to the warm-boot vector.
                self.cpu.halted = true;
                break;
            }
            let mut bridge = HostBridge {
                bdos: &mut self.bdos,
                disk: &mut self.disk,
                term: &mut self.term,
            };
            self.cpu.step(&mut self.mem, &mut self.bus, &mut bridge);
            steps += 1;
        }
        if steps >= INSTRUCTION_BUDGET {
            warn!(command, "transient exceeded the instruction budget");
        }
        self.cpu.halted = true;
        self.bdos.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::BufferedTerminal;

    fn machine(input: &str) -> (Machine<BufferedTerminal>, crate::terminal::OutputBuffer) {
        let (term, out) = BufferedTerminal::headless(input);
        (Machine::new(term), out)
    }

    #[test]
    fn system_image_layout() {
        let (mut m, _out) = machine("");
        m.install_system();
        assert_eq!(m.mem.read(0x0000), 0xC3);
        assert_eq!(m.mem.read_word(0x0001), addr::BIOS_BASE + bios::WBOOT);
        assert_eq!(m.mem.read(0x0005), 0xC3);
        assert_eq!(m.mem.read_word(0x0006), addr::BDOS_BASE);
        assert_eq!(m.mem.read(addr::BDOS_BASE), 0xC9);
        assert_eq!(m.mem.read(addr::BIOS_BASE), 0xC9);
        assert_eq!(m.mem.read(addr::BIOS_BASE + 3), 0xC9);
        assert_eq!(m.mem.read(addr::BIOS_BASE + 1), 0x00);
    }

    #[test]
    fn bdos_print_leaves_sp_unchanged() {
        let (mut m, out) = machine("");
        m.install_system();
        m.mem.load(0x0200, b"Hi!$");
        // MVI C,9; LXI D,0x0200; CALL 5; HLT
        let program = [0x0E, 0x09, 0x11, 0x00, 0x02, 0xCD, 0x05, 0x00, 0x76];
        m.run_com_file(&program, "TEST", "").unwrap();
        assert_eq!(out.contents(), "Hi!");
        // CALL 5 balanced its own stack traffic: SP is back where the
        // loader left it (initial SP minus the pushed warm-boot word).
        assert_eq!(m.cpu.sp, addr::BDOS_BASE - 4);
    }

    #[test]
    fn com_lifecycle_jmp_zero_warm_boots() {
        let (mut m, _out) = machine("");
        m.install_system();
        m.run_com_file(&[0xC3, 0x00, 0x00], "LOOP", "").unwrap();
        assert!(m.cpu.halted);
    }

    #[test]
    fn plain_ret_warm_boots() {
        let (mut m, _out) = machine("");
        m.install_system();
        m.run_com_file(&[0xC9], "RET", "").unwrap();
        assert!(m.cpu.halted);
    }

    #[test]
    fn command_tail_and_fcbs() {
        let (mut m, _out) = machine("");
        m.install_system();
        m.run_com_file(&[0x76], "PROG", "b:one.txt two.dat").unwrap();
        assert_eq!(m.mem.read(addr::CMDLINE), 18); // " B:ONE.TXT TWO.DAT"
        assert_eq!(m.mem.slice(addr::CMDLINE + 1, 18), b" B:ONE.TXT TWO.DAT");
        assert_eq!(m.mem.read(addr::CMDLINE + 19), 0);
        assert_eq!(m.mem.read(addr::FCB1), 2); // drive B
        assert_eq!(m.mem.slice(addr::FCB1 + 1, 8), b"ONE     ");
        assert_eq!(m.mem.slice(addr::FCB2 + 1, 8), b"TWO     ");
        assert_eq!(m.mem.slice(addr::FCB2 + 9, 3), b"DAT");
    }

    #[test]
    fn oversized_program_is_rejected() {
        let (mut m, _out) = machine("");
        m.install_system();
        let huge = vec![0u8; 0xF000];
        assert!(matches!(
            m.run_com_file(&huge, "BIG", ""),
            Err(CpmError::ProgramTooLarge(_))
        ));
    }

    #[test]
    fn stop_flag_interrupts_a_spinning_transient() {
        let (mut m, _out) = machine("");
        m.install_system();
        m.stop_flag().store(false, Ordering::SeqCst);
        // Endless loop at 0x0100; the cleared flag halts it immediately.
        m.run_com_file(&[0xC3, 0x00, 0x01], "SPIN", "").unwrap();
        assert!(m.cpu.halted);
    }

    #[test]
    fn bios_call_returns_to_caller() {
        let (mut m, out) = machine("");
        m.install_system();
        // MVI C,'X'; CALL CONOUT; HLT
        let conout = addr::BIOS_BASE + bios::CONOUT;
        let program = [
            0x0E,
            b'X',
            0xCD,
            (conout & 0xFF) as u8,
            (conout >> 8) as u8,
            0x76,
        ];
        m.run_com_file(&program, "BTEST", "").unwrap();
        assert_eq!(out.contents(), "X");
    }
}
