//! Intel 8080 / CP/M 2.2 emulator core.
//!
//! This crate provides the pieces of an emulated CP/M personal computer:
//! - The 8080 CPU interpreter with call/RST interception hooks
//! - 64 KiB flat memory and an injectable I/O port bus
//! - A virtual disk with CP/M wildcard search
//! - The CP/M personality: BIOS, BDOS dispatcher, and CCP
//! - The `Machine` that wires it all and runs `.COM` transients
//! - A session registry, one machine per connected terminal
//!
//! # Architecture
//!
//! The CPU knows nothing about CP/M. The machine installs an
//! [`cpu::Interceptor`] that recognizes `CALL 0x0005` (BDOS), `CALL
//! 0x0000` (warm boot), and calls into the BIOS band at the top of
//! memory; everything else executes as plain 8080 code against the
//! guest's RAM.

pub mod bdos;
pub mod bios;
pub mod bus;
mod ccp;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod machine;
pub mod memory;
pub mod package;
pub mod session;
pub mod terminal;

pub use bdos::{BdosState, Fcb};
pub use bus::{IoBus, NullBus};
pub use cpu::{Cpu, Flags, Interceptor, NoIntercept};
pub use disk::VirtualDisk;
pub use error::{CpmError, CpmResult};
pub use machine::{Machine, ProgramHandler, INSTRUCTION_BUDGET};
pub use memory::Memory;
pub use package::{load_package, load_package_from_path, Package, PackageManifest};
pub use session::SessionManager;
pub use terminal::{BufferedTerminal, InputHandle, OutputBuffer, Terminal};
