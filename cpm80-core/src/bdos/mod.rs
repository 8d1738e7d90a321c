//! BDOS (Basic Disk Operating System) system-call dispatcher.
//!
//! The guest reaches the BDOS with `CALL 0x0005`, function number in C and
//! operand in DE; answers come back in A (HL for version and login
//! vector). File functions work through a 36-byte FCB in guest memory and
//! the 128-byte DMA buffer.

pub mod fcb;

pub use fcb::Fcb;

use std::collections::HashMap;

use tracing::trace;

use crate::cpu::Cpu;
use crate::disk::VirtualDisk;
use crate::memory::Memory;
use crate::terminal::Terminal;

/// CP/M record size: all file I/O moves 128-byte records.
pub const RECORD_SIZE: usize = 128;

/// Fixed guest-memory layout.
pub mod addr {
    /// Warm-boot vector.
    pub const WBOOT_VECTOR: u16 = 0x0000;
    /// BDOS call vector.
    pub const BDOS_ENTRY: u16 = 0x0005;
    /// Primary FCB filled from the first command argument.
    pub const FCB1: u16 = 0x005C;
    /// Secondary FCB filled from the second command argument.
    pub const FCB2: u16 = 0x006C;
    /// Command tail; doubles as the default DMA buffer.
    pub const CMDLINE: u16 = 0x0080;
    pub const DEFAULT_DMA: u16 = 0x0080;
    /// Transient Program Area.
    pub const TPA: u16 = 0x0100;
    /// BDOS base: holds a single RET, reached through the vector at 0x0005.
    pub const BDOS_BASE: u16 = 0xEC00;
    /// BIOS jump table base; everything above is the RET sled.
    pub const BIOS_BASE: u16 = 0xFE00;
}

/// CP/M 2.2 BDOS function numbers (the implemented set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BdosFunction {
    /// 0: System reset / warm boot
    SystemReset = 0,
    /// 1: Console input (blocking)
    ConsoleInput = 1,
    /// 2: Console output
    ConsoleOutput = 2,
    /// 6: Direct console I/O
    DirectConsoleIo = 6,
    /// 9: Print $-terminated string
    PrintString = 9,
    /// 10: Read console buffer
    ReadConsoleBuffer = 10,
    /// 11: Console status
    ConsoleStatus = 11,
    /// 12: Return version number
    ReturnVersion = 12,
    /// 13: Reset disk system
    ResetDiskSystem = 13,
    /// 14: Select disk
    SelectDisk = 14,
    /// 15: Open file
    OpenFile = 15,
    /// 16: Close file
    CloseFile = 16,
    /// 17: Search for first
    SearchFirst = 17,
    /// 18: Search for next
    SearchNext = 18,
    /// 19: Delete file
    DeleteFile = 19,
    /// 20: Read sequential
    ReadSequential = 20,
    /// 21: Write sequential
    WriteSequential = 21,
    /// 22: Make file
    MakeFile = 22,
    /// 23: Rename file
    RenameFile = 23,
    /// 24: Return login vector
    ReturnLoginVector = 24,
    /// 25: Return current disk
    ReturnCurrentDisk = 25,
    /// 26: Set DMA address
    SetDmaAddress = 26,
    /// 32: Get/set user code
    UserCode = 32,
    /// 33: Read random
    ReadRandom = 33,
    /// 34: Write random
    WriteRandom = 34,
    /// 35: Compute file size
    ComputeFileSize = 35,
}

impl TryFrom<u8> for BdosFunction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SystemReset),
            1 => Ok(Self::ConsoleInput),
            2 => Ok(Self::ConsoleOutput),
            6 => Ok(Self::DirectConsoleIo),
            9 => Ok(Self::PrintString),
            10 => Ok(Self::ReadConsoleBuffer),
            11 => Ok(Self::ConsoleStatus),
            12 => Ok(Self::ReturnVersion),
            13 => Ok(Self::ResetDiskSystem),
            14 => Ok(Self::SelectDisk),
            15 => Ok(Self::OpenFile),
            16 => Ok(Self::CloseFile),
            17 => Ok(Self::SearchFirst),
            18 => Ok(Self::SearchNext),
            19 => Ok(Self::DeleteFile),
            20 => Ok(Self::ReadSequential),
            21 => Ok(Self::WriteSequential),
            22 => Ok(Self::MakeFile),
            23 => Ok(Self::RenameFile),
            24 => Ok(Self::ReturnLoginVector),
            25 => Ok(Self::ReturnCurrentDisk),
            26 => Ok(Self::SetDmaAddress),
            32 => Ok(Self::UserCode),
            33 => Ok(Self::ReadRandom),
            34 => Ok(Self::WriteRandom),
            35 => Ok(Self::ComputeFileSize),
            other => Err(other),
        }
    }
}

#[derive(Debug)]
struct OpenEntry {
    name: String,
    offset: usize,
}

#[derive(Debug)]
struct SearchState {
    names: Vec<String>,
    index: usize,
    drive_byte: u8,
}

/// Host-side BDOS state.
#[derive(Debug)]
pub struct BdosState {
    /// DMA address for record transfers.
    pub dma: u16,
    /// Open files keyed by the FCB address in guest memory.
    open_files: HashMap<u16, OpenEntry>,
    /// Directory walk for search-first/search-next.
    search: Option<SearchState>,
}

impl Default for BdosState {
    fn default() -> Self {
        Self::new()
    }
}

impl BdosState {
    pub fn new() -> Self {
        Self {
            dma: addr::DEFAULT_DMA,
            open_files: HashMap::new(),
            search: None,
        }
    }

    /// Warm-boot reset: forget open files and searches, restore the DMA.
    pub fn reset(&mut self) {
        self.dma = addr::DEFAULT_DMA;
        self.open_files.clear();
        self.search = None;
    }
}

/// Read one blocking character from the terminal as a console byte.
pub(crate) fn terminal_byte<T: Terminal>(term: &mut T) -> u8 {
    let ch = term.read_char();
    if (ch as u32) <= 0xFF {
        ch as u32 as u8
    } else {
        b'?'
    }
}

fn read_fcb(mem: &Memory, at: u16) -> [u8; fcb::FCB_SIZE] {
    let mut image = [0u8; fcb::FCB_SIZE];
    for (i, byte) in image.iter_mut().enumerate() {
        *byte = mem.read(at.wrapping_add(i as u16));
    }
    image
}

fn write_fcb(mem: &mut Memory, at: u16, image: &[u8; fcb::FCB_SIZE]) {
    for (i, &byte) in image.iter().enumerate() {
        mem.write(at.wrapping_add(i as u16), byte);
    }
}

/// Dispatch the function in C with operand DE. Called from the CPU hook on
/// `CALL 0x0005`.
pub fn dispatch<T: Terminal>(
    cpu: &mut Cpu,
    mem: &mut Memory,
    state: &mut BdosState,
    disk: &mut VirtualDisk,
    term: &mut T,
) {
    let de = cpu.de();
    let e = cpu.e;
    trace!(func = cpu.c, de = format_args!("{de:#06x}"), "bdos call");

    let func = match BdosFunction::try_from(cpu.c) {
        Ok(func) => func,
        Err(other) => {
            trace!(func = other, "unimplemented bdos function");
            cpu.a = 0xFF;
            return;
        }
    };

    use BdosFunction::*;
    match func {
        SystemReset => cpu.halted = true,

        ConsoleInput => cpu.a = terminal_byte(term),

        ConsoleOutput => term.write_char(char::from(e)),

        DirectConsoleIo => {
            if e == 0xFF {
                cpu.a = if term.key_available() {
                    terminal_byte(term)
                } else {
                    0
                };
            } else {
                term.write_char(char::from(e));
            }
        }

        PrintString => {
            let mut at = de;
            // Bounded scan: an unterminated string stops after one full
            // sweep of the address space.
            for _ in 0..crate::memory::MEM_SIZE {
                let byte = mem.read(at);
                if byte == b'$' {
                    break;
                }
                term.write_char(char::from(byte));
                at = at.wrapping_add(1);
            }
        }

        ReadConsoleBuffer => {
            let max = mem.read(de) as usize;
            let line = term.read_line();
            let mut count = 0usize;
            for ch in line.chars().take(max) {
                let byte = if (ch as u32) <= 0xFF { ch as u32 as u8 } else { b'?' };
                mem.write(de.wrapping_add(2 + count as u16), byte);
                count += 1;
            }
            mem.write(de.wrapping_add(1), count as u8);
        }

        ConsoleStatus => cpu.a = if term.key_available() { 0xFF } else { 0x00 },

        ReturnVersion => {
            // CP/M 2.2
            cpu.set_hl(0x0022);
            cpu.a = 0x22;
        }

        ResetDiskSystem => {
            disk.current_drive = 0;
            state.dma = addr::DEFAULT_DMA;
            cpu.a = 0;
        }

        SelectDisk => {
            disk.current_drive = e & 0x0F;
            cpu.a = 0;
        }

        OpenFile => cpu.a = open_file(mem, state, disk, de),

        CloseFile => cpu.a = if state.open_files.remove(&de).is_some() { 0x00 } else { 0xFF },

        SearchFirst => {
            let mut image = read_fcb(mem, de);
            let pattern_fcb = Fcb::new(&mut image);
            state.search = Some(SearchState {
                names: disk.list_matching(&pattern_fcb.filename()),
                index: 0,
                drive_byte: pattern_fcb.drive(),
            });
            cpu.a = search_next(mem, state);
        }

        SearchNext => cpu.a = search_next(mem, state),

        DeleteFile => {
            let mut image = read_fcb(mem, de);
            let pattern = Fcb::new(&mut image).filename();
            cpu.a = if disk.delete_matching(&pattern) > 0 { 0x00 } else { 0xFF };
        }

        ReadSequential => cpu.a = read_sequential(mem, state, disk, de),

        WriteSequential => cpu.a = write_sequential(mem, state, disk, de),

        MakeFile => {
            let mut image = read_fcb(mem, de);
            let name = {
                let mut fcb = Fcb::new(&mut image);
                fcb.set_current_record(0);
                fcb.filename()
            };
            write_fcb(mem, de, &image);
            disk.write(&name, Vec::new());
            state.open_files.insert(de, OpenEntry { name, offset: 0 });
            cpu.a = 0x00;
        }

        RenameFile => {
            let mut old_image = read_fcb(mem, de);
            let mut new_image = read_fcb(mem, de.wrapping_add(16));
            let old_name = Fcb::new(&mut old_image).filename();
            let new_name = Fcb::new(&mut new_image).filename();
            cpu.a = if disk.rename(&old_name, &new_name) { 0x00 } else { 0xFF };
        }

        ReturnLoginVector => {
            // Only drive A is ever logged in.
            cpu.set_hl(0x0001);
            cpu.a = 0x01;
        }

        ReturnCurrentDisk => cpu.a = disk.current_drive,

        SetDmaAddress => state.dma = de,

        UserCode => {
            if e == 0xFF {
                cpu.a = disk.current_user;
            } else {
                disk.current_user = e & 0x0F;
            }
        }

        ReadRandom => cpu.a = read_random(mem, state, disk, de),

        WriteRandom => cpu.a = write_random(mem, state, disk, de),

        ComputeFileSize => {
            let mut image = read_fcb(mem, de);
            let name = Fcb::new(&mut image).filename();
            match disk.size(&name) {
                Some(size) => {
                    let records = (size + RECORD_SIZE - 1) / RECORD_SIZE;
                    Fcb::new(&mut image).set_record_count(records as u32);
                    write_fcb(mem, de, &image);
                    cpu.a = 0x00;
                }
                None => cpu.a = 0xFF,
            }
        }
    }
}

/// BDOS 15: open an existing file and key its state on the FCB address.
fn open_file(mem: &mut Memory, state: &mut BdosState, disk: &VirtualDisk, de: u16) -> u8 {
    let mut image = read_fcb(mem, de);
    let name = {
        let mut fcb = Fcb::new(&mut image);
        fcb.set_current_record(0);
        fcb.filename()
    };
    if !disk.exists(&name) {
        return 0xFF;
    }
    write_fcb(mem, de, &image);
    state.open_files.insert(de, OpenEntry { name, offset: 0 });
    0x00
}

/// BDOS 17/18: emit the next matching name as a directory-entry-shaped
/// FCB in the DMA buffer. 0xFF once the list is exhausted.
fn search_next(mem: &mut Memory, state: &mut BdosState) -> u8 {
    let Some(search) = state.search.as_mut() else {
        return 0xFF;
    };
    let Some(name) = search.names.get(search.index) else {
        return 0xFF;
    };
    search.index += 1;

    let mut entry = [0u8; 32];
    entry[0] = search.drive_byte;
    let (base, ext) = name.split_once('.').unwrap_or((name.as_str(), ""));
    for (i, slot) in entry[1..9].iter_mut().enumerate() {
        *slot = base.as_bytes().get(i).copied().unwrap_or(b' ');
    }
    for (i, slot) in entry[9..12].iter_mut().enumerate() {
        *slot = ext.as_bytes().get(i).copied().unwrap_or(b' ');
    }
    let dma = state.dma;
    for (i, &byte) in entry.iter().enumerate() {
        mem.write(dma.wrapping_add(i as u16), byte);
    }
    0x00
}

/// BDOS 20: copy the next 128-byte record into the DMA buffer, padding a
/// short tail with 0x1A. 0 = data, 1 = EOF, 9 = FCB not open.
fn read_sequential(mem: &mut Memory, state: &mut BdosState, disk: &VirtualDisk, de: u16) -> u8 {
    let Some(open) = state.open_files.get_mut(&de) else {
        return 9;
    };
    let data = disk.read(&open.name).unwrap_or_default();
    if open.offset >= data.len() {
        return 1;
    }
    let offset = open.offset;
    open.offset += RECORD_SIZE;
    copy_record_to_dma(mem, state.dma, &data, offset);
    0
}

/// BDOS 21: write the DMA record at the current offset, growing the file.
fn write_sequential(mem: &Memory, state: &mut BdosState, disk: &mut VirtualDisk, de: u16) -> u8 {
    let Some(open) = state.open_files.get_mut(&de) else {
        return 9;
    };
    let offset = open.offset;
    store_record_from_dma(mem, state.dma, disk, &open.name, offset);
    open.offset += RECORD_SIZE;
    0
}

/// BDOS 33: read the record numbered by FCB R0/R1. 6 = seek past EOF.
fn read_random(mem: &mut Memory, state: &mut BdosState, disk: &VirtualDisk, de: u16) -> u8 {
    let Some(open) = state.open_files.get(&de) else {
        return 9;
    };
    let mut image = read_fcb(mem, de);
    let record = Fcb::new(&mut image).random_record();
    let offset = record as usize * RECORD_SIZE;
    let data = disk.read(&open.name).unwrap_or_default();
    if offset >= data.len() {
        return 6;
    }
    copy_record_to_dma(mem, state.dma, &data, offset);
    0
}

/// BDOS 34: write the record numbered by FCB R0/R1, extending the file.
fn write_random(mem: &Memory, state: &mut BdosState, disk: &mut VirtualDisk, de: u16) -> u8 {
    let Some(open) = state.open_files.get(&de) else {
        return 9;
    };
    let mut image = read_fcb(mem, de);
    let record = Fcb::new(&mut image).random_record();
    let offset = record as usize * RECORD_SIZE;
    store_record_from_dma(mem, state.dma, disk, &open.name, offset);
    0
}

fn copy_record_to_dma(mem: &mut Memory, dma: u16, data: &[u8], offset: usize) {
    let mut record = [0x1Au8; RECORD_SIZE];
    let end = (offset + RECORD_SIZE).min(data.len());
    let len = end.saturating_sub(offset);
    record[..len].copy_from_slice(&data[offset..end]);
    for (i, &byte) in record.iter().enumerate() {
        mem.write(dma.wrapping_add(i as u16), byte);
    }
}

fn store_record_from_dma(mem: &Memory, dma: u16, disk: &mut VirtualDisk, name: &str, offset: usize) {
    if !disk.exists(name) {
        disk.write(name, Vec::new());
    }
    let Some(contents) = disk.contents_mut(name) else {
        return;
    };
    if contents.len() < offset + RECORD_SIZE {
        contents.resize(offset + RECORD_SIZE, 0x1A);
    }
    for i in 0..RECORD_SIZE {
        contents[offset + i] = mem.read(dma.wrapping_add(i as u16));
    }
}
