//! File Control Block handling.
//!
//! The FCB is CP/M's file descriptor, a 36-byte record living in guest
//! memory at a caller-chosen address:
//!
//! - Byte 0: drive (0 = default, 1 = A:, 2 = B:, ...)
//! - Bytes 1-8: filename, space-padded
//! - Bytes 9-11: extension, space-padded
//! - Byte 32: current record (CR)
//! - Bytes 33-35: random record number (R0, R1, R2)
//!
//! CP/M stores file attributes in the high bits of the name bytes, so
//! reads mask them off.

/// Size of an FCB in bytes.
pub const FCB_SIZE: usize = 36;

/// View over a 36-byte FCB image.
pub struct Fcb<'a> {
    mem: &'a mut [u8],
}

impl<'a> Fcb<'a> {
    /// Wrap a memory slice of at least [`FCB_SIZE`] bytes.
    pub fn new(mem: &'a mut [u8]) -> Self {
        debug_assert!(mem.len() >= FCB_SIZE);
        Self { mem }
    }

    pub fn drive(&self) -> u8 {
        self.mem[0]
    }

    pub fn set_drive(&mut self, drive: u8) {
        self.mem[0] = drive;
    }

    /// Raw name bytes (8, space-padded).
    pub fn raw_name(&self) -> &[u8] {
        &self.mem[1..9]
    }

    /// Raw extension bytes (3, space-padded).
    pub fn raw_ext(&self) -> &[u8] {
        &self.mem[9..12]
    }

    /// Name with attribute bits masked and padding trimmed.
    pub fn name(&self) -> String {
        self.mem[1..9]
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .take_while(|&c| c != ' ')
            .collect()
    }

    /// Extension with attribute bits masked and padding trimmed.
    pub fn ext(&self) -> String {
        self.mem[9..12]
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .take_while(|&c| c != ' ')
            .collect()
    }

    /// `NAME.EXT` form, suitable for the virtual disk (wildcard bytes pass
    /// through, so this also serves as the search pattern).
    pub fn filename(&self) -> String {
        let name = self.name();
        let ext = self.ext();
        if ext.is_empty() {
            name
        } else {
            format!("{}.{}", name, ext)
        }
    }

    pub fn current_record(&self) -> u8 {
        self.mem[32]
    }

    pub fn set_current_record(&mut self, record: u8) {
        self.mem[32] = record;
    }

    /// Random record number from R0/R1 (R2 is overflow only).
    pub fn random_record(&self) -> u16 {
        u16::from_le_bytes([self.mem[33], self.mem[34]])
    }

    /// Store a record count into R0..R2, little-endian (BDOS 35).
    pub fn set_record_count(&mut self, records: u32) {
        self.mem[33] = records as u8;
        self.mem[34] = (records >> 8) as u8;
        self.mem[35] = (records >> 16) as u8;
    }

    /// Zero the whole FCB and blank the name fields to spaces.
    pub fn blank(&mut self) {
        self.mem[..FCB_SIZE].fill(0);
        self.mem[1..12].fill(b' ');
    }

    /// Fill from a `[X:]NAME[.EXT]` string: the optional drive prefix maps
    /// to drive code letter - 'A' + 1, the rest splits on the first dot,
    /// name and extension are upper-cased and space-padded.
    pub fn parse(&mut self, text: &str) {
        self.blank();

        let mut rest = text.trim().to_uppercase();
        if rest.len() >= 2 && rest.as_bytes()[1] == b':' {
            let letter = rest.as_bytes()[0];
            if letter.is_ascii_uppercase() {
                self.set_drive(letter - b'A' + 1);
            }
            rest = rest[2..].to_string();
        }

        let (name, ext) = rest.split_once('.').unwrap_or((rest.as_str(), ""));
        for (slot, byte) in self.mem[1..9].iter_mut().zip(pad_field(name, 8)) {
            *slot = byte;
        }
        for (slot, byte) in self.mem[9..12].iter_mut().zip(pad_field(ext, 3)) {
            *slot = byte;
        }
    }
}

fn pad_field(text: &str, width: usize) -> impl Iterator<Item = u8> + '_ {
    text.bytes().chain(std::iter::repeat(b' ')).take(width)
}

/// Build a 36-byte FCB image from a filename string.
pub fn build(text: &str) -> [u8; FCB_SIZE] {
    let mut image = [0u8; FCB_SIZE];
    Fcb::new(&mut image).parse(text);
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_name() {
        let mut image = [0u8; FCB_SIZE];
        let mut fcb = Fcb::new(&mut image);
        fcb.parse("test.txt");
        assert_eq!(fcb.drive(), 0);
        assert_eq!(fcb.raw_name(), b"TEST    ");
        assert_eq!(fcb.raw_ext(), b"TXT");
        assert_eq!(fcb.filename(), "TEST.TXT");
    }

    #[test]
    fn parse_with_drive_prefix() {
        let mut image = [0u8; FCB_SIZE];
        let mut fcb = Fcb::new(&mut image);
        fcb.parse("B:HELLO.COM");
        assert_eq!(fcb.drive(), 2);
        assert_eq!(fcb.filename(), "HELLO.COM");
    }

    #[test]
    fn parse_truncates_to_8_3() {
        let mut image = [0u8; FCB_SIZE];
        let mut fcb = Fcb::new(&mut image);
        fcb.parse("VERYLONGNAME.EXTENSION");
        assert_eq!(fcb.raw_name(), b"VERYLONG");
        assert_eq!(fcb.raw_ext(), b"EXT");
    }

    #[test]
    fn round_trip_through_directory_form() {
        let image = build("X:SOME.BIN");
        let mut copy = image;
        let fcb = Fcb::new(&mut copy);
        assert_eq!(fcb.drive(), b'X' - b'A' + 1);
        assert_eq!(fcb.name(), "SOME");
        assert_eq!(fcb.ext(), "BIN");
    }

    #[test]
    fn name_masks_attribute_bits() {
        let mut image = build("DOC.TXT");
        image[1] |= 0x80; // read-only attribute on 'D'
        let mut copy = image;
        let fcb = Fcb::new(&mut copy);
        assert_eq!(fcb.name(), "DOC");
    }

    #[test]
    fn record_fields() {
        let mut image = [0u8; FCB_SIZE];
        let mut fcb = Fcb::new(&mut image);
        fcb.set_current_record(5);
        assert_eq!(fcb.current_record(), 5);
        fcb.set_record_count(0x0123_45);
        assert_eq!(image[33..36], [0x45, 0x23, 0x01]);
    }

    #[test]
    fn random_record_is_r0_r1() {
        let mut image = [0u8; FCB_SIZE];
        image[33] = 0x34;
        image[34] = 0x12;
        image[35] = 0xFF; // overflow byte is ignored
        let fcb = Fcb::new(&mut image);
        assert_eq!(fcb.random_record(), 0x1234);
    }
}
