//! Console Command Processor.
//!
//! The prompt loop that fronts the machine: reads a line, recognizes the
//! built-ins and the bare `X:` drive change, and hands everything else to
//! the transient dispatch path (registered programs first, then a `.COM`
//! file from the disk).

use std::sync::atomic::Ordering;

use tracing::debug;

use crate::error::CpmResult;
use crate::machine::Machine;
use crate::terminal::Terminal;

/// Built-ins that print per-row: four directory entries across.
const DIR_COLUMNS: usize = 4;

enum CcpFlow {
    Continue,
    Exit,
}

/// Command-name normalization shared by TYPE and the transient path:
/// `.COM` is appended only when the name carries no dot and no wildcard.
fn normalize_command_name(name: &str) -> String {
    let upper = name.to_uppercase();
    if upper.contains('.') || upper.contains('*') || upper.contains('?') {
        upper
    } else {
        format!("{}.COM", upper)
    }
}

impl<T: Terminal> Machine<T> {
    /// Prompt loop; returns on EXIT, input EOF, or an external stop.
    pub(crate) fn ccp_loop(&mut self) -> CpmResult<()> {
        while self.running.load(Ordering::SeqCst) && !self.term.at_eof() {
            let prompt = format!("{}>", self.disk.drive_letter());
            self.term.write_str(&prompt);
            let line = self.term.read_line();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.dispatch_command(line)? {
                CcpFlow::Exit => break,
                CcpFlow::Continue => {}
            }
        }
        debug!("ccp loop finished");
        Ok(())
    }

    fn dispatch_command(&mut self, line: &str) -> CpmResult<CcpFlow> {
        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command.trim(), args.trim()),
            None => (line, ""),
        };
        let command = command.to_uppercase();

        if let Some(drive) = parse_drive_change(&command) {
            if args.is_empty() {
                self.disk.current_drive = drive;
                return Ok(CcpFlow::Continue);
            }
        }

        match command.as_str() {
            "DIR" => self.cmd_dir(args),
            "TYPE" => self.cmd_type(args),
            "ERA" => self.cmd_era(args),
            "REN" => self.cmd_ren(args),
            "USER" => self.cmd_user(args),
            // Intentionally unimplemented: real SAVE dumps pages from the
            // TPA, which has no useful meaning between transients here.
            "SAVE" => self.term.write_line("SAVE is not supported"),
            "EXIT" => return Ok(CcpFlow::Exit),
            _ => self.run_transient(&command, args)?,
        }
        Ok(CcpFlow::Continue)
    }

    fn cmd_dir(&mut self, args: &str) {
        let pattern = if args.is_empty() { "*.*" } else { args };
        let entries = self.disk.list_matching(pattern);
        if entries.is_empty() {
            self.term.write_line("No file");
            return;
        }
        for (row_index, row) in entries.chunks(DIR_COLUMNS).enumerate() {
            // Drive prefix on the first row only.
            let mut line = if row_index == 0 {
                format!("{}: ", self.disk.drive_letter())
            } else {
                String::new()
            };
            let cells: Vec<String> = row
                .iter()
                .map(|name| {
                    let (base, ext) = name.split_once('.').unwrap_or((name.as_str(), ""));
                    format!("{base:<8} {ext:<3}")
                })
                .collect();
            line.push_str(&cells.join("  "));
            self.term.write_line(line.trim_end());
        }
    }

    fn cmd_type(&mut self, args: &str) {
        if args.is_empty() {
            self.term.write_line("Type what?");
            return;
        }
        let name = normalize_command_name(args.split_whitespace().next().unwrap_or(args));
        match self.disk.read_text(&name) {
            Some(text) => {
                self.term.write_str(&text);
                if !text.ends_with('\n') {
                    self.term.write_str("\r\n");
                }
            }
            None => self.term.write_line("No file"),
        }
    }

    fn cmd_era(&mut self, args: &str) {
        if args.is_empty() {
            self.term.write_line("Era what?");
            return;
        }
        if self.disk.delete_matching(args) == 0 {
            self.term.write_line("No file");
        }
    }

    fn cmd_ren(&mut self, args: &str) {
        // REN NEW=OLD
        let Some((new, old)) = args.split_once('=') else {
            self.term.write_line("Ren what?");
            return;
        };
        let (new, old) = (new.trim(), old.trim());
        if new.is_empty() || old.is_empty() {
            self.term.write_line("Ren what?");
            return;
        }
        if !self.disk.rename(old, new) {
            self.term.write_line("No file");
        }
    }

    fn cmd_user(&mut self, args: &str) {
        match args.parse::<u8>() {
            Ok(user) if user <= 15 => self.disk.current_user = user,
            _ => self.term.write_line("User?"),
        }
    }

    /// Transient dispatch: the registered-program table first, then
    /// `<command>.COM` from the disk.
    fn run_transient(&mut self, command: &str, args: &str) -> CpmResult<()> {
        if let Some(handler) = self.programs.get_mut(&command.to_lowercase()) {
            debug!(command, "running registered program");
            handler(&mut self.term, &mut self.disk, args);
            return Ok(());
        }
        let name = normalize_command_name(command);
        match self.disk.read(&name) {
            Some(bytes) => self.run_com_file(&bytes, command, args),
            None => {
                self.term.write_line(&format!("{command}?"));
                Ok(())
            }
        }
    }
}

/// A bare `X:` command selects drive X.
fn parse_drive_change(command: &str) -> Option<u8> {
    let bytes = command.as_bytes();
    if bytes.len() == 2 && bytes[1] == b':' && bytes[0].is_ascii_uppercase() {
        let drive = bytes[0] - b'A';
        if drive < crate::disk::DRIVE_COUNT {
            return Some(drive);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::ProgramHandler;
    use crate::terminal::{BufferedTerminal, OutputBuffer};

    fn boot(input: &str) -> (Machine<BufferedTerminal>, OutputBuffer) {
        let (term, out) = BufferedTerminal::headless(input);
        let mut machine = Machine::new(term);
        machine.start().unwrap();
        (machine, out)
    }

    #[test]
    fn prompt_shows_current_drive() {
        let (_m, out) = boot("EXIT\r");
        assert!(out.contents().contains("A>"));
    }

    #[test]
    fn dir_formats_four_per_row() {
        let (term, out) = BufferedTerminal::headless("DIR\rEXIT\r");
        let mut machine = Machine::new(term);
        machine.disk.write("HELLO.COM", vec![0; 10]);
        machine.disk.write("README.TXT", vec![0; 20]);
        machine.start().unwrap();
        assert!(out
            .contents()
            .contains("A: HELLO    COM  README   TXT"));
    }

    #[test]
    fn dir_prefixes_only_the_first_row() {
        let (term, out) = BufferedTerminal::headless("DIR\rEXIT\r");
        let mut machine = Machine::new(term);
        for name in ["A.X", "B.X", "C.X", "D.X", "E.X"] {
            machine.disk.write(name, vec![1]);
        }
        machine.start().unwrap();
        let output = out.contents();
        assert!(output.contains("A: A        X"));
        assert!(output.contains("\r\nE        X"));
    }

    #[test]
    fn dir_with_pattern_and_empty_result() {
        let (term, out) = BufferedTerminal::headless("DIR *.ZZZ\rEXIT\r");
        let mut machine = Machine::new(term);
        machine.disk.write("HELLO.COM", vec![0]);
        machine.start().unwrap();
        assert!(out.contents().contains("No file"));
    }

    #[test]
    fn type_prints_text_and_misses() {
        let (term, out) = BufferedTerminal::headless("TYPE NOTE.TXT\rTYPE\rTYPE GONE.TXT\rEXIT\r");
        let mut machine = Machine::new(term);
        machine.disk.write_text("NOTE.TXT", "hello world\n");
        machine.start().unwrap();
        let output = out.contents();
        assert!(output.contains("hello world"));
        assert!(output.contains("Type what?"));
        assert!(output.contains("No file"));
    }

    #[test]
    fn era_deletes_by_pattern() {
        let (term, out) = BufferedTerminal::headless("ERA *.TMP\rERA *.TMP\rERA\rEXIT\r");
        let mut machine = Machine::new(term);
        machine.disk.write("A.TMP", vec![1]);
        machine.start().unwrap();
        assert!(!machine.disk.exists("A.TMP"));
        let output = out.contents();
        assert!(output.contains("No file"));
        assert!(output.contains("Era what?"));
    }

    #[test]
    fn ren_new_equals_old() {
        let (term, out) = BufferedTerminal::headless("REN B.TXT=A.TXT\rREN\rEXIT\r");
        let mut machine = Machine::new(term);
        machine.disk.write("A.TXT", vec![7]);
        machine.start().unwrap();
        assert!(machine.disk.exists("B.TXT"));
        assert!(!machine.disk.exists("A.TXT"));
        assert!(out.contents().contains("Ren what?"));
    }

    #[test]
    fn user_and_drive_change() {
        let (machine, _out) = boot("USER 3\rB:\rEXIT\r");
        assert_eq!(machine.disk.current_user, 3);
        assert_eq!(machine.disk.current_drive, 1);
    }

    #[test]
    fn drive_change_updates_prompt() {
        let (_m, out) = boot("B:\rEXIT\r");
        assert!(out.contents().contains("B>"));
    }

    #[test]
    fn unknown_command_echoes_with_question_mark() {
        let (_m, out) = boot("NOPE\rEXIT\r");
        assert!(out.contents().contains("NOPE?"));
    }

    #[test]
    fn registered_program_wins_over_disk() {
        let (term, out) = BufferedTerminal::headless("GREET world\rEXIT\r");
        let mut machine = Machine::new(term);
        let handler: ProgramHandler = Box::new(|term, _disk, args| {
            term.write_line(&format!("hi {args}"));
        });
        machine.register_program("GREET", handler);
        machine.start().unwrap();
        assert!(out.contents().contains("hi world"));
    }

    #[test]
    fn com_file_from_disk_runs_and_prompt_returns() {
        let (term, out) = BufferedTerminal::headless("HELLO\rEXIT\r");
        let mut machine = Machine::new(term);
        // MVI C,9; LXI D,0x010B; CALL 5; JMP 0; then "OK$" at 0x010B
        machine.disk.write(
            "HELLO.COM",
            vec![
                0x0E, 0x09, 0x11, 0x0B, 0x01, 0xCD, 0x05, 0x00, 0xC3, 0x00, 0x00, b'O', b'K', b'$',
            ],
        );
        machine.start().unwrap();
        let output = out.contents();
        assert!(output.contains("OK"));
        // The prompt comes back after the warm boot.
        let after = &output[output.find("OK").unwrap()..];
        assert!(after.contains("A>"));
    }

    #[test]
    fn save_is_politely_refused() {
        let (_m, out) = boot("SAVE 4 X.COM\rEXIT\r");
        assert!(out.contents().contains("SAVE is not supported"));
    }

    #[test]
    fn normalize_command_name_rules() {
        assert_eq!(normalize_command_name("stat"), "STAT.COM");
        assert_eq!(normalize_command_name("STAT.TXT"), "STAT.TXT");
        assert_eq!(normalize_command_name("S?AT"), "S?AT");
        assert_eq!(normalize_command_name("*"), "*");
    }
}
