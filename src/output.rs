use std::cell::RefCell;
use std::str::Chars;

use colored::{ColoredString, Colorize};

use crate::bits::Word;
use crate::runtime::Processor;
use crate::symbol::Register;

/// Where a dump is written. Program output always goes to stdout through the console, so
/// dumps go to stderr to keep the two apart.
#[derive(Clone, Copy, Debug)]
pub enum Output {
    Normal,
    Dump,
}

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    thread_local! {
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }

    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }

    pub fn print_str(&self, string: &str) {
        match (self, Self::is_minimal()) {
            (Self::Normal, _) => print!("{}", string),
            (Self::Dump, false) => eprint!("{}", ColoredString::from(string).blue()),
            // Always remove color if `--minimal`
            (Self::Dump, true) => eprint_colorless(string),
        }
    }

    pub fn print_registers(&self, cpu: &Processor) {
        let flag = cpu.flag() as u8;
        if Self::is_minimal() {
            for (i, reg) in cpu.regs().iter().enumerate() {
                self.print_str(&format!("R{} {}\n", i, reg));
            }
            self.print_str(&format!("PC {}\n", cpu.pc()));
            self.print_str(&format!("CC {:03b}\n", flag));
            return;
        }

        self.print_str("\x1b[2m┌────────────────────────────────────┐\x1b[0m\n");
        self.print_str(
            "\x1b[2m│        \x1b[3mhex     int    uint    char\x1b[0m\x1b[2m │\x1b[0m\n",
        );
        for i in 0..8 {
            self.print_str("\x1b[2m│\x1b[0m");
            self.print_str(&format!(" \x1b[1mR{}\x1b[0m  ", i));
            self.print_integer(cpu.reg(Register::from_bits(i)));
            self.print_str(" \x1b[2m│\x1b[0m\n");
        }
        self.print_str("\x1b[2m│\x1b[0m");
        self.print_str(&format!(" \x1b[1mPC\x1b[0m  0x{:04x}", cpu.pc()));
        self.print_str("                ");
        self.print_str(&format!(" \x1b[1mCC\x1b[0m  {:03b}", flag));
        self.print_str(" \x1b[2m│\x1b[0m\n");
        self.print_str("\x1b[2m└────────────────────────────────────┘\x1b[0m\n");
    }

    /// Dump `len` words of memory from `start`, as last written.
    pub fn print_memory(&self, cpu: &Processor, start: Word, len: usize) {
        for i in 0..len {
            let addr = start.wrapping_add(i as Word);
            let value = cpu.peek(addr);
            if Self::is_minimal() {
                self.print_str(&format!("x{:04X} {}\n", addr, value));
                continue;
            }
            self.print_str(&format!(" \x1b[1mx{:04X}\x1b[0m  ", addr));
            self.print_integer(value);
            self.print_str("\n");
        }
    }

    pub fn print_decimal(&self, value: Word) {
        self.print_str(&format!("{}", value as i16));
    }

    pub fn print_integer(&self, value: Word) {
        if Self::is_minimal() {
            self.print_decimal(value);
            return;
        }
        self.print_str(&format!("0x{:04x}  ", value));
        self.print_str(&format!("{:-6}  ", value as i16));
        self.print_str(&format!("{:-6}  ", value));
        self.print_char_display(value);
    }

    fn print_char_display(&self, value: Word) {
        debug_assert!(
            !Self::is_minimal(),
            "`print_char_display` should not be called if `--minimal`"
        );
        self.print_str("   ");
        // Print 3 characters
        match value {
            // ASCII control characters which are arbitrarily considered significant
            0x00 => self.print_str("NUL"),
            0x08 => self.print_str("BS "),
            0x09 => self.print_str("HT "),
            0x0a => self.print_str("LF "),
            0x0d => self.print_str("CR "),
            0x1b => self.print_str("ESC"),
            0x7f => self.print_str("DEL"),

            // Space
            0x20 => self.print_str("[_]"),

            // Printable ASCII characters
            0x21..=0x7e => self.print_str(&format!("{:-3}", value as u8 as char)),

            // Any ASCII character not already matched (unimportant control characters)
            0x00..=0x7f => self.print_str("\x1b[2m───\x1b[0m"),
            // Any non-ASCII character
            0x0080.. => self.print_str("\x1b[2m┄┄┄\x1b[0m"),
        }
    }
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl<'a> Iterator for Decolored<'a> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

fn eprint_colorless(string: &str) {
    let plain: String = Decolored::new(string).collect();
    eprint!("{}", plain);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decolored() {
        assert_eq!(Decolored::new("abcdef").collect::<String>(), "abcdef");
        assert_eq!(
            Decolored::new("abc\x1b[0;2mdef\x1b[0m").collect::<String>(),
            "abcdef"
        );
        assert_eq!(Decolored::new("abc\x1b[0xyz").collect::<String>(), "abc");
    }

    #[test]
    fn minimal_flag_is_per_thread() {
        assert!(!Output::is_minimal());
        assert!(!Output::set_minimal(true));
        assert!(Output::is_minimal());
        Output::set_minimal(false);
    }
}
