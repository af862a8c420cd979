use std::{fmt, str::FromStr};

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::bits::Word;

// Keeps labels in definition order for the symbol dump.
type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Mapping of lowercase label -> absolute address.
///
/// Built during the layout pass and frozen before operands are resolved. Instructions only
/// carry the low 9 bits of an address, which the CPU composes with the current page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolTable {
    table: FxMap<String, Word>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            table: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Bind `label` to `addr`. Returns the previous address if the label was already bound,
    /// in which case the first binding is kept.
    pub(crate) fn insert(&mut self, label: &str, addr: Word) -> Option<Word> {
        let key = label.to_ascii_lowercase();
        if let Some(prev) = self.table.get(&key) {
            return Some(*prev);
        }
        self.table.insert(key, addr);
        None
    }

    /// Absolute address of `label`, compared case-insensitively.
    pub fn get(&self, label: &str) -> Option<Word> {
        self.table.get(&label.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Labels and addresses in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Word)> {
        self.table.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Represents the CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    /// Used as the system stack pointer by `RTI`.
    R6,
    /// Holds the return address after `JSR`, `JSRR` and `TRAP`.
    R7,
}

impl Register {
    const ALL: [Register; 8] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
    ];

    /// Register selected by the low 3 bits of `bits`.
    pub fn from_bits(bits: Word) -> Register {
        Self::ALL[(bits & 0b111) as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bits(self) -> Word {
        self as Word
    }
}

impl FromStr for Register {
    type Err = ();

    /// Parses `r0`..`r7`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some('r' | 'R'), Some(d @ '0'..='7'), None) => {
                Ok(Self::from_bits(d as Word - '0' as Word))
            }
            _ => Err(()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.index())
    }
}

/// Condition mask carried by a branch, written as an `N`/`Z`/`P` mnemonic suffix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flag {
    /// -
    N,
    /// 0
    Z,
    /// +
    P,
    /// <= 0
    Nz,
    /// >= 0
    Zp,
    /// != 0
    Np,
    /// Unconditional
    Nzp,
}

impl Flag {
    /// The `nzp` field as encoded in bits 11-9.
    pub fn mask(self) -> Word {
        match self {
            Flag::N => 0b100,
            Flag::Z => 0b010,
            Flag::P => 0b001,
            Flag::Nz => 0b110,
            Flag::Zp => 0b011,
            Flag::Np => 0b101,
            Flag::Nzp => 0b111,
        }
    }

    fn from_mask(mask: Word) -> Option<Flag> {
        Some(match mask {
            0b100 => Flag::N,
            0b010 => Flag::Z,
            0b001 => Flag::P,
            0b110 => Flag::Nz,
            0b011 => Flag::Zp,
            0b101 => Flag::Np,
            0b111 => Flag::Nzp,
            _ => return None,
        })
    }

    /// Parse a branch suffix made of any of `n`, `z`, `p`. An empty suffix branches always.
    fn from_suffix(suffix: &str) -> Option<Flag> {
        if suffix.is_empty() {
            return Some(Flag::Nzp);
        }
        let mut mask = 0;
        for c in suffix.chars() {
            mask |= match c.to_ascii_lowercase() {
                'n' => 0b100,
                'z' => 0b010,
                'p' => 0b001,
                _ => return None,
            };
        }
        Flag::from_mask(mask)
    }
}

/// Every mnemonic that maps to a CPU opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstrKind {
    Nop,
    Br(Flag),
    Add,
    Ld,
    St,
    Jsr,
    Jmp,
    And,
    Ldr,
    Str,
    Rti,
    Not,
    Ldi,
    Sti,
    Jsrr,
    Jmpr,
    Ret,
    Lea,
    Trap,
}

impl InstrKind {
    /// Look up a mnemonic, case-insensitively.
    pub fn parse(name: &str) -> Option<InstrKind> {
        let lower = name.to_ascii_lowercase();
        let kind = match lower.as_str() {
            "nop" => InstrKind::Nop,
            "add" => InstrKind::Add,
            "ld" => InstrKind::Ld,
            "st" => InstrKind::St,
            "jsr" => InstrKind::Jsr,
            "jmp" => InstrKind::Jmp,
            "and" => InstrKind::And,
            "ldr" => InstrKind::Ldr,
            "str" => InstrKind::Str,
            "rti" => InstrKind::Rti,
            "not" => InstrKind::Not,
            "ldi" => InstrKind::Ldi,
            "sti" => InstrKind::Sti,
            "jsrr" => InstrKind::Jsrr,
            "jmpr" => InstrKind::Jmpr,
            "ret" => InstrKind::Ret,
            "lea" => InstrKind::Lea,
            "trap" => InstrKind::Trap,
            other => {
                let suffix = other.strip_prefix("br")?;
                InstrKind::Br(Flag::from_suffix(suffix)?)
            }
        };
        Some(kind)
    }
}

/// Mnemonics rewritten to `TRAP` with a fixed vector.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrapKind {
    Getc,
    Out,
    Puts,
    In,
    Putsp,
    Halt,
}

impl TrapKind {
    pub const ALL: [TrapKind; 6] = [
        TrapKind::Getc,
        TrapKind::Out,
        TrapKind::Puts,
        TrapKind::In,
        TrapKind::Putsp,
        TrapKind::Halt,
    ];

    pub fn vector(self) -> u8 {
        match self {
            TrapKind::Getc => 0x20,
            TrapKind::Out => 0x21,
            TrapKind::Puts => 0x22,
            TrapKind::In => 0x23,
            TrapKind::Putsp => 0x24,
            TrapKind::Halt => 0x25,
        }
    }

    pub fn parse(name: &str) -> Option<TrapKind> {
        Some(match name.to_ascii_lowercase().as_str() {
            "getc" => TrapKind::Getc,
            "out" => TrapKind::Out,
            "puts" => TrapKind::Puts,
            "in" => TrapKind::In,
            "putsp" => TrapKind::Putsp,
            "halt" => TrapKind::Halt,
            _ => return None,
        })
    }
}

/// Assembler pseudo-operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirKind {
    Orig,
    End,
    Fill,
    Blkw,
    Stringz,
    /// Only recognized with extensions enabled.
    Char,
}

impl DirKind {
    /// Look up a directive including its leading `.`, case-insensitively.
    pub fn parse(name: &str) -> Option<DirKind> {
        Some(match name.to_ascii_lowercase().as_str() {
            ".orig" => DirKind::Orig,
            ".end" => DirKind::End,
            ".fill" => DirKind::Fill,
            ".blkw" => DirKind::Blkw,
            ".stringz" => DirKind::Stringz,
            ".char" => DirKind::Char,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            DirKind::Orig => ".ORIG",
            DirKind::End => ".END",
            DirKind::Fill => ".FILL",
            DirKind::Blkw => ".BLKW",
            DirKind::Stringz => ".STRINGZ",
            DirKind::Char => ".CHAR",
        }
    }
}

/// Whether `word` is reserved as a mnemonic and therefore cannot start a label.
pub fn is_mnemonic(word: &str) -> bool {
    InstrKind::parse(word).is_some() || TrapKind::parse(word).is_some()
}
