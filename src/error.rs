use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::bits::Word;

// Assembly errors

/// A fatal problem with one source line. The line emits no words; assembly continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum AsmError {
    #[error("line {row}: .ORIG has to be the first instruction")]
    #[diagnostic(
        code(asm::orig),
        help("start the program with `.ORIG x3000` or another load address")
    )]
    OrigMissing {
        row: usize,
        #[label("expected .ORIG here")]
        span: SourceSpan,
    },

    #[error("line {row}: .ORIG can only appear once, on the first line")]
    #[diagnostic(code(asm::orig), help("remove this directive"))]
    OrigMisplaced {
        row: usize,
        #[label("misplaced .ORIG")]
        span: SourceSpan,
    },

    #[error("line {row}: {directive} needs {expected} argument(s), found {found}")]
    #[diagnostic(code(asm::arg_count))]
    ArgCount {
        row: usize,
        directive: &'static str,
        expected: &'static str,
        found: usize,
        #[label("wrong number of arguments")]
        span: SourceSpan,
    },

    #[error("line {row}: invalid literal `{text}`")]
    #[diagnostic(
        code(asm::bad_lit),
        help("decimal literals look like #-12, hex literals look like x3000")
    )]
    BadLiteral {
        row: usize,
        text: String,
        #[label("not a valid literal")]
        span: SourceSpan,
    },

    #[error("line {row}: .BLKW cannot reserve a negative number of words")]
    #[diagnostic(code(asm::blkw), help("try a positive literal like #1"))]
    NegativeBlock {
        row: usize,
        #[label("negative count")]
        span: SourceSpan,
    },

    #[error("line {row}: unknown symbol `{name}`")]
    #[diagnostic(
        code(asm::symbol),
        help("labels must be defined somewhere in this file")
    )]
    UnknownSymbol {
        row: usize,
        name: String,
        #[label("unresolved label")]
        span: SourceSpan,
    },

    #[error("line {row}: label `{name}` is already defined")]
    #[diagnostic(code(asm::duplicate_label), help("labels may only be defined once per file"))]
    DuplicateLabel {
        row: usize,
        name: String,
        #[label("duplicate label")]
        span: SourceSpan,
    },

    #[error("line {row}: `{name}` is a trap instruction and cannot be a label")]
    #[diagnostic(
        code(asm::reserved_label),
        help("GETC, OUT, PUTS, IN, PUTSP and HALT are reserved, pick another label name")
    )]
    ReservedLabel {
        row: usize,
        name: String,
        #[label("reserved word used as a label")]
        span: SourceSpan,
    },

    #[error("line {row}: unknown instruction `{name}`")]
    #[diagnostic(code(asm::mnemonic))]
    UnknownMnemonic {
        row: usize,
        name: String,
        #[label("not an instruction")]
        span: SourceSpan,
    },

    #[error("line {row}: unknown pseudo-op `{name}`")]
    #[diagnostic(
        code(asm::directive),
        help("available pseudo-ops are .ORIG, .END, .FILL, .BLKW and .STRINGZ")
    )]
    UnknownDirective {
        row: usize,
        name: String,
        #[label("not a pseudo-op")]
        span: SourceSpan,
    },

    #[error("line {row}: {mnemonic} is missing operand {index}")]
    #[diagnostic(code(asm::missing_operand), help("expected {expected}"))]
    MissingOperand {
        row: usize,
        mnemonic: String,
        index: usize,
        expected: &'static str,
        #[label("operand missing after this")]
        span: SourceSpan,
    },

    #[error("line {row}: expected {expected}, found `{found}`")]
    #[diagnostic(code(asm::operand), help("check the type of operands allowed for this instruction"))]
    WrongOperand {
        row: usize,
        expected: &'static str,
        found: String,
        #[label("unexpected operand")]
        span: SourceSpan,
    },
}

impl AsmError {
    /// 1-based source line the error was reported on.
    pub fn row(&self) -> usize {
        match self {
            AsmError::OrigMissing { row, .. }
            | AsmError::OrigMisplaced { row, .. }
            | AsmError::ArgCount { row, .. }
            | AsmError::BadLiteral { row, .. }
            | AsmError::NegativeBlock { row, .. }
            | AsmError::UnknownSymbol { row, .. }
            | AsmError::DuplicateLabel { row, .. }
            | AsmError::ReservedLabel { row, .. }
            | AsmError::UnknownMnemonic { row, .. }
            | AsmError::UnknownDirective { row, .. }
            | AsmError::MissingOperand { row, .. }
            | AsmError::WrongOperand { row, .. } => *row,
        }
    }
}

/// A suspicious but assemblable source line.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum AsmWarning {
    #[error("line {row}: final instruction isn't .END")]
    #[diagnostic(severity(Warning), code(asm::end))]
    MissingEnd {
        row: usize,
        #[label("expected .END after this")]
        span: SourceSpan,
    },

    #[error("line {row}: .END has to be at the end of the file")]
    #[diagnostic(severity(Warning), code(asm::end))]
    EndMisplaced {
        row: usize,
        #[label("misplaced .END")]
        span: SourceSpan,
    },

    #[error("line {row}: line contains only the label `{label}`")]
    #[diagnostic(severity(Warning), code(asm::label_only), help("the label refers to the next instruction"))]
    LabelOnly {
        row: usize,
        label: String,
        #[label("lone label")]
        span: SourceSpan,
    },

    #[error("line {row}: NOT takes two registers, the reserved low bits are always set")]
    #[diagnostic(severity(Warning), code(asm::not_bits))]
    NotReservedBits {
        row: usize,
        #[label("ignored operand")]
        span: SourceSpan,
    },

    #[error("line {row}: extra operands for {mnemonic} are ignored")]
    #[diagnostic(severity(Warning), code(asm::extra_operand))]
    ExtraOperands {
        row: usize,
        mnemonic: String,
        #[label("ignored")]
        span: SourceSpan,
    },

    #[error("line {row}: literal {value} does not fit in {bits} bits and was truncated")]
    #[diagnostic(severity(Warning), code(asm::truncated))]
    Truncated {
        row: usize,
        value: i32,
        bits: u32,
        #[label("truncated")]
        span: SourceSpan,
    },

    #[error("line {row}: .STRINGZ argument needs to be wrapped in double quotes")]
    #[diagnostic(severity(Warning), code(asm::stringz))]
    UnquotedString {
        row: usize,
        #[label("used as-is")]
        span: SourceSpan,
    },

    #[error("line {row}: label `{name}` is on page x{target:04X}, not the current page x{page:04X}")]
    #[diagnostic(
        severity(Warning),
        code(asm::page),
        help("page-relative operands only reach the 512 words of the current page")
    )]
    CrossPage {
        row: usize,
        name: String,
        page: Word,
        target: Word,
        #[label("resolves to a different address at runtime")]
        span: SourceSpan,
    },
}

/// Every error of a failed assembly, reported together with the source.
#[derive(Debug, Error, Diagnostic)]
#[error("assembly failed with {} error(s)", .errors.len())]
#[diagnostic(code(asm::failed))]
pub struct AsmFailure {
    #[source_code]
    pub src: NamedSource<String>,
    #[related]
    pub errors: Vec<AsmError>,
}

// Runtime

/// Reported by the CPU while running; execution always continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum RuntimeWarning {
    #[error("program counter overflowed past xFFFF and wrapped to x0000")]
    #[diagnostic(severity(Warning), code(run::pc_wrap))]
    PcWrapped,

    #[error("trailing bits in NOT at x{addr:04X} not set to one (x{word:04X})")]
    #[diagnostic(severity(Warning), code(run::not_bits))]
    NotReservedBits { addr: Word, word: Word },

    #[error("TRAP x{vector:02X} at x{addr:04X} has no routine installed")]
    #[diagnostic(severity(Warning), code(run::trap), help("only vectors x20 through x25 are installed at boot"))]
    UnmappedTrap { vector: u8, addr: Word },
}

/// Problems mapping a peripheral onto the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum BusError {
    #[error("peripheral window at x{base:04X} overlaps the window at x{existing:04X}")]
    #[diagnostic(code(bus::overlap))]
    Overlap { base: Word, existing: Word },

    #[error("peripheral window at x{base:04X} runs past the end of memory")]
    #[diagnostic(code(bus::range))]
    OutOfRange { base: Word },
}

/// Problems loading a binary image.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum LoadError {
    #[error("image is empty, expected at least an origin word")]
    #[diagnostic(code(load::empty))]
    Empty,

    #[error("image is {len} bytes long, which is not aligned to 16 bits")]
    #[diagnostic(code(load::unaligned))]
    Unaligned { len: usize },

    #[error("{len} words starting at x{orig:04X} do not fit in memory")]
    #[diagnostic(code(load::too_long))]
    TooLong { orig: Word, len: usize },
}

/// The machine could not be built.
#[derive(Debug, Error, Diagnostic)]
pub enum BootError {
    #[error("trap routines failed to assemble")]
    #[diagnostic(code(boot::assemble))]
    Assemble(#[diagnostic_source] AsmFailure),

    #[error("trap routines failed to load")]
    #[diagnostic(code(boot::load))]
    Load(#[from] LoadError),

    #[error("console could not be mapped")]
    #[diagnostic(code(boot::bus))]
    Bus(#[from] BusError),
}
