use crate::{
    bits::Word,
    lexer::Token,
    span::Span,
    symbol::{InstrKind, Register},
};

/// Assembly intermediate representation: the load address and every resolved statement in
/// address order.
#[derive(Debug, Default)]
pub struct Air {
    /// Memory address to start program at
    pub orig: Word,
    /// Line of the `.ORIG` directive, if the program has a valid one
    pub orig_row: Option<usize>,
    /// AIR
    pub stmts: Vec<AirStmt>,
}

impl Air {
    pub fn new(orig: Word) -> Self {
        Air {
            orig,
            orig_row: None,
            stmts: Vec::new(),
        }
    }

    pub fn add_stmt(&mut self, stmt: AirStmt) {
        self.stmts.push(stmt)
    }
}

/// A source line whose operands have been turned into values, but not yet encoded.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AirStmt {
    pub row: usize,
    pub span: Span,
    /// Address of the first word this statement occupies
    pub addr: Word,
    pub label: Option<String>,
    pub kind: StmtKind,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum StmtKind {
    Instr {
        kind: InstrKind,
        mnemonic: Token,
        args: Vec<Arg>,
    },
    /// `.FILL` or `.CHAR`
    Fill(Arg),
    Blkw { count: Word, fill: Word },
    /// Characters of a `.STRINGZ`, without the terminating zero.
    Stringz(String),
}

/// An operand with its source text kept around for diagnostics.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Arg {
    pub value: Operand,
    pub text: String,
    pub span: Span,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    Register(Register),
    /// Numeric or character literal, not yet range checked
    Literal(i32),
    /// Label resolved to its absolute address
    Address { name: String, addr: Word },
}
