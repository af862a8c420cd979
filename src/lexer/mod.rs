//! Front end of the assembler: source text -> [`RawLine`] records.

use crate::span::{Idx, Span};
use crate::symbol::{is_mnemonic, TrapKind};

pub mod cursor;

use cursor::Cursor;

/// One whitespace or comma delimited word of a source line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token {
    pub text: String,
    pub span: Span,
}

impl Token {
    fn new(text: impl Into<String>, span: Span) -> Self {
        Token {
            text: text.into(),
            span,
        }
    }
}

/// A non-blank source line split into its parts.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawLine {
    /// 1-based line number in the source
    pub row: usize,
    /// Whole line without its comment
    pub span: Span,
    pub label: Option<Token>,
    /// `NOP` for a line that only carries a label
    pub mnemonic: Token,
    pub args: Vec<Token>,
    /// Raw text following the mnemonic, used by `.STRINGZ`
    pub tail: Option<Token>,
    /// Line holds only a label and takes up no memory
    pub label_only: bool,
    /// Trap alias written where a label belongs, as in `OUT .FILL x0`
    pub reserved_label: Option<Token>,
}

/// Test if a character separates words. Commas are essentially whitespace.
pub(crate) fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | ',')
}

/// Split source text into raw line records, dropping blank and comment-only lines.
pub fn tokenize(src: &str) -> Vec<RawLine> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for (i, line) in src.split_inclusive('\n').enumerate() {
        let base = offset;
        offset += line.len();
        let code = strip_comment(line.trim_end_matches(['\n', '\r']));
        if let Some(raw) = scan_line(code, base, i + 1) {
            lines.push(raw);
        }
    }
    lines
}

/// Everything before the first `;` that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_str => escaped = true,
            '"' => in_str = !in_str,
            ';' if !in_str => return &line[..i],
            _ => (),
        }
    }
    line
}

fn scan_line(code: &str, base: usize, row: usize) -> Option<RawLine> {
    let mut cur = Cursor::new(code);
    let mut words = Vec::new();
    let mut tails = Vec::new();
    loop {
        cur.take_while(is_separator);
        if cur.is_eof() {
            break;
        }
        tails.push(cur.pos());
        let start = cur.pos();
        if cur.first() == '"' {
            scan_string(&mut cur);
        } else {
            cur.take_while(|c| !is_separator(c));
        }
        let span = Span::new(Idx(base + start), cur.pos() - start);
        words.push(Token::new(cur.slice(start, cur.pos()), span));
    }

    let (first, last) = (words.first()?, words.last()?);
    let line_span = first.span.join(last.span);

    let reserved_label = match words.as_slice() {
        [first, second, ..]
            if TrapKind::parse(&first.text).is_some()
                && (is_mnemonic(&second.text) || second.text.starts_with('.')) =>
        {
            Some(first.clone())
        }
        _ => None,
    };

    let mut words = words.into_iter();
    let mut tails = tails.into_iter();
    let mut label = None;
    if let Some(word) = words.as_slice().first() {
        if !is_mnemonic(&word.text) && !word.text.starts_with('.') {
            label = words.next();
            tails.next();
        }
    }

    let Some(mnemonic) = words.next() else {
        // Only a label on this line
        let label_span = label.as_ref().map(|l| l.span).unwrap_or(line_span);
        return Some(RawLine {
            row,
            span: line_span,
            label,
            mnemonic: Token::new("NOP", label_span),
            args: Vec::new(),
            tail: None,
            label_only: true,
            reserved_label: None,
        });
    };
    tails.next();

    let mut args: Vec<Token> = words.collect();
    let tail = tails.next().map(|start| {
        let text = code[start..].trim_end();
        Token::new(text, Span::new(Idx(base + start), text.len()))
    });

    let mnemonic = match TrapKind::parse(&mnemonic.text) {
        Some(trap) => {
            let vector = Token::new(format!("x{:02X}", trap.vector()), mnemonic.span);
            args.insert(0, vector);
            Token::new("TRAP", mnemonic.span)
        }
        None => mnemonic,
    };

    Some(RawLine {
        row,
        span: line_span,
        label,
        mnemonic,
        args,
        tail,
        label_only: false,
        reserved_label,
    })
}

/// Consume a double-quoted string, including escapes. Unterminated strings run to the end of
/// the line.
fn scan_string(cur: &mut Cursor) {
    cur.bump();
    while let Some(c) = cur.bump() {
        match c {
            '\\' => {
                cur.bump();
            }
            '"' => break,
            _ => (),
        }
    }
}
