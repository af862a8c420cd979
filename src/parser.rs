use std::borrow::Cow;

use tracing::{debug, trace};

use crate::{
    air::{Air, AirStmt, Arg, Operand, StmtKind},
    assembler::AsmOptions,
    bits::{fits_either, to_twos_complement, Word},
    error::{AsmError, AsmWarning},
    lexer::{RawLine, Token},
    span::Span,
    symbol::{DirKind, InstrKind, Register, SymbolTable},
};

/// Load address used when a program does not start with `.ORIG`.
pub const DEFAULT_ORIG: Word = 0x3000;

/// Diagnostics collected while assembling.
#[derive(Debug, Default)]
pub(crate) struct Reports {
    pub errors: Vec<AsmError>,
    pub warnings: Vec<AsmWarning>,
}

impl Reports {
    pub fn error(&mut self, err: AsmError) {
        debug!("{err}");
        self.errors.push(err);
    }

    pub fn warn(&mut self, warning: AsmWarning) {
        debug!("{warning}");
        self.warnings.push(warning);
    }

    /// Keep the low `bits` bits of `value`, warning if anything was lost.
    pub fn truncate(&mut self, value: i32, bits: u32, fits: bool, row: usize, span: Span) -> Word {
        if !fits {
            self.warn(AsmWarning::Truncated {
                row,
                value,
                bits,
                span: span.into(),
            });
        }
        to_twos_complement(value, bits)
    }
}

/// A literal token, read the same way everywhere an operand or directive argument is expected.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Literal {
    Value(i32),
    Malformed,
}

/// Interpret `text` as a literal. Returns `None` if it does not look like one, in which case it
/// may still be a label.
///
/// - `#-12`, `#12`: decimal
/// - `12`, `-12`: decimal
/// - `x3000`: hexadecimal, only when followed entirely by hex digits
/// - `'c`: character code, with extensions enabled
pub(crate) fn parse_literal(text: &str, extensions: bool) -> Option<Literal> {
    let decimal = |s: &str| match s.parse::<i32>() {
        Ok(n) => Literal::Value(n),
        Err(_) => Literal::Malformed,
    };
    if let Some(rest) = text.strip_prefix('#') {
        return Some(decimal(rest));
    }
    if let Some(rest) = text.strip_prefix(['x', 'X']) {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(match i32::from_str_radix(rest, 16) {
                Ok(n) => Literal::Value(n),
                Err(_) => Literal::Malformed,
            });
        }
        return None;
    }
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    if digits.starts_with(|c: char| c.is_ascii_digit()) {
        return Some(decimal(text));
    }
    if extensions {
        if let Some(rest) = text.strip_prefix('\'') {
            let c = rest.chars().next().unwrap_or(' ');
            return Some(Literal::Value(c as i32));
        }
    }
    None
}

/// Resolve escape sequences in a string literal.
fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('\\') {
        return Cow::Borrowed(s);
    }
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some(c) => {
                result.push('\\');
                result.push(c);
            }
            // Trailing backslash; include it as is
            None => result.push('\\'),
        }
    }
    Cow::Owned(result)
}

/// What a line will produce, decided during layout.
#[derive(Debug)]
enum Body {
    Instr,
    Fill(Token),
    Char(Word),
    Blkw { count: Word, fill: Word },
    Stringz(String),
}

impl Body {
    fn width(&self) -> usize {
        match self {
            Body::Instr | Body::Fill(_) | Body::Char(_) => 1,
            Body::Blkw { count, .. } => *count as usize,
            Body::Stringz(s) => s.chars().count() + 1,
        }
    }
}

/// A line that has been given an address.
#[derive(Debug)]
struct Placed {
    line: RawLine,
    addr: Word,
    body: Body,
}

/// Output of the first pass. The symbol table is complete and no longer changes.
pub(crate) struct Layout {
    orig: Word,
    orig_row: Option<usize>,
    symbols: SymbolTable,
    lines: Vec<Placed>,
}

/// First pass: assign every line its address, bind labels and evaluate directives whose size
/// depends on their arguments.
pub(crate) fn layout(lines: Vec<RawLine>, opts: &AsmOptions, reports: &mut Reports) -> Layout {
    let mut symbols = SymbolTable::new();
    let mut placed = Vec::new();
    let mut orig = DEFAULT_ORIG;
    let mut orig_row = None;

    match lines.last() {
        None => reports.error(AsmError::OrigMissing {
            row: 1,
            span: Span::dummy().into(),
        }),
        Some(last) => {
            if DirKind::parse(&last.mnemonic.text) != Some(DirKind::End) {
                reports.warn(AsmWarning::MissingEnd {
                    row: last.row,
                    span: last.span.into(),
                });
            }
        }
    }

    let count = lines.len();
    let mut addr = orig;
    for (i, line) in lines.into_iter().enumerate() {
        let row = line.row;
        let dir = if line.mnemonic.text.starts_with('.') {
            match DirKind::parse(&line.mnemonic.text) {
                Some(DirKind::Char) if !opts.extensions => None,
                found => found,
            }
            .ok_or(())
            .map(Some)
        } else {
            Ok(None)
        };

        let is_orig = dir == Ok(Some(DirKind::Orig));
        if i == 0 {
            if is_orig {
                match orig_address(&line, reports) {
                    Ok(value) => {
                        orig = value;
                        orig_row = Some(row);
                    }
                    Err(err) => reports.error(err),
                }
                addr = orig;
            } else {
                reports.error(AsmError::OrigMissing {
                    row,
                    span: line.span.into(),
                });
            }
        } else if is_orig {
            reports.error(AsmError::OrigMisplaced {
                row,
                span: line.mnemonic.span.into(),
            });
        }

        if let Some(word) = &line.reserved_label {
            reports.error(AsmError::ReservedLabel {
                row,
                name: word.text.clone(),
                span: word.span.into(),
            });
            continue;
        }

        if let Some(label) = &line.label {
            if symbols.insert(&label.text, addr).is_some() {
                reports.error(AsmError::DuplicateLabel {
                    row,
                    name: label.text.clone(),
                    span: label.span.into(),
                });
            } else {
                trace!("label {} = x{addr:04X}", label.text);
            }
        }
        if line.label_only {
            reports.warn(AsmWarning::LabelOnly {
                row,
                label: line.label.as_ref().map(|l| l.text.clone()).unwrap_or_default(),
                span: line.span.into(),
            });
            continue;
        }

        let body = match dir {
            Ok(None) => Body::Instr,
            Err(()) => {
                reports.error(AsmError::UnknownDirective {
                    row,
                    name: line.mnemonic.text.clone(),
                    span: line.mnemonic.span.into(),
                });
                continue;
            }
            Ok(Some(DirKind::Orig)) => continue,
            Ok(Some(DirKind::End)) => {
                if i + 1 != count {
                    reports.warn(AsmWarning::EndMisplaced {
                        row,
                        span: line.mnemonic.span.into(),
                    });
                }
                continue;
            }
            Ok(Some(kind)) => match directive(kind, &line, opts, reports) {
                Ok(body) => body,
                Err(err) => {
                    reports.error(err);
                    continue;
                }
            },
        };
        let width = body.width();
        placed.push(Placed { line, addr, body });
        addr = addr.wrapping_add(width as Word);
    }

    debug!(
        "laid out {} line(s) from x{orig:04X}, {} label(s)",
        placed.len(),
        symbols.len()
    );
    Layout {
        orig,
        orig_row,
        symbols,
        lines: placed,
    }
}

fn arg_count(line: &RawLine, kind: DirKind, expected: &'static str) -> AsmError {
    AsmError::ArgCount {
        row: line.row,
        directive: kind.name(),
        expected,
        found: line.args.len(),
        span: line.span.into(),
    }
}

/// Read a literal directive argument, which cannot be a label.
fn literal_arg(tok: &Token, row: usize, extensions: bool) -> Result<i32, AsmError> {
    match parse_literal(&tok.text, extensions) {
        Some(Literal::Value(value)) => Ok(value),
        _ => Err(AsmError::BadLiteral {
            row,
            text: tok.text.clone(),
            span: tok.span.into(),
        }),
    }
}

fn orig_address(line: &RawLine, reports: &mut Reports) -> Result<Word, AsmError> {
    let [arg] = line.args.as_slice() else {
        return Err(arg_count(line, DirKind::Orig, "1"));
    };
    let value = literal_arg(arg, line.row, false)?;
    Ok(reports.truncate(value, 16, fits_either(value, 16), line.row, arg.span))
}

fn directive(
    kind: DirKind,
    line: &RawLine,
    opts: &AsmOptions,
    reports: &mut Reports,
) -> Result<Body, AsmError> {
    let row = line.row;
    match kind {
        DirKind::Fill => match line.args.as_slice() {
            [arg] => Ok(Body::Fill(arg.clone())),
            _ => Err(arg_count(line, kind, "1")),
        },
        DirKind::Char => match line.args.as_slice() {
            [arg] => {
                let text = arg.text.strip_prefix('\'').unwrap_or(&arg.text);
                let c = text.chars().next().unwrap_or(' ');
                Ok(Body::Char(c as u32 as Word))
            }
            _ => Err(arg_count(line, kind, "1")),
        },
        DirKind::Blkw => {
            let (count_tok, fill_tok) = match line.args.as_slice() {
                [count] => (count, None),
                [count, fill] => (count, Some(fill)),
                _ => return Err(arg_count(line, kind, "1 or 2")),
            };
            let count = literal_arg(count_tok, row, opts.extensions)?;
            if count < 0 {
                return Err(AsmError::NegativeBlock {
                    row,
                    span: count_tok.span.into(),
                });
            }
            let count = Word::try_from(count).map_err(|_| AsmError::BadLiteral {
                row,
                text: count_tok.text.clone(),
                span: count_tok.span.into(),
            })?;
            let fill = match fill_tok {
                Some(tok) => {
                    let value = literal_arg(tok, row, opts.extensions)?;
                    reports.truncate(value, 16, fits_either(value, 16), row, tok.span)
                }
                None => 0,
            };
            Ok(Body::Blkw { count, fill })
        }
        DirKind::Stringz => {
            let (Some(first), Some(tail)) = (line.args.first(), line.tail.as_ref()) else {
                return Err(arg_count(line, kind, "1"));
            };
            let quoted = first.text.len() >= 2
                && first.text.starts_with('"')
                && first.text.ends_with('"');
            if quoted {
                let inner = &first.text[1..first.text.len() - 1];
                Ok(Body::Stringz(unescape(inner).into_owned()))
            } else {
                reports.warn(AsmWarning::UnquotedString {
                    row,
                    span: tail.span.into(),
                });
                Ok(Body::Stringz(tail.text.clone()))
            }
        }
        // Handled by the caller
        DirKind::Orig | DirKind::End => Ok(Body::Blkw { count: 0, fill: 0 }),
    }
}

/// Second pass: resolve every operand against the frozen symbol table.
pub(crate) fn resolve(layout: Layout, opts: &AsmOptions, reports: &mut Reports) -> (Air, SymbolTable) {
    let Layout {
        orig,
        orig_row,
        symbols,
        lines,
    } = layout;
    let mut air = Air::new(orig);
    air.orig_row = orig_row;

    for Placed { line, addr, body } in lines {
        let row = line.row;
        let kind = match body {
            Body::Instr => {
                let Some(kind) = InstrKind::parse(&line.mnemonic.text) else {
                    reports.error(AsmError::UnknownMnemonic {
                        row,
                        name: line.mnemonic.text.clone(),
                        span: line.mnemonic.span.into(),
                    });
                    continue;
                };
                let args: Result<Vec<Arg>, AsmError> = line
                    .args
                    .iter()
                    .map(|tok| resolve_arg(tok, row, &symbols, opts.extensions))
                    .collect();
                match args {
                    Ok(args) => StmtKind::Instr {
                        kind,
                        mnemonic: line.mnemonic.clone(),
                        args,
                    },
                    Err(err) => {
                        reports.error(err);
                        continue;
                    }
                }
            }
            Body::Fill(tok) => match resolve_arg(&tok, row, &symbols, opts.extensions) {
                Ok(arg) => StmtKind::Fill(arg),
                Err(err) => {
                    reports.error(err);
                    continue;
                }
            },
            Body::Char(code) => {
                let tok = line.args.first().cloned().unwrap_or_else(|| line.mnemonic.clone());
                StmtKind::Fill(Arg {
                    value: Operand::Literal(code as i32),
                    text: tok.text,
                    span: tok.span,
                })
            }
            Body::Blkw { count, fill } => StmtKind::Blkw { count, fill },
            Body::Stringz(s) => StmtKind::Stringz(s),
        };
        air.add_stmt(AirStmt {
            row,
            span: line.span,
            addr,
            label: line.label.map(|l| l.text),
            kind,
        });
    }
    (air, symbols)
}

fn resolve_arg(
    tok: &Token,
    row: usize,
    symbols: &SymbolTable,
    extensions: bool,
) -> Result<Arg, AsmError> {
    let value = if let Ok(reg) = tok.text.parse::<Register>() {
        Operand::Register(reg)
    } else {
        match parse_literal(&tok.text, extensions) {
            Some(Literal::Value(n)) => Operand::Literal(n),
            Some(Literal::Malformed) => {
                return Err(AsmError::BadLiteral {
                    row,
                    text: tok.text.clone(),
                    span: tok.span.into(),
                })
            }
            None => match symbols.get(&tok.text) {
                Some(addr) => Operand::Address {
                    name: tok.text.clone(),
                    addr,
                },
                None => {
                    return Err(AsmError::UnknownSymbol {
                        row,
                        name: tok.text.clone(),
                        span: tok.span.into(),
                    })
                }
            },
        }
    };
    Ok(Arg {
        value,
        text: tok.text.clone(),
        span: tok.span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn run(src: &str, extensions: bool) -> (Air, SymbolTable, Reports) {
        let opts = AsmOptions { extensions };
        let mut reports = Reports::default();
        let layout = layout(tokenize(src), &opts, &mut reports);
        let (air, symbols) = resolve(layout, &opts, &mut reports);
        (air, symbols, reports)
    }

    #[test]
    fn literals() {
        assert_eq!(parse_literal("#-12", false), Some(Literal::Value(-12)));
        assert_eq!(parse_literal("#12", false), Some(Literal::Value(12)));
        assert_eq!(parse_literal("42", false), Some(Literal::Value(42)));
        assert_eq!(parse_literal("-3", false), Some(Literal::Value(-3)));
        assert_eq!(parse_literal("x3000", false), Some(Literal::Value(0x3000)));
        assert_eq!(parse_literal("XfF", false), Some(Literal::Value(0xFF)));
        assert_eq!(parse_literal("#abc", false), Some(Literal::Malformed));
        assert_eq!(parse_literal("12ab", false), Some(Literal::Malformed));
        assert_eq!(parse_literal("xloop", false), None);
        assert_eq!(parse_literal("loop", false), None);
        assert_eq!(parse_literal("'a", false), None);
        assert_eq!(parse_literal("'a", true), Some(Literal::Value('a' as i32)));
    }

    #[test]
    fn unescapes_strings() {
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape(r#"a\nb\t\"c\"\\"#), "a\nb\t\"c\"\\");
        assert_eq!(unescape(r"odd\q"), r"odd\q");
    }

    #[test]
    fn labels_bind_to_addresses() {
        let (air, symbols, reports) = run(
            ".ORIG x3000\nstart ADD R0,R0,#1\nbuf .BLKW 3\nmsg .STRINGZ \"hi\"\nlast .FILL x0\n.END",
            false,
        );
        assert!(reports.errors.is_empty(), "{:?}", reports.errors);
        assert!(reports.warnings.is_empty(), "{:?}", reports.warnings);
        assert_eq!(air.orig, 0x3000);
        assert_eq!(air.orig_row, Some(1));
        assert_eq!(symbols.get("start"), Some(0x3000));
        assert_eq!(symbols.get("BUF"), Some(0x3001));
        assert_eq!(symbols.get("msg"), Some(0x3004));
        assert_eq!(symbols.get("last"), Some(0x3007));
        assert_eq!(air.stmts.len(), 4);
        assert_eq!(air.stmts[2].kind, StmtKind::Stringz("hi".into()));
    }

    #[test]
    fn forward_references_resolve() {
        let (air, _, reports) = run(".ORIG x3000\nBR done\ndone HALT\n.END", false);
        assert!(reports.errors.is_empty());
        let StmtKind::Instr { args, .. } = &air.stmts[0].kind else {
            panic!("expected an instruction");
        };
        assert_eq!(
            args[0].value,
            Operand::Address {
                name: "done".into(),
                addr: 0x3001
            }
        );
    }

    #[test]
    fn missing_orig_defaults() {
        let (air, _, reports) = run("ADD R0,R0,#1\n.END", false);
        assert_eq!(air.orig, DEFAULT_ORIG);
        assert!(matches!(reports.errors[..], [AsmError::OrigMissing { row: 1, .. }]));
        assert_eq!(air.stmts.len(), 1);
        assert_eq!(air.orig_row, None);
    }

    #[test]
    fn duplicate_label_keeps_first() {
        let (_, symbols, reports) = run(".ORIG x3000\na ADD R0,R0,R0\na ADD R0,R0,R0\n.END", false);
        assert!(matches!(
            &reports.errors[..],
            [AsmError::DuplicateLabel { row: 3, name, .. }] if name == "a"
        ));
        assert_eq!(symbols.get("a"), Some(0x3000));
    }

    #[test]
    fn trap_alias_as_label_is_rejected() {
        let (air, symbols, reports) = run(".ORIG x3000\nLEA R0, out\nHALT\nout .BLKW 2\n.END", false);
        assert!(matches!(
            &reports.errors[..],
            [AsmError::ReservedLabel { row: 4, name, .. }, AsmError::UnknownSymbol { row: 2, .. }]
                if name == "out"
        ));
        assert_eq!(symbols.get("out"), None);
        assert_eq!(air.stmts.len(), 1);
    }

    #[test]
    fn end_checks() {
        let (_, _, reports) = run(".ORIG x3000\n.END\nHALT", false);
        assert!(matches!(
            reports.warnings[..],
            [AsmWarning::MissingEnd { row: 3, .. }, AsmWarning::EndMisplaced { row: 2, .. }]
        ));
    }

    #[test]
    fn label_only_lines_take_no_space() {
        let (_, symbols, reports) = run(".ORIG x3000\nhere\nHALT\n.END", false);
        assert_eq!(symbols.get("here"), Some(0x3000));
        assert!(matches!(reports.warnings[..], [AsmWarning::LabelOnly { row: 2, .. }]));
    }

    #[test]
    fn directive_errors() {
        let (air, _, reports) = run(
            ".ORIG x3000\n.BLKW #-1\n.FILL\n.WORD 1\n.ORIG x4000\n.CHAR a\n.END",
            false,
        );
        assert!(air.stmts.is_empty());
        assert!(matches!(
            reports.errors[..],
            [
                AsmError::NegativeBlock { row: 2, .. },
                AsmError::ArgCount { row: 3, .. },
                AsmError::UnknownDirective { row: 4, .. },
                AsmError::OrigMisplaced { row: 5, .. },
                AsmError::UnknownDirective { row: 6, .. },
            ]
        ));
    }

    #[test]
    fn extensions_enable_chars() {
        let (air, _, reports) = run(".ORIG x3000\n.CHAR a\nADD R0,R0,'b\n.END", true);
        assert!(reports.errors.is_empty(), "{:?}", reports.errors);
        let StmtKind::Fill(arg) = &air.stmts[0].kind else {
            panic!("expected a fill");
        };
        assert_eq!(arg.value, Operand::Literal('a' as i32));
    }

    #[test]
    fn unknown_symbol_and_mnemonic() {
        let (air, _, reports) = run(".ORIG x3000\nLD R0, nowhere\nfoo bar R1\n.END", false);
        assert!(air.stmts.is_empty());
        assert!(matches!(
            &reports.errors[..],
            [AsmError::UnknownSymbol { row: 2, name, .. }, AsmError::UnknownMnemonic { row: 3, .. }]
                if name == "nowhere"
        ));
    }

    #[test]
    fn unquoted_string_is_used_raw() {
        let (air, _, reports) = run(".ORIG x3000\n.STRINGZ hello world\n.END", false);
        assert!(matches!(reports.warnings[..], [AsmWarning::UnquotedString { .. }]));
        assert_eq!(air.stmts[0].kind, StmtKind::Stringz("hello world".into()));
    }
}
