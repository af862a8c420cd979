//! Two-pass assembler: source text to a loadable [`Image`].

use std::fmt;

use miette::NamedSource;
use tracing::debug;

use crate::{
    air::StmtKind,
    bits::{switch_endian, Word},
    encoder,
    error::{AsmError, AsmFailure, AsmWarning, LoadError},
    lexer, parser,
    symbol::SymbolTable,
};

/// Assembler settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AsmOptions {
    /// Accept character literals (`'c`) and the `.CHAR` directive.
    pub extensions: bool,
}

/// Assembled program: the load address followed by the words stored from it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Image {
    pub orig: Word,
    pub words: Vec<Word>,
}

impl Image {
    /// Read an object file: big-endian words, the first being the origin.
    pub fn from_bytes(bytes: &[u8]) -> Result<Image, LoadError> {
        if bytes.len() % 2 != 0 {
            return Err(LoadError::Unaligned { len: bytes.len() });
        }
        let mut words = bytes
            .chunks_exact(2)
            .map(|pair| Word::from_be_bytes([pair[0], pair[1]]));
        let orig = words.next().ok_or(LoadError::Empty)?;
        Ok(Image {
            orig,
            words: words.collect(),
        })
    }

    /// Object file contents: the origin word, then every word, each stored big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        std::iter::once(self.orig)
            .chain(self.words.iter().copied())
            .flat_map(Word::to_be_bytes)
            .collect()
    }

    /// Origin and words with their bytes swapped, for tools that expect little-endian words.
    pub fn words_swapped(&self) -> Vec<Word> {
        std::iter::once(self.orig)
            .chain(self.words.iter().copied())
            .map(switch_endian)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// One listed memory word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingRow {
    pub addr: Word,
    pub word: Word,
    pub row: usize,
    pub label: Option<String>,
    /// Operation and its arguments as written
    pub text: String,
}

impl fmt::Display for ListingRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:04X}) {:04X} {:016b} ({:>4}) {:<16} {}",
            self.addr,
            self.word,
            self.word,
            self.row,
            self.label.as_deref().unwrap_or(""),
            self.text
        )
    }
}

/// Everything produced by one run of the assembler.
///
/// The image is only trustworthy when `errors` is empty. Lines with errors are skipped, so
/// any words after them are misplaced.
#[derive(Debug, Default)]
pub struct Assembly {
    pub image: Image,
    pub symbols: SymbolTable,
    pub listing: Vec<ListingRow>,
    pub errors: Vec<AsmError>,
    pub warnings: Vec<AsmWarning>,
}

impl Assembly {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Keep the image if assembly succeeded, otherwise bundle every error with the source.
    pub fn into_result(self, name: &str, src: &str) -> Result<Image, AsmFailure> {
        if self.errors.is_empty() {
            Ok(self.image)
        } else {
            Err(AsmFailure {
                src: NamedSource::new(name, src.to_string()),
                errors: self.errors,
            })
        }
    }
}

/// Assemble `src`. Never fails outright: errors are collected per line and assembly continues.
pub fn assemble(src: &str, opts: &AsmOptions) -> Assembly {
    let mut reports = parser::Reports::default();
    let lines = lexer::tokenize(src);
    let layout = parser::layout(lines, opts, &mut reports);
    let (air, symbols) = parser::resolve(layout, opts, &mut reports);

    let mut words = Vec::new();
    let mut listing = Vec::new();
    if let Some(row) = air.orig_row {
        listing.push(ListingRow {
            addr: 0,
            word: air.orig,
            row,
            label: None,
            text: format!(".ORIG x{:04X}", air.orig),
        });
    }
    for stmt in &air.stmts {
        let encoded = match encoder::encode(stmt, &mut reports) {
            Ok(encoded) => encoded,
            Err(err) => {
                reports.error(err);
                continue;
            }
        };
        let op_text = stmt_text(&stmt.kind);
        for (i, word) in encoded.iter().enumerate() {
            listing.push(ListingRow {
                addr: stmt.addr.wrapping_add(i as Word),
                word: *word,
                row: stmt.row,
                label: if i == 0 { stmt.label.clone() } else { None },
                text: if i == 0 { op_text.clone() } else { String::new() },
            });
        }
        words.extend(encoded);
    }

    debug!(
        "assembled {} word(s) at x{:04X} with {} error(s) and {} warning(s)",
        words.len(),
        air.orig,
        reports.errors.len(),
        reports.warnings.len()
    );
    Assembly {
        image: Image {
            orig: air.orig,
            words,
        },
        symbols,
        listing,
        errors: reports.errors,
        warnings: reports.warnings,
    }
}

fn stmt_text(kind: &StmtKind) -> String {
    match kind {
        StmtKind::Instr { mnemonic, args, .. } => {
            let args: Vec<&str> = args.iter().map(|a| a.text.as_str()).collect();
            format!("{} {}", mnemonic.text.to_ascii_uppercase(), args.join(", "))
                .trim_end()
                .to_string()
        }
        StmtKind::Fill(arg) => format!(".FILL {}", arg.text),
        StmtKind::Blkw { count, .. } => format!(".BLKW {count}"),
        StmtKind::Stringz(s) => format!(".STRINGZ {s:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_program() {
        let asm = assemble(
            ".ORIG x3000\nLEA R0, msg\nPUTS\nHALT\nmsg .STRINGZ \"Hi\"\n.END",
            &AsmOptions::default(),
        );
        assert!(asm.is_ok(), "{:?}", asm.errors);
        assert!(asm.warnings.is_empty());
        assert_eq!(asm.image.orig, 0x3000);
        assert_eq!(
            asm.image.words,
            [0xE003, 0xF022, 0xF025, 'H' as Word, 'i' as Word, 0]
        );
        assert_eq!(asm.symbols.get("msg"), Some(0x3003));
        // The .ORIG row, then one row per word
        assert_eq!(asm.listing.len(), 7);
        assert_eq!(asm.listing[4].label.as_deref(), Some("msg"));
    }

    #[test]
    fn bad_lines_are_skipped() {
        let asm = assemble(
            ".ORIG x3000\nADD R0, R0, #1\nFOO R1\nADD R1, R1, #2\n.END",
            &AsmOptions::default(),
        );
        assert_eq!(asm.errors.len(), 1);
        assert_eq!(asm.errors[0].row(), 3);
        assert_eq!(asm.image.words, [0x1021, 0x1262]);
    }

    #[test]
    fn failure_carries_every_error() {
        let src = ".ORIG x3000\nLD R0, nope\nBRz gone\n.END";
        let asm = assemble(src, &AsmOptions::default());
        let Err(failure) = asm.into_result("prog.asm", src) else {
            panic!("expected assembly to fail");
        };
        assert_eq!(failure.errors.len(), 2);
        assert_eq!(failure.to_string(), "assembly failed with 2 error(s)");
    }

    #[test]
    fn listing_skips_missing_orig() {
        let asm = assemble("ADD R0, R0, #1\n.END", &AsmOptions::default());
        assert!(!asm.is_ok());
        assert!(asm.listing.iter().all(|row| !row.text.starts_with(".ORIG")));
    }

    #[test]
    fn object_bytes_are_big_endian() {
        let image = Image {
            orig: 0x3000,
            words: vec![0xF025, 0x0102],
        };
        assert_eq!(image.to_bytes(), [0x30, 0x00, 0xF0, 0x25, 0x01, 0x02]);
        assert_eq!(image.words_swapped(), [0x0030, 0x25F0, 0x0201]);
        assert_eq!(Image::from_bytes(&image.to_bytes()), Ok(image));
        assert_eq!(Image::from_bytes(&[0x30]), Err(LoadError::Unaligned { len: 1 }));
        assert_eq!(Image::from_bytes(&[]), Err(LoadError::Empty));
    }

    #[test]
    fn listing_format() {
        let asm = assemble(".ORIG x3000\nstart ADD R0, R0, #1\n.END", &AsmOptions::default());
        let orig = asm.listing[0].to_string();
        assert!(orig.starts_with("(0000) 3000 0011000000000000 (   1)"), "{orig}");
        assert!(orig.ends_with(".ORIG x3000"), "{orig}");
        let line = asm.listing[1].to_string();
        assert!(line.starts_with("(3000) 1021 0001000000100001 (   2) start"), "{line}");
        assert!(line.ends_with("ADD R0, R0, #1"), "{line}");
    }
}
