use std::fs;
use std::io::{self, stdout, IsTerminal, Read};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, IntoDiagnostic, NamedSource, Report, Result};
use tracing_subscriber::EnvFilter;

use lc2::bits::Word;
use lc2::console::TextScreen;
use lc2::output::Output;
use lc2::symbol::SymbolTable;
use lc2::{assemble, Exit, Image, ListingRow, Processor};

/// lc2 assembles and runs programs for the LC-2 instructional computer.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or binary `.obj` file directly and output to terminal
    Run {
        /// `.asm` or `.obj` file to run
        name: PathBuf,
        /// Print registers and program memory once the machine halts
        #[arg(long)]
        mem_dump: bool,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Create binary `.obj` file to run later
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output .obj file
        dest: Option<PathBuf>,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Print every assembled word next to the line it came from, then the symbol table
    List {
        /// `.asm` file to list
        name: PathBuf,
    },
}

fn main() -> Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    lc2::env::init();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LC2_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(lc2::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let Some(command) = args.command else {
        if let Some(path) = args.path {
            return run(&path, false, false);
        }
        println!("\n~ lc2 v{VERSION} ~");
        println!("{SHORT_INFO}");
        return Ok(());
    };

    match command {
        Command::Run {
            name,
            mem_dump,
            minimal,
        } => run(&name, mem_dump, minimal),
        Command::Compile { name, dest } => {
            file_message(Green, "Assembling", &name);
            let image = assemble_file(&name)?.image;

            let out_file_name = match dest {
                Some(dest) => dest,
                None => name.with_extension("obj"),
            };
            fs::write(&out_file_name, image.to_bytes()).into_diagnostic()?;

            message(Green, "Finished", "emit binary");
            file_message(Green, "Saved", &out_file_name);
            Ok(())
        }
        Command::Check { name } => {
            file_message(Green, "Checking", &name);
            assemble_file(&name)?;
            message(Green, "Success", "no errors found!");
            Ok(())
        }
        Command::List { name } => {
            let assembled = assemble_file(&name)?;
            for row in &assembled.listing {
                Output::Normal.print_str(&format!("{row}\n"));
            }
            if !assembled.symbols.is_empty() {
                Output::Normal.print_str("\nSymbol table\n");
                for (label, addr) in assembled.symbols.iter() {
                    Output::Normal.print_str(&format!("{label:<16} x{addr:04X}\n"));
                }
            }
            Ok(())
        }
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message<S>(color: MsgColor, left: S, right: S)
where
    S: Colorize + std::fmt::Display,
{
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &Path, mem_dump: bool, minimal: bool) -> Result<()> {
    Output::set_minimal(minimal);
    let (mut cpu, _console) = Processor::with_console(TextScreen::new(stdout()))?;

    let image = match name.extension().and_then(|ext| ext.to_str()) {
        Some("obj" | "lc2") => {
            let bytes = fs::read(name).into_diagnostic()?;
            Image::from_bytes(&bytes)?
        }
        Some("asm") => {
            file_message(MsgColor::Green, "Assembling", name);
            assemble_file(name)?.image
        }
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    };
    cpu.load_image(&image)?;

    message(MsgColor::Green, "Running", "emitted binary");
    let mut keyboard = Keyboard::new();
    loop {
        match cpu.run() {
            Exit::Halted => break,
            Exit::NeedsInput => {
                let Some(ch) = keyboard.read_char()? else {
                    bail!("Input ended while the program was waiting for a key");
                };
                cpu.input(ch);
            }
            Exit::Paused => continue,
        }
    }
    println!();

    if mem_dump {
        Output::Dump.print_registers(&cpu);
        Output::Dump.print_memory(&cpu, image.orig, image.len());
    }
    file_message(MsgColor::Green, "Completed", name);
    Ok(())
}

/// A successfully assembled file.
struct Assembled {
    image: Image,
    listing: Vec<ListingRow>,
    symbols: SymbolTable,
}

/// Assemble a source file, printing warnings.
fn assemble_file(name: &Path) -> Result<Assembled> {
    let src = fs::read_to_string(name).into_diagnostic()?;
    let file_name = name.display().to_string();
    let mut asm = assemble(&src, &lc2::env::asm_options());

    for warning in &asm.warnings {
        let report = Report::new(warning.clone())
            .with_source_code(NamedSource::new(&file_name, src.clone()));
        eprintln!("{report:?}");
    }

    let listing = std::mem::take(&mut asm.listing);
    let symbols = std::mem::take(&mut asm.symbols);
    let image = asm.into_result(&file_name, &src)?;
    Ok(Assembled {
        image,
        listing,
        symbols,
    })
}

/// Source of keystrokes for the console.
enum Keyboard {
    Terminal(console::Term),
    Piped(io::Stdin),
}

impl Keyboard {
    fn new() -> Self {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            Self::Terminal(console::Term::stdout())
        } else {
            Self::Piped(stdin)
        }
    }

    /// `None` indicates EOF.
    fn read_char(&mut self) -> Result<Option<Word>> {
        match self {
            Self::Terminal(term) => {
                let ch = term.read_char().into_diagnostic()?;
                // Characters past one byte cannot be stored in a console register
                Ok(Some(if ch.is_ascii() { ch as Word } else { b'?' as Word }))
            }
            Self::Piped(stdin) => {
                let mut buf = [0; 1];
                match stdin.read(&mut buf).into_diagnostic()? {
                    0 => Ok(None),
                    _ => Ok(Some(buf[0] as Word)),
                }
            }
        }
    }
}

const SHORT_INFO: &str = r"
Welcome to lc2, an assembler and emulator for the LC-2 computer.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
