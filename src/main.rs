use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};

use loxwalk::ast_printer::{AstPrinter, RpnPrinter};
use loxwalk::parser::Parser;
use loxwalk::scanner::{scan_tokens, Scanner};
use loxwalk::session::{RunStatus, Session};

/// Exit code for lexical, syntax and resolution errors.
const EXIT_STATIC_ERROR: i32 = 65;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 70;

/// Exit code for malformed command lines.
const EXIT_USAGE: i32 = 64;

#[derive(ClapParser, Debug)]
#[command(version, about = "Tree-walking Lox interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to loxwalk.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes a file, printing each token
    Tokenize {
        filename: PathBuf,

        /// Print the tokens as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Parses a file as a single expression and prints its AST
    Parse {
        filename: PathBuf,

        /// Print in reverse Polish notation instead of prefix form
        #[arg(long)]
        rpn: bool,
    },

    /// Runs a script, or starts an interactive prompt when no file is given
    Run { filename: Option<PathBuf> },
}

/// Reads a whole source file as UTF‑8.
fn read_file(filename: &Path) -> Result<String> {
    info!("Reading file: {:?}", filename);
    let file = File::open(filename).context(format!("Failed to open file {:?}", filename))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    let bytes = reader
        .read_to_end(&mut buf)
        .context(format!("Failed to read file {:?}", filename))?;

    info!("Read {} bytes from {:?}", bytes, filename);

    String::from_utf8(buf).context(format!("File {:?} is not valid UTF-8", filename))
}

fn init_logger() -> Result<()> {
    let log_file = File::create("loxwalk.log").context("Failed to create loxwalk.log")?;

    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            let module = module.strip_prefix("loxwalk::").unwrap_or(module);
            writeln!(
                buf,
                "[{}:{}] - {}",
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Logger initialized, writing to loxwalk.log");
    Ok(())
}

fn stdout_sink() -> Rc<RefCell<dyn Write>> {
    Rc::new(RefCell::new(io::stdout()))
}

fn stderr_sink() -> Rc<RefCell<dyn Write>> {
    Rc::new(RefCell::new(io::stderr()))
}

fn tokenize(filename: &Path, json: bool) -> Result<i32> {
    let source = read_file(filename)?;

    if json {
        let (tokens, errors) = scan_tokens(&source);
        for e in &errors {
            eprintln!("{}", e);
        }
        println!("{}", serde_json::to_string_pretty(&tokens)?);
        return Ok(if errors.is_empty() { 0 } else { EXIT_STATIC_ERROR });
    }

    let mut tokenized = true;
    for token in Scanner::new(&source) {
        match token {
            Ok(token) => println!("{}", token),
            Err(e) => {
                tokenized = false;
                eprintln!("{}", e);
            }
        }
    }

    Ok(if tokenized { 0 } else { EXIT_STATIC_ERROR })
}

fn parse(filename: &Path, rpn: bool) -> Result<i32> {
    let source = read_file(filename)?;
    let (tokens, lex_errors) = scan_tokens(&source);
    for e in &lex_errors {
        eprintln!("{}", e);
    }

    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression();
    for e in parser.errors() {
        eprintln!("{}", e);
    }

    match expr {
        Some(expr) if lex_errors.is_empty() && parser.errors().is_empty() => {
            let printed = if rpn {
                RpnPrinter.print(&expr)
            } else {
                AstPrinter.print(&expr)
            };
            debug!("AST: {}", printed);
            println!("{}", printed);
            Ok(0)
        }
        _ => Ok(EXIT_STATIC_ERROR),
    }
}

fn run_file(filename: &Path) -> Result<i32> {
    let source = read_file(filename)?;
    let mut session = Session::new(stdout_sink(), stderr_sink());

    let code = match session.run(&source) {
        RunStatus::Ok => 0,
        RunStatus::StaticError => EXIT_STATIC_ERROR,
        RunStatus::RuntimeError => EXIT_RUNTIME_ERROR,
    };

    Ok(code)
}

fn run_prompt() -> Result<i32> {
    info!("Starting interactive prompt");
    let mut session = Session::new(stdout_sink(), stderr_sink());
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read from stdin")?;

        session.run(&line);
        session.reset_error();
    }

    Ok(0)
}

fn main() -> Result<()> {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            eprint!("{}", e.render());
            std::process::exit(EXIT_USAGE);
        }
        // --help and --version
        Err(e) => e.exit(),
    };

    if args.log {
        init_logger()?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .parse_default_env()
            .init();
    }

    info!("CLI arguments: {:?}", args);

    let code = match &args.commands {
        Commands::Tokenize { filename, json } => tokenize(filename, *json)?,
        Commands::Parse { filename, rpn } => parse(filename, *rpn)?,
        Commands::Run {
            filename: Some(filename),
        } => run_file(filename)?,
        Commands::Run { filename: None } => run_prompt()?,
    };

    if code != 0 {
        debug!("Exiting with code {}", code);
        std::process::exit(code);
    }

    Ok(())
}
