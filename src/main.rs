use std::io::Read;
use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

/// compiler lowers parsed statements into VM instructions
mod compiler;
/// device implements the stdio and file reader/writer devices
mod device;
/// driver is the thin shim over the SQLite connection
mod driver;
/// error does formatting and highlighting for errors
mod error;
/// format holds the codec protocol and the CSV and raw codecs
mod format;
/// lexer converts the input into a stream of token for the parser
mod lexer;
/// parser island-parses the token stream into statement nodes
mod parser;
/// savepoint models the savepoint stack and transaction flag
mod savepoint;
#[cfg(test)]
mod testio;
/// types holds all shared types between the above modules
mod types;
/// vm executes compiled instructions against a SQLite connection
mod vm;

/// Streaming ETL scripting on top of SQLite: run scripts mixing SQL with
/// USE, IMPORT, DISPLAY and ASSERT statements.
#[derive(clap::Parser)]
#[command(about, version, long_about = None)]
struct Cli {
    /// read the script from a file
    #[arg(short = 'f', long, conflicts_with = "expr")]
    file: Option<String>,

    /// run a single expression
    #[arg(short = 'e', long)]
    expr: Option<String>,

    /// dump the parsed statements as rusts pretty printed debugging
    #[arg(long)]
    ast: bool,

    /// dump the parsed statements as pretty printed json
    #[arg(long)]
    ast_json: bool,

    /// script arguments, readable through sys.args and @N
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let (source, name, used_stdin) = match read_script(&cli) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {}", msg);
            exit(1);
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let flag = cancel.clone();
        let _ = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed));
    }

    if let Err(e) = run(&cli, &source, &name, used_stdin, cancel) {
        let mut b = String::new();
        e.print(&mut b, &source);
        eprint!("{}", b);
        exit(1);
    }
}

fn read_script(cli: &Cli) -> Result<(String, String, bool), String> {
    if let Some(expr) = &cli.expr {
        return Ok((expr.clone(), "<EXPR>".to_string(), false));
    }
    if let Some(path) = &cli.file {
        let src = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{}': {}", path, e))?;
        return Ok((src, path.clone(), false));
    }
    let mut src = String::new();
    std::io::stdin()
        .read_to_string(&mut src)
        .map_err(|e| format!("failed to read stdin: {}", e))?;
    Ok((src, "<STDIN>".to_string(), true))
}

fn run(
    cli: &Cli,
    source: &str,
    name: &str,
    used_stdin: bool,
    cancel: Arc<AtomicBool>,
) -> Result<(), error::Error> {
    let toks = lexer::Lexer::new(source.as_bytes(), name).run()?;
    let nodes = parser::Parser::new(toks, name).parse()?;

    if cli.ast_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&nodes).unwrap_or_default()
        );
    }
    if cli.ast {
        println!("{:#?}", nodes);
    }

    let prog = compiler::compile(name, nodes, used_stdin)?;
    let mut m = vm::Machine::new(name, prog.db.as_deref(), &cli.args, cancel)?;
    let ran = m.run(&prog.inst);
    let close_errs = m.close();
    for e in &close_errs {
        eprintln!("{}", e);
    }
    ran?;
    if !close_errs.is_empty() {
        return Err(error::Error::system("failed to shut down cleanly"));
    }
    Ok(())
}
