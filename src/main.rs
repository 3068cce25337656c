use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use becca_script::{Engine, Exception, ExceptionKind};
use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;

#[derive(Parser, Debug)]
#[command(version, about = "Run and inspect becca scripts")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every lexeme of a script
    Tokenize { filename: PathBuf },
    /// Print the syntax trees as parsed
    RawSyntax { filename: PathBuf },
    /// Print the syntax trees after sugar is rewritten
    UnsweetenedSyntax { filename: PathBuf },
    /// Execute a script
    Run { filename: PathBuf },
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Tokenize { filename } => {
            let (engine, source) = open(&filename)?;
            for lexeme in engine.tokens(source).unwrap_or_else(|e| fail(e)) {
                println!("{lexeme}");
            }
        }
        Commands::RawSyntax { filename } => {
            let (engine, source) = open(&filename)?;
            for tree in engine.raw_syntax(source).unwrap_or_else(|e| fail(e)) {
                println!("{tree}");
            }
        }
        Commands::UnsweetenedSyntax { filename } => {
            let (engine, source) = open(&filename)?;
            for tree in engine.unsweetened_syntax(source).unwrap_or_else(|e| fail(e)) {
                println!("{tree}");
            }
        }
        Commands::Run { filename } => {
            let (mut engine, source) = open(&filename)?;
            if let Err(e) = engine.execute(source) {
                fail(e);
            }
        }
    }
    Ok(())
}

fn open(filename: &Path) -> miette::Result<(Engine, BufReader<File>)> {
    let file = File::open(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))?;
    let engine = Engine::new().named(filename.display().to_string());
    Ok((engine, BufReader::new(file)))
}

/// Reports the exception on stderr and exits: 65 for malformed programs, 70
/// for failures while running.
fn fail(e: Exception) -> ! {
    let code = match e.kind {
        ExceptionKind::SyntaxError => 65,
        _ => 70,
    };
    eprintln!("{:?}", miette::Report::new(e));
    std::process::exit(code);
}
