//! oclgrep command line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use oclgrep::{regexp, text, Error};

#[derive(Parser)]
#[command(
    name = "oclgrep",
    version,
    about = "Search a file for regex matches on an OpenCL device",
    after_help = "Prints one match start offset per line, ascending, \
                  zero-based, counted in UTF-32 code points of the \
                  (possibly normalized) input."
)]
struct Args {
    /// regex that should be matched
    regex: String,

    /// file where we look for the regex
    file: PathBuf,

    /// apply NFKC normalization to the regex
    #[arg(long)]
    normalize_regex: bool,

    /// apply NFKC normalization to data from the input file
    /// (match offsets then index the normalized text)
    #[arg(long, verbatim_doc_comment)]
    normalize_file: bool,

    /// print graph data to stdout
    #[arg(long)]
    print_graph: bool,

    /// print OpenCL profiling data to stdout
    #[arg(long)]
    print_profile: bool,

    /// do not print actual output (for benchmarking)
    #[arg(long)]
    no_output: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_user() => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!(
                "=========================================================================\n\
                 there was an internal error, please report this as a bug\n\
                 ================================= ERROR =================================\n\
                 {}\n\
                 =========================================================================",
                err
            );
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> oclgrep::Result<()> {
    // before we start, check that we are working on a UTF-8 system
    text::ensure_utf8_locale()?;

    let raw = std::fs::read(&args.file)
        .map_err(|e| Error::user(format!("cannot read {}: {}", args.file.display(), e)))?;
    if raw.is_empty() {
        return Err(Error::user("Empty files cannot be processed!"));
    }
    let content = text::decode_utf8(raw)?;

    let mut pattern = args.regex.clone();
    if args.normalize_regex {
        pattern = text::nfkc(&pattern);
    }
    let content = if args.normalize_file {
        text::nfkc(&content)
    } else {
        content
    };

    let graph = regexp::compile(&text::to_utf32(&pattern))?;
    if args.print_graph {
        let stdout = std::io::stdout();
        graph
            .dump(&mut stdout.lock())
            .map_err(|e| Error::internal(format!("cannot write graph dump: {}", e)))?;
    }

    let result = oclgrep::run_engine(&graph, &text::to_utf32(&content), args.print_profile)?;

    if !args.no_output {
        for offset in result {
            println!("{}", offset);
        }
    }
    Ok(())
}
