use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use stormmpq::{Archive, OpenScope};

#[derive(Parser)]
#[command(name = "stormmpq-extract", about = "Inspect and extract MPQ archives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the archive's (listfile) contents, if present.
    List { archive: PathBuf },
    /// Extract a single named file to an output path.
    Extract {
        archive: PathBuf,
        name: String,
        out: PathBuf,
    },
    /// Print a short header/table summary.
    Info { archive: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::List { archive } => list(&archive),
        Command::Extract { archive, name, out } => extract(&archive, &name, &out),
        Command::Info { archive } => info(&archive),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stormmpq-extract: {e}");
            ExitCode::FAILURE
        }
    }
}

fn list(path: &std::path::Path) -> stormmpq::Result<()> {
    let archive = Archive::open(path)?;
    let mut handle = archive.open_file("(listfile)", OpenScope::AnyLocale)?;
    let mut buf = Vec::new();
    handle.read_to_end(&mut buf).map_err(stormmpq::Error::Io)?;
    print!("{}", String::from_utf8_lossy(&buf));
    Ok(())
}

fn extract(archive_path: &std::path::Path, name: &str, out: &std::path::Path) -> stormmpq::Result<()> {
    let archive = Archive::open(archive_path)?;
    archive.extract_file(name, out)?;
    log::info!("extracted {name} to {}", out.display());
    Ok(())
}

fn info(path: &std::path::Path) -> stormmpq::Result<()> {
    let archive = Archive::open(path)?;
    println!("subtype: {:?}", archive.subtype());
    println!("malformed: {}", archive.malformed());
    Ok(())
}
