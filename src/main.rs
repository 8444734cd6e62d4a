#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "md2man", version, about = "Convert Markdown into a roff manpage")]
struct Cli {
    /// Markdown file to read, or `-` for stdin
    #[arg(short = 'i', long = "input", value_name = "PATH", default_value = "-")]
    input: String,

    /// File to write the manpage to; stdout when omitted
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,
}

fn read_input(path: &str) -> io::Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
    }
}

fn write_output(path: Option<&PathBuf>, markdown: &str) -> Result<()> {
    match path {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            md2man::render_to_writer(markdown, &mut writer)?;
            writer
                .flush()
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            md2man::render_to_writer(markdown, &mut writer)?;
            writer.flush().context("failed to write to stdout")?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let input = read_input(&cli.input)
        .with_context(|| format!("failed to read input from {}", display_input(&cli.input)))?;
    log::debug!("read {} bytes of markdown", input.len());
    write_output(cli.output.as_ref(), &input)
}

fn display_input(path: &str) -> &str {
    if path == "-" { "stdin" } else { path }
}
