//! heapdb inspection tool

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use heapdb::access::TupleDesc;
use heapdb::storage::disk::PageManager;
use heapdb::storage::page::{HeapPage, PageId, DEFAULT_PAGE_SIZE};
use heapdb::storage::wal::LogContents;

/// heapdb - inspect write-ahead logs and heap files
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every record of a write-ahead log with its offset
    Log {
        /// Path of the log file
        path: PathBuf,
    },
    /// Show slot usage of every page in a heap file
    Page {
        /// Path of the heap file
        file: PathBuf,

        /// Column types, e.g. "int,string"
        #[arg(short, long)]
        schema: String,

        /// Page size in bytes
        #[arg(short = 'p', long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Also print the tuples
        #[arg(short, long)]
        tuples: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::Log { path } => {
            let contents = LogContents::read(&path)
                .with_context(|| format!("Failed to read log {}", path.display()))?;
            for line in contents.lines() {
                println!("{}", line);
            }
        }
        Command::Page {
            file,
            schema,
            page_size,
            tuples,
        } => {
            let desc = Arc::new(TupleDesc::parse(&schema).context("Invalid schema")?);
            let mut disk = PageManager::open(&file, 0, page_size)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let num_pages = disk.num_pages()?;
            println!("{}: {} pages, schema ({})", file.display(), num_pages, desc);

            let mut buf = vec![0u8; page_size];
            for page_number in 0..num_pages {
                disk.read_page(page_number, &mut buf)?;
                let page = HeapPage::new(
                    PageId::new(0, page_number),
                    &buf,
                    Arc::clone(&desc),
                    page_size,
                )
                .with_context(|| format!("Page {} does not match the schema", page_number))?;
                let used = page.num_slots() - page.num_empty_slots();
                println!("page {}: {}/{} slots used", page_number, used, page.num_slots());
                if tuples {
                    for tuple in page.iter() {
                        println!("  {}", tuple);
                    }
                }
            }
        }
    }

    Ok(())
}
