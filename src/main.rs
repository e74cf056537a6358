//! davix-cat: print a remote file, or byte ranges of it, to stdout

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use davix_adapter::config::AdapterConfig;
use davix_adapter::context::Context;
use davix_adapter::env::ProcessEnv;
use davix_adapter::file::{DavFile, IoPosBuffer, OpenFlags};

/// Chunk size for whole-file reads
const READ_CHUNK: usize = 1024 * 1024;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: davix-cat [--config <config.yaml>] <url> [offset:len ...]");
    eprintln!();
    eprintln!("davix-cat - read a file from HTTP/WebDAV grid storage");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  url             http, https, dav or davs URL");
    eprintln!("  offset:len      byte ranges fetched in one vectored read");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  X509_USER_PROXY, X509_USER_CERT, X509_USER_KEY, X509_CERT_DIR, Davix_Debug");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  davix-cat davs://eos.example.org/store/file.root 0:64 4096:128");
}

/// Parse `offset:len`
fn parse_range(arg: &str) -> Option<(u64, usize)> {
    let (offset, len) = arg.split_once(':')?;
    Some((offset.parse().ok()?, len.parse().ok()?))
}

struct Args {
    config: Option<PathBuf>,
    url: String,
    ranges: Vec<(u64, usize)>,
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = Some(PathBuf::from(args.next()?));
        } else if arg == "-h" || arg == "--help" {
            return None;
        } else {
            positional.push(arg);
        }
    }

    let mut positional = positional.into_iter();
    let url = positional.next()?;
    let ranges = positional
        .map(|r| parse_range(&r))
        .collect::<Option<Vec<_>>>()?;

    Some(Args { config, url, ranges })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(args) = parse_args() else {
        print_usage();
        std::process::exit(1);
    };

    // Load configuration; the environment always wins over the file
    let mut config = match &args.config {
        Some(path) => match AdapterConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => AdapterConfig::default(),
    };
    config.apply_environment(&ProcessEnv);

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(config);
    let context = Context::new(Arc::new(davix_adapter::client::DavClient::new()))?;

    info!("opening {}", args.url);
    let mut file = DavFile::open(context.clone(), config, &args.url, OpenFlags::READ)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if args.ranges.is_empty() {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut total = 0usize;
        loop {
            let n = file.read(&mut buf)?;
            out.write_all(&buf[..n])?;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        debug!("read {} bytes", total);
    } else {
        let mut buffers: Vec<Vec<u8>> = args.ranges.iter().map(|(_, len)| vec![0u8; *len]).collect();
        let mut pos: Vec<IoPosBuffer<'_>> = args
            .ranges
            .iter()
            .zip(buffers.iter_mut())
            .map(|((offset, _), buf)| IoPosBuffer::new(*offset, buf))
            .collect();

        let n = file.readv_at(&mut pos)?;
        drop(pos);
        if n == 0 {
            info!("all ranges lie past end of file");
        } else {
            for buf in &buffers {
                out.write_all(buf)?;
            }
        }
    }

    out.flush()?;
    file.close();
    context.shutdown();
    Ok(())
}
