use anyhow::{Context, Result, bail};
use clap::Parser;
use sio::record::{FORMAT_VERSION, RecordFrame, read_frame};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Read an .sio file, relocate every event and report on it")]
struct Args {
    /// Input file path to read (written by simjob)
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Print every event after it is rebuilt
    #[arg(long, default_value_t = false)]
    dump: bool,

    /// Stop after this many events
    #[arg(long)]
    max_events: Option<usize>,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    sio::logging::init_tracing("info")?;
    let args = Args::parse();
    let file = File::open(&args.input).with_context(|| format!("open {:?}", args.input))?;
    let mut rdr = BufReader::new(file);

    let mut frames = 0usize;
    let mut events = 0usize;
    let (mut particles, mut hits, mut pointers) = (0usize, 0usize, 0usize);
    while let Some(frame) = read_frame(&mut rdr).with_context(|| format!("frame {frames}"))? {
        frames += 1;
        match frame {
            RecordFrame::Header(h) => {
                if h.version != FORMAT_VERSION {
                    bail!("unsupported format version {} (expected {})", h.version, FORMAT_VERSION);
                }
                tracing::info!(
                    version = h.version,
                    detector = %h.detector,
                    created_ns = %h.created_unix_ns,
                    "{}",
                    h.description
                );
            }
            RecordFrame::Event(record) => {
                let event = record.decode()?;
                events += 1;
                particles += event.particles.len();
                hits += event.hits.len();
                pointers += record.pointers as usize;
                if args.dump {
                    print!("{event}");
                    println!("---");
                }
                if args.max_events.is_some_and(|max| events >= max) {
                    break;
                }
            }
        }
    }
    tracing::info!(frames, events, particles, hits, pointers, "read complete");
    Ok(())
}
