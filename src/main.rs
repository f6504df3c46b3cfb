use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, bounded};
use dotenvy::dotenv;
use sio::event::Event;
use sio::record::{EventRecord, FORMAT_VERSION, FileHeader, RecordFrame, write_frame};
use sio::{DEFAULT_BUFFER_CAPACITY, WriteConfig, WriteDevice};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Parser)]
#[command(version, about = "Write simulated MC particle / calorimeter hit events to an .sio file")]
struct Args {
    /// Output file path; defaults to captures/simjob_YYYY_MM_DD.sio
    #[arg(long, short = 'o', env = "SIO_OUT")]
    out: Option<PathBuf>,

    /// Number of runs
    #[arg(long, env = "SIO_RUNS", default_value_t = 10)]
    runs: i32,

    /// Events per run
    #[arg(long, env = "SIO_EVENTS", default_value_t = 10)]
    events: i32,

    /// MC particles per event
    #[arg(long, env = "SIO_PARTICLES", default_value_t = 10)]
    particles: usize,

    /// Calorimeter hits per event
    #[arg(long, env = "SIO_HITS", default_value_t = 50)]
    hits: usize,

    /// Initial record buffer capacity in bytes
    #[arg(long, env = "SIO_CAPACITY", default_value_t = DEFAULT_BUFFER_CAPACITY)]
    capacity: usize,

    /// Detector name stored in the file header
    #[arg(long, env = "SIO_DETECTOR", default_value = "D09TileHcal")]
    detector: String,
}

fn now_unix_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn default_out_path() -> PathBuf {
    let date = time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .date();
    let mut p = PathBuf::from("captures");
    p.push(format!("simjob_{}_{:02}_{:02}.sio", date.year(), date.month() as u8, date.day()));
    p
}

fn writer_thread(out: PathBuf, rx: Receiver<RecordFrame>) -> Result<u64> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create {parent:?}"))?;
        }
    }
    let file: File = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&out)
        .with_context(|| format!("open {out:?}"))?;
    let mut w = BufWriter::with_capacity(1 << 20, file); // 1 MiB buffer
    let mut frames = 0u64;
    for frame in rx {
        write_frame(&mut w, &frame)?;
        frames += 1;
    }
    w.flush()?;
    Ok(frames)
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    sio::logging::init_tracing("info")?;
    let args = Args::parse();
    let out_path = args.out.clone().unwrap_or_else(default_out_path);

    let (tx, rx) = bounded::<RecordFrame>(256);
    let writer_out = out_path.clone();
    let writer = std::thread::spawn(move || writer_thread(writer_out, rx));

    tx.send(RecordFrame::Header(FileHeader {
        version: FORMAT_VERSION,
        created_unix_ns: now_unix_ns(),
        detector: args.detector.clone(),
        description: "simulated runs for testing the record format - no physics whatsoever".into(),
    }))
    .context("writer thread exited early")?;

    let mut device = WriteDevice::with_config(&WriteConfig::default().with_capacity(args.capacity));
    let mut payload_bytes = 0usize;
    'runs: for run in 0..args.runs {
        for number in 0..args.events {
            let mut event = Event::simulated(run, number, args.particles, args.hits);
            event.detector.clone_from(&args.detector);
            let record = EventRecord::encode(&event, &mut device)?;
            tracing::debug!(
                run,
                number,
                bytes = record.payload.len(),
                pointers = record.pointers,
                "event encoded"
            );
            payload_bytes += record.payload.len();
            if tx.send(RecordFrame::Event(record)).is_err() {
                // the writer failed; its error is reported on join
                break 'runs;
            }
        }
        tracing::info!(run, events = args.events, "run written");
    }
    drop(tx);

    let frames = writer
        .join()
        .map_err(|_| anyhow::anyhow!("writer thread panicked"))?
        .with_context(|| format!("write {out_path:?}"))?;
    tracing::info!(
        path = %out_path.display(),
        frames,
        payload_bytes,
        "created {} runs with {} events",
        args.runs,
        i64::from(args.runs) * i64::from(args.events)
    );
    Ok(())
}
