use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use hevc_depay::rtpdump::RtpDumpReader;
use hevc_depay::{
    AggregationMode, AnnexBWriter, DepacketizerConfig, Depacketizer, PayloadFormat, RtpPacket,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "hevc-depay",
    about = "Rebuild an H.265 Annex B stream from an rtpdump capture"
)]
struct Args {
    /// rtpdump capture (rtptools `#!rtpplay1.0` format)
    #[arg(long, short)]
    input: PathBuf,

    /// Annex B output file
    #[arg(long, short)]
    output: PathBuf,

    /// RTP payload type of the H.265 stream
    #[arg(long, default_value_t = 96)]
    payload_type: u8,

    /// Unpack aggregation packets instead of failing on them
    #[arg(long)]
    aggregation: bool,

    /// Append FU continuation fragments even when no start fragment was seen
    #[arg(long)]
    keep_orphans: bool,

    /// Base64 `sprop-vps` value from the SDP
    #[arg(long, requires_all = ["sprop_sps", "sprop_pps"])]
    sprop_vps: Option<String>,

    /// Base64 `sprop-sps` value from the SDP
    #[arg(long, requires_all = ["sprop_vps", "sprop_pps"])]
    sprop_sps: Option<String>,

    /// Base64 `sprop-pps` value from the SDP
    #[arg(long, requires_all = ["sprop_vps", "sprop_sps"])]
    sprop_pps: Option<String>,
}

fn run(args: &Args) -> hevc_depay::Result<()> {
    let mut format = PayloadFormat::new(args.payload_type);
    if let (Some(vps), Some(sps), Some(pps)) = (&args.sprop_vps, &args.sprop_sps, &args.sprop_pps)
    {
        format = format.with_sprop_parameter_sets(vps, sps, pps)?;
    }

    let config = DepacketizerConfig {
        aggregation_packets: if args.aggregation {
            AggregationMode::Depacketize
        } else {
            AggregationMode::Reject
        },
        drop_orphan_fragments: !args.keep_orphans,
    };

    let reader = RtpDumpReader::new(BufReader::new(File::open(&args.input)?))?;
    let writer = AnnexBWriter::new(BufWriter::new(File::create(&args.output)?));

    let mut depay = Depacketizer::with_config(format, config);
    depay.create_track(writer)?;

    let mut skipped = 0u64;
    for record in reader {
        let record = record?;
        let packet = match RtpPacket::parse(&record.data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(offset_ms = record.offset_ms, error = %e, "skipping unparseable packet");
                skipped += 1;
                continue;
            }
        };
        if packet.payload_type != args.payload_type {
            skipped += 1;
            continue;
        }
        depay.consume(&packet)?;
    }

    let stats = *depay.stats();
    let bytes = depay
        .into_sink()
        .map(|w| {
            let n = w.bytes_written();
            w.into_inner().map(|_| n)
        })
        .transpose()?
        .unwrap_or(0);

    println!(
        "{} packets, {} samples ({} key frames), {} NAL units, {} bytes written",
        stats.packets, stats.samples, stats.key_frames, stats.nal_units, bytes
    );
    if stats.sequence_gaps + stats.orphan_fragments + skipped > 0 {
        println!(
            "dropped: {} sequence gaps, {} orphan fragments, {} skipped packets",
            stats.sequence_gaps, stats.orphan_fragments, skipped
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Failed to depacketize {}: {}", args.input.display(), e);
            ExitCode::FAILURE
        }
    }
}
