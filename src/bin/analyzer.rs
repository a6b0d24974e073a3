//! Burst Analyzer
//!
//! Post-processing tool for capture files written by the burst node. Messages
//! are regrouped into runs by their run id, then each run is reported with its
//! metadata, inter-sample timing, per-axis statistics and FFT peaks.
//!
//! Usage:
//!   analyzer --input bursts.cap --all
//!   analyzer --input bursts.cap --timing --statistics
//!   analyzer --input bursts.cap --run lis331-node-01-123456 --fft

use accel_burst_node::burst::STANDARD_GRAVITY;
use accel_burst_node::frame::DecodedRun;
use accel_burst_node::gate::magnitude_rms;
use accel_burst_node::{CaptureReader, PublishMessage, RunAssembler};
use clap::Parser;
use num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "analyzer")]
#[command(about = "Analyze vibration bursts from a capture file", long_about = None)]
struct Args {
    /// Input capture file path
    #[arg(short, long)]
    input: PathBuf,

    /// Only analyze the run with this id
    #[arg(long)]
    run: Option<String>,

    /// Report inter-sample timing
    #[arg(long)]
    timing: bool,

    /// Compute statistical metrics
    #[arg(long)]
    statistics: bool,

    /// Perform FFT frequency analysis
    #[arg(long)]
    fft: bool,

    /// Run all analyses
    #[arg(long)]
    all: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so the report on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    // Determine analyses to run
    let run_timing = args.all || args.timing;
    let run_statistics = args.all || args.statistics;
    let run_fft = args.all || args.fft;

    if !run_timing && !run_statistics && !run_fft {
        eprintln!("Error: Must specify at least one analysis type (--timing, --statistics, --fft, or --all)");
        std::process::exit(1);
    }

    // Load and regroup messages
    println!("Loading messages from {}...", args.input.display());
    let reader = CaptureReader::open(&args.input)?;
    let mut assembler = RunAssembler::new();
    let mut records = 0usize;
    let mut undecodable = 0usize;
    for record in reader {
        let record = record?;
        records += 1;
        match PublishMessage::decode(&record.payload) {
            Ok(message) => assembler.push(message),
            Err(e) => {
                undecodable += 1;
                tracing::warn!(record = records, topic = %record.topic, "skipping record: {}", e);
            }
        }
    }

    let (runs, incomplete) = assembler.finish();
    println!(
        "Loaded {} records: {} complete runs, {} incomplete, {} undecodable",
        records,
        runs.len(),
        incomplete.len(),
        undecodable
    );
    for run in &incomplete {
        tracing::warn!(id = %run.id, "run incomplete: {}", run.reason);
    }

    let runs: Vec<DecodedRun> = match &args.run {
        Some(id) => runs.into_iter().filter(|r| &r.meta.id == id).collect(),
        None => runs,
    };
    if runs.is_empty() {
        eprintln!("Error: No complete runs to analyze");
        return Ok(());
    }

    // Open output
    let mut output: Box<dyn Write> = if let Some(path) = args.output {
        Box::new(File::create(path)?)
    } else {
        Box::new(io::stdout())
    };

    for run in &runs {
        write_header(&mut output, run)?;

        if run_timing {
            writeln!(output, "\n{}", "=".repeat(80))?;
            writeln!(output, "TIMING ANALYSIS")?;
            writeln!(output, "{}", "=".repeat(80))?;
            run_timing_analysis(&mut output, run)?;
        }

        if run_statistics {
            writeln!(output, "\n{}", "=".repeat(80))?;
            writeln!(output, "STATISTICAL ANALYSIS")?;
            writeln!(output, "{}", "=".repeat(80))?;
            run_statistics_analysis(&mut output, run)?;
        }

        if run_fft {
            writeln!(output, "\n{}", "=".repeat(80))?;
            writeln!(output, "FREQUENCY ANALYSIS (FFT)")?;
            writeln!(output, "{}", "=".repeat(80))?;
            run_fft_analysis(&mut output, run)?;
        }
        writeln!(output)?;
    }

    writeln!(output, "{}", "=".repeat(80))?;
    writeln!(output, "Analysis complete!")?;

    Ok(())
}

fn write_header(output: &mut dyn Write, run: &DecodedRun) -> io::Result<()> {
    let meta = &run.meta;
    writeln!(output, "{}", "=".repeat(80))?;
    writeln!(output, "BURST {}", meta.id)?;
    writeln!(output, "{}", "=".repeat(80))?;
    writeln!(output)?;
    writeln!(output, "Run Information:")?;
    writeln!(output, "  Device: {} ({})", meta.device, meta.address)?;
    writeln!(output, "  Start: {} (time synced: {})", meta.iso, meta.time_valid)?;
    writeln!(output, "  Samples: {}", meta.sample_count)?;
    writeln!(output, "  Target rate: {} Hz", meta.target_rate_hz)?;
    writeln!(output, "  Formats: dt={}, axes={}", meta.dt_format, meta.axis_format)?;
    writeln!(output, "  RMS magnitude: {:.3} m/s^2", magnitude_rms(&run.burst))?;
    Ok(())
}

// ============================================================================
// TIMING ANALYSIS
// ============================================================================

/// Mean interval in microseconds, or the nominal period if there is none
fn mean_interval_us(run: &DecodedRun) -> f64 {
    let dt = run.burst.inter_sample_us();
    if dt.is_empty() {
        return 1e6 / f64::from(run.meta.target_rate_hz.max(1));
    }
    run.burst.duration_us() as f64 / dt.len() as f64
}

fn run_timing_analysis(output: &mut dyn Write, run: &DecodedRun) -> io::Result<()> {
    let dt = run.burst.inter_sample_us();
    let target_us = 1_000_000 / u32::from(run.meta.target_rate_hz.max(1));
    let min = dt.iter().copied().min().unwrap_or(0);
    let max = dt.iter().copied().max().unwrap_or(0);
    let saturated = dt.iter().filter(|&&d| d == u16::MAX).count();
    let late = dt.iter().filter(|&&d| u32::from(d) > target_us + target_us / 10).count();
    let mean = mean_interval_us(run);

    writeln!(output)?;
    writeln!(output, "Inter-sample intervals (us):")?;
    writeln!(output, "  Target: {}", target_us)?;
    writeln!(output, "  Min: {}  Max: {}  Mean: {:.2}", min, max, mean)?;
    writeln!(output, "  Saturated: {}", saturated)?;
    writeln!(output, "  More than 10% late: {}", late)?;
    writeln!(output, "  Effective rate: {:.1} Hz", 1e6 / mean)?;
    writeln!(
        output,
        "  Duration: {:.3} ms (expected {:.3} ms)",
        run.burst.duration_us() as f64 / 1000.0,
        dt.len() as f64 * f64::from(target_us) / 1000.0
    )?;
    Ok(())
}

// ============================================================================
// STATISTICS ANALYSIS
// ============================================================================

#[derive(Debug)]
struct Stats {
    mean: f64,
    rms: f64,
    std_dev: f64,
    min: f64,
    max: f64,
    peak_to_peak: f64,
}

fn compute_stats(data: &[f64]) -> Stats {
    let n = data.len() as f64;

    // Mean
    let mean = data.iter().sum::<f64>() / n;

    // RMS
    let rms = (data.iter().map(|&x| x * x).sum::<f64>() / n).sqrt();

    // Standard deviation
    let variance = data.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    // Min/Max
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let peak_to_peak = max - min;

    Stats { mean, rms, std_dev, min, max, peak_to_peak }
}

/// Axis samples converted from milli-g to g
fn axes_g(run: &DecodedRun) -> [(&'static str, Vec<f64>); 3] {
    let to_g = |mg: &[i16]| mg.iter().map(|&v| f64::from(v) / 1000.0).collect::<Vec<f64>>();
    [
        ("X", to_g(run.burst.accel_x_mg())),
        ("Y", to_g(run.burst.accel_y_mg())),
        ("Z", to_g(run.burst.accel_z_mg())),
    ]
}

fn run_statistics_analysis(output: &mut dyn Write, run: &DecodedRun) -> io::Result<()> {
    writeln!(output)?;
    writeln!(output, "Accelerometer Statistics (g):")?;
    writeln!(output, "{:-<80}", "")?;
    writeln!(output, "{:<10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "Axis", "Mean", "RMS", "Std Dev", "Min", "Max", "Peak-Peak")?;
    writeln!(output, "{:-<80}", "")?;

    for (axis, data) in axes_g(run) {
        write_stats_row(output, axis, &compute_stats(&data))?;
    }

    let magnitude: Vec<f64> = (0..run.burst.len())
        .filter_map(|i| run.burst.sample_mps2(i))
        .map(|(x, y, z)| (x * x + y * y + z * z).sqrt() / STANDARD_GRAVITY)
        .collect();
    write_stats_row(output, "|a|", &compute_stats(&magnitude))?;

    Ok(())
}

fn write_stats_row(output: &mut dyn Write, axis: &str, stats: &Stats) -> io::Result<()> {
    writeln!(output, "{:<10} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
        axis, stats.mean, stats.rms, stats.std_dev, stats.min, stats.max, stats.peak_to_peak)
}

// ============================================================================
// FFT ANALYSIS
// ============================================================================

struct FrequencyPeak {
    frequency: f64,
    magnitude: f64,
}

fn apply_hann_window(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    data.iter()
        .enumerate()
        .map(|(i, &x)| {
            let window = 0.5 * (1.0 - ((2.0 * PI * i as f64) / (n as f64 - 1.0)).cos());
            x * window
        })
        .collect()
}

/// Largest power of two not above `n`
fn window_size_for(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    1 << (usize::BITS - 1 - n.leading_zeros())
}

fn analyze_frequencies(data: &[f64], sample_rate: f64, window_size: usize) -> Vec<FrequencyPeak> {
    if window_size < 8 || data.len() < window_size {
        return Vec::new();
    }

    // Remove the static (gravity) component, then apply the Hann window
    let segment = &data[..window_size];
    let mean = segment.iter().sum::<f64>() / window_size as f64;
    let centered: Vec<f64> = segment.iter().map(|&x| x - mean).collect();
    let windowed = apply_hann_window(&centered);

    // Convert to complex numbers
    let mut buffer: Vec<Complex<f64>> = windowed.iter()
        .map(|&x| Complex::new(x, 0.0))
        .collect();

    // Perform FFT
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(window_size);
    fft.process(&mut buffer);

    // Compute magnitude spectrum (only first half, as second half is mirror)
    let magnitudes: Vec<f64> = buffer.iter()
        .take(window_size / 2)
        .map(|c| c.norm() / (window_size as f64))
        .collect();

    // Find peaks (local maxima above threshold)
    let threshold = magnitudes.iter().copied().fold(0.0, f64::max) * 0.1; // 10% of max
    let mut peaks: Vec<FrequencyPeak> = Vec::new();

    for i in 1..magnitudes.len() - 1 {
        if magnitudes[i] > threshold
            && magnitudes[i] > magnitudes[i - 1]
            && magnitudes[i] > magnitudes[i + 1] {
            let frequency = (i as f64 * sample_rate) / window_size as f64;
            peaks.push(FrequencyPeak {
                frequency,
                magnitude: magnitudes[i],
            });
        }
    }

    // Sort by magnitude (descending)
    peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));

    peaks
}

fn run_fft_analysis(output: &mut dyn Write, run: &DecodedRun) -> io::Result<()> {
    // Measured rate, not the nominal one: late samples stretch the spectrum
    let sample_rate = 1e6 / mean_interval_us(run);
    let window_size = window_size_for(run.burst.len());

    writeln!(output)?;
    writeln!(output, "FFT Parameters:")?;
    writeln!(output, "  Window size: {} samples", window_size)?;
    writeln!(output, "  Window type: Hann")?;
    writeln!(output, "  Sample rate (measured): {:.1} Hz", sample_rate)?;
    if window_size > 0 {
        writeln!(output, "  Frequency resolution: {:.2} Hz", sample_rate / window_size as f64)?;
    }
    writeln!(output, "  Max frequency: {:.1} Hz", sample_rate / 2.0)?;
    writeln!(output)?;

    if window_size < 8 {
        writeln!(output, "Warning: Insufficient samples for FFT (have {})", run.burst.len())?;
        return Ok(());
    }

    writeln!(output, "Accelerometer Frequency Analysis:")?;
    writeln!(output, "{:-<80}", "")?;
    for (axis, data) in axes_g(run) {
        analyze_and_print_peaks(output, &format!("Accel {}", axis), &data, sample_rate, window_size)?;
    }

    Ok(())
}

fn analyze_and_print_peaks(
    output: &mut dyn Write,
    label: &str,
    data: &[f64],
    sample_rate: f64,
    window_size: usize,
) -> io::Result<()> {
    let peaks = analyze_frequencies(data, sample_rate, window_size);

    writeln!(output, "\n{} - Top 5 Frequency Peaks:", label)?;
    if peaks.is_empty() {
        writeln!(output, "  No significant peaks detected")?;
    } else {
        for (i, peak) in peaks.iter().take(5).enumerate() {
            writeln!(output, "  {}. {:.2} Hz (magnitude: {:.4} g)",
                i + 1, peak.frequency, peak.magnitude)?;
        }
    }

    Ok(())
}
