//! pp-dump
//!
//! Prints decoded measurements from an instrument as they arrive, or replays
//! a captured text log through the engine and summarizes it per channel.

use propower::data::{format_reading, Channel, LineDecoder, Rejected, Trace};
use propower::link::{Port, RecvError};
use propower::{Engine, Event};
use propower_tools::{
    auto_detect_port, engine_config, pp_opts, pp_parseopts, print_ports, window_duration,
};
use std::env;
use std::process::ExitCode;
use std::time::{Duration, Instant};

macro_rules! log{
    ($tf:expr, $msg:expr)=>{
    {
        println!("{}{}", chrono::Local::now().format(&$tf), $msg);
    }
    };
    ($tf:expr, $f:expr,$($a:tt)*)=>{
    {
        log!($tf, format!($f, $($a)*));
    }
    };
}

fn replay(
    path: &str,
    config: propower::Config,
    period_ms: u64,
    window: Duration,
) -> Result<(), String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    let lines: Vec<&str> = text.lines().collect();

    // Keep the whole capture so the summary covers all of it.
    let config = propower::Config {
        buffer_capacity: config.buffer_capacity.max(lines.len()),
        ..config
    };
    let mut engine = Engine::new(config);
    let feeder = engine.feeder();

    let mut rejected = 0usize;
    for (i, chunk) in lines.chunks(1_000).enumerate() {
        for (j, line) in chunk.iter().enumerate() {
            let timestamp = (i * 1_000 + j) as u64 * period_ms;
            match feeder.feed_line_at(line, timestamp) {
                Ok(()) | Err(Rejected::Status(_)) => {}
                Err(_) => rejected += 1,
            }
        }
        for event in engine.process() {
            if let Event::Status(text) = event {
                println!("status: {}", text);
            }
        }
    }

    println!(
        "{} lines, {} rejected, {} ms per line",
        lines.len(),
        rejected,
        period_ms
    );
    println!(
        "{:<4} {:>7}  {:>10} {:>10} {:>10} {:>10}  {:>10} {:>10}  {:>12}",
        "ch", "n", "V avg", "mA avg", "mA rms", "mW avg", "mW min", "mW max", "energy mWh"
    );
    for channel in Channel::all() {
        let stats = engine.stats(channel, window);
        if stats.is_undefined() {
            continue;
        }
        let avg = |t: Trace| stats.summary(t).map(|s| s.avg);
        let power = stats.summary(Trace::Power);
        println!(
            "{:<4} {:>7}  {:>10} {:>10} {:>10} {:>10}  {:>10} {:>10}  {:>12}",
            channel.to_string(),
            stats.count,
            format_reading(avg(Trace::Voltage), 3),
            format_reading(avg(Trace::Current), 2),
            format_reading(stats.summary(Trace::Current).map(|s| s.rms), 2),
            format_reading(avg(Trace::Power), 2),
            format_reading(power.map(|s| s.min), 2),
            format_reading(power.map(|s| s.max), 2),
            format_reading(Some(stats.energy_mwh), 5),
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let mut opts = pp_opts();
    opts.optopt("f", "", "Replay a captured text file instead of reading a port", "path");
    opts.optopt("", "period", "Milliseconds between replayed lines (default 50)", "ms");
    opts.optopt("w", "", "Replay summary window in seconds (default: whole capture)", "sec");
    opts.optopt("t", "", "Timestamp format (default '%T%.3f ')", "fmt");
    opts.optflag("", "raw", "Also print lines that did not decode");

    let args: Vec<String> = env::args().collect();

    macro_rules! die{
        ($f:expr,$($a:tt)*)=>{
        {
            die!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            eprintln!("ERROR: {}", $msg);
            return ExitCode::FAILURE;
        }
        };
    }

    let parsed = match pp_parseopts(&opts, &args) {
        Ok(p) => p,
        Err(e) => die!("{}\n{}", e, opts.usage(&format!("Usage: {} [options] [url]", args[0]))),
    };
    let matches = &parsed.matches;
    if matches.opt_present("help") {
        println!("{}", opts.usage(&format!("Usage: {} [options] [url]", args[0])));
        return ExitCode::SUCCESS;
    }
    if matches.opt_present("l") {
        if let Err(e) = print_ports() {
            die!(e);
        }
        return ExitCode::SUCCESS;
    }
    let config = engine_config(&parsed.config);

    if let Some(path) = matches.opt_str("f") {
        let period = match matches.opt_str("period").map(|p| p.parse::<u64>()) {
            None => 50,
            Some(Ok(p)) => p,
            Some(Err(_)) => die!("Invalid period"),
        };
        let window = match matches.opt_str("w").map(|w| w.parse::<f64>()) {
            None => Duration::MAX,
            Some(Ok(w)) => match window_duration(w) {
                Ok(window) => window,
                Err(e) => die!(e),
            },
            Some(Err(_)) => die!("Invalid window"),
        };
        return match replay(&path, config, period, window) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => die!(e),
        };
    }

    let url = match parsed.url.clone() {
        Some(url) => url,
        None => match auto_detect_port() {
            Ok(url) => url,
            Err(e) => die!(e),
        },
    };
    let tf = matches.opt_str("t").unwrap_or("%T%.3f ".to_string());
    let raw = matches.opt_present("raw");
    let decoder = LineDecoder::new(config.status_prefixes.clone());

    let (tx, rx) = Port::rx_channel();
    let _port = match Port::new(&url, Port::rx_to_channel(tx)) {
        Ok(port) => port,
        Err(e) => die!("Failed to open {}: {}", url, e),
    };
    log!(tf, "Reading from {}", url);

    let start = Instant::now();
    for res in rx.iter() {
        let line = match res {
            Ok(line) => line,
            Err(RecvError::Disconnected) => die!("Instrument disconnected"),
            Err(e) => die!("Link error: {}", e),
        };
        let timestamp = start.elapsed().as_millis() as u64;
        match decoder.decode(&line, timestamp) {
            Ok(s) => log!(
                tf,
                "{} {:8.3} V {:10.3} mA {:10.3} mW",
                s.channel,
                s.voltage,
                s.current,
                s.power
            ),
            Err(Rejected::Status(text)) => log!(tf, "status: {}", text),
            Err(e) if raw => log!(tf, "{}: {:?}", e, line),
            Err(_) => {}
        }
    }
    ExitCode::SUCCESS
}
