// pp-monitor
//
// Live per-channel meters, windowed statistics, energy and a scrollable
// text oscilloscope for a multi-channel power monitor.
//
// Quit:  q / Esc / Ctrl-C

use chrono::{DateTime, Local};
use crossbeam::channel;
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, event, style, terminal, ExecutableCommand, QueueableCommand};
use propower::data::{
    format_reading, Channel, ClearTarget, StatsResult, Trace, TraceSelection, Viewport,
    ViewportResult,
};
use propower::{ConnectionParams, Engine, Event};
use propower_tools::{
    auto_detect_port, engine_config, pp_opts, pp_parseopts, print_ports, window_duration,
};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::{Duration, SystemTime};

#[derive(Debug)]
struct Cli {
    fps: u64,
    window: Duration,
    scope_rows: usize,
    event_log_size: usize,
    quiet: bool,
}

fn print_help(opts: &getopts::Options, program: &str) {
    let brief = format!(
        "Usage: {program} [options] [url]\n\n\
         Live meters, statistics and scope for a multi-channel power monitor."
    );
    eprintln!("{}", opts.usage(&brief));
}

fn setup_logging(path: Option<String>) -> io::Result<()> {
    // The terminal belongs to the UI, so log records only go to a file.
    if let Some(path) = path {
        let file = std::fs::File::create(path)?;
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    }
    Ok(())
}

fn parse_cli() -> Result<Option<(Option<String>, propower::Config, Cli)>, String> {
    let mut opts = pp_opts();
    opts.optopt("", "fps", "UI refresh rate (default 30)", "n");
    opts.optopt("w", "window", "Statistics window in seconds (default 10)", "sec");
    opts.optopt("", "scope-rows", "Height of the scope (default 12)", "n");
    opts.optopt(
        "",
        "event-log-size",
        "Max events to show in log (default 6)",
        "n",
    );
    opts.optopt("", "log", "Write diagnostic log records to this file", "path");
    opts.optflag("", "quiet", "Suppress footer hint");

    let args: Vec<String> = std::env::args().collect();
    let parsed = pp_parseopts(&opts, &args)?;
    let matches = &parsed.matches;
    if matches.opt_present("help") {
        print_help(&opts, args.first().map(String::as_str).unwrap_or("pp-monitor"));
        return Ok(None);
    }
    if matches.opt_present("l") {
        print_ports().map_err(|e| e.to_string())?;
        return Ok(None);
    }
    setup_logging(matches.opt_str("log")).map_err(|e| format!("cannot open log file: {}", e))?;

    let fps = matches
        .opt_str("fps")
        .and_then(|s| s.parse().ok())
        .or(parsed.config.fps)
        .unwrap_or(30);
    let window_s = match matches.opt_str("w") {
        Some(w) => w.parse::<f64>().map_err(|_| format!("Invalid window: {}", w))?,
        None => parsed.config.window_secs.unwrap_or(10.0),
    };
    let window = window_duration(window_s)?;
    let scope_rows = matches
        .opt_str("scope-rows")
        .and_then(|s| s.parse().ok())
        .unwrap_or(12usize)
        .max(3);
    let event_log_size = matches
        .opt_str("event-log-size")
        .and_then(|s| s.parse().ok())
        .unwrap_or(6);

    Ok(Some((
        parsed.url,
        engine_config(&parsed.config),
        Cli {
            fps,
            window,
            scope_rows,
            event_log_size,
            quiet: matches.opt_present("quiet"),
        },
    )))
}

#[derive(Clone)]
struct LoggedEvent {
    timestamp: SystemTime,
    event: String,
    color: Color,
}

struct EventLog {
    entries: VecDeque<LoggedEvent>,
    size: usize,
}

impl EventLog {
    fn push(&mut self, event: String, color: Color) {
        self.entries.push_front(LoggedEvent {
            timestamp: SystemTime::now(),
            event,
            color,
        });
        self.entries.truncate(self.size);
    }
}

fn event_color(event: &Event) -> Color {
    match event {
        Event::Status(text) if text.starts_with("ERR") => Color::Red,
        Event::Status(_) => Color::White,
        Event::Connected(_) => Color::Green,
        Event::Disconnected => Color::Yellow,
        Event::ConnectFailed { .. } | Event::TransportError(_) | Event::SamplesDropped(_) => {
            Color::Red
        }
    }
}

struct View {
    channel: Channel,
    viewport: Viewport,
    traces: TraceSelection,
}

fn trace_style(trace: Trace) -> (char, Color) {
    match trace {
        Trace::Voltage => ('v', Color::Yellow),
        Trace::Current => ('i', Color::Cyan),
        Trace::Power => ('p', Color::Magenta),
    }
}

/// Rasterizes the projection into `rows` lines of cells.
fn rasterize(view: &ViewportResult, width: usize, rows: usize) -> Vec<Vec<Option<Trace>>> {
    let mut grid = vec![vec![None; width]; rows];
    for proj in &view.traces {
        let lower = if proj.points.iter().any(|p| p.value < 0.0) {
            -proj.scale
        } else {
            0.0
        };
        let span = proj.scale - lower;
        for point in &proj.points {
            let frac = ((proj.scale - point.value) / span).clamp(0.0, 1.0);
            let row = (frac * (rows - 1) as f64).round() as usize;
            let col = point.x as usize;
            if col < width {
                grid[row][col] = Some(proj.trace);
            }
        }
    }
    grid
}

struct Tui {
    stdout: io::Stdout,
}

impl Tui {
    fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        Ok(Self { stdout })
    }

    fn teardown(&mut self) {
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        let _ = self.stdout.flush();
    }

    fn draw_channel_row(
        &mut self,
        channel: Channel,
        stats: &StatsResult,
        selected: bool,
        latest: Option<[f64; 3]>,
    ) -> io::Result<()> {
        let power = stats.power.as_ref();
        let row = format!(
            "{} {:<4} {:>9} {:>10} {:>10}  {:>10} {:>10} {:>10} {:>10}  {:>12} {:>6}",
            if selected { ">" } else { " " },
            channel.to_string(),
            format_reading(latest.map(|l| l[0]), 3),
            format_reading(latest.map(|l| l[1]), 2),
            format_reading(latest.map(|l| l[2]), 2),
            format_reading(power.map(|s| s.min), 2),
            format_reading(power.map(|s| s.max), 2),
            format_reading(power.map(|s| s.avg), 2),
            format_reading(stats.current.as_ref().map(|s| s.rms), 2),
            format_reading(Some(stats.energy_mwh).filter(|_| stats.count > 0), 5),
            stats.count,
        );
        let color = if stats.count == 0 {
            Color::DarkGrey
        } else if selected {
            Color::Green
        } else {
            Color::White
        };
        self.stdout.queue(SetForegroundColor(color))?;
        self.stdout.queue(style::Print(row))?;
        self.stdout.queue(ResetColor)?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;
        Ok(())
    }

    fn draw(
        &mut self,
        header: &str,
        engine: &Engine,
        view: &View,
        cli: &Cli,
        event_log: &EventLog,
    ) -> io::Result<()> {
        let (cols, _) = terminal::size().unwrap_or((100, 40));
        let width = (cols as usize).saturating_sub(1).max(10);
        let window = cli.window;

        self.stdout.queue(cursor::MoveTo(0, 0))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::All))?;

        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.stdout.queue(style::Print(header))?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(cursor::MoveToNextLine(2))?;

        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.stdout.queue(style::Print(format!(
            "  {:<4} {:>9} {:>10} {:>10}  {:>10} {:>10} {:>10} {:>10}  {:>12} {:>6}",
            "ch", "V", "mA", "mW", "min mW", "max mW", "avg mW", "rms mA", "energy mWh", "n"
        )))?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;

        for channel in Channel::all() {
            let latest = engine
                .channel_snapshot(channel)
                .latest()
                .map(|s| [s.voltage, s.current, s.power]);
            let stats = engine.stats(channel, window);
            self.draw_channel_row(channel, &stats, channel == view.channel, latest)?;
        }

        // Scope
        let projection =
            engine.project_with(view.channel, &view.viewport.request(width, view.traces));
        self.stdout.queue(cursor::MoveToNextLine(1))?;
        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.stdout.queue(style::Print(format!(
            "{} scope  zoom x{:.2}  offset {}",
            view.channel,
            view.viewport.zoom.value(),
            view.viewport.offset
        )))?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        for proj in &projection.traces {
            let (mark, color) = trace_style(proj.trace);
            self.stdout.queue(SetForegroundColor(color))?;
            self.stdout.queue(style::Print(format!(
                "  {}={} full scale {:.3} {}",
                mark,
                proj.trace,
                proj.scale,
                proj.trace.unit()
            )))?;
            self.stdout.queue(ResetColor)?;
        }
        self.stdout.queue(cursor::MoveToNextLine(1))?;

        for row in rasterize(&projection, width, cli.scope_rows) {
            for cell in row {
                match cell {
                    Some(trace) => {
                        let (mark, color) = trace_style(trace);
                        self.stdout.queue(SetForegroundColor(color))?;
                        self.stdout.queue(style::Print(mark))?;
                    }
                    None => {
                        self.stdout.queue(SetForegroundColor(Color::DarkGrey))?;
                        self.stdout.queue(style::Print('·'))?;
                    }
                }
            }
            self.stdout.queue(ResetColor)?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }

        if !event_log.entries.is_empty() {
            self.stdout.queue(cursor::MoveToNextLine(1))?;
            self.stdout.queue(SetAttribute(Attribute::Bold))?;
            self.stdout.queue(style::Print("Recent Events:"))?;
            self.stdout.queue(SetAttribute(Attribute::Reset))?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
            for logged in &event_log.entries {
                let datetime: DateTime<Local> = logged.timestamp.into();
                self.stdout.queue(SetForegroundColor(logged.color))?;
                self.stdout.queue(style::Print(format!(
                    "[{}] {}",
                    datetime.format("%H:%M:%S%.3f"),
                    logged.event
                )))?;
                self.stdout.queue(ResetColor)?;
                self.stdout.queue(cursor::MoveToNextLine(1))?;
            }
        }

        if !cli.quiet {
            self.stdout.queue(cursor::MoveToNextLine(1))?;
            self.stdout.queue(style::Print(
                "1-6 channel  +/- zoom  ←/→ scroll  Home reset  v/i/p traces  c/C clear  o/x open/close  q quit",
            ))?;
        }

        self.stdout.flush()
    }
}

fn open(engine: &Engine, url: &mut Option<String>, log: &mut EventLog) {
    if url.is_none() {
        match auto_detect_port() {
            Ok(found) => *url = Some(found),
            Err(e) => {
                log.push(e.to_string(), Color::Red);
                return;
            }
        }
    }
    if let Some(url) = url {
        engine.open_connection(ConnectionParams::new(url.clone()));
    }
}

/// Applies one key press. Returns true when the user asked to quit.
fn handle_key(
    key: event::KeyEvent,
    engine: &mut Engine,
    view: &mut View,
    url: &mut Option<String>,
    event_log: &mut EventLog,
) -> bool {
    use event::{KeyCode, KeyEventKind, KeyModifiers};
    if key.kind == KeyEventKind::Release {
        return false;
    }
    let history = engine.channel_snapshot(view.channel).len();
    let step = ((100.0 / view.viewport.zoom.value()) as usize).max(1);
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Char(d @ '1'..='6') => {
            if let Some(ch) = d.to_digit(10).and_then(|n| Channel::new(n as u8)) {
                view.channel = ch;
                view.viewport.offset = 0;
            }
        }
        KeyCode::Char('+') | KeyCode::Char('=') => view.viewport.zoom_in(),
        KeyCode::Char('-') => view.viewport.zoom_out(),
        KeyCode::Left => view.viewport.scroll_back(step, history),
        KeyCode::Right => view.viewport.scroll_forward(step),
        KeyCode::Home => view.viewport.reset(),
        KeyCode::Char('v') => view.traces.toggle(Trace::Voltage),
        KeyCode::Char('i') => view.traces.toggle(Trace::Current),
        KeyCode::Char('p') => view.traces.toggle(Trace::Power),
        KeyCode::Char('c') => {
            engine.clear(ClearTarget::Channel(view.channel));
            view.viewport.offset = 0;
            event_log.push(format!("{} cleared", view.channel), Color::Blue);
        }
        KeyCode::Char('C') => {
            engine.clear(ClearTarget::All);
            view.viewport.offset = 0;
            event_log.push("all channels cleared".to_string(), Color::Blue);
        }
        KeyCode::Char('o') => open(engine, url, event_log),
        KeyCode::Char('x') => engine.close_connection(),
        _ => {}
    }
    false
}

fn main() -> ExitCode {
    let (mut url, config, cli) = match parse_cli() {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new(config);
    let mut event_log = EventLog {
        entries: VecDeque::new(),
        size: cli.event_log_size,
    };
    let mut view = View {
        channel: Channel::FIRST,
        viewport: Viewport::default(),
        traces: TraceSelection::default(),
    };
    open(&engine, &mut url, &mut event_log);

    let mut tui = match Tui::setup() {
        Ok(tui) => tui,
        Err(e) => {
            eprintln!("ERROR: terminal setup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let mut t = Tui {
            stdout: io::stdout(),
        };
        t.teardown();
        original_hook(panic_info);
    }));

    // Keyboard handler
    let (key_tx, key_rx) = channel::unbounded();
    std::thread::spawn(move || loop {
        if let Ok(ev) = event::read() {
            if key_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let frame = Duration::from_millis(1000 / cli.fps.clamp(1, 120));
    let tick = channel::tick(frame);
    'main: loop {
        crossbeam::select! {
            recv(key_rx) -> ev => {
                if let Ok(event::Event::Key(key)) = ev {
                    if handle_key(key, &mut engine, &mut view, &mut url, &mut event_log) {
                        break 'main;
                    }
                }
            }

            recv(tick) -> _ => {
                for event in engine.process() {
                    let color = event_color(&event);
                    event_log.push(event.to_string(), color);
                }

                let header = format!(
                    "pp-monitor - {} [{}]  window={}s  fps={}  up {}s",
                    url.as_deref().unwrap_or("no instrument"),
                    if engine.is_connected() { "connected" } else { "closed" },
                    cli.window.as_secs_f64(),
                    cli.fps,
                    engine.uptime().as_secs()
                );
                if tui.draw(&header, &engine, &view, &cli, &event_log).is_err() {
                    break 'main;
                }
            }
        }
    }

    tui.teardown();
    ExitCode::SUCCESS
}
