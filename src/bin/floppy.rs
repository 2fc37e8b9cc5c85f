//! Interactive floppy subsystem console

use floppyemu::controller::i8271::{completion_type, REG_DRIVE_CONTROL_OUTPUT};
use floppyemu::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::path::PathBuf;

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "drives",
                "eject",
                "exit",
                "fdc-read",
                "fdc-seek",
                "formats",
                "help",
                "identify",
                "info",
                "map",
                "open",
                "quit",
                "read",
                "reset",
                "save",
                "sectors",
                "track",
            ],
        }
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only complete the first word (command name)
        let line_to_cursor = &line[..pos];
        if line_to_cursor.contains(' ') {
            return Ok((pos, vec![]));
        }

        let prefix = line_to_cursor.to_lowercase();
        let matches: Vec<Pair> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}
impl Validator for CommandCompleter {}
impl Helper for CommandCompleter {}

/// Get the path to the history file
fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".floppy_history");
        p
    })
}

/// Console state: the emulated subsystem plus where each image came from
struct Console {
    system: FloppySystem,
    registry: FormatRegistry,
    paths: Vec<Option<PathBuf>>,
}

impl Console {
    fn new() -> Self {
        let config = SystemConfig::default();
        let slots = config.drives.len();
        Self {
            system: FloppySystem::new(config),
            registry: FormatRegistry::standard(),
            paths: vec![None; slots],
        }
    }

    fn codec(&mut self, drive: usize) -> Option<&mut dyn ImageCodec> {
        let Some(d) = self.system.drive_mut(drive) else {
            println!("No drive {}.", drive);
            return None;
        };
        let Some(binding) = d.binding_mut() else {
            println!("No image in drive {}. Use 'open <path>' first.", drive);
            return None;
        };
        match binding.codec_mut() {
            Ok(codec) => Some(codec),
            Err(e) => {
                println!("Error: {}", e);
                None
            }
        }
    }
}

fn main() {
    env_logger::init();

    println!("=== Floppy ===");
    println!("Interactive console for disk images and the i8271 controller.");
    println!("Type 'help' for available commands\n");

    let mut rl: Editor<CommandCompleter, DefaultHistory> = match Editor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Failed to create editor: {}", e);
            return;
        }
    };
    rl.set_helper(Some(CommandCompleter::new()));

    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    let mut console = Console::new();

    loop {
        let input = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let parts = parse_command_line(input);
        if parts.is_empty() {
            continue;
        }
        let command = parts[0].to_lowercase();
        let args = &parts[1..];

        match command.as_str() {
            "help" => print_help(),
            "quit" | "exit" => break,
            "open" | "load" => cmd_open(&mut console, args),
            "eject" => cmd_eject(&mut console, args),
            "save" => cmd_save(&mut console, args),
            "drives" => list_drives(&console),
            "info" => {
                let drive = arg_or(args, 0, 0);
                if let Some(codec) = console.codec(drive) {
                    print_info(codec);
                }
            }
            "formats" => list_formats(&console.registry),
            "identify" => {
                if args.is_empty() {
                    println!("Usage: identify <path>");
                    continue;
                }
                identify(&console.registry, &args[0]);
            }
            "sectors" => {
                let track = arg_or(args, 0, 0u8);
                let side = arg_or(args, 1, 0u8);
                let drive = arg_or(args, 2, 0usize);
                if let Some(codec) = console.codec(drive) {
                    list_sectors(codec, track, side);
                }
            }
            "read" => {
                if args.len() < 3 {
                    println!("Usage: read <track> <side> <index> [drive]");
                    continue;
                }
                let track = arg_or(args, 0, 0u8);
                let side = arg_or(args, 1, 0u8);
                let index = arg_or(args, 2, 0usize);
                let drive = arg_or(args, 3, 0usize);
                if let Some(codec) = console.codec(drive) {
                    read_sector(codec, track, side, index);
                }
            }
            "track" => {
                let track = arg_or(args, 0, 0u8);
                let side = arg_or(args, 1, 0u8);
                let drive = arg_or(args, 2, 0usize);
                if let Some(codec) = console.codec(drive) {
                    match codec.read_track(track, side) {
                        Ok(data) => {
                            println!("Track {} side {} ({} bytes):", track, side, data.len());
                            print_hex_dump(&data, 512);
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                }
            }
            "map" => {
                let side = arg_or(args, 0, 0u8);
                let drive = arg_or(args, 1, 0usize);
                if let Some(codec) = console.codec(drive) {
                    print!("{}", render_sector_map(codec, side, true));
                }
            }
            "fdc-read" => {
                if args.len() < 2 {
                    println!("Usage: fdc-read <track> <sector> [drive]");
                    continue;
                }
                let track = arg_or(args, 0, 0u8);
                let sector = arg_or(args, 1, 0u8);
                let drive = arg_or(args, 2, 0usize);
                fdc_read(&mut console.system, drive, track, sector);
            }
            "fdc-seek" => {
                if args.is_empty() {
                    println!("Usage: fdc-seek <track> [drive]");
                    continue;
                }
                let track = arg_or(args, 0, 0u8);
                let drive = arg_or(args, 1, 0usize);
                fdc_seek(&mut console.system, drive, track);
            }
            "reset" => {
                console.system.reset();
                println!("Controller reset.");
            }
            _ => {
                println!("Unknown command: {}. Type 'help' for available commands.", command);
            }
        }
    }

    if let Some(history_path) = history_path() {
        let _ = rl.save_history(&history_path);
    }
    for drive in 0..console.paths.len() {
        if console.system.drive(drive).is_some_and(|d| d.binding().is_some_and(|b| b.is_modified())) {
            println!("Drive {} has unsaved changes; they are discarded.", drive);
        }
    }
    println!("Goodbye!");
}

/// Parse command line input, respecting quoted strings
fn parse_command_line(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Numeric argument in decimal or 0x hex, or a default
fn arg_or<T: TryFrom<u64> + Copy>(args: &[String], index: usize, default: T) -> T {
    args.get(index)
        .and_then(|s| parse_number(s))
        .and_then(|n| T::try_from(n).ok())
        .unwrap_or(default)
}

fn parse_number(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  open <path> [drive] [format]   - Mount an image (format skips identification)");
    println!("  eject [drive] [path]           - Unmount; a modified image is written to path");
    println!("  save <path> [drive]            - Write the mounted image in its own format");
    println!("  drives                         - List drive slots");
    println!("  info [drive]                   - Show image geometry");
    println!("  formats                        - List supported image formats");
    println!("  identify <path>                - Show which formats claim a file");
    println!("  sectors [track] [side] [drive] - List sector IDs on a track");
    println!("  read <t> <s> <index> [drive]   - Hex dump a sector by rotational index");
    println!("  track [track] [side] [drive]   - Hex dump a raw track");
    println!("  map [side] [drive]             - Visual sector map (white=ok, red=error, yellow=deleted)");
    println!("  fdc-read <t> <r> [drive]       - READ DATA through the i8271 register protocol");
    println!("  fdc-seek <track> [drive]       - SEEK through the i8271");
    println!("  reset                          - Reset the controller");
    println!("  help                           - Show this help");
    println!("  quit, exit                     - Exit");
}

fn cmd_open(console: &mut Console, args: &[String]) {
    if args.is_empty() {
        println!("Usage: open <path> [drive] [format]");
        return;
    }
    let path = PathBuf::from(&args[0]);
    let drive = arg_or(args, 1, 0usize);
    let opened = match args.get(2) {
        Some(format) => read_image_as(&path, &console.registry, format),
        None => read_image(&path, &console.registry),
    };
    let codec = match opened {
        Ok(codec) => codec,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    let name = codec.format_name();
    match console.system.insert(drive, codec) {
        Ok(displaced) => {
            if displaced.is_some() {
                println!("Previous image in drive {} had unsaved changes; discarded.", drive);
            }
            if let Some(slot) = console.paths.get_mut(drive) {
                *slot = Some(path.clone());
            }
            println!("Opened {} as {} in drive {}", path.display(), name, drive);
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_eject(console: &mut Console, args: &[String]) {
    let drive = arg_or(args, 0, 0usize);
    match console.system.eject(drive) {
        Ok(Some(bytes)) => match args.get(1) {
            Some(path) => match write_image(path, &bytes) {
                Ok(()) => println!("Ejected drive {}; wrote {} bytes to {}", drive, bytes.len(), path),
                Err(e) => println!("Error: {}", e),
            },
            None => println!("Ejected drive {}; unsaved changes discarded.", drive),
        },
        Ok(None) => println!("Ejected drive {}.", drive),
        Err(e) => println!("Error: {}", e),
    }
    if let Some(slot) = console.paths.get_mut(drive) {
        *slot = None;
    }
}

fn cmd_save(console: &mut Console, args: &[String]) {
    let drive = arg_or(args, 1, 0usize);
    let path = match args.first() {
        Some(path) => PathBuf::from(path),
        None => match console.paths.get(drive).cloned().flatten() {
            Some(path) => path,
            None => {
                println!("Usage: save <path> [drive]");
                return;
            }
        },
    };
    if let Some(codec) = console.codec(drive) {
        match save_image(&path, codec) {
            Ok(()) => println!("Saved drive {} to {}", drive, path.display()),
            Err(e) => println!("Error: {}", e),
        }
    }
}

fn list_drives(console: &Console) {
    println!(
        "{:<6} {:<8} {:<6} {:<6} {:<16} {:<10} {}",
        "Drive", "Type", "Track", "Sides", "Flags", "Format", "Image"
    );
    println!("{}", "-".repeat(72));
    for drive in console.system.drives().iter() {
        let format = drive
            .binding()
            .map_or("-", |b| b.codec().format_name());
        let path = console
            .paths
            .get(drive.id())
            .cloned()
            .flatten()
            .map_or_else(|| "-".to_string(), |p| p.display().to_string());
        println!(
            "{:<6} {:<8} {:<6} {:<6} {:<16} {:<10} {}",
            drive.id(),
            drive.config().drive_type.to_string(),
            drive.current_track(),
            drive.num_sides(),
            drive.flags().to_string(),
            format,
            path
        );
    }
}

fn print_info(codec: &mut dyn ImageCodec) {
    let geometry = codec.geometry();
    println!("Format: {}", codec.format_name());
    println!("Sides: {}", geometry.heads);
    println!("Tracks per side: {}", geometry.tracks);
    println!("Sectors on track 0: {}", geometry.sectors_per_track);
    println!("Sector size: {} bytes", geometry.sector_length);
    println!("First sector ID: {}", geometry.first_sector_id);
    println!("Writable: {}", if codec.is_writable() { "Yes" } else { "No" });
    println!("Changed: {}", if codec.is_modified() { "Yes" } else { "No" });
}

fn list_formats(registry: &FormatRegistry) {
    println!("{:<10} {:<20} {}", "Name", "Extensions", "Description");
    println!("{}", "-".repeat(72));
    for descriptor in registry.descriptors() {
        println!(
            "{:<10} {:<20} {}",
            descriptor.name,
            descriptor.extensions.join(","),
            descriptor.description
        );
    }
}

fn identify(registry: &FormatRegistry, path: &str) {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    let hits = registry.identify(&data);
    if hits.is_empty() {
        println!("No format recognises {} ({} bytes).", path, data.len());
        return;
    }
    for (descriptor, confidence) in hits {
        println!("{:<10} {:>3}%  {}", descriptor.name, confidence, descriptor.description);
    }
}

fn list_sectors(codec: &mut dyn ImageCodec, track: u8, side: u8) {
    let count = codec.sectors_per_track(track, side);
    if count == 0 {
        println!("Track {} side {} is unformatted or absent.", track, side);
        return;
    }
    println!(
        "{:<6} {:<6} {:<6} {:<6} {:<12} {:<10}",
        "Index", "C", "H", "R", "N (Size)", "Flags"
    );
    println!("{}", "-".repeat(52));
    for index in 0..count {
        match codec.indexed_sector_info(track, side, index) {
            Ok(info) => println!(
                "{:<6} {:<6} {:<6} {:<6} {:<12} {:<10}",
                index,
                info.id.track,
                info.id.side,
                info.id.sector,
                format!("{} ({})", info.id.size_code, info.id.size_bytes()),
                info.flags.to_string()
            ),
            Err(e) => println!("{:<6} Error: {}", index, e),
        }
    }
}

fn read_sector(codec: &mut dyn ImageCodec, track: u8, side: u8, index: usize) {
    let info = match codec.indexed_sector_info(track, side, index) {
        Ok(info) => info,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    let mut buf = vec![0u8; info.id.size_bytes()];
    match codec.read_indexed_sector(track, side, index, &mut buf) {
        Ok(()) => {
            println!(
                "Sector C{} H{} R{} ({} bytes, {}):",
                info.id.track,
                info.id.side,
                info.id.sector,
                buf.len(),
                info.flags
            );
            print_hex_dump(&buf, 256);
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn select_bits(drive: usize) -> u8 {
    if drive == 1 {
        0x80
    } else {
        0x40
    }
}

/// Issue a command and its parameters through the host registers
fn issue(system: &mut FloppySystem, command: u8, params: &[u8]) {
    system.write_register(0, command);
    for &p in params {
        system.write_register(1, p);
    }
}

fn fdc_read(system: &mut FloppySystem, drive: usize, track: u8, sector: u8) {
    let select = select_bits(drive);
    // load head, which starts the motor and makes a loaded drive ready
    issue(system, select | 0x3A, &[REG_DRIVE_CONTROL_OUTPUT, 0x08]);
    issue(system, select | 0x12, &[track, sector]);

    let start = system.now();
    let mut data = Vec::new();
    loop {
        let lines = system.run_until_request(system.now() + 1_000_000);
        if lines.drq {
            data.push(system.read_data());
        } else if lines.irq {
            break;
        } else {
            println!("Controller stalled after {} bytes.", data.len());
            return;
        }
    }
    let result = system.read_register(1);
    println!(
        "Result {:02X} (completion type {}), {} bytes in {} us",
        result,
        completion_type(result),
        data.len(),
        system.now() - start
    );
    if !data.is_empty() {
        print_hex_dump(&data, 256);
    }
}

fn fdc_seek(system: &mut FloppySystem, drive: usize, track: u8) {
    issue(system, select_bits(drive) | 0x29, &[track]);
    let lines = system.run_until_request(system.now() + 1_000_000);
    if !lines.irq {
        println!("Controller stalled.");
        return;
    }
    let result = system.read_register(1);
    match system.drive(drive) {
        Some(d) => println!("Result {:02X}, head at position {}", result, d.current_track()),
        None => println!("Result {:02X}", result),
    }
}

fn print_hex_dump(data: &[u8], max_bytes: usize) {
    let len = data.len().min(max_bytes);

    for (i, chunk) in data[..len].chunks(16).enumerate() {
        print!("{:04X}: ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02X} ", byte);
            if j == 7 {
                print!(" ");
            }
        }

        // Pad if less than 16 bytes
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            let c = if (32..127).contains(byte) {
                *byte as char
            } else {
                '.'
            };
            print!("{}", c);
        }
        println!("|");
    }

    if data.len() > max_bytes {
        println!("... ({} more bytes)", data.len() - max_bytes);
    }
}
