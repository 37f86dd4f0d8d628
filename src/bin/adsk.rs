/// Interactive console for Apple II disk images and archives

use applefs::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "blocks", "cat", "delete", "dir", "enter", "exit", "export", "fs-switch", "help",
                "hex", "info", "list", "ls", "map", "open", "quit", "read", "save", "text", "tree",
                "up",
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
        // Only complete the command name
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
fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".adsk_history");
        p
    })
}

/// What the console has open
#[derive(Default)]
struct Session {
    /// Every file system detected in the opened image
    results: Vec<AppleFileSystem>,
    /// Index into `results`
    selected: usize,
    /// Embedded file systems entered with `enter`, innermost last
    nested: Vec<AppleFileSystem>,
}

impl Session {
    fn current(&self) -> Option<&AppleFileSystem> {
        self.nested.last().or_else(|| self.results.get(self.selected))
    }

    fn current_mut(&mut self) -> Option<&mut AppleFileSystem> {
        match self.nested.last_mut() {
            Some(fs) => Some(fs),
            None => self.results.get_mut(self.selected),
        }
    }
}

fn main() {
    env_logger::init();

    println!("=== adsk ===");
    println!("Interactive console for Apple II disk images and archives.");
    println!("Type 'help' for available commands\n");

    let mut rl = match Editor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error: cannot start line editor: {}", e);
            return;
        }
    };
    rl.set_helper(Some(CommandCompleter::new()));

    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    let detector = FormatDetector::new();
    let mut session = Session::default();

    if let Some(path) = std::env::args().nth(1) {
        open_image(&detector, &mut session, &path);
    }

    loop {
        let readline = rl.readline("> ");
        let input = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                if let Some(history_path) = history_path() {
                    let _ = rl.save_history(&history_path);
                }
                println!("Goodbye!");
                break;
            }
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

        match command.as_str() {
            "help" => print_help(),
            "quit" | "exit" => {
                if let Some(history_path) = history_path() {
                    let _ = rl.save_history(&history_path);
                }
                println!("Goodbye!");
                break;
            }
            "open" | "load" => {
                if parts.len() < 2 {
                    println!("Usage: open <path>");
                    continue;
                }
                open_image(&detector, &mut session, &parts[1]);
            }
            "fs-switch" => {
                if session.results.is_empty() {
                    println!("No image loaded. Use 'open <path>' first.");
                    continue;
                }
                if parts.len() < 2 {
                    list_results(&session);
                    continue;
                }
                match parts[1].parse::<usize>() {
                    Ok(n) if n >= 1 && n <= session.results.len() => {
                        session.selected = n - 1;
                        session.nested.clear();
                        println!("Switched to {}", session.results[n - 1].fs_type());
                    }
                    _ => println!("Choose 1 to {}", session.results.len()),
                }
            }
            "info" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                print_info(fs);
            }
            "cat" | "dir" | "ls" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                print!("{}", catalog::catalog(fs));
            }
            "tree" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                print!("{}", catalog::tree(fs));
            }
            "read" | "hex" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                if parts.len() < 2 {
                    println!("Usage: read <file> [max_bytes]");
                    continue;
                }
                let max_bytes = parts
                    .get(2)
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(1024);
                match fs.read_file(&parts[1]) {
                    Ok(data) => {
                        println!("{} ({} bytes):", parts[1], data.len());
                        print_hex_dump(&data, max_bytes);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "list" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                if parts.len() < 2 {
                    println!("Usage: list <file>");
                    continue;
                }
                let Some(file) = fs.find_file(&parts[1]) else {
                    println!("Error: {}", FsError::FileNotFound(parts[1].clone()));
                    continue;
                };
                match applesoft::list_file(fs, file) {
                    Ok(Some(listing)) => print!("{}", listing),
                    Ok(None) => println!("{} is not an Applesoft program", file.name),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "text" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                if parts.len() < 2 {
                    println!("Usage: text <file>");
                    continue;
                }
                match fs.find_file(&parts[1]) {
                    Some(file) => print_text(fs, file),
                    None => println!("Error: {}", FsError::FileNotFound(parts[1].clone())),
                }
            }
            "export" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                if parts.len() < 2 {
                    println!("Usage: export <file> [output_path]");
                    continue;
                }
                let output = parts.get(2).cloned().unwrap_or_else(|| {
                    parts[1].rsplit('/').next().unwrap_or(&parts[1]).to_string()
                });
                match fs.read_file(&parts[1]) {
                    Ok(data) => match std::fs::write(&output, &data) {
                        Ok(()) => println!("Exported {} bytes to {}", data.len(), output),
                        Err(e) => println!("Error: {}", e),
                    },
                    Err(e) => println!("Error: {}", e),
                }
            }
            "map" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                let color = parts.get(1).map_or(true, |arg| arg != "plain");
                print!("{}", catalog::block_map(fs.reader(), color));
                let usage = catalog::block_usage(fs.reader());
                println!(
                    "\n{} free, {} orphan, {} file system, {} file",
                    usage.empty, usage.orphan, usage.fs_data, usage.file_data
                );
            }
            "blocks" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                print!("{}", catalog::block_list(fs.reader()));
            }
            "enter" => {
                let Some(fs) = loaded(session.current()) else {
                    continue;
                };
                if parts.len() < 2 {
                    println!("Usage: enter <file>");
                    continue;
                }
                let inner = match fs.find_file(&parts[1]) {
                    Some(file) => file.file_systems.first().cloned(),
                    None => {
                        println!("Error: {}", FsError::FileNotFound(parts[1].clone()));
                        continue;
                    }
                };
                match inner {
                    Some(inner) => {
                        println!("Entered {} ({})", inner.name(), inner.fs_type());
                        session.nested.push(inner);
                    }
                    None => println!("{} holds no file system", parts[1]),
                }
            }
            "up" => {
                if session.nested.pop().is_none() {
                    println!("Already at the top level.");
                }
            }
            "delete" => {
                let Some(fs) = loaded(session.current_mut()) else {
                    continue;
                };
                if parts.len() < 2 {
                    println!("Usage: delete <file>");
                    continue;
                }
                match fs.delete_file(&parts[1]) {
                    Ok(()) => println!("Deleted {} (use 'save' to write the image)", parts[1]),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "save" => {
                let Some(fs) = loaded(session.current_mut()) else {
                    continue;
                };
                if parts.len() < 2 {
                    println!("Usage: save <path>");
                    continue;
                }
                let written = fs.flush();
                let data = fs.reader().disk().as_slice();
                match std::fs::write(&parts[1], data) {
                    Ok(()) => {
                        println!(
                            "Saved {} bytes to {} ({} blocks updated)",
                            data.len(),
                            parts[1],
                            written
                        );
                        if let Some(wrapper) = fs.wrapper() {
                            println!("Note: the {} header is not included", wrapper);
                        }
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            _ => {
                println!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    command
                );
            }
        }
    }
}

/// The open file system, or a hint when nothing is loaded
fn loaded<T>(fs: Option<T>) -> Option<T> {
    if fs.is_none() {
        println!("No image loaded. Use 'open <path>' first.");
    }
    fs
}

fn open_image(detector: &FormatDetector, session: &mut Session, path: &str) {
    match detector.open(path) {
        Ok(results) if results.is_empty() => {
            println!("No file system recognised in {}", path);
        }
        Ok(results) => {
            // Prefer the reading that accounts for the most catalog blocks
            let best = results
                .iter()
                .enumerate()
                .max_by_key(|(_, fs)| fs.total_catalog_blocks())
                .map_or(0, |(i, _)| i);
            session.results = results;
            session.selected = best;
            session.nested.clear();
            println!("Opened: {}", path);
            if session.results.len() > 1 {
                list_results(session);
            } else if let Some(fs) = session.current() {
                println!("{}", fs.fs_type());
            }
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn list_results(session: &Session) {
    for (i, fs) in session.results.iter().enumerate() {
        let marker = if i == session.selected { '*' } else { ' ' };
        println!(
            "{} {}: {} ({} catalog blocks)",
            marker,
            i + 1,
            fs.fs_type(),
            fs.total_catalog_blocks()
        );
    }
}

fn print_info(fs: &AppleFileSystem) {
    let info = fs.info();
    println!("Name: {}", fs.name());
    println!("Format: {}", info.fs_type);
    if let Some(wrapper) = fs.wrapper() {
        println!("Wrapper: {}", wrapper);
    }
    if let Some(volume) = &info.volume_name {
        println!("Volume: {}", volume);
    }
    println!("Block size: {} bytes", info.block_size);
    println!("Total blocks: {}", info.total_blocks);
    if info.fs_type.is_disk() {
        println!(
            "Total capacity: {} KB",
            info.total_blocks * info.block_size / 1024
        );
        println!("Free blocks: {}", info.free_blocks);
        println!("Free space: {} KB", info.free_blocks * info.block_size / 1024);
    }
    println!("Catalog blocks: {}", info.catalog_blocks);
    println!("Entries: {}", info.files);
    let params = fs.reader().params();
    println!("Interleave: {}", params.interleave);
    if !fs.anomalies().is_empty() {
        println!("Anomalies: {}", fs.anomalies().len());
    }
}

fn print_text(fs: &AppleFileSystem, file: &AppleFile) {
    let Some(layout) = &file.text else {
        match fs.read_entry(file) {
            Ok(data) => println!("{}", apple_text(&data)),
            Err(e) => println!("Error: {}", e),
        }
        return;
    };

    if !layout.random_access {
        let data = file.file_buffer(fs.reader());
        println!("{}", apple_text(&data.as_slice()[..layout.eof.min(data.len())]));
        return;
    }

    let record_length = layout.record_length.unwrap_or(0);
    println!(
        "Random-access text, record length {}, {} runs",
        record_length,
        layout.text_blocks.len()
    );
    let data = file.raw_file_buffer(fs.reader());
    for run in &layout.text_blocks {
        for record in &run.records {
            let end = (record.offset + record.length).min(data.len());
            let text = data
                .as_slice()
                .get(record.offset..end)
                .map(apple_text)
                .unwrap_or_default();
            println!("{:>6}: {}", record.number, text);
        }
    }
}

/// Apple text with the high bit stripped and carriage returns as newlines
fn apple_text(data: &[u8]) -> String {
    data.iter()
        .map(|&b| match b & 0x7F {
            0x0D => '\n',
            c if c >= 0x20 => c as char,
            _ => '.',
        })
        .collect()
}

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

fn print_help() {
    println!("Available commands:");
    println!("  open <path>               - Open a disk image or archive");
    println!("                              (use quotes for paths with spaces)");
    println!("  fs-switch [n]             - List detected file systems or switch to one");
    println!("  info                      - Show file system information");
    println!("  cat, dir, ls              - Catalog with anomalies and failures");
    println!("  tree                      - Show every entry, including embedded file systems");
    println!("  read, hex <file> [max]    - Hex dump a file");
    println!("  list <file>               - List an Applesoft BASIC program");
    println!("  text <file>               - Show a text file, record by record if random access");
    println!("  export <file> [output]    - Export a file to the host file system");
    println!("  enter <file>              - Open the file system embedded in a file");
    println!("  up                        - Leave an embedded file system");
    println!("  map [plain]               - Show the block map");
    println!("  blocks                    - List labelled and owned blocks");
    println!("  delete <file>             - Delete a file (DOS, ProDOS and Pascal)");
    println!("  save <path>               - Write the image with pending changes");
    println!("  help                      - Show this help");
    println!("  quit, exit                - Exit");
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

        // Pad a short last line
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for &byte in chunk {
            let c = byte & 0x7F;
            print!("{}", if (32..127).contains(&c) { c as char } else { '.' });
        }
        println!("|");
    }

    if data.len() > max_bytes {
        println!("... ({} more bytes)", data.len() - max_bytes);
    }
}
