use std::{io, net::TcpStream, sync::Arc, thread};

use parley_client::{ClientApp, Console, ConsoleError, CtrlCCounter, Flow, KeyMap, RawStdin};
use parley_utils::{Color, paint, parse_args};
use parley_wire::{BufferedStream, ServerFrame};

/// Oldest submitted lines fall out past this.
const HISTORY_MAX: usize = 1000;

fn main() {
    let args = parse_args(std::env::args().skip(1));
    let host = args.string_or("host", "localhost");
    let port: u16 = match args.parse_or("port", 50600) {
        Ok(port) => port,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let sock = match TcpStream::connect((host.as_str(), port)) {
        Ok(sock) => sock,
        Err(err) => {
            eprintln!("Server not up at {host}:{port} cause: {err}");
            std::process::exit(1);
        }
    };
    let reader_sock = sock.try_clone().expect("couldn't clone the socket");

    let keys = match RawStdin::new() {
        Ok(keys) => keys,
        Err(err) => {
            eprintln!("couldn't set up the terminal: {err}");
            std::process::exit(1);
        }
    };
    let console = Arc::new(Console::new(
        Box::new(io::stdout()),
        Box::new(keys),
        KeyMap::universal(),
    ));
    console.write(&format!("connected to {host}:{port}"));

    let app = Arc::new(ClientApp::new(Arc::clone(&console), sock));

    // Network reader: frames in, display updates out. A protocol error or a
    // closed socket ends the client with one visible line (an unframed
    // SERVER_FULL rejection lands here too).
    {
        let app = Arc::clone(&app);
        let console = Arc::clone(&console);
        thread::spawn(move || {
            let mut stream = BufferedStream::new(reader_sock);
            loop {
                match ServerFrame::decode(&mut stream) {
                    Ok(frame) => app.handle_frame(&frame),
                    Err(err) => {
                        console.write(&paint(&format!("connection lost: {err}"), Color::Red));
                        let _ = crossterm::terminal::disable_raw_mode();
                        std::process::exit(1);
                    }
                }
            }
        });
    }

    let mut strikes = CtrlCCounter::new();
    let mut history: Vec<String> = Vec::new();
    loop {
        match console.input(None, None, history.clone()) {
            Ok(line) => {
                strikes.submitted();
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    history.push(trimmed.to_string());
                    if history.len() > HISTORY_MAX {
                        history.remove(0);
                    }
                }
                if app.handle_line(&line) == Flow::Exit {
                    break;
                }
            }
            Err(ConsoleError::Interrupted) => {
                if strikes.interrupted() {
                    break;
                }
            }
            Err(err) => console.write(&paint(&format!("input error: {err}"), Color::Red)),
        }
    }

    let _ = crossterm::terminal::disable_raw_mode();
}
