use std::{
    io::{Read, Write},
    net::TcpStream,
    thread,
    time::Duration,
};

use parley_utils::parse_args;
use parley_wire::{ClientFrame, Context};
use rand::Rng;
use rand::prelude::IndexedRandom;

/// Canned chatter for exercising a room.
const LINES: [&str; 12] = [
    "hi there, anyone around?",
    "nice to meet you",
    "how are you doing?",
    "not too bad over here",
    "what are you all working on?",
    "that sounds great",
    "can you explain that again?",
    "interesting, tell me more",
    "i have to head out soon",
    "good talk",
    "see you around",
    ":)",
];

fn send(sock: &mut TcpStream, content: &str) -> std::io::Result<()> {
    let frame = ClientFrame {
        target_ctx: Context::Group,
        target: "global".to_string(),
        content: content.to_string(),
    };
    let bytes = frame.encode().expect("encode");
    sock.write_all(&bytes)
}

fn main() {
    let args = parse_args(std::env::args().skip(1));
    let host = args.string_or("host", "localhost");
    let port: u16 = args.parse_or("port", 50600).unwrap_or_else(|err| {
        eprintln!("{err}");
        std::process::exit(2);
    });
    let timeout: f64 = args.parse_or("timeout", 1.2).unwrap_or_else(|err| {
        eprintln!("{err}");
        std::process::exit(2);
    });

    let mut sock = match TcpStream::connect((host.as_str(), port)) {
        Ok(sock) => sock,
        Err(err) => {
            eprintln!("Server not up at {host}:{port} cause: {err}");
            std::process::exit(1);
        }
    };

    // Drain whatever the server says so its send buffers never back up.
    {
        let mut drain = sock.try_clone().expect("couldn't clone the socket");
        thread::spawn(move || {
            let mut sink = [0u8; 4096];
            while matches!(drain.read(&mut sink), Ok(n) if n > 0) {}
        });
    }

    let name = format!("bot-{}", rand::rng().random_range(1..=9999));
    println!("joining {host}:{port} as {name}");
    if let Err(err) = send(&mut sock, &name) {
        eprintln!("couldn't pick a username: {err}");
        std::process::exit(1);
    }

    let mut rng = rand::rng();
    loop {
        thread::sleep(Duration::from_secs_f64(timeout));
        let line = LINES.choose(&mut rng).expect("non-empty line list");
        if let Err(err) = send(&mut sock, line) {
            eprintln!("server went away: {err}");
            break;
        }
    }
}
