use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    thread,
    time::Duration,
};

use parley_server::{SERVER_FULL, Server, ServerConfig};
use parley_wire::{BufferedStream, ClientFrame, Context, ServerFrame};

/// Brings up a server on an ephemeral localhost port and leaves it serving
/// on a background thread for the rest of the test.
fn start_server() -> SocketAddr {
    let cfg = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        workers: 8,
        ..ServerConfig::default()
    };
    let server = Server::bind(&cfg).expect("couldn't bind test server");
    let addr = server.local_addr().expect("no local addr");
    thread::spawn(move || {
        let _ = server.serve();
    });
    addr
}

struct TestClient {
    writer: TcpStream,
    reader: BufferedStream<TcpStream>,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let writer = TcpStream::connect(addr).expect("connect");
        writer.set_read_timeout(Some(Duration::from_secs(5))).expect("read timeout");
        let reader = BufferedStream::new(writer.try_clone().expect("clone socket"));
        Self { writer, reader }
    }

    fn send(&mut self, target_ctx: Context, target: &str, content: &str) {
        let bytes = ClientFrame {
            target_ctx,
            target: target.to_string(),
            content: content.to_string(),
        }
        .encode()
        .expect("encode");
        self.writer.write_all(&bytes).expect("send");
    }

    /// Reads frames until one matches; replies travel through a worker pool,
    /// so unrelated frames may arrive in between.
    fn recv_until(&mut self, what: &str, pred: impl Fn(&ServerFrame) -> bool) -> ServerFrame {
        loop {
            match ServerFrame::decode(&mut self.reader) {
                Ok(frame) if pred(&frame) => return frame,
                Ok(_) => {}
                Err(err) => panic!("while waiting for {what}: {err}"),
            }
        }
    }

    /// Runs the whole NAMING handshake for `name`.
    fn login(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr);
        client.recv_until("username solicitation", |f| f.content == "/req username");
        client.send(Context::User, "system", name);
        client.recv_until("name confirmation", |f| f.content == format!("/set username {name}"));
        client
    }
}

#[test]
fn s1_login_and_global_join() {
    let addr = start_server();

    let mut alice = TestClient::connect(addr);
    // "choose a username" must precede the sentinel; consuming them in
    // order proves it (a reversed pair would hang the second wait).
    alice.recv_until("greeting", |f| {
        f.content == "choose a username" && f.sender_ctx == Context::System
    });
    alice.recv_until("solicitation", |f| {
        f.content == "/req username" && f.sender == "system" && f.target_ctx == Context::User
    });
    alice.send(Context::User, "system", "alice");
    alice.recv_until("confirmation", |f| f.content == "/set username alice");
    alice.recv_until("own join notice", |f| {
        f.content == "alice has connected"
            && f.target == "global"
            && f.target_ctx == Context::Group
    });

    let mut bob = TestClient::connect(addr);
    bob.recv_until("solicitation", |f| f.content == "/req username");
    bob.send(Context::User, "system", "bob");
    bob.recv_until("confirmation", |f| f.content == "/set username bob");
    alice.recv_until("bob's join notice", |f| f.content == "bob has connected");
}

#[test]
fn s2_reserved_and_malformed_names_rejected() {
    let addr = start_server();
    let mut client = TestClient::connect(addr);
    client.recv_until("solicitation", |f| f.content == "/req username");

    client.send(Context::User, "system", "system");
    client.recv_until("reserved rejection", |f| f.content == "username system already taken");

    client.send(Context::User, "system", "Carol!");
    client.recv_until("charset rejection", |f| f.content.starts_with("username must be"));

    // Still in NAMING: a valid name goes through.
    client.send(Context::User, "system", "carol");
    client.recv_until("confirmation", |f| f.content == "/set username carol");
}

#[test]
fn s3_group_lifecycle() {
    let addr = start_server();
    let mut alice = TestClient::login(addr, "alice");
    let mut bob = TestClient::login(addr, "bob");

    alice.send(Context::Group, "global", "/create room1");
    alice.recv_until("switch to new group", |f| f.content == "/switch room1");

    alice.send(Context::Group, "room1", "/invite bob");
    alice.recv_until("invite ack", |f| f.content == "sent invite to bob");
    bob.recv_until("invite notice", |f| {
        f.content.contains("invited by alice") && f.content.contains("room1")
    });

    bob.send(Context::Group, "global", "/accept room1");
    bob.recv_until("switch after accept", |f| f.content == "/switch room1");
    alice.recv_until("join notice", |f| {
        f.content == "bob has joined the group" && f.target == "room1"
    });

    bob.send(Context::Group, "room1", "/leave");
    bob.recv_until("switch after leave", |f| f.content == "/switch global");
    alice.recv_until("leave notice", |f| f.content == "bob has left the group");

    // The group survives with alice alone, and bob is no longer listed.
    alice.send(Context::Group, "room1", "/users");
    let listing = alice.recv_until("member listing", |f| f.content.starts_with("users:"));
    assert!(listing.content.contains("alice"));
    assert!(listing.content.contains("[ADMIN]"));
    assert!(!listing.content.contains("bob"));
}

#[test]
fn s4_lock_purges_foreign_invites() {
    let addr = start_server();
    let mut alice = TestClient::login(addr, "alice");
    let mut bob = TestClient::login(addr, "bob");
    let mut carol = TestClient::login(addr, "carol");

    alice.send(Context::Group, "global", "/create room1");
    alice.recv_until("switch", |f| f.content == "/switch room1");
    alice.send(Context::Group, "room1", "/invite bob");
    bob.recv_until("invite", |f| f.content.contains("invited by alice"));
    bob.send(Context::Group, "global", "/accept room1");
    bob.recv_until("switch", |f| f.content == "/switch room1");

    // Invite from a plain member, purged once the admin locks.
    bob.send(Context::Group, "room1", "/invite carol");
    carol.recv_until("invite", |f| f.content.contains("invited by bob"));
    alice.send(Context::Group, "room1", "/lock");
    alice.recv_until("lock notice", |f| f.content == "group invites are now locked");

    carol.send(Context::Group, "global", "/accept room1");
    carol.recv_until("rejection", |f| f.content == "invite expired or group does not exist");

    // A fresh invite from the admin works even while locked.
    alice.send(Context::Group, "room1", "/invite carol");
    carol.recv_until("invite", |f| f.content.contains("invited by alice"));
    carol.send(Context::Group, "global", "/accept room1");
    carol.recv_until("switch", |f| f.content == "/switch room1");
}

#[test]
fn s5_ban_cascade() {
    let addr = start_server();
    let mut alice = TestClient::login(addr, "alice");
    let mut bob = TestClient::login(addr, "bob");

    alice.send(Context::Group, "global", "/create room1");
    alice.recv_until("switch", |f| f.content == "/switch room1");
    alice.send(Context::Group, "room1", "/invite bob");
    bob.recv_until("invite", |f| f.content.contains("invited by alice"));
    bob.send(Context::Group, "global", "/accept room1");
    bob.recv_until("switch", |f| f.content == "/switch room1");

    alice.send(Context::Group, "room1", "/ban bob");
    alice.recv_until("ban ack", |f| f.content == "bob added to your ban list");
    bob.recv_until("ban notice", |f| f.content == "you were banned from room1 by alice");
    bob.recv_until("switch home", |f| f.content == "/switch global");

    alice.send(Context::Group, "room1", "/invite bob");
    alice.recv_until("invite rejection", |f| f.content == "bob is in your ban list");

    // Whispers are blocked in both directions.
    bob.send(Context::User, "alice", "pls");
    bob.recv_until("whisper rejection", |f| f.content == "message not sent to: alice");
}

#[test]
fn s6_overflow_gets_server_full() {
    let addr = start_server();
    let _clients: Vec<TestClient> =
        (0..30).map(|i| TestClient::login(addr, &format!("user{i:02}"))).collect();

    let mut extra = TcpStream::connect(addr).expect("connect");
    extra.set_read_timeout(Some(Duration::from_secs(5))).expect("read timeout");
    let mut raw = Vec::new();
    extra.read_to_end(&mut raw).expect("read rejection");
    assert_eq!(raw, SERVER_FULL, "expected the literal rejection bytes then FIN");
}

#[test]
fn group_chat_and_whispers() {
    let addr = start_server();
    let mut alice = TestClient::login(addr, "alice");
    let mut bob = TestClient::login(addr, "bob");
    // Make sure bob is fully in global before alice speaks.
    alice.recv_until("bob joined", |f| f.content == "bob has connected");

    alice.send(Context::Group, "global", "hi everyone");
    let seen = bob.recv_until("group message", |f| f.content == "hi everyone");
    assert_eq!(seen.sender, "alice");
    assert_eq!(seen.sender_ctx, Context::User);
    assert_eq!(seen.target, "global");
    assert_eq!(seen.target_ctx, Context::Group);
    // The sender is a member too, so the frame comes back to alice as well.
    alice.recv_until("own group message", |f| f.content == "hi everyone");

    bob.send(Context::User, "alice", "psst");
    let whisper = alice.recv_until("whisper", |f| f.content == "psst");
    assert_eq!(whisper.sender, "bob");
    assert_eq!(whisper.target_ctx, Context::User);
    bob.recv_until("whisper echo", |f| {
        f.content == "You're whispering to alice: psst" && f.sender_ctx == Context::System
    });
}

#[test]
fn disconnect_announces_and_frees_the_name() {
    let addr = start_server();
    let mut alice = TestClient::login(addr, "alice");
    let bob = TestClient::login(addr, "bob");
    alice.recv_until("bob joined", |f| f.content == "bob has connected");

    drop(bob);
    alice.recv_until("disconnect notice", |f| f.content == "bob has disconnected");

    // The name is free again.
    let mut again = TestClient::login(addr, "bob");
    again.send(Context::Group, "global", "/users");
    let listing = again.recv_until("listing", |f| f.content.starts_with("users:"));
    assert!(listing.content.contains("bob"));
}

#[test]
fn leaving_global_leaves_a_way_back() {
    let addr = start_server();
    let mut alice = TestClient::login(addr, "alice");
    let mut bob = TestClient::login(addr, "bob");
    alice.recv_until("bob joined", |f| f.content == "bob has connected");

    bob.send(Context::Group, "global", "/leave");
    alice.recv_until("leave notice", |f| f.content == "bob has left the group");

    bob.send(Context::Group, "global", "hello?");
    bob.recv_until("not a member", |f| f.content == "message not sent to: global");

    bob.send(Context::Group, "global", "/accept global");
    bob.recv_until("switch", |f| f.content == "/switch global");
    alice.recv_until("rejoin notice", |f| f.content == "bob has joined the group");
}

#[test]
fn kick_removes_and_redirects() {
    let addr = start_server();
    let mut alice = TestClient::login(addr, "alice");
    let mut bob = TestClient::login(addr, "bob");

    alice.send(Context::Group, "global", "/create room1");
    alice.recv_until("switch", |f| f.content == "/switch room1");
    alice.send(Context::Group, "room1", "/invite bob");
    bob.recv_until("invite", |f| f.content.contains("invited by alice"));
    bob.send(Context::Group, "global", "/accept room1");
    bob.recv_until("switch", |f| f.content == "/switch room1");

    // A non-admin can't kick.
    bob.send(Context::Group, "room1", "/kick alice");
    bob.recv_until("denied", |f| f.content == "you are not the group admin");

    alice.send(Context::Group, "room1", "/kick bob spamming");
    alice.recv_until("kick ack", |f| f.content == "kicked bob");
    bob.recv_until("kick notice", |f| f.content == "you were kicked from room1: spamming");
    bob.recv_until("switch home", |f| f.content == "/switch global");
}
