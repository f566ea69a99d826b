use std::{io, net::TcpStream, sync::Arc};

use parley_sync::ReentrantRwLock;
use parley_utils::{Color, paint};
use parley_wire::{BufferedStream, ClientFrame, Context, ServerFrame, WireError};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    fanout::{Conn, SendPool},
    roster::{GroupId, Roster, UserId, system_frame, valid_name_shape},
};

const HELP: &str = "commands:\n\
    /create <group>        create a new group\n\
    /invite <user>         invite a user to the target group\n\
    /accept <group>        accept a pending invite\n\
    /leave                 leave the target group\n\
    /users                 list members of the target group\n\
    /banned                list users you banned\n\
    /ban <user>            ban a user\n\
    /kick <user> [reason]  kick a user from the target group (admin)\n\
    /lock                  lock group invites (admin)\n\
    /unlock                unlock group invites (admin)\n\
    /help                  show this help";

const NAME_SHAPE_HINT: &str =
    "username must be lowercase letters, digits, '_' or '-', start with a letter \
     and end with a letter or digit";

/// State shared by every session: the graph behind its RW lock, plus the
/// fanout pool for direct replies.
pub struct ServerState {
    pub roster: ReentrantRwLock<Roster>,
    pub pool: SendPool,
}

/// What a frame's target string resolved to. Groups shadow users.
#[derive(Clone, Copy)]
enum Target {
    Group(GroupId),
    User(UserId),
}

/// One connected client: the NAMING handshake, then the command loop, then
/// teardown. Runs on its own thread.
pub struct Session {
    state: Arc<ServerState>,
    conn: Arc<Conn>,
    stream: BufferedStream<TcpStream>,
    /// Target name for NAMING-phase frames, before a real name exists.
    provisional: String,
    username: String,
}

impl Session {
    pub fn new(state: Arc<ServerState>, stream: TcpStream) -> io::Result<Self> {
        let reader = BufferedStream::new(stream.try_clone()?);
        let conn = Arc::new(Conn::new(stream));
        let provisional = format!("user-{}", rand::rng().random_range(1..=9999));
        Ok(Self { state, conn, stream: reader, provisional, username: String::new() })
    }

    pub fn run(mut self) {
        let peer = self.conn.peer().to_string();
        info!(%peer, "session started");

        let uid = match self.naming() {
            Ok(uid) => uid,
            Err(err) => {
                debug!(%peer, %err, "session ended before naming");
                self.conn.shutdown();
                return;
            }
        };

        let err = self.ready(uid);
        debug!(%peer, user = %self.username, %err, "session closed");

        self.state.roster.write().disconnect(uid);
        self.conn.shutdown();
    }

    // ---- NAMING ----

    fn naming(&mut self) -> Result<UserId, WireError> {
        let provisional = self.provisional.clone();
        self.send_now(&provisional, "choose a username");
        self.send_now(&provisional, "/req username");

        loop {
            let frame = ClientFrame::decode(&mut self.stream)?;
            let uname = frame.content.trim().to_lowercase();

            let rejection = {
                let roster = self.state.roster.read();
                if uname.is_empty() {
                    Some("username cannot be empty".to_string())
                } else if !valid_name_shape(&uname) {
                    Some(NAME_SHAPE_HINT.to_string())
                } else if roster.name_in_use(&uname) {
                    Some(format!("username {uname} already taken"))
                } else {
                    None
                }
            };
            if let Some(reason) = rejection {
                self.send_now(&provisional, &reason);
                continue;
            }

            // Checks ran under the read hold; the publish re-checks under
            // the write hold so two candidates can't both take the name.
            let published = {
                let mut roster = self.state.roster.write();
                if roster.name_in_use(&uname) {
                    None
                } else {
                    Some(roster.publish_user(&uname, Some(Arc::clone(&self.conn))))
                }
            };
            let Some(uid) = published else {
                self.send_now(&provisional, &format!("username {uname} already taken"));
                continue;
            };

            self.send_now(&uname, &format!("/set username {uname}"));
            {
                let roster = self.state.roster.read();
                roster.announce(roster.global(), &format!("{uname} has connected"));
            }
            self.username = uname;
            return Ok(uid);
        }
    }

    // ---- READY ----

    fn ready(&mut self, uid: UserId) -> WireError {
        loop {
            let frame = match ClientFrame::decode(&mut self.stream) {
                Ok(frame) => frame,
                Err(err) => return err,
            };
            debug!(
                sender = %self.username,
                target_ctx = ?frame.target_ctx,
                target = %frame.target,
                content = %clip(&frame.content),
                "received"
            );
            self.dispatch(uid, &frame);
        }
    }

    fn dispatch(&self, uid: UserId, frame: &ClientFrame) {
        let target = {
            let roster = self.state.roster.read();
            roster
                .find_group(&frame.target)
                .map(Target::Group)
                .or_else(|| roster.find_user(&frame.target).map(Target::User))
        };
        let Some(target) = target else {
            self.reply(&format!("message not sent, {} no longer exists", frame.target));
            if frame.target_ctx == Context::Group {
                self.reply("/switch global");
            }
            return;
        };

        let content = frame.content.as_str();
        if let Some(arg) = content.strip_prefix("/create ") {
            self.cmd_create(uid, arg);
        } else if content == "/lock" {
            self.cmd_set_locked(uid, target, true);
        } else if content == "/unlock" {
            self.cmd_set_locked(uid, target, false);
        } else if content == "/leave" {
            self.cmd_leave(uid, target);
        } else if content == "/users" {
            self.cmd_users(uid, target);
        } else if content == "/banned" {
            self.cmd_banned(uid);
        } else if content == "/help" {
            self.reply(HELP);
        } else if let Some(arg) = content.strip_prefix("/invite ") {
            self.cmd_invite(uid, target, arg);
        } else if let Some(arg) = content.strip_prefix("/accept ") {
            self.cmd_accept(uid, arg);
        } else if let Some(arg) = content.strip_prefix("/kick ") {
            self.cmd_kick(uid, target, arg);
        } else if let Some(arg) = content.strip_prefix("/ban ") {
            self.cmd_ban(uid, target, arg);
        } else {
            self.forward(uid, target, frame);
        }
    }

    fn cmd_create(&self, uid: UserId, arg: &str) {
        let name = arg.trim();
        if name.is_empty() {
            self.reply("no group name provided try /help command");
            return;
        }
        if !valid_name_shape(name) {
            self.reply("group name must be lowercase letters, digits, '_' or '-'");
            return;
        }
        {
            let mut roster = self.state.roster.write();
            if roster.name_in_use(name) {
                self.reply(&format!("{name} name is taken"));
                return;
            }
            roster.create_group(name, uid);
        }
        self.reply(&format!("/switch {name}"));
    }

    fn cmd_set_locked(&self, uid: UserId, target: Target, lock: bool) {
        let Target::Group(gid) = target else {
            self.reply("target is not a group");
            return;
        };
        let mut roster = self.state.roster.write();
        let Some(group) = roster.group_opt(gid) else {
            self.reply("group no longer exists");
            return;
        };
        if group.admin != uid {
            self.reply("you are not the group admin");
            return;
        }
        if lock && group.locked {
            self.reply("group is already locked");
            return;
        }
        if !lock && !group.locked {
            self.reply("group is not locked");
            return;
        }
        if lock {
            roster.lock_group(gid);
        } else {
            roster.unlock_group(gid);
        }
    }

    fn cmd_leave(&self, uid: UserId, target: Target) {
        let Target::Group(gid) = target else {
            self.reply("target is not a group");
            return;
        };
        let mut roster = self.state.roster.write();
        if roster.group_opt(gid).is_none() {
            self.reply("group no longer exists");
            return;
        }
        if !roster.is_member(gid, uid) {
            self.reply("you are not in this group");
            return;
        }
        let global = roster.global();
        let system = roster.system();
        roster.remove(gid, uid, &format!("{} has left the group", self.username));
        if gid == global {
            // The way back in: a standing self-invite from system.
            roster.add_invite(global, uid, system);
        } else {
            self.reply("/switch global");
        }
    }

    fn cmd_users(&self, uid: UserId, target: Target) {
        let Target::Group(gid) = target else {
            self.reply("target is not a group");
            return;
        };
        let roster = self.state.roster.read();
        let Some(group) = roster.group_opt(gid) else {
            self.reply("group no longer exists");
            return;
        };
        if !group.members.contains(&uid) {
            self.reply("you are not in this group");
            return;
        }
        let bans = &roster.user(uid).bans;
        let mut parts = Vec::with_capacity(group.members.len());
        for &member in &group.members {
            let name = &roster.user(member).name;
            let mut entry =
                if member == uid { paint(name, Color::Green) } else { name.clone() };
            if group.admin == member {
                entry.push_str(" [ADMIN]");
            }
            if bans.contains(&member) {
                entry.push_str(" [BANNED]");
            }
            parts.push(entry);
        }
        let listing = format!("users: {}", parts.join(", "));
        match system_frame(Context::Group, &group.name, &listing).encode() {
            Ok(bytes) => self.state.pool.submit(Arc::clone(&self.conn), bytes.into()),
            Err(err) => warn!(%err, "encode users listing"),
        }
    }

    fn cmd_banned(&self, uid: UserId) {
        let roster = self.state.roster.read();
        let bans = &roster.user(uid).bans;
        if bans.is_empty() {
            self.reply("your ban list is empty");
            return;
        }
        let names: Vec<&str> = bans
            .iter()
            .filter_map(|&b| roster.user_opt(b).map(|u| u.name.as_str()))
            .collect();
        self.reply(&format!("banned users: {}", names.join(", ")));
    }

    fn cmd_invite(&self, uid: UserId, target: Target, arg: &str) {
        let Target::Group(gid) = target else {
            self.reply("target is not a group");
            return;
        };
        let uname = arg.trim();
        if uname.is_empty() {
            self.reply("no username provided try /help command");
            return;
        }
        let mut roster = self.state.roster.write();
        let Some(group) = roster.group_opt(gid) else {
            self.reply("group no longer exists");
            return;
        };
        if group.locked && group.admin != uid {
            self.reply("you can't send invites, this group is locked and you are not the admin");
            return;
        }
        let group_name = group.name.clone();
        let Some(other) = roster.find_user(uname) else {
            self.reply(&format!("user not found:{uname}"));
            return;
        };
        if other == uid {
            self.reply("you can't invite yourself");
            return;
        }
        if roster.user(uid).bans.contains(&other) {
            self.reply(&format!("{uname} is in your ban list"));
            return;
        }
        if roster.is_member(gid, other) {
            self.reply(&format!("{uname} is already in this group"));
            return;
        }
        roster.add_invite(gid, other, uid);
        roster.send_system_to_user(
            other,
            &format!(
                "you were invited by {} to join group {group_name}, \
                 type \"/accept {group_name}\" to join",
                self.username
            ),
        );
        self.reply(&format!("sent invite to {uname}"));
    }

    fn cmd_accept(&self, uid: UserId, arg: &str) {
        let name = arg.trim();
        if name.is_empty() {
            self.reply("no group name provided try /help command");
            return;
        }
        let mut roster = self.state.roster.write();
        let Some(gid) = roster.find_group(name) else {
            self.reply("invite expired or group does not exist");
            return;
        };
        if roster.is_member(gid, uid) {
            self.reply("you are already in this group");
            return;
        }
        let Some(invite) = roster.best_invite(gid, uid) else {
            self.reply("invite expired or group does not exist");
            return;
        };
        let group = roster.group(gid);
        let admin_ban = roster.user_opt(group.admin).is_some_and(|a| a.bans.contains(&uid));
        if (group.locked && invite.inviter != group.admin) || admin_ban {
            self.reply("invite expired or group does not exist");
            return;
        }
        // A successful accept consumes every pending invite for this user.
        roster.purge_invites_for(gid, uid);
        roster.join(gid, uid, &format!("{} has joined the group", self.username));
        self.reply(&format!("/switch {name}"));
    }

    fn cmd_kick(&self, uid: UserId, target: Target, arg: &str) {
        let Target::Group(gid) = target else {
            self.reply("target is not a group");
            return;
        };
        let mut words = arg.trim().splitn(2, ' ');
        let uname = words.next().unwrap_or_default();
        let reason = words.next().map(str::trim).filter(|r| !r.is_empty());
        if uname.is_empty() {
            self.reply("no username provided try /help command");
            return;
        }
        let mut roster = self.state.roster.write();
        let Some(group) = roster.group_opt(gid) else {
            self.reply("group no longer exists");
            return;
        };
        if group.admin != uid {
            self.reply("you are not the group admin");
            return;
        }
        let group_name = group.name.clone();
        let Some(other) = roster.find_user(uname) else {
            self.reply(&format!("user not found:{uname}"));
            return;
        };
        if other == uid {
            self.reply("you can't kick yourself");
            return;
        }
        if !roster.is_member(gid, other) {
            self.reply(&format!("{uname} is not in this group"));
            return;
        }
        let suffix = reason.map(|r| format!(": {r}")).unwrap_or_default();
        roster.purge_invites_for(gid, other);
        roster.remove(gid, other, &format!("{uname} was kicked from the group{suffix}"));
        roster.send_system_to_user(other, &format!("you were kicked from {group_name}{suffix}"));
        roster.send_system_to_user(other, "/switch global");
        self.reply(&format!("kicked {uname}"));
    }

    fn cmd_ban(&self, uid: UserId, target: Target, arg: &str) {
        let Target::Group(_) = target else {
            self.reply("target is not a group");
            return;
        };
        let uname = arg.trim();
        if uname.is_empty() {
            self.reply("no username provided try /help command");
            return;
        }
        let mut roster = self.state.roster.write();
        let Some(other) = roster.find_user(uname) else {
            self.reply(&format!("user not found:{uname}"));
            return;
        };
        if other == uid {
            self.reply("you can't ban yourself");
            return;
        }
        if roster.user(uid).bans.contains(&other) {
            self.reply(&format!("{uname} is already in your ban list"));
            return;
        }
        let removed = roster.ban(uid, other);
        for &gid in &removed {
            if let Some(group) = roster.group_opt(gid) {
                roster.send_system_to_user(
                    other,
                    &format!("you were banned from {} by {}", group.name, self.username),
                );
            }
        }
        if !removed.is_empty() {
            roster.send_system_to_user(other, "/switch global");
        }
        self.reply(&format!("{uname} added to your ban list"));
    }

    fn forward(&self, uid: UserId, target: Target, frame: &ClientFrame) {
        let roster = self.state.roster.read();
        match target {
            Target::Group(gid) => {
                let Some(group) = roster.group_opt(gid) else {
                    self.reply(&format!("message not sent to: {}", frame.target));
                    return;
                };
                if !group.members.contains(&uid) {
                    self.reply(&format!("message not sent to: {}", frame.target));
                    return;
                }
                let out = ServerFrame {
                    sender_ctx: Context::User,
                    target_ctx: Context::Group,
                    sender: self.username.clone(),
                    target: group.name.clone(),
                    content: frame.content.clone(),
                };
                match out.encode() {
                    Ok(bytes) => roster.send_group_bytes(gid, bytes.into()),
                    Err(err) => warn!(%err, "encode group message"),
                }
            }
            Target::User(other) => {
                let Some(peer) = roster.user_opt(other) else {
                    self.reply(&format!("message not sent to: {}", frame.target));
                    return;
                };
                let blocked = peer.bans.contains(&uid) || roster.user(uid).bans.contains(&other);
                if blocked {
                    self.reply(&format!("message not sent to: {}", frame.target));
                    return;
                }
                let out = ServerFrame {
                    sender_ctx: Context::User,
                    target_ctx: Context::User,
                    sender: self.username.clone(),
                    target: peer.name.clone(),
                    content: frame.content.clone(),
                };
                match out.encode() {
                    Ok(bytes) => roster.send_user_bytes(other, bytes.into()),
                    Err(err) => warn!(%err, "encode whisper"),
                }
                self.reply(&format!(
                    "You're whispering to {}: {}",
                    frame.target, frame.content
                ));
            }
        }
    }

    // ---- outbound helpers ----

    /// Synchronous system send, used where arrival order matters (NAMING).
    fn send_now(&self, target: &str, content: &str) {
        match system_frame(Context::User, target, content).encode() {
            Ok(bytes) => {
                if let Err(err) = self.conn.send(&bytes) {
                    warn!(peer = %self.conn.peer(), %err, "direct send failed");
                }
            }
            Err(err) => warn!(%err, "encode system message"),
        }
    }

    /// Asynchronous system reply to this session's own user.
    fn reply(&self, content: &str) {
        match system_frame(Context::User, &self.username, content).encode() {
            Ok(bytes) => self.state.pool.submit(Arc::clone(&self.conn), bytes.into()),
            Err(err) => warn!(%err, "encode reply"),
        }
    }
}

/// Log-friendly view of message content.
fn clip(content: &str) -> String {
    const KEEP: usize = 15;
    if content.chars().count() <= KEEP {
        content.to_string()
    } else {
        let cut: String = content.chars().take(KEEP).collect();
        format!("{cut}...(truncated)")
    }
}
