use std::sync::Arc;

use parley_wire::{CONTENT_MAX, Context, ServerFrame};
use tracing::warn;

use crate::fanout::{Conn, SendPool};

/// Names no user or group may take.
pub const RESERVED_NAMES: [&str; 6] = ["global", "system", "admin", "null", "none", "program"];
/// Sender of every server-originated frame.
pub const SYSTEM_NAME: &str = "system";
/// Entry group of every authenticated user.
pub const GLOBAL_NAME: &str = "global";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupId(u32);

/// Checks the name charset: `^[a-z][a-z0-9_-]*[a-z0-9]$`.
pub fn valid_name_shape(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    bytes[0].is_ascii_lowercase()
        && matches!(bytes[bytes.len() - 1], b'a'..=b'z' | b'0'..=b'9')
        && bytes.iter().all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'))
}

pub struct User {
    pub id: UserId,
    pub name: String,
    /// None for the system user (and for graph-only tests).
    conn: Option<Arc<Conn>>,
    /// Back-references; group member lists are authoritative.
    pub groups: Vec<GroupId>,
    pub bans: Vec<UserId>,
}

pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub admin: UserId,
    pub locked: bool,
    /// Kept in join order; admin succession promotes the head.
    pub members: Vec<UserId>,
    pub invites: Vec<Invite>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Invite {
    pub invitee: UserId,
    pub inviter: UserId,
}

/// The shared graph of users, groups, invites and bans.
///
/// One instance lives behind the process-wide RW lock; every read of the
/// graph happens under at least a read hold and every mutation under the
/// write hold. Announcements go out through the fanout pool and never block.
pub struct Roster {
    users: Vec<User>,
    groups: Vec<Group>,
    next_user: u32,
    next_group: u32,
    system: UserId,
    global: GroupId,
    pool: SendPool,
}

impl Roster {
    pub fn new(pool: SendPool) -> Self {
        let system = UserId(0);
        let global = GroupId(0);
        Self {
            users: vec![User {
                id: system,
                name: SYSTEM_NAME.to_string(),
                conn: None,
                groups: Vec::new(),
                bans: Vec::new(),
            }],
            groups: vec![Group {
                id: global,
                name: GLOBAL_NAME.to_string(),
                admin: system,
                locked: true,
                members: Vec::new(),
                invites: Vec::new(),
            }],
            next_user: 1,
            next_group: 1,
            system,
            global,
            pool,
        }
    }

    pub fn system(&self) -> UserId {
        self.system
    }

    pub fn global(&self) -> GroupId {
        self.global
    }

    // ---- lookups ----

    pub fn user(&self, id: UserId) -> &User {
        self.users.iter().find(|u| u.id == id).expect("stale user id")
    }

    fn user_mut(&mut self, id: UserId) -> &mut User {
        self.users.iter_mut().find(|u| u.id == id).expect("stale user id")
    }

    pub fn group(&self, id: GroupId) -> &Group {
        self.groups.iter().find(|g| g.id == id).expect("stale group id")
    }

    fn group_mut(&mut self, id: GroupId) -> &mut Group {
        self.groups.iter_mut().find(|g| g.id == id).expect("stale group id")
    }

    /// A target resolved under an earlier read hold may be gone by the time
    /// a command re-locks; handlers re-check through these.
    pub fn user_opt(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn group_opt(&self, id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn find_user(&self, name: &str) -> Option<UserId> {
        self.users.iter().find(|u| u.name == name).map(|u| u.id)
    }

    pub fn find_group(&self, name: &str) -> Option<GroupId> {
        self.groups.iter().find(|g| g.name == name).map(|g| g.id)
    }

    /// True when `name` is reserved or taken by any user or group.
    pub fn name_in_use(&self, name: &str) -> bool {
        RESERVED_NAMES.contains(&name)
            || self.find_user(name).is_some()
            || self.find_group(name).is_some()
    }

    pub fn is_member(&self, gid: GroupId, uid: UserId) -> bool {
        self.group(gid).members.contains(&uid)
    }

    /// Published users holding a live connection; the cap applies to these.
    pub fn connected_users(&self) -> usize {
        self.users.iter().filter(|u| u.conn.is_some()).count()
    }

    // ---- mutations (write hold) ----

    /// Publishes a freshly named user into the graph and into `global`.
    /// The connect announcement is the caller's to make, after the client
    /// has been told its name.
    pub fn publish_user(&mut self, name: &str, conn: Option<Arc<Conn>>) -> UserId {
        let id = UserId(self.next_user);
        self.next_user += 1;
        let global = self.global;
        self.users.push(User {
            id,
            name: name.to_string(),
            conn,
            groups: vec![global],
            bans: Vec::new(),
        });
        self.group_mut(global).members.push(id);
        id
    }

    /// Creates an unlocked group with `creator` as admin and sole member.
    pub fn create_group(&mut self, name: &str, creator: UserId) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        self.groups.push(Group {
            id,
            name: name.to_string(),
            admin: creator,
            locked: false,
            members: Vec::new(),
            invites: Vec::new(),
        });
        let report = format!("{} has joined the group", self.user(creator).name);
        self.join(id, creator, &report);
        id
    }

    pub fn join(&mut self, gid: GroupId, uid: UserId, report: &str) {
        debug_assert!(!self.is_member(gid, uid), "can't join twice");
        self.group_mut(gid).members.push(uid);
        self.user_mut(uid).groups.push(gid);
        self.announce(gid, report);
    }

    /// Removes `uid` from `gid`, announcing `report` to whoever remains.
    /// Promotes `members[0]` when the admin leaves; deletes emptied
    /// non-global groups together with their pending invites.
    pub fn remove(&mut self, gid: GroupId, uid: UserId, report: &str) {
        let group = self.group_mut(gid);
        let Some(at) = group.members.iter().position(|m| *m == uid) else { return };
        group.members.remove(at);
        self.user_mut(uid).groups.retain(|g| *g != gid);

        if self.group(gid).members.is_empty() {
            if gid != self.global {
                self.groups.retain(|g| g.id != gid);
            }
            return;
        }

        self.announce(gid, report);
        if self.group(gid).admin == uid {
            let heir = self.group(gid).members[0];
            self.group_mut(gid).admin = heir;
            let notice = format!("{} is now the group admin", self.user(heir).name);
            self.announce(gid, &notice);
        }
    }

    /// Locks the group and purges every invite not issued by the admin.
    pub fn lock_group(&mut self, gid: GroupId) {
        let group = self.group_mut(gid);
        group.locked = true;
        let admin = group.admin;
        group.invites.retain(|i| i.inviter == admin);
        self.announce(gid, "group invites are now locked");
    }

    pub fn unlock_group(&mut self, gid: GroupId) {
        self.group_mut(gid).locked = false;
        self.announce(gid, "group is now open for invites");
    }

    pub fn add_invite(&mut self, gid: GroupId, invitee: UserId, inviter: UserId) {
        self.group_mut(gid).invites.push(Invite { invitee, inviter });
    }

    /// The invite `/accept` would act on: the latest one, except an invite
    /// from the admin wins outright.
    pub fn best_invite(&self, gid: GroupId, uid: UserId) -> Option<Invite> {
        let group = self.group(gid);
        let mut best = None;
        for invite in group.invites.iter().rev().filter(|i| i.invitee == uid) {
            if best.is_none() {
                best = Some(*invite);
            }
            if invite.inviter == group.admin {
                return Some(*invite);
            }
        }
        best
    }

    pub fn purge_invites_for(&mut self, gid: GroupId, uid: UserId) {
        self.group_mut(gid).invites.retain(|i| i.invitee != uid);
    }

    pub fn purge_invites_everywhere(&mut self, uid: UserId) {
        for group in &mut self.groups {
            group.invites.retain(|i| i.invitee != uid);
        }
    }

    /// Adds `target` to `caller`'s ban list and cascades: `target` is
    /// removed (and un-invited) from every group `caller` administers.
    /// Returns the groups `target` was removed from.
    pub fn ban(&mut self, caller: UserId, target: UserId) -> Vec<GroupId> {
        self.user_mut(caller).bans.push(target);
        let affected: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|g| g.admin == caller && g.members.contains(&target))
            .map(|g| g.id)
            .collect();
        let caller_name = self.user(caller).name.clone();
        let target_name = self.user(target).name.clone();
        for &gid in &affected {
            self.purge_invites_for(gid, target);
            self.remove(gid, target, &format!("{target_name} was banned by {caller_name}"));
        }
        affected
    }

    /// Full teardown of a departing user: leave every group (announcing the
    /// disconnect), drop their pending invites everywhere, unpublish.
    pub fn disconnect(&mut self, uid: UserId) {
        let name = self.user(uid).name.clone();
        for gid in self.user(uid).groups.clone() {
            self.remove(gid, uid, &format!("{name} has disconnected"));
        }
        self.purge_invites_everywhere(uid);
        self.users.retain(|u| u.id != uid);
    }

    // ---- outbound (read hold is enough) ----

    /// SYSTEM→GROUP notice to every member.
    pub fn announce(&self, gid: GroupId, content: &str) {
        let Some(group) = self.group_opt(gid) else { return };
        let frame = system_frame(Context::Group, &group.name, content);
        match frame.encode() {
            Ok(bytes) => self.send_group_bytes(gid, bytes.into()),
            Err(err) => warn!(%err, "encode announcement"),
        }
    }

    /// Submits one send task per member; failures are per-receiver.
    pub fn send_group_bytes(&self, gid: GroupId, bytes: Arc<[u8]>) {
        let Some(group) = self.group_opt(gid) else { return };
        for &uid in &group.members {
            if let Some(user) = self.user_opt(uid)
                && let Some(conn) = &user.conn
            {
                self.pool.submit(Arc::clone(conn), Arc::clone(&bytes));
            }
        }
    }

    pub fn send_user_bytes(&self, uid: UserId, bytes: Arc<[u8]>) {
        if let Some(conn) = &self.user(uid).conn {
            self.pool.submit(Arc::clone(conn), bytes);
        }
    }

    /// SYSTEM→USER notice to one user.
    pub fn send_system_to_user(&self, uid: UserId, content: &str) {
        let frame = system_frame(Context::User, &self.user(uid).name, content);
        match frame.encode() {
            Ok(bytes) => self.send_user_bytes(uid, bytes.into()),
            Err(err) => warn!(%err, "encode system message"),
        }
    }
}

/// Builds a SYSTEM-sent frame, clamping overlong content to the wire limit.
pub(crate) fn system_frame(target_ctx: Context, target: &str, content: &str) -> ServerFrame {
    let mut content = content.to_string();
    if content.len() > CONTENT_MAX {
        let mut end = CONTENT_MAX;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        content.truncate(end);
    }
    ServerFrame {
        sender_ctx: Context::System,
        target_ctx,
        sender: SYSTEM_NAME.to_string(),
        target: target.to_string(),
        content,
    }
}
