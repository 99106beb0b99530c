//! Translation of Discord gateway dispatch payloads into [`GatewayEvent`]s.
//!
//! Keeps a small per-connection cache of guild names, owners and admin
//! roles, which `MESSAGE_CREATE` needs but does not carry.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::GatewayEvent;
use crate::config::DiscordConfig;
use crate::handler::InboundEvent;
use crate::roster::{CommunityId, ObservedCommunity, ObservedMember, RosterSnapshot};

/// `ADMINISTRATOR` permission bit.
pub const ADMINISTRATOR: u64 = 1 << 3;

/// Which roles confer admin status.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    role_ids: HashSet<String>,
    role_name: Option<String>,
}

impl AdminPolicy {
    pub fn new(role_ids: impl IntoIterator<Item = String>, role_name: Option<String>) -> Self {
        Self {
            role_ids: role_ids.into_iter().collect(),
            role_name: role_name
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty()),
        }
    }

    pub fn from_config(config: &DiscordConfig) -> Self {
        Self::new(
            config.admin_role_ids.iter().cloned(),
            config.admin_role_name.clone(),
        )
    }

    /// Whether a role object (`{id, name, permissions}`) confers admin.
    fn is_admin_role(&self, role: &Value) -> bool {
        let id = str_field(role, "id");
        if self.role_ids.contains(id) {
            return true;
        }
        let permissions = role
            .get("permissions")
            .and_then(|p| match p {
                Value::String(s) => s.parse::<u64>().ok(),
                Value::Number(n) => n.as_u64(),
                _ => None,
            })
            .unwrap_or(0);
        if permissions & ADMINISTRATOR != 0 {
            return true;
        }
        self.role_name
            .as_deref()
            .is_some_and(|wanted| str_field(role, "name").to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, Default)]
struct GuildInfo {
    name: String,
    owner_id: Option<String>,
    admin_roles: HashSet<String>,
}

/// Stateful translator for one gateway session.
#[derive(Debug, Default)]
pub struct GatewayTranslator {
    policy: AdminPolicy,
    bot_id: Option<String>,
    guilds: HashMap<String, GuildInfo>,
}

impl GatewayTranslator {
    pub fn new(policy: AdminPolicy, bot_id: Option<String>) -> Self {
        Self {
            policy,
            bot_id: bot_id.filter(|id| !id.is_empty()),
            guilds: HashMap::new(),
        }
    }

    pub fn bot_id(&self) -> Option<&str> {
        self.bot_id.as_deref()
    }

    /// Translate one dispatch (`op: 0`) by event name.
    pub fn translate(&mut self, event: &str, data: &Value) -> Option<GatewayEvent> {
        match event {
            "READY" => self.on_ready(data),
            "GUILD_CREATE" => self.on_guild_create(data),
            "GUILD_UPDATE" => {
                self.on_guild_update(data);
                None
            }
            "GUILD_DELETE" => self.on_guild_delete(data),
            "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
                self.on_role_upsert(data);
                None
            }
            "GUILD_ROLE_DELETE" => {
                self.on_role_delete(data);
                None
            }
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => self.on_member(data),
            "GUILD_MEMBERS_CHUNK" => self.on_members_chunk(data),
            "MESSAGE_CREATE" => self.on_message(data),
            _ => None,
        }
    }

    fn on_ready(&mut self, data: &Value) -> Option<GatewayEvent> {
        let id = data.get("user").map(|u| str_field(u, "id"))?;
        if id.is_empty() {
            return None;
        }
        self.bot_id = Some(id.to_owned());
        Some(GatewayEvent::Ready {
            bot_id: id.to_owned(),
        })
    }

    fn on_guild_create(&mut self, data: &Value) -> Option<GatewayEvent> {
        if bool_field(data, "unavailable") {
            return None;
        }
        let guild_id = str_field(data, "id");
        if guild_id.is_empty() {
            return None;
        }
        let info = self.guild_info(data);
        let community = ObservedCommunity::new(guild_id, info.name.clone());
        self.guilds.insert(guild_id.to_owned(), info);

        let members = data
            .get("members")
            .and_then(Value::as_array)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|m| self.observe_member(guild_id, m, m.get("user")))
                    .collect()
            })
            .unwrap_or_default();

        Some(GatewayEvent::RosterSnapshot(RosterSnapshot { community, members }))
    }

    fn on_guild_update(&mut self, data: &Value) {
        let guild_id = str_field(data, "id");
        if guild_id.is_empty() {
            return;
        }
        let info = self.guild_info(data);
        self.guilds.insert(guild_id.to_owned(), info);
    }

    fn on_guild_delete(&mut self, data: &Value) -> Option<GatewayEvent> {
        let guild_id = str_field(data, "id");
        if guild_id.is_empty() {
            return None;
        }
        // `unavailable: true` is an outage, not a removal.
        if bool_field(data, "unavailable") {
            return None;
        }
        self.guilds.remove(guild_id);
        Some(GatewayEvent::CommunityRemoved(CommunityId::new(guild_id)))
    }

    fn on_role_upsert(&mut self, data: &Value) {
        let Some(role) = data.get("role") else {
            return;
        };
        let is_admin = self.policy.is_admin_role(role);
        let role_id = str_field(role, "id").to_owned();
        if let Some(guild) = self.guilds.get_mut(str_field(data, "guild_id")) {
            if is_admin {
                guild.admin_roles.insert(role_id);
            } else {
                guild.admin_roles.remove(&role_id);
            }
        }
    }

    fn on_role_delete(&mut self, data: &Value) {
        if let Some(guild) = self.guilds.get_mut(str_field(data, "guild_id")) {
            guild.admin_roles.remove(str_field(data, "role_id"));
        }
    }

    fn on_member(&self, data: &Value) -> Option<GatewayEvent> {
        let guild_id = str_field(data, "guild_id");
        if guild_id.is_empty() {
            return None;
        }
        let member = self.observe_member(guild_id, data, data.get("user"))?;
        if member.is_bot {
            return None;
        }
        Some(GatewayEvent::MemberObserved {
            community: self.observed_community(guild_id),
            member,
        })
    }

    fn on_members_chunk(&self, data: &Value) -> Option<GatewayEvent> {
        let guild_id = str_field(data, "guild_id");
        if guild_id.is_empty() {
            return None;
        }
        let members = data
            .get("members")?
            .as_array()?
            .iter()
            .filter_map(|m| self.observe_member(guild_id, m, m.get("user")))
            .collect();
        Some(GatewayEvent::RosterSnapshot(RosterSnapshot {
            community: self.observed_community(guild_id),
            members,
        }))
    }

    fn on_message(&self, data: &Value) -> Option<GatewayEvent> {
        let author = data.get("author")?;
        let author_id = str_field(author, "id");
        if author_id.is_empty() || self.bot_id.as_deref() == Some(author_id) {
            return None;
        }

        let guild_id = str_field(data, "guild_id");
        let (author, community) = if guild_id.is_empty() {
            let member = ObservedMember {
                is_bot: bool_field(author, "bot"),
                ..ObservedMember::new(author_id, display_name(None, author))
            };
            (member, None)
        } else {
            let partial = data.get("member").unwrap_or(&Value::Null);
            let member = self.observe_member(guild_id, partial, Some(author))?;
            (member, Some(self.observed_community(guild_id)))
        };

        let mentions_this_bot = self.bot_id.as_deref().is_some_and(|bot| {
            data.get("mentions")
                .and_then(Value::as_array)
                .is_some_and(|mentions| mentions.iter().any(|m| str_field(m, "id") == bot))
        });

        Some(GatewayEvent::Message(InboundEvent {
            author,
            is_direct_message: community.is_none(),
            community,
            reply_target: str_field(data, "channel_id").to_owned(),
            text: str_field(data, "content").trim().to_owned(),
            mentions_this_bot,
        }))
    }

    fn guild_info(&self, data: &Value) -> GuildInfo {
        let admin_roles = data
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter(|r| self.policy.is_admin_role(r))
                    .map(|r| str_field(r, "id").to_owned())
                    .collect()
            })
            .unwrap_or_default();
        GuildInfo {
            name: str_field(data, "name").to_owned(),
            owner_id: Some(str_field(data, "owner_id").to_owned()).filter(|id| !id.is_empty()),
            admin_roles,
        }
    }

    fn observed_community(&self, guild_id: &str) -> ObservedCommunity {
        let name = self
            .guilds
            .get(guild_id)
            .map(|g| g.name.clone())
            .unwrap_or_default();
        ObservedCommunity::new(guild_id, name)
    }

    /// Build an observed member from a guild member object and its user.
    fn observe_member(&self, guild_id: &str, member: &Value, user: Option<&Value>) -> Option<ObservedMember> {
        let user = user?;
        let id = str_field(user, "id");
        if id.is_empty() {
            return None;
        }
        let role_ids: Vec<&str> = member
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| roles.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        Some(ObservedMember {
            is_bot: bool_field(user, "bot"),
            is_admin: self.is_admin(guild_id, id, &role_ids),
            ..ObservedMember::new(id, display_name(Some(member), user))
        })
    }

    /// `None` until the guild's owner and roles have been seen in this
    /// session.
    fn is_admin(&self, guild_id: &str, user_id: &str, role_ids: &[&str]) -> Option<bool> {
        if role_ids.iter().any(|r| self.policy.role_ids.contains(*r)) {
            return Some(true);
        }
        let guild = self.guilds.get(guild_id)?;
        Some(
            guild.owner_id.as_deref() == Some(user_id)
                || role_ids.iter().any(|r| guild.admin_roles.contains(*r)),
        )
    }
}

/// Guild nickname, then global display name, then username.
fn display_name(member: Option<&Value>, user: &Value) -> String {
    [
        member.and_then(|m| m.get("nick")),
        user.get("global_name"),
        user.get("username"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(|s| !s.is_empty())
    .unwrap_or_default()
    .to_owned()
}

/// Large guilds omit offline members from `GUILD_CREATE`; the full roster
/// has to be requested with op 8.
pub fn needs_member_request(guild_create: &Value) -> bool {
    bool_field(guild_create, "large") && !bool_field(guild_create, "unavailable")
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    fn translator() -> GatewayTranslator {
        GatewayTranslator::new(
            AdminPolicy::new(vec!["777".to_owned()], Some("Admin".to_owned())),
            Some("999".to_owned()),
        )
    }

    fn guild_create() -> Value {
        json!({
            "id": "g1",
            "name": "Lounge",
            "owner_id": "u-owner",
            "roles": [
                {"id": "r-admin", "name": "admin", "permissions": "0"},
                {"id": "r-mod", "name": "Moderator", "permissions": "8"},
                {"id": "r-plain", "name": "Member", "permissions": "1024"}
            ],
            "members": [
                {"user": {"id": "u-owner", "username": "owner"}, "roles": []},
                {"user": {"id": "u-a", "username": "alice"}, "nick": "Ali", "roles": ["r-admin"]},
                {"user": {"id": "u-m", "username": "mo", "global_name": "Mo"}, "roles": ["r-mod"]},
                {"user": {"id": "u-p", "username": "pat"}, "roles": ["r-plain"]},
                {"user": {"id": "u-x", "username": "xavier"}, "roles": ["777"]},
                {"user": {"id": "999", "username": "nudge", "bot": true}, "roles": []}
            ]
        })
    }

    fn snapshot(event: Option<GatewayEvent>) -> RosterSnapshot {
        match event {
            Some(GatewayEvent::RosterSnapshot(snapshot)) => snapshot,
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn ready_records_bot_id() {
        let mut t = GatewayTranslator::new(AdminPolicy::default(), None);
        let event = t.translate("READY", &json!({"user": {"id": "42"}}));
        assert!(matches!(event, Some(GatewayEvent::Ready { ref bot_id }) if bot_id == "42"));
        assert_eq!(t.bot_id(), Some("42"));
    }

    #[test]
    fn guild_create_marks_admins_by_name_permission_id_and_owner() {
        let mut t = translator();
        let snapshot = snapshot(t.translate("GUILD_CREATE", &guild_create()));

        assert_eq!(snapshot.community.name, "Lounge");
        let admin_of = |id: &str| {
            snapshot
                .members
                .iter()
                .find(|m| m.id.as_str() == id)
                .map(|m| m.is_admin)
                .expect("member present")
        };
        assert_eq!(admin_of("u-owner"), Some(true));
        assert_eq!(admin_of("u-a"), Some(true));
        assert_eq!(admin_of("u-m"), Some(true));
        assert_eq!(admin_of("u-p"), Some(false));
        assert_eq!(admin_of("u-x"), Some(true));

        let alice = snapshot.members.iter().find(|m| m.id.as_str() == "u-a").unwrap();
        assert_eq!(alice.display_name, "Ali");
        let bot = snapshot.members.iter().find(|m| m.id.as_str() == "999").unwrap();
        assert!(bot.is_bot);
    }

    #[test]
    fn unavailable_guilds_are_not_removals() {
        let mut t = translator();
        assert!(t.translate("GUILD_CREATE", &json!({"id": "g1", "unavailable": true})).is_none());
        assert!(t.translate("GUILD_DELETE", &json!({"id": "g1", "unavailable": true})).is_none());
        assert!(matches!(
            t.translate("GUILD_DELETE", &json!({"id": "g1"})),
            Some(GatewayEvent::CommunityRemoved(id)) if id.as_str() == "g1"
        ));
    }

    #[test]
    fn guild_message_carries_live_admin_signal_and_mention() {
        let mut t = translator();
        t.translate("GUILD_CREATE", &guild_create());

        let event = t.translate(
            "MESSAGE_CREATE",
            &json!({
                "guild_id": "g1",
                "channel_id": "c1",
                "content": " <@999> fire ",
                "author": {"id": "u-a", "username": "alice"},
                "member": {"roles": ["r-admin"], "nick": "Ali"},
                "mentions": [{"id": "999"}]
            }),
        );
        let Some(GatewayEvent::Message(inbound)) = event else {
            panic!("expected message");
        };
        assert_eq!(inbound.author.is_admin, Some(true));
        assert!(inbound.mentions_this_bot);
        assert!(!inbound.is_direct_message);
        assert_eq!(inbound.reply_target, "c1");
        assert_eq!(inbound.text, "<@999> fire");
        assert_eq!(inbound.community.unwrap().name, "Lounge");
    }

    #[test]
    fn role_update_revokes_admin() {
        let mut t = translator();
        t.translate("GUILD_CREATE", &guild_create());
        t.translate(
            "GUILD_ROLE_UPDATE",
            &json!({"guild_id": "g1", "role": {"id": "r-mod", "name": "Moderator", "permissions": "0"}}),
        );

        let event = t.translate(
            "GUILD_MEMBER_UPDATE",
            &json!({"guild_id": "g1", "user": {"id": "u-m", "username": "mo"}, "roles": ["r-mod"]}),
        );
        let Some(GatewayEvent::MemberObserved { member, community }) = event else {
            panic!("expected member update");
        };
        assert_eq!(member.is_admin, Some(false));
        assert_eq!(community.id.as_str(), "g1");
    }

    #[test]
    fn direct_message_has_no_community() {
        let mut t = translator();
        let event = t.translate(
            "MESSAGE_CREATE",
            &json!({
                "channel_id": "dm-1",
                "content": "stop",
                "author": {"id": "u-p", "username": "pat"}
            }),
        );
        let Some(GatewayEvent::Message(inbound)) = event else {
            panic!("expected message");
        };
        assert!(inbound.is_direct_message);
        assert!(inbound.community.is_none());
        assert_ne!(inbound.author.is_admin, Some(true));
    }

    #[test]
    fn member_chunks_become_snapshots() {
        let mut t = translator();
        t.translate("GUILD_CREATE", &json!({"id": "g1", "name": "Lounge", "large": true}));
        let chunk = snapshot(t.translate(
            "GUILD_MEMBERS_CHUNK",
            &json!({
                "guild_id": "g1",
                "members": [{"user": {"id": "u9", "username": "nina"}, "roles": ["777"]}]
            }),
        ));
        assert_eq!(chunk.community.name, "Lounge");
        assert_eq!(chunk.members.len(), 1);
        assert_eq!(chunk.members[0].is_admin, Some(true));
        assert!(needs_member_request(&json!({"id": "g1", "large": true})));
        assert!(!needs_member_request(&json!({"id": "g1"})));
    }

    #[test]
    fn own_messages_are_dropped() {
        let mut t = translator();
        let event = t.translate(
            "MESSAGE_CREATE",
            &json!({"channel_id": "c", "content": "pong", "author": {"id": "999", "bot": true}}),
        );
        assert!(event.is_none());
    }

    #[test]
    fn message_before_guild_create_has_unknown_admin_signal() {
        let t = translator();
        let event = t.on_message(&json!({
            "guild_id": "g1",
            "channel_id": "c1",
            "content": "disable",
            "author": {"id": "u-owner", "username": "owner"},
            "member": {"roles": ["r-admin"]}
        }));
        let Some(GatewayEvent::Message(inbound)) = event else {
            panic!("expected message");
        };
        assert_eq!(inbound.author.is_admin, None);

        // A configured admin role id needs no guild state.
        let event = t.on_message(&json!({
            "guild_id": "g1",
            "channel_id": "c1",
            "content": "disable",
            "author": {"id": "u-x", "username": "xavier"},
            "member": {"roles": ["777"]}
        }));
        let Some(GatewayEvent::Message(inbound)) = event else {
            panic!("expected message");
        };
        assert_eq!(inbound.author.is_admin, Some(true));
    }
}
