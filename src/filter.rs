//! Declarative event filters for listeners.
//!
//! A [`ListenerFilter`] is a conjunction of optional constraints. Evaluation is pure
//! and synchronous; role and permission constraints fail closed when the event
//! carries no membership context.

use serenity::model::permissions::Permissions;

use crate::models::MemberInfo;

/// The fields of an inbound event that filters look at.
#[derive(Debug, Clone, Copy)]
pub struct FilterTarget<'a> {
    pub author_id: Option<u64>,
    /// `None` when the author is unknown (partial payloads).
    pub author_is_bot: Option<bool>,
    /// `None` for direct messages.
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    pub member: Option<&'a MemberInfo>,
}

impl FilterTarget<'_> {
    pub fn is_direct_message(&self) -> bool {
        self.guild_id.is_none()
    }
}

/// Declarative constraints attached to a listener registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerFilter {
    pub allow_bots: bool,
    pub allow_dms: bool,
    pub guild_ids: Option<Vec<u64>>,
    pub channel_ids: Option<Vec<u64>>,
    pub allowed_authors: Option<Vec<u64>>,
    pub disallowed_authors: Option<Vec<u64>>,
    pub require_roles: Option<Vec<u64>>,
    pub banned_roles: Option<Vec<u64>>,
    pub require_permissions: Option<Permissions>,
}

impl ListenerFilter {
    /// Default filter: humans only, guild messages only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_bots(mut self) -> Self {
        self.allow_bots = true;
        self
    }

    pub fn allow_dms(mut self) -> Self {
        self.allow_dms = true;
        self
    }

    pub fn in_guilds(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.guild_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn in_channels(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.channel_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn only_authors(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.allowed_authors = Some(ids.into_iter().collect());
        self
    }

    pub fn except_authors(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.disallowed_authors = Some(ids.into_iter().collect());
        self
    }

    pub fn require_roles(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.require_roles = Some(ids.into_iter().collect());
        self
    }

    pub fn ban_roles(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.banned_roles = Some(ids.into_iter().collect());
        self
    }

    pub fn require_permissions(mut self, permissions: Permissions) -> Self {
        self.require_permissions = Some(permissions);
        self
    }

    fn has_author_constraints(&self) -> bool {
        self.allowed_authors.is_some() || self.disallowed_authors.is_some()
    }

    /// Evaluate the filter against an event.
    ///
    /// Allow-lists are checked before deny-lists. A missing author fails any
    /// author constraint; missing membership fails any role or permission constraint.
    pub fn passes(&self, target: &FilterTarget<'_>) -> bool {
        if !self.allow_bots && target.author_is_bot == Some(true) {
            return false;
        }

        if !self.allow_dms && target.is_direct_message() {
            return false;
        }

        if let Some(guilds) = &self.guild_ids {
            match target.guild_id {
                Some(guild_id) if guilds.contains(&guild_id) => {}
                _ => return false,
            }
        }

        if let Some(channels) = &self.channel_ids {
            if !channels.contains(&target.channel_id) {
                return false;
            }
        }

        if self.has_author_constraints() {
            let Some(author_id) = target.author_id else {
                return false;
            };
            if let Some(allowed) = &self.allowed_authors {
                if !allowed.contains(&author_id) {
                    return false;
                }
            }
            if let Some(denied) = &self.disallowed_authors {
                if denied.contains(&author_id) {
                    return false;
                }
            }
        }

        self.passes_membership(target.member)
    }

    fn passes_membership(&self, member: Option<&MemberInfo>) -> bool {
        let needs_member = self.require_roles.is_some()
            || self.banned_roles.is_some()
            || self.require_permissions.is_some();
        if !needs_member {
            return true;
        }

        let Some(member) = member else {
            return false;
        };

        if let Some(required) = &self.require_roles {
            if !required.iter().all(|role| member.has_role(*role)) {
                return false;
            }
        }

        if let Some(banned) = &self.banned_roles {
            if banned.iter().any(|role| member.has_role(*role)) {
                return false;
            }
        }

        if let Some(required) = self.require_permissions {
            match member.permissions {
                Some(perms) if perms.administrator() || perms.contains(required) => {}
                _ => return false,
            }
        }

        true
    }
}
