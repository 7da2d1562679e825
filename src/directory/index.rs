//! In-memory lookup indices over one [`Snapshot`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::model::{Channel, ChannelType, Snapshot, User};
use super::DirectoryError;
use crate::reference::{id_kind, ConversationRef, IdKind};

/// A snapshot together with its resolution indices.
///
/// Built in one pass from a whole [`Snapshot`] and never modified
/// afterwards, so every index entry points at a record from the same fetch.
#[derive(Debug)]
pub struct Directory {
    snapshot: Snapshot,
    users_by_id: HashMap<String, usize>,
    channels_by_id: HashMap<String, usize>,
    /// Handle → user positions.  Deleted users are not indexed.
    users_by_handle: HashMap<String, Vec<usize>>,
    /// Channel name → positions.  DMs are keyed `@handle`.
    channels_by_name: HashMap<String, Vec<usize>>,
    /// User ID → DM channel position.
    dm_by_user: HashMap<String, usize>,
}

impl Directory {
    pub fn new(snapshot: Snapshot) -> Self {
        let mut users_by_id = HashMap::with_capacity(snapshot.users.len());
        let mut users_by_handle: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, user) in snapshot.users.iter().enumerate() {
            users_by_id.insert(user.id.clone(), pos);
            if !user.deleted && !user.name.is_empty() {
                users_by_handle.entry(user.name.clone()).or_default().push(pos);
            }
        }

        let mut channels_by_id = HashMap::with_capacity(snapshot.channels.len());
        let mut channels_by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut dm_by_user = HashMap::new();
        for (pos, channel) in snapshot.channels.iter().enumerate() {
            channels_by_id.insert(channel.id.clone(), pos);
            if channel.kind == ChannelType::Im {
                if let Some(uid) = &channel.user {
                    dm_by_user.insert(uid.clone(), pos);
                    let partner = users_by_id.get(uid).map(|&i| &snapshot.users[i]);
                    if let Some(user) = partner.filter(|u| !u.name.is_empty()) {
                        channels_by_name
                            .entry(format!("@{}", user.name))
                            .or_default()
                            .push(pos);
                    }
                }
            } else if !channel.name.is_empty() {
                channels_by_name
                    .entry(channel.name.clone())
                    .or_default()
                    .push(pos);
            }
        }

        Self {
            snapshot,
            users_by_id,
            channels_by_id,
            users_by_handle,
            channels_by_name,
            dm_by_user,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.snapshot.fetched_at
    }

    pub fn users(&self) -> &[User] {
        &self.snapshot.users
    }

    pub fn channels(&self) -> &[Channel] {
        &self.snapshot.channels
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users_by_id.get(id).map(|&i| &self.snapshot.users[i])
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels_by_id.get(id).map(|&i| &self.snapshot.channels[i])
    }

    /// DM conversation with `user_id`, if the caller has one.
    pub fn dm_channel(&self, user_id: &str) -> Option<&Channel> {
        self.dm_by_user.get(user_id).map(|&i| &self.snapshot.channels[i])
    }

    /// Resolve a token to a conversation ID.
    pub fn resolve_channel(&self, token: &str) -> Result<String, DirectoryError> {
        let reference = ConversationRef::parse(token)?;
        self.resolve_channel_ref(&reference)
    }

    pub fn resolve_channel_ref(&self, reference: &ConversationRef) -> Result<String, DirectoryError> {
        match reference {
            ConversationRef::Id(id) => match id_kind(id) {
                Some(IdKind::User) => self
                    .dm_channel(id)
                    .map(|c| c.id.clone())
                    .ok_or_else(|| DirectoryError::NotFound(format!("direct message with {id}"))),
                _ => Ok(id.clone()),
            },
            ConversationRef::Permalink { channel_id, .. } => Ok(channel_id.clone()),
            ConversationRef::ChannelName(name) => self.channel_by_name(name, reference),
            ConversationRef::UserHandle(handle) => {
                match self.user_by_handle(handle, reference) {
                    Ok(uid) => {
                        if let Some(dm) = self.dm_channel(&uid) {
                            return Ok(dm.id.clone());
                        }
                    }
                    Err(e @ DirectoryError::Ambiguous { .. }) => return Err(e),
                    Err(_) => {}
                }
                self.channel_by_name(&format!("@{handle}"), reference)
            }
        }
    }

    /// Resolve a token to a member ID.
    pub fn resolve_user(&self, token: &str) -> Result<String, DirectoryError> {
        let reference = ConversationRef::parse(token)?;
        self.resolve_user_ref(&reference)
    }

    pub fn resolve_user_ref(&self, reference: &ConversationRef) -> Result<String, DirectoryError> {
        match reference {
            ConversationRef::Id(id) => match id_kind(id) {
                Some(IdKind::User) => Ok(id.clone()),
                Some(IdKind::DirectMessage) => self
                    .channel(id)
                    .and_then(|c| c.user.clone())
                    .ok_or_else(|| DirectoryError::NotFound(format!("partner of {id}"))),
                _ => Err(DirectoryError::NotFound(format!("{id} is not a member ID"))),
            },
            ConversationRef::UserHandle(handle) | ConversationRef::ChannelName(handle) => {
                self.user_by_handle(handle, reference)
            }
            ConversationRef::Permalink { .. } => Err(DirectoryError::NotFound(format!(
                "{reference} links to a message, not a member"
            ))),
        }
    }

    /// `#name` for channels, `@handle` for DMs; the form
    /// [`resolve_channel`](Self::resolve_channel) accepts back.
    pub fn channel_name(&self, id: &str) -> Option<String> {
        let channel = self.channel(id)?;
        if channel.kind == ChannelType::Im {
            let handle = channel.user.as_deref().and_then(|u| self.user_handle(u))?;
            return Some(format!("@{handle}"));
        }
        (!channel.name.is_empty()).then(|| format!("#{}", channel.name))
    }

    /// Handle of `id`, including deleted members.
    pub fn user_handle(&self, id: &str) -> Option<&str> {
        self.user(id)
            .map(|u| u.name.as_str())
            .filter(|name| !name.is_empty())
    }

    fn channel_by_name(&self, key: &str, reference: &ConversationRef) -> Result<String, DirectoryError> {
        let ids = self
            .channels_by_name
            .get(key)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&i| self.snapshot.channels[i].id.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        single(ids, reference)
    }

    fn user_by_handle(&self, handle: &str, reference: &ConversationRef) -> Result<String, DirectoryError> {
        let ids = self
            .users_by_handle
            .get(handle)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&i| self.snapshot.users[i].id.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        single(ids, reference)
    }
}

fn single(mut ids: Vec<String>, reference: &ConversationRef) -> Result<String, DirectoryError> {
    match ids.len() {
        0 => Err(DirectoryError::NotFound(reference.to_string())),
        1 => Ok(ids.remove(0)),
        _ => {
            ids.sort();
            Err(DirectoryError::Ambiguous {
                reference: reference.to_string(),
                candidates: ids,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.into(),
            name: name.into(),
            real_name: String::new(),
            display_name: String::new(),
            deleted: false,
            is_bot: false,
        }
    }

    fn channel(id: &str, name: &str, kind: ChannelType) -> Channel {
        Channel {
            id: id.into(),
            name: name.into(),
            topic: String::new(),
            purpose: String::new(),
            member_count: 0,
            kind,
            is_ext_shared: false,
            is_archived: false,
            user: None,
        }
    }

    fn dm(id: &str, user: &str) -> Channel {
        Channel {
            user: Some(user.into()),
            ..channel(id, "", ChannelType::Im)
        }
    }

    fn directory() -> Directory {
        let mut gone = user("U000000003", "carol");
        gone.deleted = true;
        Directory::new(Snapshot::new(
            vec![user("U000000001", "alice"), user("U000000002", "bob"), gone],
            vec![
                channel("C000000001", "general", ChannelType::PublicChannel),
                channel("C000000002", "dup", ChannelType::PublicChannel),
                channel("G000000003", "dup", ChannelType::PrivateChannel),
                dm("D000000001", "U000000001"),
                dm("D000000003", "U000000003"),
            ],
            Utc::now(),
        ))
    }

    #[test]
    fn names_and_handles() {
        let d = directory();
        assert_eq!(d.resolve_channel("#general").unwrap(), "C000000001");
        assert_eq!(d.resolve_channel("general").unwrap(), "C000000001");
        assert_eq!(d.resolve_user("@bob").unwrap(), "U000000002");
        assert_eq!(d.resolve_user("bob").unwrap(), "U000000002");
    }

    #[test]
    fn matching_is_exact() {
        let d = directory();
        assert!(matches!(
            d.resolve_channel("#General"),
            Err(DirectoryError::NotFound(_))
        ));
        assert!(matches!(
            d.resolve_channel("#gen"),
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_names_are_ambiguous() {
        let d = directory();
        match d.resolve_channel("#dup") {
            Err(DirectoryError::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates, vec!["C000000002", "G000000003"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn handle_resolves_to_dm() {
        let d = directory();
        assert_eq!(d.resolve_channel("@alice").unwrap(), "D000000001");
        assert_eq!(d.resolve_channel("U000000001").unwrap(), "D000000001");
        // bob has no DM open with us
        assert!(d.resolve_channel("@bob").is_err());
    }

    #[test]
    fn deleted_users_keep_reverse_lookups() {
        let d = directory();
        assert!(matches!(
            d.resolve_user("@carol"),
            Err(DirectoryError::NotFound(_))
        ));
        assert_eq!(d.user_handle("U000000003"), Some("carol"));
        assert_eq!(d.channel_name("D000000003").as_deref(), Some("@carol"));
        // DM alias still works through the channel-name fallback
        assert_eq!(d.resolve_channel("@carol").unwrap(), "D000000003");
    }

    #[test]
    fn reverse_names_round_trip() {
        let d = directory();
        for id in ["C000000001", "D000000001"] {
            let name = d.channel_name(id).unwrap();
            assert_eq!(d.resolve_channel(&name).unwrap(), id);
        }
    }

    #[test]
    fn existing_ids_come_back_unchanged() {
        let d = directory();
        for c in d.channels() {
            assert_eq!(d.resolve_channel(&c.id).unwrap(), c.id);
        }
    }

    #[test]
    fn dm_with_nameless_partner_has_no_handle() {
        let d = Directory::new(Snapshot::new(
            vec![user("U000000001", "alice"), user("U000000004", "")],
            vec![dm("D000000001", "U000000001"), dm("D000000004", "U000000004")],
            Utc::now(),
        ));
        assert!(!d.channels_by_name.contains_key("@"));
        assert_eq!(d.user_handle("U000000004"), None);
        assert_eq!(d.channel_name("D000000004"), None);
        assert_eq!(d.resolve_channel("U000000004").unwrap(), "D000000004");
        assert_eq!(d.resolve_channel("@alice").unwrap(), "D000000001");
    }

    #[test]
    fn dm_id_resolves_to_partner() {
        let d = directory();
        assert_eq!(d.resolve_user("D000000001").unwrap(), "U000000001");
    }
}
