//! In-app notifications for an open session, independent of push delivery.

use crate::mention::mentions_name;
use crate::notify::truncate_body;
use crate::types::{Channel, ChannelType, Member, Message, Notification, NotificationKind};

/// Channels the in-app watcher follows for a viewer: every team channel and
/// the direct channels the viewer participates in.
pub fn watched_channels(channels: &[Channel], viewer_id: &str) -> Vec<String> {
    channels
        .iter()
        .filter(|channel| match channel.channel_type {
            ChannelType::Team => true,
            ChannelType::Direct => channel.participants().iter().any(|id| id == viewer_id),
            ChannelType::AiAssistant => false,
        })
        .map(|channel| channel.id.clone())
        .collect()
}

/// Builds the notification `viewer` should see for `message`, if any.
/// `reply_author` is the author of the message being replied to.
pub fn classify(
    message: &Message,
    channel: &Channel,
    viewer: &Member,
    reply_author: Option<&str>,
) -> Option<Notification> {
    if message.is_authored_by(&viewer.id) {
        return None;
    }
    if !matches!(channel.channel_type, ChannelType::Team | ChannelType::Direct) {
        return None;
    }

    let kind = if channel.channel_type == ChannelType::Direct {
        NotificationKind::Direct
    } else if reply_author == Some(viewer.id.as_str()) {
        NotificationKind::Reply
    } else if mentions_viewer(&message.content, viewer) {
        NotificationKind::Mention
    } else {
        NotificationKind::Message
    };

    let title = match channel.channel_type {
        ChannelType::Direct => "New message in DM".to_string(),
        _ => format!("New message in #{}", channel.name),
    };

    Some(Notification {
        recipient_id: viewer.id.clone(),
        kind,
        channel_id: channel.id.clone(),
        message_id: message.id.clone(),
        title,
        body: truncate_body(&message.content),
    })
}

fn mentions_viewer(content: &str, viewer: &Member) -> bool {
    let first_name = viewer
        .full_name
        .as_deref()
        .and_then(|name| name.split_whitespace().next())
        .unwrap_or("");
    let local_part = viewer.email.split('@').next().unwrap_or("");
    mentions_name(content, first_name) || mentions_name(content, local_part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::types::{MessageMetadata, Role};

    fn viewer() -> Member {
        Member {
            id: "dana".to_string(),
            organization_id: Some("org".to_string()),
            full_name: Some("Dana Scully".to_string()),
            email: "dscully@acme.test".to_string(),
            role: Role::Member,
        }
    }

    fn channel(id: &str, kind: ChannelType, participants: &[&str]) -> Channel {
        Channel {
            id: id.to_string(),
            organization_id: "org".to_string(),
            name: id.to_string(),
            description: None,
            channel_type: kind,
            metadata: json!({ "participants": participants }),
            created_at: Utc::now(),
        }
    }

    fn message(author: &str, content: &str) -> Message {
        Message {
            id: "m1".to_string(),
            channel_id: "c".to_string(),
            author_id: Some(author.to_string()),
            content: content.to_string(),
            is_ai_response: false,
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn own_messages_are_silent() {
        let team = channel("general", ChannelType::Team, &[]);
        assert!(classify(&message("dana", "hello"), &team, &viewer(), None).is_none());
    }

    #[test]
    fn kinds_follow_channel_reply_and_mention() {
        let team = channel("general", ChannelType::Team, &[]);
        let dm = channel("dm", ChannelType::Direct, &["dana", "fox"]);
        let v = viewer();

        let direct = classify(&message("fox", "hey"), &dm, &v, None).unwrap();
        assert_eq!(direct.kind, NotificationKind::Direct);
        assert_eq!(direct.title, "New message in DM");

        let reply = classify(&message("fox", "agreed"), &team, &v, Some("dana")).unwrap();
        assert_eq!(reply.kind, NotificationKind::Reply);

        let mention = classify(&message("fox", "@Dana can you look?"), &team, &v, None).unwrap();
        assert_eq!(mention.kind, NotificationKind::Mention);
        assert_eq!(mention.title, "New message in #general");

        let by_handle = classify(&message("fox", "cc @dscully"), &team, &v, None).unwrap();
        assert_eq!(by_handle.kind, NotificationKind::Mention);

        let plain = classify(&message("fox", "standup moved"), &team, &v, None).unwrap();
        assert_eq!(plain.kind, NotificationKind::Message);
    }

    #[test]
    fn assistant_channels_are_not_watched() {
        let channels = [
            channel("general", ChannelType::Team, &[]),
            channel("ai", ChannelType::AiAssistant, &[]),
            channel("dm-mine", ChannelType::Direct, &["dana", "fox"]),
            channel("dm-other", ChannelType::Direct, &["fox", "walter"]),
        ];
        assert_eq!(
            watched_channels(&channels, "dana"),
            vec!["general".to_string(), "dm-mine".to_string()]
        );
    }
}
