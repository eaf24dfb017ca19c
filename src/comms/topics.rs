//! Per-device topic names
//!
//! A device's whole topic set hangs off its channel id. The set is always
//! rebuilt in one piece from one id, never patched.

use std::fmt;

/// Kind of inbound message, judged by the topic it arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Data,
    Control,
    Paste,
    Vdisk,
    Unknown,
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKind::Data => write!(f, "data"),
            TopicKind::Control => write!(f, "control"),
            TopicKind::Paste => write!(f, "paste"),
            TopicKind::Vdisk => write!(f, "vdisk"),
            TopicKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// The eight names derived from one channel id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    channel_id: u32,
    pub client_id: String,
    pub console_data: String,
    pub sub_data: String,
    pub sub_control: String,
    pub sub_paste: String,
    pub sub_vdisk_response: String,
    pub vdisk_read: String,
    pub vdisk_write: String,
}

impl TopicSet {
    pub fn derive(channel_id: u32) -> Self {
        Self {
            channel_id,
            client_id: format!("altair-{}", channel_id),
            console_data: format!("altair/{}/web", channel_id),
            sub_data: format!("altair/{}/dev/console", channel_id),
            sub_control: format!("altair/{}/dev/ctrl", channel_id),
            sub_paste: format!("altair/{}/dev/paste", channel_id),
            sub_vdisk_response: format!("altair/{}/vdisk/response", channel_id),
            vdisk_read: format!("altair/{}/vdisk/read", channel_id),
            vdisk_write: format!("altair/{}/vdisk/write", channel_id),
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// The four inbound topics, in subscription order
    pub fn subscriptions(&self) -> [&str; 4] {
        [
            &self.sub_data,
            &self.sub_control,
            &self.sub_paste,
            &self.sub_vdisk_response,
        ]
    }

    /// Whole-name match against the inbound topics
    pub fn classify(&self, topic: &str) -> TopicKind {
        if topic == self.sub_data {
            TopicKind::Data
        } else if topic == self.sub_control {
            TopicKind::Control
        } else if topic == self.sub_paste {
            TopicKind::Paste
        } else if topic == self.sub_vdisk_response {
            TopicKind::Vdisk
        } else {
            TopicKind::Unknown
        }
    }

    fn all(&self) -> [&str; 8] {
        [
            &self.client_id,
            &self.console_data,
            &self.sub_data,
            &self.sub_control,
            &self.sub_paste,
            &self.sub_vdisk_response,
            &self.vdisk_read,
            &self.vdisk_write,
        ]
    }
}

/// Holds the active topic set; rebuilding replaces every name at once
#[derive(Debug, Default)]
pub struct TopicBinder {
    active: Option<TopicSet>,
}

impl TopicBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the previous set and derives a fresh one for `channel_id`
    pub fn derive_topics(&mut self, channel_id: u32) -> &TopicSet {
        self.active = None;
        self.active.insert(TopicSet::derive(channel_id))
    }

    pub fn active(&self) -> Option<&TopicSet> {
        self.active.as_ref()
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Classifies against the active set; everything is unknown without one
    pub fn classify_topic(&self, topic: &str) -> TopicKind {
        self.active
            .as_ref()
            .map_or(TopicKind::Unknown, |set| set.classify(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let mut binder = TopicBinder::new();
        let first = binder.derive_topics(42).clone();
        let second = binder.derive_topics(42).clone();
        assert_eq!(first, second);
        assert_eq!(first.all(), second.all());
    }

    #[test]
    fn neighbouring_ids_differ_everywhere() {
        let a = TopicSet::derive(42);
        let b = TopicSet::derive(43);
        for (x, y) in a.all().iter().zip(b.all().iter()) {
            assert_ne!(x, y);
        }
    }

    #[test]
    fn names_are_distinct_within_a_set() {
        let set = TopicSet::derive(7);
        let names = set.all();
        for (i, x) in names.iter().enumerate() {
            for y in names.iter().skip(i + 1) {
                assert_ne!(x, y);
            }
        }
    }

    #[test]
    fn classify_requires_whole_name() {
        let set = TopicSet::derive(4);
        assert_eq!(set.classify("altair/4/dev/console"), TopicKind::Data);
        assert_eq!(set.classify("altair/4/dev/ctrl"), TopicKind::Control);
        assert_eq!(set.classify("altair/4/dev/paste"), TopicKind::Paste);
        assert_eq!(set.classify("altair/4/vdisk/response"), TopicKind::Vdisk);

        // another device sharing a prefix
        assert_eq!(set.classify("altair/42/dev/console"), TopicKind::Unknown);
        assert_eq!(set.classify("altair/4/dev/consol"), TopicKind::Unknown);
        assert_eq!(set.classify("altair/4/dev/console/x"), TopicKind::Unknown);
        assert_eq!(set.classify("altair/4/web"), TopicKind::Unknown);
    }

    #[test]
    fn rebuild_replaces_the_whole_set() {
        let mut binder = TopicBinder::new();
        binder.derive_topics(1);
        assert_eq!(binder.classify_topic("altair/1/dev/ctrl"), TopicKind::Control);

        binder.derive_topics(2);
        assert_eq!(binder.classify_topic("altair/1/dev/ctrl"), TopicKind::Unknown);
        assert_eq!(binder.classify_topic("altair/2/dev/ctrl"), TopicKind::Control);

        binder.clear();
        assert_eq!(binder.classify_topic("altair/2/dev/ctrl"), TopicKind::Unknown);
    }
}
