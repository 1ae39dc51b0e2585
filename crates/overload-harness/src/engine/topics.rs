/// Fixed-width numeric topic suffixes, generated once at startup and shared
/// read-only by every handle of a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    suffixes: Vec<String>,
}

impl TopicSet {
    /// Suffixes `1..=count`, zero-padded to `width` digits.
    pub fn sequential(count: usize, width: usize) -> Self {
        let suffixes = (1..=count)
            .map(|n| format!("{:0width$}", n, width = width))
            .collect();
        Self { suffixes }
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    pub fn batches(&self, size: usize) -> std::slice::Chunks<'_, String> {
        self.suffixes.chunks(size.max(1))
    }
}

pub fn topic_path(prefix: &str, suffix: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), suffix)
}

/// `$share/<group>/<topic>` when a group is given, the bare topic otherwise.
pub fn subscription_filter(group: &str, topic: &str) -> String {
    if group.trim().is_empty() {
        topic.to_string()
    } else {
        format!("$share/{}/{}", group, topic)
    }
}
