//! Resource paths and their decode kind.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of record a resource delivers in subscription updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A feed (environment) and all of its datastreams.
    Feed,
    /// A single datastream within a feed.
    Datastream,
}

/// A resource path with its kind resolved at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    path: String,
    kind: ResourceKind,
}

impl Resource {
    /// `/feeds/{feed_id}`
    pub fn feed(feed_id: impl fmt::Display) -> Self {
        Self {
            path: format!("/feeds/{}", feed_id),
            kind: ResourceKind::Feed,
        }
    }

    /// `/feeds/{feed_id}/datastreams/{datastream_id}`
    pub fn datastream(feed_id: impl fmt::Display, datastream_id: impl fmt::Display) -> Self {
        Self {
            path: format!("/feeds/{}/datastreams/{}", feed_id, datastream_id),
            kind: ResourceKind::Datastream,
        }
    }

    /// Classifies an arbitrary path by its segments.
    ///
    /// A path whose second-to-last segment is `datastreams` addresses a
    /// datastream; everything else decodes as a feed.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let mut segments = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .rev();
        let last = segments.next();
        let parent = segments.next();
        let kind = match (parent, last) {
            (Some("datastreams"), Some(_)) => ResourceKind::Datastream,
            _ => ResourceKind::Feed,
        };
        Self { path, kind }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for Resource {
    fn from(path: &str) -> Self {
        Self::from_path(path)
    }
}

impl From<String> for Resource {
    fn from(path: String) -> Self {
        Self::from_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let feed = Resource::feed(42);
        assert_eq!(feed.path(), "/feeds/42");
        assert_eq!(feed.kind(), ResourceKind::Feed);

        let ds = Resource::datastream(42, "temperature");
        assert_eq!(ds.path(), "/feeds/42/datastreams/temperature");
        assert_eq!(ds.kind(), ResourceKind::Datastream);
    }

    #[test]
    fn test_from_path_classification() {
        assert_eq!(Resource::from("/feeds/42").kind(), ResourceKind::Feed);
        assert_eq!(
            Resource::from("/feeds/42/datastreams/0").kind(),
            ResourceKind::Datastream
        );
        assert_eq!(
            Resource::from("/feeds/42/datastreams/0/").kind(),
            ResourceKind::Datastream
        );
        assert_eq!(
            Resource::from("/feeds/42/datastreams/0?duration=6hours").kind(),
            ResourceKind::Datastream
        );
        // Listing datastreams is not a single datastream.
        assert_eq!(
            Resource::from("/feeds/42/datastreams").kind(),
            ResourceKind::Feed
        );
        // A feed that happens to be named after the collection.
        assert_eq!(Resource::from("/feeds/datastreams").kind(), ResourceKind::Feed);
    }

    #[test]
    fn test_from_path_keeps_path() {
        let resource = Resource::from(String::from("/feeds/7?x=1"));
        assert_eq!(resource.path(), "/feeds/7?x=1");
        assert_eq!(resource.to_string(), "/feeds/7?x=1");
    }
}
