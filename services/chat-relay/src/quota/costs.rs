use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Metered upstream operations, named after the YouTube Data API method they hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointCategory {
    #[serde(rename = "search.list")]
    Search,
    #[serde(rename = "videos.list")]
    Videos,
    #[serde(rename = "channels.list")]
    Channels,
    #[serde(rename = "playlistItems.list")]
    PlaylistItems,
    #[serde(rename = "liveChatMessages.list")]
    LiveChatMessages,
}

impl EndpointCategory {
    pub const ALL: [EndpointCategory; 5] = [
        EndpointCategory::Search,
        EndpointCategory::Videos,
        EndpointCategory::Channels,
        EndpointCategory::PlaylistItems,
        EndpointCategory::LiveChatMessages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointCategory::Search => "search.list",
            EndpointCategory::Videos => "videos.list",
            EndpointCategory::Channels => "channels.list",
            EndpointCategory::PlaylistItems => "playlistItems.list",
            EndpointCategory::LiveChatMessages => "liveChatMessages.list",
        }
    }
}

impl fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EndpointCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| format!("unknown endpoint category {value}"))
    }
}

/// Per-call cost in quota units, keyed by category.
///
/// Values follow the upstream's published accounting. A category missing from
/// the table is free and never blocked.
#[derive(Debug, Clone)]
pub struct CostTable {
    costs: HashMap<EndpointCategory, u64>,
}

impl Default for CostTable {
    fn default() -> Self {
        let costs = HashMap::from([
            (EndpointCategory::Search, 100),
            (EndpointCategory::Videos, 1),
            (EndpointCategory::Channels, 1),
            (EndpointCategory::LiveChatMessages, 5),
            (EndpointCategory::PlaylistItems, 1),
        ]);
        Self { costs }
    }
}

impl CostTable {
    pub fn with_cost(mut self, category: EndpointCategory, cost: u64) -> Self {
        self.costs.insert(category, cost);
        self
    }

    pub fn without(mut self, category: EndpointCategory) -> Self {
        self.costs.remove(&category);
        self
    }

    pub fn cost_of(&self, category: EndpointCategory) -> Option<u64> {
        self.costs.get(&category).copied()
    }
}
