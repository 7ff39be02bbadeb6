//! JSON 文件支撑的内存内容图
//!
//! 格式：`{"topics":[{id,name,sections:{..},articles:[..],connections:[{id,relation}]}],"strategies":{"s1":["eurusd"]}}`。
//! CLI 用它代替图数据库，测试用它做夹具。

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use super::{Article, ConnectedTopic, ContentError, ContentProvider, TopicSnapshot};

#[derive(Debug, Deserialize)]
struct GraphFile {
    #[serde(default)]
    topics: Vec<TopicRecord>,
    #[serde(default)]
    strategies: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TopicRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sections: HashMap<String, String>,
    #[serde(default)]
    articles: Vec<Article>,
    #[serde(default)]
    connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Deserialize)]
struct ConnectionRecord {
    id: String,
    #[serde(default = "default_relation")]
    relation: String,
}

fn default_relation() -> String {
    "RELATED".to_string()
}

/// 内存图：话题表 + 策略映射
#[derive(Debug)]
pub struct InMemoryGraph {
    topics: HashMap<String, TopicRecord>,
    strategies: HashMap<String, Vec<String>>,
    /// 剩余注入的瞬时故障次数（测试用）
    failures: AtomicU32,
}

impl InMemoryGraph {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let file: GraphFile = serde_json::from_str(text)?;
        Ok(Self {
            topics: file.topics.into_iter().map(|t| (t.id.clone(), t)).collect(),
            strategies: file.strategies,
            failures: AtomicU32::new(0),
        })
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::from_json_str(&value.to_string())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading graph file {}", path.display()))?;
        let graph = Self::from_json_str(&text)
            .with_context(|| format!("parsing graph file {}", path.display()))?;
        tracing::info!(path = %path.display(), topics = graph.topics.len(), "graph loaded");
        Ok(graph)
    }

    /// 接下来 n 次读取返回 Unavailable
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    fn maybe_fail(&self) -> Result<(), ContentError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(ContentError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn display_name(&self, topic_id: &str) -> String {
        self.topics
            .get(topic_id)
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| topic_id.to_string())
    }
}

#[async_trait]
impl ContentProvider for InMemoryGraph {
    async fn get_topic_snapshot(&self, topic_id: &str) -> Result<Option<TopicSnapshot>, ContentError> {
        self.maybe_fail()?;
        let Some(topic) = self.topics.get(topic_id) else {
            return Ok(None);
        };
        let connected_topics = topic
            .connections
            .iter()
            .map(|c| ConnectedTopic {
                id: c.id.clone(),
                name: self.display_name(&c.id),
                relation: c.relation.clone(),
            })
            .collect();
        Ok(Some(TopicSnapshot {
            id: topic.id.clone(),
            name: self.display_name(topic_id),
            executive_summary: topic
                .sections
                .get("executive_summary")
                .filter(|s| !s.trim().is_empty())
                .cloned(),
            connected_topics,
        }))
    }

    async fn read_section(&self, topic_id: &str, section: &str) -> Result<Option<String>, ContentError> {
        self.maybe_fail()?;
        Ok(self
            .topics
            .get(topic_id)
            .and_then(|t| t.sections.get(section))
            .filter(|s| !s.trim().is_empty())
            .cloned())
    }

    async fn read_articles(&self, topic_id: &str, limit: usize) -> Result<Vec<Article>, ContentError> {
        self.maybe_fail()?;
        Ok(self
            .topics
            .get(topic_id)
            .map(|t| t.articles.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn strategy_topics(&self, strategy_id: &str) -> Result<Vec<String>, ContentError> {
        self.maybe_fail()?;
        Ok(self.strategies.get(strategy_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> InMemoryGraph {
        InMemoryGraph::from_value(json!({
            "topics": [
                {"id": "eurusd", "name": "EUR/USD",
                 "sections": {"executive_summary": "Rate differentials dominate", "risk_monitor": ""},
                 "articles": [{"id": "A1", "title": "ECB", "content": "ECB holds"},
                              {"id": "A2", "title": "Fed", "summary": "Fed cuts"}],
                 "connections": [{"id": "fed_policy", "relation": "INFLUENCED_BY"}, {"id": "dxy"}]},
                {"id": "fed_policy", "name": "Fed Policy"}
            ],
            "strategies": {"s1": ["eurusd", "fed_policy"]}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_resolves_connection_names() {
        let g = graph();
        let snap = g.get_topic_snapshot("eurusd").await.unwrap().unwrap();
        assert_eq!(snap.connected_topics.len(), 2);
        assert_eq!(snap.connected_topics[0].name, "Fed Policy");
        assert_eq!(snap.connected_topics[1].name, "dxy");
        assert_eq!(snap.connected_topics[1].relation, "RELATED");
        assert!(g.get_topic_snapshot("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_section_reads_as_none() {
        let g = graph();
        assert!(g.read_section("eurusd", "risk_monitor").await.unwrap().is_none());
        assert!(g.read_section("eurusd", "executive_summary").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_articles_limit_and_body_fallback() {
        let g = graph();
        let arts = g.read_articles("eurusd", 1).await.unwrap();
        assert_eq!(arts.len(), 1);
        let arts = g.read_articles("eurusd", 5).await.unwrap();
        assert_eq!(arts[1].body(), "Fed cuts");
        assert_eq!(g.strategy_topics("s1").await.unwrap()[0], "eurusd");
        assert!(g.strategy_topics("nope").await.unwrap().is_empty());
    }
}
