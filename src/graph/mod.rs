//! 内容图接入层
//!
//! 探索循环只通过 ContentProvider 读取话题快照、分析章节与文章；具体后端（图数据库、JSON 文件）
//! 实现该 trait。RetryingContentProvider 为每次读取加超时与瞬时错误重试。

pub mod fixture;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{with_retry, RetryConfig, Transient};

pub use fixture::InMemoryGraph;

/// 内容读取错误
#[derive(Error, Debug, Clone)]
pub enum ContentError {
    #[error("content request timed out after {0:?}")]
    Timeout(Duration),

    #[error("content store unavailable: {0}")]
    Unavailable(String),

    #[error("content backend error: {0}")]
    Backend(String),
}

impl Transient for ContentError {
    fn is_transient(&self) -> bool {
        matches!(self, ContentError::Timeout(_) | ContentError::Unavailable(_))
    }
}

/// 相邻话题（带关系类型）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedTopic {
    pub id: String,
    pub name: String,
    pub relation: String,
}

/// 话题只读快照：名称、执行摘要、邻接表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSnapshot {
    pub id: String,
    pub name: String,
    pub executive_summary: Option<String>,
    pub connected_topics: Vec<ConnectedTopic>,
}

impl TopicSnapshot {
    pub fn is_connected(&self, topic_id: &str) -> bool {
        self.connected_topics.iter().any(|c| c.id == topic_id)
    }
}

/// 文章（按发布时间倒序返回）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
}

impl Article {
    /// 正文为空时退回摘要
    pub fn body(&self) -> &str {
        if self.content.trim().is_empty() {
            &self.summary
        } else {
            &self.content
        }
    }
}

/// 内容图协作方接口
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// 话题快照；话题不存在时返回 None
    async fn get_topic_snapshot(&self, topic_id: &str) -> Result<Option<TopicSnapshot>, ContentError>;

    /// 分析章节原文；话题或章节缺失、内容为空时返回 None
    async fn read_section(&self, topic_id: &str, section: &str) -> Result<Option<String>, ContentError>;

    /// 话题下最新的至多 limit 篇文章
    async fn read_articles(&self, topic_id: &str, limit: usize) -> Result<Vec<Article>, ContentError>;

    /// 策略映射到的话题 id（首个为起点）；未知策略返回空列表
    async fn strategy_topics(&self, strategy_id: &str) -> Result<Vec<String>, ContentError>;
}

/// 带超时与重试的内容读取包装
pub struct RetryingContentProvider {
    inner: Arc<dyn ContentProvider>,
    config: RetryConfig,
}

impl RetryingContentProvider {
    pub fn new(inner: Arc<dyn ContentProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl ContentProvider for RetryingContentProvider {
    async fn get_topic_snapshot(&self, topic_id: &str) -> Result<Option<TopicSnapshot>, ContentError> {
        let inner = &self.inner;
        with_retry(&self.config, "content.snapshot", ContentError::Timeout, move || {
            inner.get_topic_snapshot(topic_id)
        })
        .await
    }

    async fn read_section(&self, topic_id: &str, section: &str) -> Result<Option<String>, ContentError> {
        let inner = &self.inner;
        with_retry(&self.config, "content.read_section", ContentError::Timeout, move || {
            inner.read_section(topic_id, section)
        })
        .await
    }

    async fn read_articles(&self, topic_id: &str, limit: usize) -> Result<Vec<Article>, ContentError> {
        let inner = &self.inner;
        with_retry(&self.config, "content.read_articles", ContentError::Timeout, move || {
            inner.read_articles(topic_id, limit)
        })
        .await
    }

    async fn strategy_topics(&self, strategy_id: &str) -> Result<Vec<String>, ContentError> {
        let inner = &self.inner;
        with_retry(&self.config, "content.strategy_topics", ContentError::Timeout, move || {
            inner.strategy_topics(strategy_id)
        })
        .await
    }
}

/// 章节来源 id：sec_{topic}_{section}
pub fn section_source_id(topic_id: &str, section: &str) -> String {
    format!("sec_{}_{}", topic_id, section)
}

/// 文章来源 id：art_{article}
pub fn article_source_id(article_id: &str) -> String {
    format!("art_{}", article_id)
}
