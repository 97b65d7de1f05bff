//! Shared test fixtures: a recording posts data source.
//!
//! The source answers three kinds of requests and remembers every batch
//! it was handed, so tests can assert on rounds and batch contents.

#![allow(dead_code)]

use parking_lot::Mutex;
use roundfetch::{data_fetch, BlockedFetch, DataSource, Fetch, PerformFetch, Request, RequestId};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostRequest {
    PostIds,
    PostContent(u32),
    Author(u32),
}

impl Request for PostRequest {
    type Response = PostData;

    fn identifier(&self) -> RequestId {
        match self {
            PostRequest::PostIds => RequestId::new("ids"),
            PostRequest::PostContent(id) => RequestId::new(format!("content:{}", id)),
            PostRequest::Author(id) => RequestId::new(format!("author:{}", id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PostData {
    Ids(Vec<u32>),
    Content(String),
    Author(String),
}

/// Recording data source with configurable failure modes.
pub struct PostSource {
    name: String,
    ids: Vec<u32>,
    deferred: bool,
    failing: HashSet<u32>,
    dropped: HashSet<u32>,
    batches: Mutex<Vec<Vec<PostRequest>>>,
}

impl PostSource {
    pub fn new() -> Self {
        Self {
            name: "posts".to_string(),
            ids: vec![1, 2],
            deferred: false,
            failing: HashSet::new(),
            dropped: HashSet::new(),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_ids(mut self, ids: Vec<u32>) -> Self {
        self.ids = ids;
        self
    }

    /// Resolve batches from deferred work instead of inline.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Report an error for this content id.
    pub fn failing(mut self, id: u32) -> Self {
        self.failing.insert(id);
        self
    }

    /// Never resolve this content id.
    pub fn dropping(mut self, id: u32) -> Self {
        self.dropped.insert(id);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn batches(&self) -> Vec<Vec<PostRequest>> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    fn answer(&self, request: &PostRequest) -> Option<Result<PostData, anyhow::Error>> {
        match request {
            PostRequest::PostIds => Some(Ok(PostData::Ids(self.ids.clone()))),
            PostRequest::PostContent(id) | PostRequest::Author(id) if self.dropped.contains(id) => {
                None
            }
            PostRequest::PostContent(id) if self.failing.contains(id) => {
                Some(Err(anyhow::anyhow!("post {} is unavailable", id)))
            }
            PostRequest::PostContent(id) => Some(Ok(PostData::Content(format!("Text{}", id)))),
            PostRequest::Author(id) => Some(Ok(PostData::Author(format!("author-{}", id)))),
        }
    }
}

fn resolve(answers: Vec<(BlockedFetch<PostRequest>, Option<Result<PostData, anyhow::Error>>)>) {
    for (blocked, answer) in answers {
        match answer {
            Some(Ok(data)) => blocked.put_success(data),
            Some(Err(err)) => blocked.put_failure(err),
            None => {}
        }
    }
}

impl DataSource for PostSource {
    type Request = PostRequest;

    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, batch: Vec<BlockedFetch<PostRequest>>) -> PerformFetch {
        self.batches
            .lock()
            .push(batch.iter().map(|b| b.request().clone()).collect());

        let answers: Vec<_> = batch
            .into_iter()
            .map(|blocked| {
                let answer = self.answer(blocked.request());
                (blocked, answer)
            })
            .collect();

        if self.deferred {
            PerformFetch::deferred(async move {
                tokio::task::yield_now().await;
                resolve(answers);
            })
        } else {
            resolve(answers);
            PerformFetch::Complete
        }
    }
}

pub fn post_ids(source: &Arc<PostSource>) -> Fetch<Vec<u32>> {
    data_fetch(source, PostRequest::PostIds).and_then(|data| match data {
        PostData::Ids(ids) => Fetch::lift(ids),
        other => Fetch::fail(anyhow::anyhow!("expected ids, got {:?}", other)),
    })
}

pub fn post_content(source: &Arc<PostSource>, id: u32) -> Fetch<String> {
    data_fetch(source, PostRequest::PostContent(id)).and_then(|data| match data {
        PostData::Content(text) => Fetch::lift(text),
        other => Fetch::fail(anyhow::anyhow!("expected content, got {:?}", other)),
    })
}

pub fn author(source: &Arc<PostSource>, id: u32) -> Fetch<String> {
    data_fetch(source, PostRequest::Author(id)).and_then(|data| match data {
        PostData::Author(name) => Fetch::lift(name),
        other => Fetch::fail(anyhow::anyhow!("expected author, got {:?}", other)),
    })
}
