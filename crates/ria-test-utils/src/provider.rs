use parking_lot::Mutex;
use ria_provider::{CompletionProvider, CompletionRequest, Embedding, EmbeddingProvider, ProviderError, Role};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One scripted completion outcome
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(ProviderError),
    /// Never completes
    Hang,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Completion provider answering from per-role queues
///
/// When a role's queue is empty the role's default reply is used.
#[derive(Debug)]
pub struct ScriptedProvider {
    queues: Mutex<HashMap<Role, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<Role, Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Provider whose defaults answer a descriptive question successfully
    pub fn new() -> Self {
        let defaults = HashMap::from([
            (Role::Classifier, Reply::text("descriptive\nconfidence: 0.9")),
            (Role::Planner, Reply::text("SINGLE_STEP")),
            (
                Role::Generator,
                Reply::text(
                    "Sum the revenue column.\n```python\nimport pandas as pd\ndf = pd.read_csv('/data/sales.csv')\nprint('Total revenue:', df['revenue'].sum())\n```",
                ),
            ),
            (Role::Summarizer, Reply::text("Total revenue is 1,234.50.")),
            (
                Role::Insight,
                Reply::text("1. Which region contributes most?\n2. How did revenue trend by month?\n3. What is the average order value?"),
            ),
            (Role::Explainer, Reply::text("The code loads the sales table and adds up the revenue column.")),
        ]);

        Self {
            queues: Mutex::new(HashMap::new()),
            defaults: Mutex::new(defaults),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply for a role
    pub fn with_reply(self, role: Role, reply: Reply) -> Self {
        self.queues.lock().entry(role).or_default().push_back(reply);
        self
    }

    /// Queue a text reply for a role
    pub fn with_text(self, role: Role, text: impl Into<String>) -> Self {
        self.with_reply(role, Reply::text(text))
    }

    /// Replace a role's default reply
    pub fn with_default(self, role: Role, reply: Reply) -> Self {
        self.defaults.lock().insert(role, reply);
        self
    }

    /// Generator default replying with the given code in a fence
    pub fn with_code(self, code: &str) -> Self {
        self.with_default(Role::Generator, Reply::text(format!("```python\n{code}\n```")))
    }

    /// Total calls
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Calls for one role
    pub fn calls_for(&self, role: Role) -> usize {
        self.requests.lock().iter().filter(|r| r.role == role).count()
    }

    /// Requests made for one role, in order
    pub fn requests_for(&self, role: Role) -> Vec<CompletionRequest> {
        self.requests.lock().iter().filter(|r| r.role == role).cloned().collect()
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let role = request.role;
        self.requests.lock().push(request);

        let queued = self.queues.lock().get_mut(&role).and_then(VecDeque::pop_front);
        let reply = match queued {
            Some(reply) => reply,
            None => self
                .defaults
                .lock()
                .get(&role)
                .cloned()
                .unwrap_or_else(|| Reply::Fail(ProviderError::Unavailable(format!("no script for {role}")))),
        };

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Deterministic bag-of-words embedder
///
/// Tokens are hashed into buckets, so queries sharing most words have a
/// high cosine similarity and unrelated queries a low one.
#[derive(Debug)]
pub struct HashEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make subsequent calls fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn vector(&self, text: &str) -> Embedding {
        let mut v = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimensions;
            v[bucket] += 1.0;
        }
        v
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("embedder offline".to_string()));
        }
        Ok(self.vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
