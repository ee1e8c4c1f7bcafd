//! Outbound HTTP fan-out to polling workers (and the upstream notification
//! endpoint, which is addressed the same way). Posts to one identifier are
//! serialized by a dedicated queue task; posts to different identifiers
//! proceed concurrently. Delivery is best-effort: a bounded retry window,
//! then a warn-level log of the caller's log text.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

/// How a queue task reaches its worker: `scheme://<identifier>:<port>`.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub scheme: String,
    pub port: u16,
    pub user_agent: String,
    /// Shared default credential presented as a bearer token on every post.
    pub credential: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            scheme: "http".to_string(),
            port: 8080,
            user_agent: "Overseer".to_string(),
            credential: String::new(),
        }
    }
}

struct Post {
    endpoint: String,
    body: Option<serde_json::Value>,
    log_text: String,
    reply: Option<oneshot::Sender<anyhow::Result<serde_json::Value>>>,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Post>>>,
}

const RETRY_ATTEMPTS: u32 = 4;
const INITIAL_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Dispatcher {
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueues a JSON POST to `identifier`. Never blocks the caller.
    pub fn post(
        &self,
        identifier: &str,
        endpoint: &str,
        body: serde_json::Value,
        log_text: impl Into<String>,
    ) {
        self.enqueue(identifier, endpoint, Some(body), log_text.into(), None);
    }

    /// Empty-body overload used for lifecycle commands like `/state/inactive`.
    pub fn post_empty(&self, identifier: &str, endpoint: &str, log_text: impl Into<String>) {
        self.enqueue(identifier, endpoint, None, log_text.into(), None);
    }

    /// As [`post`], additionally routing the parsed response (or the final
    /// delivery error) back to the caller.
    pub fn post_with_reply(
        &self,
        identifier: &str,
        endpoint: &str,
        body: serde_json::Value,
        log_text: impl Into<String>,
    ) -> oneshot::Receiver<anyhow::Result<serde_json::Value>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(identifier, endpoint, Some(body), log_text.into(), Some(tx));
        rx
    }

    /// Drops the queue for `identifier`; the next post recreates it.
    pub fn expunge(&self, identifier: &str) {
        self.queues
            .lock()
            .expect("dispatcher queue table poisoned")
            .remove(identifier);
    }

    fn enqueue(
        &self,
        identifier: &str,
        endpoint: &str,
        body: Option<serde_json::Value>,
        log_text: String,
        reply: Option<oneshot::Sender<anyhow::Result<serde_json::Value>>>,
    ) {
        let post = Post {
            endpoint: endpoint.to_string(),
            body,
            log_text,
            reply,
        };

        let mut queues = self
            .queues
            .lock()
            .expect("dispatcher queue table poisoned");

        let sender = queues.entry(identifier.to_string()).or_insert_with(|| {
            spawn_queue(identifier.to_string(), self.config.clone())
        });

        // A dead queue task (client construction failure) is rebuilt here.
        if let Err(mpsc::error::SendError(post)) = sender.send(post) {
            let sender = spawn_queue(identifier.to_string(), self.config.clone());
            let _ = sender.send(post);
            queues.insert(identifier.to_string(), sender);
        }
    }
}

fn spawn_queue(identifier: String, config: DispatcherConfig) -> mpsc::UnboundedSender<Post> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_queue(identifier, config, rx));
    tx
}

async fn run_queue(
    identifier: String,
    config: DispatcherConfig,
    mut rx: mpsc::UnboundedReceiver<Post>,
) {
    let client = match reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(REQUEST_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(%identifier, %error, "failed to build outbound HTTP client");
            return;
        }
    };
    let base = format!("{}://{}:{}", config.scheme, identifier, config.port);

    while let Some(post) = rx.recv().await {
        let outcome = deliver(&client, &base, &config.credential, &post).await;

        match (&outcome, post.log_text.is_empty()) {
            (Ok(_), false) => tracing::info!(%identifier, "{}", post.log_text),
            (Ok(_), true) => (),
            (Err(error), _) => {
                tracing::warn!(%identifier, endpoint = %post.endpoint, %error, "dropping undeliverable post: {}", post.log_text);
            }
        }
        if let Some(reply) = post.reply {
            let _ = reply.send(outcome);
        }
    }
}

async fn deliver(
    client: &reqwest::Client,
    base: &str,
    credential: &str,
    post: &Post,
) -> anyhow::Result<serde_json::Value> {
    let url = format!("{base}{}", post.endpoint);
    let mut delay = INITIAL_RETRY_DELAY;
    let mut last_error = None;

    for attempt in 1..=RETRY_ATTEMPTS {
        let mut request = client.post(&url);
        if !credential.is_empty() {
            request = request.bearer_auth(credential);
        }
        request = match &post.body {
            Some(body) => request.json(body),
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };

        let result = async {
            let response = request.send().await?.error_for_status()?;
            response.json::<serde_json::Value>().await
        }
        .await;

        match result {
            Ok(value) => return Ok(value),
            Err(error) => {
                tracing::debug!(%url, attempt, %error, "outbound post attempt failed");
                last_error = Some(error);
            }
        }

        if attempt != RETRY_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    Err(anyhow::Error::from(
        last_error.expect("at least one attempt was made"),
    ))
}
