use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Turns query text into a vector comparable with the persisted node embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Turns a prompt into generated text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Backends selected for a single request.
///
/// `completion` is `Some` exactly when the request asked for the language model.
#[derive(Clone)]
pub struct Backends {
    pub embedding: Arc<dyn EmbeddingBackend>,
    pub completion: Option<Arc<dyn CompletionBackend>>,
}

impl Backends {
    pub fn retrieval_only(&self) -> bool {
        self.completion.is_none()
    }
}

/// Something that can hand out per-request [`Backends`].
pub trait BackendSelector: Send + Sync {
    fn configure(&self, use_llm: bool) -> Result<Backends>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    #[derive(Clone, Debug)]
    pub struct Recorded {
        pub path: String,
        pub headers: HeaderMap,
        pub body: Value,
    }

    /// Canned JSON endpoints that remember every request they receive.
    #[derive(Clone, Default)]
    pub struct Recorder {
        calls: Arc<Mutex<Vec<Recorded>>>,
    }

    impl Recorder {
        pub fn route(
            &self,
            router: Router,
            path: &'static str,
            status: StatusCode,
            reply: Value,
        ) -> Router {
            let calls = self.calls.clone();
            router.route(
                path,
                post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    let calls = calls.clone();
                    let reply = reply.clone();
                    async move {
                        calls.lock().unwrap().push(Recorded {
                            path: path.to_string(),
                            headers,
                            body,
                        });
                        (status, Json(reply))
                    }
                }),
            )
        }

        pub fn calls(&self) -> Vec<Recorded> {
            self.calls.lock().unwrap().clone()
        }
    }

    /// Serves `router` on an ephemeral loopback port and returns its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}
