//! In-memory HttpClient for exercising flows without a network

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};

type Reply = Result<HttpResponse, TransportError>;

/// Replies from a script, then from per-URL defaults
///
/// Scripted replies are consumed in order regardless of URL. Once the script
/// is empty, the first route whose fragment is contained in the request URL
/// answers. Anything else fails with a transport error.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Reply>>,
    routes: Vec<(String, Reply)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response
    pub fn respond(self, status: u16, body: &str) -> Self {
        self.script
            .lock()
            .push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    /// Queue one transport failure
    pub fn fail(self, error: TransportError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Answer every request whose URL contains `fragment`
    pub fn route(mut self, fragment: &str, status: u16, body: &str) -> Self {
        self.routes
            .push((fragment.to_string(), Ok(HttpResponse::new(status, body))));
        self
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose URL contains `fragment`
    pub fn requests_to(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let scripted = self.script.lock().pop_front();
        let reply = scripted.or_else(|| {
            self.routes
                .iter()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .map(|(_, reply)| reply.clone())
        });
        let url = request.url.clone();
        self.requests.lock().push(request);
        reply.unwrap_or_else(|| {
            Err(TransportError::Other(format!("no scripted response for {}", url)))
        })
    }
}
