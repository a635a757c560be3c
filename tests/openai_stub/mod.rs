use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

pub const API_KEY: &str = "sk-stub";

/// Every paragraph of the passage comes back with this prefix.
pub const ECHO_PREFIX: &str = "ES: ";

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum StubBehavior {
    Echo,
    Fail(u16),
    Empty,
    /// Echo after sleeping.
    Delay(Duration),
}

/// Chat-completions stand-in. Each request is answered on its own thread so
/// concurrent calls overlap the way they would against a real endpoint.
pub struct OpenAiStub {
    pub endpoint: String,
    requests: Arc<AtomicUsize>,
    passages: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl OpenAiStub {
    pub fn spawn(behavior: StubBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let endpoint = format!("http://{addr}/v1/chat/completions");

        let requests = Arc::new(AtomicUsize::new(0));
        let passages = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let requests = requests.clone();
            let passages = passages.clone();
            thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    requests.fetch_add(1, Ordering::SeqCst);
                    let passages = passages.clone();
                    thread::spawn(move || respond(request, behavior, &passages));
                }
            })
        };

        Self {
            endpoint,
            requests,
            passages,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Passages received so far, in arrival order.
    pub fn passages(&self) -> Vec<String> {
        self.passages.lock().unwrap().clone()
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Paragraph-wise echo with [`ECHO_PREFIX`].
#[allow(dead_code)]
pub fn echo(passage: &str) -> String {
    passage
        .split("\n\n")
        .map(|paragraph| format!("{ECHO_PREFIX}{paragraph}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn respond(mut request: tiny_http::Request, behavior: StubBehavior, passages: &Mutex<Vec<String>>) {
    if request.method() != &tiny_http::Method::Post || request.url() != "/v1/chat/completions" {
        let _ = request.respond(tiny_http::Response::from_string("not found").with_status_code(404));
        return;
    }

    let authorized = request.headers().iter().any(|header| {
        header.field.equiv("Authorization") && header.value.as_str() == format!("Bearer {API_KEY}")
    });
    if !authorized {
        let _ = request.respond(error_response(401, "invalid api key"));
        return;
    }

    let mut body = String::new();
    if request.as_reader().read_to_string(&mut body).is_err() {
        let _ = request.respond(error_response(400, "invalid request body"));
        return;
    }
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => {
            let _ = request.respond(error_response(400, "invalid json"));
            return;
        }
    };

    let Some(prompt) = parsed
        .pointer("/messages/1/content")
        .and_then(|v| v.as_str())
    else {
        let _ = request.respond(error_response(400, "missing user message"));
        return;
    };
    let passage = prompt
        .split_once("\n\n")
        .map(|(_, passage)| passage)
        .unwrap_or(prompt)
        .to_owned();
    passages.lock().unwrap().push(passage.clone());

    let content = match behavior {
        StubBehavior::Fail(status) => {
            let _ = request.respond(error_response(status, "stub failure"));
            return;
        }
        StubBehavior::Empty => String::new(),
        StubBehavior::Echo => echo(&passage),
        StubBehavior::Delay(delay) => {
            thread::sleep(delay);
            echo(&passage)
        }
    };

    let response_body = serde_json::json!({
        "id": "chatcmpl-stub",
        "object": "chat.completion",
        "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }
        ]
    });
    let _ = request.respond(json_response(200, response_body.to_string()));
}

fn error_response(status: u16, message: &str) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let body = serde_json::json!({ "error": { "message": message } });
    json_response(status, body.to_string())
}

fn json_response(status: u16, body: String) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(body)
        .with_status_code(status)
        .with_header(header)
}
