//! In-memory fakes and fixtures for exercising the sync router without any
//! real chat service behind it.

use std::time::Duration;

use serde_json::{Value, json};
use tsync_core::Indicators;

mod hub;
mod messenger;

pub use hub::InMemoryHub;
pub use messenger::FakeMessenger;

/// Default marker tokens used across the test suite.
pub fn indicators() -> Indicators {
    Indicators::new(vec!["%".to_string()], vec!["~".to_string()])
        .expect("default indicator tokens compile")
}

/// A minimal vendor webhook payload in the shape [`FakeMessenger`] cooks
/// receipts from. Callers mutate the returned value for the less common
/// fields (`genesis`, `first`, `title`).
pub fn receipt_json(source: &str, flow: &str, thread: &str, user: &str, text: &str) -> Value {
    json!({
        "source": source,
        "source_ids": {
            "flow": flow,
            "message": format!("{thread}-m0"),
            "thread": thread,
            "user": user,
            "url": format!("https://{source}.test/{thread}"),
        },
        "text": text,
    })
}

/// Polls `cond` until it holds, panicking after roughly two seconds. Used to
/// observe work that routes through background queue workers.
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
