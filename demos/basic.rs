use docdb_http::{Delivery, DocDbClient, RequestOptions, ResponseEvent};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let db = DocDbClient::from_env()?;

    let create = RequestOptions::put("/animals");
    if let Delivery::Events(mut events) = db.request(create)? {
        while let Some(event) = events.recv().await {
            match event {
                ResponseEvent::Response { status, .. } => println!("PUT /animals -> {status}"),
                ResponseEvent::Data(body) => println!("{}", String::from_utf8_lossy(&body)),
                ResponseEvent::End => break,
                ResponseEvent::Error(err) => anyhow::bail!(err),
            }
        }
    }

    let (tx, rx) = tokio::sync::oneshot::channel();
    let doc = RequestOptions::put("/animals/rabbit").json(&json!({"legs": 4}));
    db.request_with_callback(doc, move |result| {
        let _ = tx.send(result);
    })?;
    let response = rx.await??;
    println!("PUT /animals/rabbit -> {}: {}", response.status, response.text());

    Ok(())
}
