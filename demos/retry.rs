use std::time::Duration;

use docdb_http::{DocDbClient, Interceptor, RequestOptions, RetryPlugin};
use reqwest::StatusCode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("DOCDB_URL")?;

    let retry = Interceptor::new(
        RetryPlugin::new(Duration::from_millis(10))
            .on_statuses([StatusCode::TOO_MANY_REQUESTS, StatusCode::PRECONDITION_FAILED]),
    );
    let db = DocDbClient::builder(url)
        .plugin(&retry)
        .plugin("promises")
        .max_attempt(10)
        .build()?;

    let pending = db
        .request(RequestOptions::get("/animals/_all_docs"))?
        .into_promise()
        .ok_or_else(|| anyhow::anyhow!("promise delivery expected"))?;

    match pending.await {
        Ok(body) => println!("{body:#}"),
        Err(err) => println!("request failed: {err}"),
    }
    println!("retry plugin counts: {:?}", retry.counts());

    Ok(())
}
