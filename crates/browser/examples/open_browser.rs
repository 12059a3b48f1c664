//! Open (or launch) a browser, create a page, list pages, close

use browser_control::{Browser, BrowserConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = BrowserConfig::from_env().on_fatal(|err| eprintln!("fatal: {err}"));
    let browser = Browser::new(config);
    browser.open().await?;
    println!("Connected");

    let version = browser.call("Browser.getVersion", None).await?;
    println!("Browser version: {}", version["product"]);

    let page = browser
        .timeout(Duration::from_secs(10))
        .page("https://www.rust-lang.org")
        .await?;
    println!("Created page {}", page.target_id());

    for page in browser.pages().await? {
        let info = page.info().await?;
        println!("  {} - {}", info.target_id, info.url);
    }

    browser.close().await?;
    println!("Disconnected");
    Ok(())
}
