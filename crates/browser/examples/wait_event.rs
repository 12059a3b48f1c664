//! Wait for a navigation event with a deadline

use browser_control::{Browser, BrowserConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let browser = Browser::new(BrowserConfig::from_env());
    browser.open().await?;

    let page = browser.page("about:blank").await?;

    // Subscribe before navigating so the event cannot slip past
    let mut events = page.browser().events()?;
    page.navigate("https://example.com").await?;

    let navigated = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event.method == "Page.frameNavigated"
                && event.session_id.as_deref() == Some(page.session_id())
            {
                return event.params;
            }
        }
        None
    })
    .await;

    match navigated {
        Ok(Some(params)) => println!("Navigated: {}", params["frame"]["url"]),
        Ok(None) => println!("Connection closed before navigation"),
        Err(_) => println!("No navigation within 5s"),
    }

    browser.close().await?;
    Ok(())
}
