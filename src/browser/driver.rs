use super::locator::Locator;
use crate::error::Result;
use async_trait::async_trait;

/// The page operations a journey needs.
///
/// `ChromeDriver` implements this against a real browser; tests substitute
/// in-memory pages.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load event
    async fn goto(&self, url: &str) -> Result<()>;

    /// Whether the element exists, is visible and is enabled
    async fn is_ready(&self, locator: &Locator) -> Result<bool>;

    async fn click(&self, locator: &Locator) -> Result<()>;

    /// Replace the element's value with `value`
    async fn fill(&self, locator: &Locator, value: &str) -> Result<()>;

    /// Send a key press to the focused element
    async fn press_key(&self, key: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// PNG screenshot of the viewport
    async fn screenshot(&self) -> Result<Vec<u8>>;
}
