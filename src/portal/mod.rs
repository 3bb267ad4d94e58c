//! Portal access layer.
//!
//! The engine never touches the browser directly; it talks to a
//! [`PortalClient`], which lets tests substitute a scripted driver for the
//! real WebDriver session in [`webdriver`].

pub mod webdriver;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ClassAverage;

pub use webdriver::WebDriverPortal;

/// Classified portal automation failures. None of these are ever fatal to
/// the process; callers turn them into per-user skip or notify outcomes.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The identity provider did not accept the credentials.
    #[error("portal login failed, the identity provider rejected the credentials")]
    AuthenticationFailed,
    /// A page or container did not appear within its bounded wait.
    #[error("timed out waiting for {0}")]
    NavigationTimeout(String),
    /// A required UI element is missing, usually a portal-side change.
    #[error("portal element not found: {0}")]
    ElementNotFound(String),
    #[error("portal automation error: {0}")]
    Unknown(String),
}

/// One authenticated round trip into the portal per call. Implementations
/// own their browser session exclusively and must tear it down on every
/// exit path.
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// Log in and harvest the raw text of every leaf item in the grade
    /// content list. No trimming or parsing happens at this layer.
    async fn fetch_records(&self, email: &str, secret: &str) -> Result<Vec<String>, PortalError>;

    /// Log in, navigate to the academics grid and extract per-class term
    /// averages.
    async fn fetch_averages(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<Vec<ClassAverage>, PortalError>;
}
