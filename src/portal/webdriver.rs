//! WebDriver-backed portal driver.
//!
//! Drives a headless Chrome session through the portal's login flow, which
//! hands off to a third-party identity provider, then harvests the rendered
//! DOM. Every entry point launches its own browser session and tears it
//! down on every exit path, so concurrent fetches for different users never
//! share browser state.
//!
//! All element ids, names and CSS classes the remote portal exposes are
//! collected below; a portal-side change to any of them breaks this module
//! and nothing else.

use async_trait::async_trait;
use log::{debug, warn};
use scraper::{Html, Selector};
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::Key;

use super::{PortalClient, PortalError};
use crate::config::Config;
use crate::types::ClassAverage;

// Remote portal surface. The compatibility risk lives here.
const LOGIN_BUTTON_ID: &str = "aaspButton";
const IDP_EMAIL_ID: &str = "identifierId";
const IDP_PASSWORD_NAME: &str = "Passwd";
const IDP_ORIGIN_MARKER: &str = "accounts.google";
const ACADEMICS_TAB_CSS: &str = "[title='Academics tab']";
const DATA_GRID_ID: &str = "dataGrid";
const AVERAGES_ROW_CSS: &str = "tr.listCell.listRowHeight";
const CONTENT_LIST_ID: &str = "sra-contentList";
const CONTENT_ITEM_CSS: &str = "ul#sra-contentList > li > ul > li";
const CLASS_NAME_CELL: usize = 1;
const TERM_PERFORMANCE_CELL: usize = 7;

const QUERY_POLL: Duration = Duration::from_millis(500);
/// Settle after each toggle click so the content list re-renders.
const TOGGLE_SETTLE: Duration = Duration::from_secs(1);
/// Settle after the whole toggle phase before harvesting.
const CONTENT_SETTLE: Duration = Duration::from_secs(2);

pub struct WebDriverPortal {
    webdriver_url: String,
    portal_url: String,
    element_wait: Duration,
}

impl WebDriverPortal {
    pub fn new(config: &Config) -> Self {
        Self {
            webdriver_url: config.webdriver_url.clone(),
            portal_url: config.portal_url.clone(),
            element_wait: config.element_wait(),
        }
    }

    async fn connect(&self) -> Result<WebDriver, PortalError> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_chrome_option(
            "args",
            vec![
                "--headless=new",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--window-size=1920,1080",
            ],
        )
        .map_err(|e| PortalError::Unknown(e.to_string()))?;

        WebDriver::new(&self.webdriver_url, caps)
            .await
            .map_err(|e| PortalError::Unknown(format!("failed to reach chromedriver: {e}")))
    }

    async fn wait_for(
        &self,
        driver: &WebDriver,
        by: By,
        what: &str,
    ) -> Result<WebElement, PortalError> {
        driver
            .query(by)
            .wait(self.element_wait, QUERY_POLL)
            .first()
            .await
            .map_err(|_| PortalError::ElementNotFound(what.to_string()))
    }

    /// Load the portal, click the login trigger and run the identity
    /// provider's email/password form.
    async fn login(
        &self,
        driver: &WebDriver,
        email: &str,
        secret: &str,
    ) -> Result<(), PortalError> {
        driver
            .goto(&self.portal_url)
            .await
            .map_err(|_| PortalError::NavigationTimeout("portal landing page".to_string()))?;

        let login_button = self
            .wait_for(driver, By::Id(LOGIN_BUTTON_ID), "login button")
            .await?;
        login_button
            .click()
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;

        let email_field = self
            .wait_for(driver, By::Id(IDP_EMAIL_ID), "identity provider email field")
            .await?;
        email_field
            .send_keys(email)
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;
        email_field
            .send_keys(Key::Enter.to_string())
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;

        let password_field = self
            .wait_for(
                driver,
                By::Name(IDP_PASSWORD_NAME),
                "identity provider password field",
            )
            .await?;
        password_field
            .send_keys(secret)
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;
        password_field
            .send_keys(Key::Enter.to_string())
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;

        Ok(())
    }

    /// Classify a timeout on the first post-login wait. If the browser is
    /// still parked on the identity provider, the credentials were refused;
    /// otherwise the portal is just slow or broken.
    async fn classify_post_login_timeout(&self, driver: &WebDriver, what: &str) -> PortalError {
        let url = match driver.current_url().await {
            Ok(url) => url.to_string(),
            Err(_) => return PortalError::NavigationTimeout(what.to_string()),
        };
        if url.contains(IDP_ORIGIN_MARKER) {
            PortalError::AuthenticationFailed
        } else {
            PortalError::NavigationTimeout(what.to_string())
        }
    }

    /// Toggle phase: the content list is filtered by category checkboxes.
    /// "Grades" must end checked and "Attendance" unchecked; any checkbox
    /// whose state disagrees gets clicked, with a settle delay per click.
    async fn align_category_toggles(&self, driver: &WebDriver) -> Result<(), PortalError> {
        let checkboxes = driver
            .find_all(By::XPath("//input[@type='checkbox']"))
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;
        debug!("found {} category checkboxes", checkboxes.len());

        for checkbox in checkboxes {
            // Label text lives on the parent node, not the input itself.
            let label = match checkbox.find(By::XPath("./..")).await {
                Ok(parent) => parent.text().await.unwrap_or_default(),
                Err(_) => continue,
            };

            let selected = match checkbox.is_selected().await {
                Ok(selected) => selected,
                Err(e) => {
                    debug!("skipping unreadable checkbox: {e}");
                    continue;
                }
            };

            let needs_click = (label.contains("Attendance") && selected)
                || (label.contains("Grades") && !selected);
            if needs_click {
                debug!("toggling checkbox labelled {:?}", label.trim());
                if let Err(e) = checkbox.click().await {
                    warn!("failed to toggle category checkbox: {e}");
                    continue;
                }
                tokio::time::sleep(TOGGLE_SETTLE).await;
            }
        }

        tokio::time::sleep(CONTENT_SETTLE).await;
        Ok(())
    }

    async fn fetch_records_inner(
        &self,
        driver: &WebDriver,
        email: &str,
        secret: &str,
    ) -> Result<Vec<String>, PortalError> {
        self.login(driver, email, secret).await?;

        if self
            .wait_for(driver, By::Id(CONTENT_LIST_ID), "grade content list")
            .await
            .is_err()
        {
            return Err(self
                .classify_post_login_timeout(driver, "grade content list")
                .await);
        }

        self.align_category_toggles(driver).await?;

        let page_source = driver
            .source()
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;
        Ok(harvest_content_items(&page_source))
    }

    async fn fetch_averages_inner(
        &self,
        driver: &WebDriver,
        email: &str,
        secret: &str,
    ) -> Result<Vec<ClassAverage>, PortalError> {
        self.login(driver, email, secret).await?;

        let academics_tab = match self
            .wait_for(driver, By::Css(ACADEMICS_TAB_CSS), "academics tab")
            .await
        {
            Ok(tab) => tab,
            Err(_) => {
                return Err(self.classify_post_login_timeout(driver, "academics tab").await)
            }
        };
        academics_tab
            .click()
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;

        if self
            .wait_for(driver, By::Id(DATA_GRID_ID), "averages grid")
            .await
            .is_err()
        {
            return Err(PortalError::NavigationTimeout("averages grid".to_string()));
        }

        let page_source = driver
            .source()
            .await
            .map_err(|e| PortalError::Unknown(e.to_string()))?;
        Ok(harvest_average_rows(&page_source))
    }
}

#[async_trait]
impl PortalClient for WebDriverPortal {
    async fn fetch_records(&self, email: &str, secret: &str) -> Result<Vec<String>, PortalError> {
        let driver = self.connect().await?;
        let result = self.fetch_records_inner(&driver, email, secret).await;
        if let Err(e) = driver.quit().await {
            warn!("failed to quit browser session: {e}");
        }
        result
    }

    async fn fetch_averages(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<Vec<ClassAverage>, PortalError> {
        let driver = self.connect().await?;
        let result = self.fetch_averages_inner(&driver, email, secret).await;
        if let Err(e) = driver.quit().await {
            warn!("failed to quit browser session: {e}");
        }
        result
    }
}

/// Pull the raw text of every leaf item under the content list out of the
/// rendered page source. Text is returned verbatim; parsing is the record
/// parser's job.
fn harvest_content_items(page_source: &str) -> Vec<String> {
    let document = Html::parse_document(page_source);
    let Ok(selector) = Selector::parse(CONTENT_ITEM_CSS) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .map(|item| item.text().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.trim().is_empty())
        .collect()
}

/// Extract class name and term performance from the averages grid rows.
/// Rows without enough cells (header rows, separators) are skipped.
fn harvest_average_rows(page_source: &str) -> Vec<ClassAverage> {
    let document = Html::parse_document(page_source);
    let Ok(row_selector) = Selector::parse(AVERAGES_ROW_CSS) else {
        return Vec::new();
    };
    let Ok(cell_selector) = Selector::parse("td") else {
        return Vec::new();
    };

    let mut averages = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| cell.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .collect();

        let (Some(class_name), Some(term_performance)) =
            (cells.get(CLASS_NAME_CELL), cells.get(TERM_PERFORMANCE_CELL))
        else {
            continue;
        };
        if class_name.is_empty() {
            continue;
        }

        averages.push(ClassAverage {
            class_name: class_name.clone(),
            term_performance: term_performance.clone(),
        });
    }
    averages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvest_content_items() {
        let html = r#"
            <html><body>
            <ul id="sra-contentList">
              <li>Math 10
                <ul>
                  <li>Class: Math 10 Period: 2 <b>Assignment:</b> Quiz 1 Grade: 85%</li>
                  <li>   </li>
                </ul>
              </li>
              <li>Science 9
                <ul>
                  <li>Attendance Grade: present</li>
                </ul>
              </li>
            </ul>
            </body></html>"#;

        let items = harvest_content_items(html);
        assert_eq!(items.len(), 2);
        assert!(items[0].contains("Quiz 1"));
        assert!(items[1].contains("Attendance"));
    }

    #[test]
    fn test_harvest_average_rows() {
        let cells: Vec<String> = (0..9).map(|i| format!("<td>cell{i}</td>")).collect();
        let html = format!(
            r#"<table>
                 <tr class="listCell listRowHeight">{}</tr>
                 <tr class="listCell listRowHeight"><td>short</td></tr>
               </table>"#,
            cells.join("")
        );

        let averages = harvest_average_rows(&html);
        assert_eq!(averages.len(), 1);
        assert_eq!(averages[0].class_name, "cell1");
        assert_eq!(averages[0].term_performance, "cell7");
    }

    #[test]
    fn test_harvest_missing_container_is_empty() {
        assert!(harvest_content_items("<html><body></body></html>").is_empty());
        assert!(harvest_average_rows("<html><body></body></html>").is_empty());
    }
}
