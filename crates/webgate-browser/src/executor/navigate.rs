//! Navigate executor.

use std::time::{Duration, Instant};

use tracing::info;

use webgate_protocol::{ErrorBody, ErrorCode, NavigatePayload, ReplyPayload, WaitUntil};

use crate::driver::{PageDriver, PageLifecycle};

use super::{browser_failure, lifecycle_rank};

const POLL: Duration = Duration::from_millis(50);

/// How long the DOM must stay stable for network-idle.
const IDLE_SETTLE: Duration = Duration::from_millis(200);

pub(super) async fn run(
    page: &dyn PageDriver,
    url: &str,
    wait_until: WaitUntil,
    referer: Option<&str>,
    deadline: Instant,
) -> Result<ReplyPayload, ErrorBody> {
    let started = Instant::now();
    info!("Navigating to {}", url);

    page.navigate(url, referer)
        .await
        .map_err(|e| browser_failure("navigate", e))?;

    wait_for_lifecycle(page, wait_until, deadline).await?;

    let final_url = page
        .current_url()
        .await
        .map_err(|e| browser_failure("navigate", e))?;
    let title = page
        .title()
        .await
        .map_err(|e| browser_failure("navigate", e))?;

    let redirected = normalize(&final_url) != normalize(url);
    let load_time_ms = started.elapsed().as_millis() as u64;

    Ok(ReplyPayload::Navigate(NavigatePayload {
        url: final_url,
        title: if title.is_empty() { None } else { Some(title) },
        redirected,
        load_time_ms,
        state_diff: None,
    }))
}

async fn wait_for_lifecycle(
    page: &dyn PageDriver,
    wait_until: WaitUntil,
    deadline: Instant,
) -> Result<(), ErrorBody> {
    let target = match wait_until {
        WaitUntil::DomContentLoaded => PageLifecycle::Interactive,
        WaitUntil::Load | WaitUntil::NetworkIdle => PageLifecycle::Complete,
    };

    loop {
        let state = page
            .lifecycle()
            .await
            .map_err(|e| browser_failure("navigate", e))?;
        if lifecycle_rank(state) >= lifecycle_rank(target) {
            break;
        }
        if Instant::now() >= deadline {
            return Err(timeout_error(wait_until));
        }
        tokio::time::sleep(POLL).await;
    }

    if wait_until == WaitUntil::NetworkIdle {
        wait_for_settle(page, deadline).await?;
    }
    Ok(())
}

/// Network-idle approximation: the load event has fired and the DOM stops
/// growing for a settle interval.
async fn wait_for_settle(page: &dyn PageDriver, deadline: Instant) -> Result<(), ErrorBody> {
    let mut last = page
        .dom_node_count()
        .await
        .map_err(|e| browser_failure("navigate", e))?;
    loop {
        tokio::time::sleep(IDLE_SETTLE).await;
        let current = page
            .dom_node_count()
            .await
            .map_err(|e| browser_failure("navigate", e))?;
        if current == last {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(timeout_error(WaitUntil::NetworkIdle));
        }
        last = current;
    }
}

fn timeout_error(wait_until: WaitUntil) -> ErrorBody {
    ErrorBody::new(ErrorCode::Timeout, "Navigation timed out").with_detail(
        "wait_until",
        serde_json::to_value(wait_until).unwrap_or_default(),
    )
}

fn normalize(url: &str) -> &str {
    url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDom, MockElement, MockPage, PageSeed};
    use std::collections::HashMap;

    fn page_with_route(url: &str, dom: MockDom) -> MockPage {
        let mut routes = HashMap::new();
        routes.insert(url.to_string(), dom);
        MockPage::new(PageSeed {
            routes,
            elements: HashMap::new(),
        })
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_navigate_reports_final_url_and_title() {
        let page = page_with_route(
            "https://example.com",
            MockDom::titled("Example Domain")
                .with_element("h1", MockElement::text("h1", "Example Domain")),
        );

        let payload = run(
            &page,
            "https://example.com",
            WaitUntil::Load,
            None,
            far_deadline(),
        )
        .await
        .unwrap();

        let ReplyPayload::Navigate(nav) = payload else {
            panic!("wrong payload");
        };
        assert_eq!(nav.url, "https://example.com");
        assert_eq!(nav.title.as_deref(), Some("Example Domain"));
        assert!(!nav.redirected);
    }

    #[tokio::test]
    async fn test_navigate_detects_redirect() {
        let page = page_with_route(
            "https://example.com/old",
            MockDom::titled("Moved").redirecting_to("https://example.com/new"),
        );

        let payload = run(
            &page,
            "https://example.com/old",
            WaitUntil::Load,
            None,
            far_deadline(),
        )
        .await
        .unwrap();

        let ReplyPayload::Navigate(nav) = payload else {
            panic!("wrong payload");
        };
        assert_eq!(nav.url, "https://example.com/new");
        assert!(nav.redirected);
    }

    #[tokio::test]
    async fn test_navigate_times_out_when_load_never_completes() {
        let page = MockPage::default();
        page.set_stuck_loading(true);

        let err = run(
            &page,
            "https://slow.example.com",
            WaitUntil::Load,
            None,
            Instant::now() + Duration::from_millis(120),
        )
        .await
        .unwrap_err();

        assert_eq!(err.error_code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_networkidle_waits_for_settle() {
        let page = page_with_route("https://example.com", MockDom::titled("t"));
        let payload = run(
            &page,
            "https://example.com",
            WaitUntil::NetworkIdle,
            None,
            far_deadline(),
        )
        .await
        .unwrap();
        assert!(matches!(payload, ReplyPayload::Navigate(_)));
    }
}
