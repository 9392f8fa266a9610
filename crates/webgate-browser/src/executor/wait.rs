//! Wait executor.

use std::time::{Duration, Instant};

use tracing::info;

use webgate_protocol::{ErrorBody, ErrorCode, ReplyPayload, WaitCondition, WaitPayload};

use crate::driver::{PageDriver, PageLifecycle};

use super::{browser_failure, lifecycle_rank};

struct ConditionCheck {
    met: bool,
    final_state: &'static str,
    element_count: Option<usize>,
}

#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    page: &dyn PageDriver,
    selector: Option<&str>,
    condition: WaitCondition,
    text_content: Option<&str>,
    custom_js: Option<&str>,
    poll_interval: Duration,
    deadline: Instant,
) -> Result<ReplyPayload, ErrorBody> {
    info!("Waiting for condition {:?}", condition);
    let started = Instant::now();

    loop {
        let check = check_condition(page, selector, condition, text_content, custom_js).await?;
        if check.met {
            return Ok(ReplyPayload::Wait(WaitPayload {
                condition_met: true,
                wait_time_ms: started.elapsed().as_millis() as u64,
                final_state: check.final_state.to_string(),
                element_count: check.element_count,
            }));
        }

        if Instant::now() >= deadline {
            let waited = started.elapsed().as_millis() as u64;
            return Err(ErrorBody::new(
                ErrorCode::Timeout,
                format!("Wait condition not met within {}ms", waited),
            )
            .with_detail(
                "condition",
                serde_json::to_value(condition).unwrap_or_default(),
            )
            .with_detail("wait_time_ms", waited));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

async fn check_condition(
    page: &dyn PageDriver,
    selector: Option<&str>,
    condition: WaitCondition,
    text_content: Option<&str>,
    custom_js: Option<&str>,
) -> Result<ConditionCheck, ErrorBody> {
    match condition {
        WaitCondition::Load | WaitCondition::DomContentLoaded | WaitCondition::NetworkIdle => {
            let state = page
                .lifecycle()
                .await
                .map_err(|e| browser_failure("wait", e))?;
            let (target, final_state) = match condition {
                WaitCondition::DomContentLoaded => {
                    (PageLifecycle::Interactive, "dom_content_loaded")
                }
                WaitCondition::NetworkIdle => (PageLifecycle::Complete, "network_idle"),
                _ => (PageLifecycle::Complete, "page_loaded"),
            };
            Ok(ConditionCheck {
                met: lifecycle_rank(state) >= lifecycle_rank(target),
                final_state,
                element_count: None,
            })
        }

        WaitCondition::Visible
        | WaitCondition::Hidden
        | WaitCondition::Attached
        | WaitCondition::Detached
        | WaitCondition::TextEquals => {
            // Validation guarantees a selector for element conditions.
            let selector = selector.unwrap_or_default();
            let matches = page
                .query(selector)
                .await
                .map_err(|e| browser_failure("wait", e))?;
            let count = matches.len();

            let (met, final_state) = match condition {
                WaitCondition::Visible => {
                    (matches.iter().any(|el| el.visible), "element_visible")
                }
                WaitCondition::Hidden => (
                    matches.iter().all(|el| !el.visible),
                    "element_hidden",
                ),
                WaitCondition::Attached => (!matches.is_empty(), "element_attached"),
                WaitCondition::Detached => (matches.is_empty(), "element_detached"),
                WaitCondition::TextEquals => {
                    let expected = text_content.unwrap_or_default();
                    (
                        matches.iter().any(|el| el.text.trim() == expected.trim()),
                        "text_matched",
                    )
                }
                _ => unreachable!(),
            };

            Ok(ConditionCheck {
                met,
                final_state,
                element_count: (count > 0).then_some(count),
            })
        }

        WaitCondition::CustomScript => {
            let script = custom_js.unwrap_or_default();
            let met = page
                .evaluate_bool(script)
                .await
                .map_err(|e| browser_failure("wait", e))?;
            Ok(ConditionCheck {
                met,
                final_state: "custom_condition_met",
                element_count: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockElement, MockPage};

    const POLL: Duration = Duration::from_millis(20);

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn near_deadline() -> Instant {
        Instant::now() + Duration::from_millis(120)
    }

    #[tokio::test]
    async fn test_wait_load_on_complete_page() {
        let page = MockPage::default();
        let payload = run(
            &page,
            None,
            WaitCondition::Load,
            None,
            None,
            POLL,
            far_deadline(),
        )
        .await
        .unwrap();
        let ReplyPayload::Wait(wait) = payload else {
            panic!("wrong payload");
        };
        assert!(wait.condition_met);
        assert_eq!(wait.final_state, "page_loaded");
    }

    #[tokio::test]
    async fn test_wait_visible_polls_until_element_appears() {
        let page = MockPage::default();
        let page_clone = page.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            page_clone.install_element("#spinner-done", MockElement::text("div", "done"));
        });

        let payload = run(
            &page,
            Some("#spinner-done"),
            WaitCondition::Visible,
            None,
            None,
            POLL,
            far_deadline(),
        )
        .await
        .unwrap();
        let ReplyPayload::Wait(wait) = payload else {
            panic!("wrong payload");
        };
        assert!(wait.condition_met);
        assert_eq!(wait.element_count, Some(1));
        assert!(wait.wait_time_ms >= 80);
    }

    #[tokio::test]
    async fn test_wait_hidden_when_absent() {
        let page = MockPage::default();
        let payload = run(
            &page,
            Some("#gone"),
            WaitCondition::Hidden,
            None,
            None,
            POLL,
            far_deadline(),
        )
        .await
        .unwrap();
        let ReplyPayload::Wait(wait) = payload else {
            panic!("wrong payload");
        };
        assert!(wait.condition_met);
        assert_eq!(wait.final_state, "element_hidden");
    }

    #[tokio::test]
    async fn test_wait_detached_after_removal() {
        let page = MockPage::default();
        page.install_element("#item", MockElement::text("div", "x"));
        let page_clone = page.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            page_clone.remove_elements("#item");
        });

        let payload = run(
            &page,
            Some("#item"),
            WaitCondition::Detached,
            None,
            None,
            POLL,
            far_deadline(),
        )
        .await
        .unwrap();
        let ReplyPayload::Wait(wait) = payload else {
            panic!("wrong payload");
        };
        assert!(wait.condition_met);
    }

    #[tokio::test]
    async fn test_wait_text_equals() {
        let page = MockPage::default();
        page.install_element("#status", MockElement::text("span", "  ready "));

        let payload = run(
            &page,
            Some("#status"),
            WaitCondition::TextEquals,
            Some("ready"),
            None,
            POLL,
            far_deadline(),
        )
        .await
        .unwrap();
        let ReplyPayload::Wait(wait) = payload else {
            panic!("wrong payload");
        };
        assert!(wait.condition_met);
        assert_eq!(wait.final_state, "text_matched");
    }

    #[tokio::test]
    async fn test_wait_custom_script() {
        let page = MockPage::default();
        page.push_script_result(false);
        page.push_script_result(true);

        let payload = run(
            &page,
            None,
            WaitCondition::CustomScript,
            None,
            Some("window.__done === true"),
            POLL,
            far_deadline(),
        )
        .await
        .unwrap();
        let ReplyPayload::Wait(wait) = payload else {
            panic!("wrong payload");
        };
        assert!(wait.condition_met);
        assert_eq!(wait.final_state, "custom_condition_met");
    }

    #[tokio::test]
    async fn test_wait_timeout_reports_elapsed() {
        let page = MockPage::default();
        let err = run(
            &page,
            Some("#never"),
            WaitCondition::Visible,
            None,
            None,
            POLL,
            near_deadline(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::Timeout);
        assert!(err.details.contains_key("wait_time_ms"));
    }
}
