//! Fill executor.

use std::time::{Duration, Instant};

use tracing::info;

use webgate_protocol::{ErrorBody, ErrorCode, FillPayload, ReplyPayload};

use crate::driver::{PageDriver, ReadKind};

use super::browser_failure;
use super::click::locate;

#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    page: &dyn PageDriver,
    selector: &str,
    text: &str,
    clear_first: bool,
    press_enter: bool,
    typing_delay_ms: u64,
    validate_after: bool,
    deadline: Instant,
) -> Result<ReplyPayload, ErrorBody> {
    info!("Filling element {}", selector);

    let matches = locate(page, selector, deadline).await?;
    let element = &matches[0];

    if !element.input_like {
        return Err(ErrorBody::new(
            ErrorCode::ElementNotInteractable,
            format!("Element is not input-like: {}", selector),
        ));
    }

    let previous_value = element.value.clone();

    page.focus(selector, 0)
        .await
        .map_err(|e| browser_failure("fill", e))?;

    if clear_first {
        page.clear_value(selector, 0)
            .await
            .map_err(|e| browser_failure("fill", e))?;
    }

    if typing_delay_ms > 0 {
        let delay = Duration::from_millis(typing_delay_ms);
        let mut buffer = [0u8; 4];
        for ch in text.chars() {
            page.type_text(ch.encode_utf8(&mut buffer))
                .await
                .map_err(|e| browser_failure("fill", e))?;
            tokio::time::sleep(delay).await;
        }
    } else {
        page.type_text(text)
            .await
            .map_err(|e| browser_failure("fill", e))?;
    }

    if press_enter {
        page.press_key("Enter")
            .await
            .map_err(|e| browser_failure("fill", e))?;
    }

    // Re-read the element so the reply reflects what actually landed.
    let current_value = page
        .read_element(selector, 0, ReadKind::Property("value"))
        .await
        .map_err(|e| browser_failure("fill", e))?
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default();

    // A mismatch is reported, not failed: the page may rewrite input.
    let validation_passed = !validate_after || current_value == text;

    Ok(ReplyPayload::Fill(FillPayload {
        element_found: true,
        element_type: element.input_type.clone(),
        text_entered: text.to_string(),
        previous_value,
        current_value,
        validation_passed,
        state_diff: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockElement, MockPage};

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn near_deadline() -> Instant {
        Instant::now() + Duration::from_millis(150)
    }

    #[tokio::test]
    async fn test_fill_clears_and_types() {
        let page = MockPage::default();
        page.install_element("#name", MockElement::input("text", "old"));

        let payload = run(
            &page,
            "#name",
            "new value",
            true,
            false,
            0,
            true,
            far_deadline(),
        )
        .await
        .unwrap();

        let ReplyPayload::Fill(fill) = payload else {
            panic!("wrong payload");
        };
        assert!(fill.element_found);
        assert_eq!(fill.element_type, "text");
        assert_eq!(fill.previous_value.as_deref(), Some("old"));
        assert_eq!(fill.current_value, "new value");
        assert!(fill.validation_passed);
        assert_eq!(page.element_value("#name", 0).unwrap(), "new value");
    }

    #[tokio::test]
    async fn test_fill_without_clear_appends() {
        let page = MockPage::default();
        page.install_element("#name", MockElement::input("text", "old-"));

        let payload = run(
            &page,
            "#name",
            "suffix",
            false,
            false,
            0,
            true,
            far_deadline(),
        )
        .await
        .unwrap();

        let ReplyPayload::Fill(fill) = payload else {
            panic!("wrong payload");
        };
        assert_eq!(fill.current_value, "old-suffix");
        // Mismatch against the intended text is reflected, not a failure.
        assert!(!fill.validation_passed);
    }

    #[tokio::test]
    async fn test_fill_typing_delay_types_per_character() {
        let page = MockPage::default();
        page.install_element("#name", MockElement::input("text", ""));

        run(&page, "#name", "abc", true, false, 1, true, far_deadline())
            .await
            .unwrap();

        assert_eq!(page.typed(), vec!["a", "b", "c"]);
        assert_eq!(page.element_value("#name", 0).unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_fill_press_enter() {
        let page = MockPage::default();
        page.install_element("#q", MockElement::input("search", ""));

        run(&page, "#q", "query", true, true, 0, false, far_deadline())
            .await
            .unwrap();
        assert_eq!(page.keys(), vec!["Enter"]);
    }

    #[tokio::test]
    async fn test_fill_non_input_rejected() {
        let page = MockPage::default();
        page.install_element("#title", MockElement::text("h1", "heading"));

        let err = run(
            &page,
            "#title",
            "text",
            true,
            false,
            0,
            true,
            far_deadline(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::ElementNotInteractable);
    }

    #[tokio::test]
    async fn test_fill_missing_element() {
        let page = MockPage::default();
        let err = run(
            &page,
            "#missing",
            "text",
            true,
            false,
            0,
            true,
            near_deadline(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::ElementNotFound);
    }
}
