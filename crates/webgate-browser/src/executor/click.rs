//! Click executor.

use std::time::{Duration, Instant};

use tracing::info;

use webgate_protocol::response::ClickPosition;
use webgate_protocol::{
    ClickPayload, ErrorBody, ErrorCode, MouseButton, RelativePosition, ReplyPayload,
};

use crate::driver::{ElementSnapshot, PageDriver};

use super::browser_failure;

const LOCATE_POLL: Duration = Duration::from_millis(100);

/// Poll the selector until it matches or the deadline passes.
pub(super) async fn locate(
    page: &dyn PageDriver,
    selector: &str,
    deadline: Instant,
) -> Result<Vec<ElementSnapshot>, ErrorBody> {
    loop {
        let matches = page
            .query(selector)
            .await
            .map_err(|e| browser_failure("locate", e))?;
        if !matches.is_empty() {
            return Ok(matches);
        }
        if Instant::now() >= deadline {
            return Err(ErrorBody::new(
                ErrorCode::ElementNotFound,
                format!("Element not found: {}", selector),
            ));
        }
        tokio::time::sleep(LOCATE_POLL).await;
    }
}

#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    page: &dyn PageDriver,
    selector: &str,
    button: MouseButton,
    click_count: u32,
    force: bool,
    position: Option<RelativePosition>,
    deadline: Instant,
) -> Result<ReplyPayload, ErrorBody> {
    info!("Clicking element {}", selector);

    let matches = locate(page, selector, deadline).await?;
    let element = &matches[0];

    if !element.visible && !force {
        return Err(ErrorBody::new(
            ErrorCode::ElementNotVisible,
            format!("Element not visible: {}", selector),
        ));
    }

    let (x, y) = match element.bounds {
        Some(bounds) => match position {
            Some(pos) => bounds.point_at(pos.x, pos.y),
            None => bounds.center(),
        },
        None if force => (0.0, 0.0),
        None => {
            return Err(ErrorBody::new(
                ErrorCode::ElementNotVisible,
                format!("Element has no layout box: {}", selector),
            ));
        }
    };

    page.click_at(x, y, button, click_count)
        .await
        .map_err(|e| browser_failure("click", e))?;

    Ok(ReplyPayload::Click(ClickPayload {
        element_found: true,
        element_visible: element.visible,
        click_position: ClickPosition {
            x: x as i64,
            y: y as i64,
        },
        element_text: Some(element.text.clone()),
        element_tag: Some(element.tag.clone()),
        state_diff: None,
    }))
}
