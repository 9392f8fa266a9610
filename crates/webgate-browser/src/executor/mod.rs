//! Per-command executors operating on a session's page.

mod click;
mod extract;
mod fill;
mod navigate;
mod wait;

use std::time::{Duration, Instant};

use tracing::error;

use webgate_protocol::{Action, CommandFrame, ErrorBody, ErrorCode, ReplyPayload, StateDiff};

use crate::driver::{PageDriver, PageLifecycle};
use crate::error::BrowserError;

/// Observable page signals captured around mutating commands.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PageSignals {
    pub url: String,
    pub title: String,
    pub node_count: u64,
}

pub(crate) async fn capture_signals(page: &dyn PageDriver) -> Result<PageSignals, BrowserError> {
    Ok(PageSignals {
        url: page.current_url().await?,
        title: page.title().await?,
        node_count: page.dom_node_count().await?,
    })
}

pub(crate) fn diff_signals(before: &PageSignals, after: &PageSignals) -> StateDiff {
    StateDiff {
        url_changed: before.url != after.url,
        title_changed: before.title != after.title,
        dom_changed: before.node_count != after.node_count,
    }
}

/// Rank page lifecycle milestones so "at least interactive" is comparable.
pub(crate) fn lifecycle_rank(state: PageLifecycle) -> u8 {
    match state {
        PageLifecycle::Loading => 0,
        PageLifecycle::Interactive => 1,
        PageLifecycle::Complete => 2,
    }
}

/// Map a driver failure into a client-facing error without leaking
/// internals for unexpected cases.
pub(crate) fn browser_failure(operation: &str, e: BrowserError) -> ErrorBody {
    match e {
        BrowserError::Timeout(msg) => ErrorBody::new(ErrorCode::Timeout, msg),
        BrowserError::NavigationFailed(msg) => {
            ErrorBody::new(ErrorCode::NavigationFailed, format!("Navigation failed: {}", msg))
        }
        other => {
            error!("{} failed: {}", operation, other);
            ErrorBody::new(ErrorCode::Internal, format!("{} failed", operation))
        }
    }
}

fn attach_diff(payload: &mut ReplyPayload, diff: StateDiff) {
    match payload {
        ReplyPayload::Navigate(p) => p.state_diff = Some(diff),
        ReplyPayload::Click(p) => p.state_diff = Some(diff),
        ReplyPayload::Fill(p) => p.state_diff = Some(diff),
        _ => {}
    }
}

/// Execute one validated command against a page. The caller enforces the
/// outer hard deadline; executors also track it internally so poll loops
/// return precise timeout errors.
pub async fn execute(
    page: &dyn PageDriver,
    frame: &CommandFrame,
) -> Result<ReplyPayload, ErrorBody> {
    let deadline = Instant::now() + Duration::from_millis(frame.timeout);

    match &frame.action {
        Action::Navigate {
            url,
            wait_until,
            referer,
        } => {
            let before = capture_signals(page)
                .await
                .map_err(|e| browser_failure("navigate", e))?;
            let mut payload =
                navigate::run(page, url, *wait_until, referer.as_deref(), deadline).await?;
            let after = capture_signals(page)
                .await
                .map_err(|e| browser_failure("navigate", e))?;
            attach_diff(&mut payload, diff_signals(&before, &after));
            Ok(payload)
        }

        Action::Click {
            selector,
            button,
            click_count,
            force,
            position,
        } => {
            let before = capture_signals(page)
                .await
                .map_err(|e| browser_failure("click", e))?;
            let mut payload = click::run(
                page,
                selector,
                *button,
                *click_count,
                *force,
                *position,
                deadline,
            )
            .await?;
            let after = capture_signals(page)
                .await
                .map_err(|e| browser_failure("click", e))?;
            attach_diff(&mut payload, diff_signals(&before, &after));
            Ok(payload)
        }

        Action::Fill {
            selector,
            text,
            clear_first,
            press_enter,
            typing_delay_ms,
            validate_after,
        } => {
            let before = capture_signals(page)
                .await
                .map_err(|e| browser_failure("fill", e))?;
            let mut payload = fill::run(
                page,
                selector,
                text,
                *clear_first,
                *press_enter,
                *typing_delay_ms,
                *validate_after,
                deadline,
            )
            .await?;
            let after = capture_signals(page)
                .await
                .map_err(|e| browser_failure("fill", e))?;
            attach_diff(&mut payload, diff_signals(&before, &after));
            Ok(payload)
        }

        Action::Extract {
            selector,
            extract_type,
            attribute_name,
            property_name,
            multiple,
            trim_whitespace,
        } => {
            extract::run(
                page,
                selector,
                *extract_type,
                attribute_name.as_deref(),
                property_name.as_deref(),
                *multiple,
                *trim_whitespace,
            )
            .await
        }

        Action::Wait {
            selector,
            condition,
            text_content,
            custom_js,
            poll_interval_ms,
        } => {
            wait::run(
                page,
                selector.as_deref(),
                *condition,
                text_content.as_deref(),
                custom_js.as_deref(),
                Duration::from_millis(*poll_interval_ms),
                deadline,
            )
            .await
        }

        Action::CreateSession | Action::CloseSession => Err(ErrorBody::new(
            ErrorCode::Internal,
            "session control commands are not executable",
        )),
    }
}
