//! Extract executor.

use serde_json::Value;
use tracing::info;

use webgate_protocol::{
    ErrorBody, ErrorCode, ExtractKind, ExtractPayload, ExtractedItem, ReplyPayload,
};

use crate::driver::{PageDriver, ReadKind};

use super::browser_failure;

#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    page: &dyn PageDriver,
    selector: &str,
    extract_type: ExtractKind,
    attribute_name: Option<&str>,
    property_name: Option<&str>,
    multiple: bool,
    trim_whitespace: bool,
) -> Result<ReplyPayload, ErrorBody> {
    info!("Extracting {:?} from {}", extract_type, selector);

    let matches = page
        .query(selector)
        .await
        .map_err(|e| browser_failure("extract", e))?;

    if matches.is_empty() {
        return Err(ErrorBody::new(
            ErrorCode::ElementNotFound,
            format!("No elements found: {}", selector),
        ));
    }

    let read_kind = match extract_type {
        ExtractKind::Text => ReadKind::Text,
        ExtractKind::Html => ReadKind::Html,
        ExtractKind::Attribute => ReadKind::Attribute(attribute_name.ok_or_else(|| {
            ErrorBody::new(
                ErrorCode::InvalidParams,
                "attribute_name required for attribute extraction",
            )
        })?),
        ExtractKind::Property => ReadKind::Property(property_name.ok_or_else(|| {
            ErrorBody::new(
                ErrorCode::InvalidParams,
                "property_name required for property extraction",
            )
        })?),
    };

    let count = if multiple { matches.len() } else { 1 };
    let mut data = Vec::with_capacity(count);
    let mut element_info = Vec::with_capacity(count);

    for element in matches.iter().take(count) {
        let value = page
            .read_element(selector, element.index, read_kind)
            .await
            .map_err(|e| {
                tracing::warn!("Error extracting from element {}: {}", element.index, e);
                ErrorBody::new(
                    ErrorCode::ExtractionFailed,
                    format!("Extraction failed for element {}", element.index),
                )
            })?
            // The match list can shrink between query and read.
            .unwrap_or(Value::Null);

        let value = match value {
            Value::String(text) if trim_whitespace && extract_type == ExtractKind::Text => {
                Value::String(text.trim().to_string())
            }
            other => other,
        };
        data.push(value);

        element_info.push(ExtractedItem {
            tag: element.tag.clone(),
            class: element.class_name.clone(),
            index: element.index,
        });
    }

    let data = if multiple {
        Value::Array(data)
    } else {
        data.into_iter().next().unwrap_or(Value::Null)
    };

    Ok(ReplyPayload::Extract(ExtractPayload {
        elements_found: matches.len(),
        data,
        element_info,
        from_cache: false,
    }))
}
