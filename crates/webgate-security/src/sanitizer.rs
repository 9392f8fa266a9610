//! Input sanitization for selectors, URLs, free text, and wait scripts.

use regex::RegexSet;
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Why an input was rejected. Only the category is reported back to the
/// client; the offending substring never leaves the sanitizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    ScriptTag,
    EventHandler,
    ScriptScheme,
    HtmlDataUri,
    CssExpression,
    DangerousFunction,
    DisallowedScheme,
    Malformed,
    TooLong,
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("unsafe {field}: {category:?}")]
    Unsafe {
        field: &'static str,
        category: RejectionCategory,
    },
}

impl SanitizeError {
    pub fn category(&self) -> RejectionCategory {
        match self {
            SanitizeError::Unsafe { category, .. } => *category,
        }
    }

    fn unsafe_input(field: &'static str, category: RejectionCategory) -> Self {
        SanitizeError::Unsafe { field, category }
    }
}

/// Length ceilings and feature toggles for the sanitizer.
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    pub max_selector_length: usize,
    pub max_text_length: usize,
    pub max_url_length: usize,
    pub max_script_length: usize,
    /// Accept URL schemes other than http/https.
    pub allow_non_http_urls: bool,
    /// Permit custom-script wait conditions at all.
    pub allow_custom_js: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_selector_length: 1_000,
            max_text_length: 10_000,
            max_url_length: 2_048,
            max_script_length: 5_000,
            allow_non_http_urls: false,
            allow_custom_js: false,
        }
    }
}

/// Pattern index pairs for mapping a `RegexSet` match back to its category.
const INJECTION_PATTERNS: &[(&str, RejectionCategory)] = &[
    (r"(?i)<\s*script", RejectionCategory::ScriptTag),
    (r"(?i)</\s*script\s*>", RejectionCategory::ScriptTag),
    (r"(?i)\bon\w+\s*=", RejectionCategory::EventHandler),
    (r"(?i)javascript\s*:", RejectionCategory::ScriptScheme),
    (r"(?i)vbscript\s*:", RejectionCategory::ScriptScheme),
    (r"(?i)data\s*:\s*text/html", RejectionCategory::HtmlDataUri),
    (r"(?i)expression\s*\(", RejectionCategory::CssExpression),
    (r"(?i)@import\b", RejectionCategory::CssExpression),
];

/// Function calls refused inside custom wait scripts.
const DANGEROUS_JS_CALLS: &[&str] = &[
    r"(?i)\beval\s*\(",
    r"(?i)\bFunction\s*\(",
    r"(?i)\bsetTimeout\s*\(",
    r"(?i)\bsetInterval\s*\(",
    r"(?i)\bXMLHttpRequest\s*\(",
    r"(?i)\bfetch\s*\(",
    r"(?i)\bimport\s*\(",
];

/// Rejects script-injection patterns and normalizes string inputs.
pub struct InputSanitizer {
    config: SanitizerConfig,
    injection: RegexSet,
    dangerous_js: RegexSet,
}

impl InputSanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        let injection = RegexSet::new(INJECTION_PATTERNS.iter().map(|(p, _)| *p))
            .expect("injection patterns are static and valid");
        let dangerous_js =
            RegexSet::new(DANGEROUS_JS_CALLS).expect("js patterns are static and valid");
        Self {
            config,
            injection,
            dangerous_js,
        }
    }

    /// Validate a CSS selector; returns the trimmed selector on success.
    pub fn sanitize_selector(&self, selector: &str) -> Result<String, SanitizeError> {
        let trimmed = selector.trim();
        if trimmed.is_empty() {
            return Err(SanitizeError::unsafe_input("selector", RejectionCategory::Empty));
        }
        if trimmed.len() > self.config.max_selector_length {
            return Err(SanitizeError::unsafe_input(
                "selector",
                RejectionCategory::TooLong,
            ));
        }
        if let Some(category) = self.first_injection_match(trimmed) {
            return Err(SanitizeError::unsafe_input("selector", category));
        }
        if !balanced_selector(trimmed) {
            return Err(SanitizeError::unsafe_input(
                "selector",
                RejectionCategory::Malformed,
            ));
        }
        Ok(trimmed.to_string())
    }

    /// Validate free text destined for a fill command.
    pub fn sanitize_text(&self, text: &str) -> Result<String, SanitizeError> {
        if text.len() > self.config.max_text_length {
            return Err(SanitizeError::unsafe_input("text", RejectionCategory::TooLong));
        }
        if let Some(category) = self.first_injection_match(text) {
            return Err(SanitizeError::unsafe_input("text", category));
        }
        Ok(text.to_string())
    }

    /// Validate and normalize a navigation URL.
    pub fn sanitize_url(&self, url: &str) -> Result<String, SanitizeError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(SanitizeError::unsafe_input("url", RejectionCategory::Empty));
        }
        if trimmed.len() > self.config.max_url_length {
            return Err(SanitizeError::unsafe_input("url", RejectionCategory::TooLong));
        }
        if let Some(category) = self.first_injection_match(trimmed) {
            return Err(SanitizeError::unsafe_input("url", category));
        }
        let parsed = Url::parse(trimmed)
            .map_err(|_| SanitizeError::unsafe_input("url", RejectionCategory::Malformed))?;
        if !self.config.allow_non_http_urls
            && !matches!(parsed.scheme(), "http" | "https")
        {
            return Err(SanitizeError::unsafe_input(
                "url",
                RejectionCategory::DisallowedScheme,
            ));
        }
        Ok(parsed.to_string())
    }

    /// Validate a custom wait script.
    pub fn sanitize_script(&self, script: &str) -> Result<String, SanitizeError> {
        if !self.config.allow_custom_js {
            return Err(SanitizeError::unsafe_input(
                "custom_js",
                RejectionCategory::DangerousFunction,
            ));
        }
        let trimmed = script.trim();
        if trimmed.is_empty() {
            return Err(SanitizeError::unsafe_input(
                "custom_js",
                RejectionCategory::Empty,
            ));
        }
        if trimmed.len() > self.config.max_script_length {
            return Err(SanitizeError::unsafe_input(
                "custom_js",
                RejectionCategory::TooLong,
            ));
        }
        if self.dangerous_js.is_match(trimmed) {
            return Err(SanitizeError::unsafe_input(
                "custom_js",
                RejectionCategory::DangerousFunction,
            ));
        }
        Ok(trimmed.to_string())
    }

    fn first_injection_match(&self, input: &str) -> Option<RejectionCategory> {
        self.injection
            .matches(input)
            .iter()
            .next()
            .map(|idx| INJECTION_PATTERNS[idx].1)
    }
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self::new(SanitizerConfig::default())
    }
}

/// Brackets and quotes in a selector must pair up.
fn balanced_selector(selector: &str) -> bool {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;

    for ch in selector.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '(' => stack.push(')'),
                '[' => stack.push(']'),
                '{' => stack.push('}'),
                ')' | ']' | '}' => {
                    if stack.pop() != Some(ch) {
                        return false;
                    }
                }
                _ => {}
            },
        }
    }

    stack.is_empty() && quote.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> InputSanitizer {
        InputSanitizer::default()
    }

    #[test]
    fn test_plain_selector_accepted() {
        let s = sanitizer();
        assert_eq!(s.sanitize_selector("  div.item > a[href] ").unwrap(), "div.item > a[href]");
        assert!(s.sanitize_selector("#main h1:nth-child(2)").is_ok());
    }

    #[test]
    fn test_event_handler_selector_rejected() {
        let err = sanitizer()
            .sanitize_selector("a onclick=alert(1)")
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::EventHandler);
    }

    #[test]
    fn test_script_tag_rejected() {
        let err = sanitizer()
            .sanitize_selector("<script>alert(1)</script>")
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::ScriptTag);
    }

    #[test]
    fn test_rejection_does_not_echo_input() {
        let err = sanitizer()
            .sanitize_selector("a onclick=steal()")
            .unwrap_err();
        assert!(!err.to_string().contains("steal"));
    }

    #[test]
    fn test_unbalanced_selector_rejected() {
        let err = sanitizer().sanitize_selector("div[class='x'").unwrap_err();
        assert_eq!(err.category(), RejectionCategory::Malformed);
    }

    #[test]
    fn test_url_schemes() {
        let s = sanitizer();
        assert!(s.sanitize_url("https://example.com/path?q=1").is_ok());
        assert!(s.sanitize_url("http://localhost:8080").is_ok());

        let err = s.sanitize_url("file:///etc/passwd").unwrap_err();
        assert_eq!(err.category(), RejectionCategory::DisallowedScheme);

        let err = s.sanitize_url("javascript:alert(1)").unwrap_err();
        assert_eq!(err.category(), RejectionCategory::ScriptScheme);
    }

    #[test]
    fn test_url_normalization() {
        let s = sanitizer();
        // Url::parse appends the root path.
        assert_eq!(s.sanitize_url("https://example.com").unwrap(), "https://example.com/");
    }

    #[test]
    fn test_non_http_scheme_allowed_when_configured() {
        let s = InputSanitizer::new(SanitizerConfig {
            allow_non_http_urls: true,
            ..SanitizerConfig::default()
        });
        assert!(s.sanitize_url("about:blank").is_ok());
    }

    #[test]
    fn test_data_html_uri_rejected() {
        let err = sanitizer()
            .sanitize_url("data:text/html,<b>x</b>")
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::HtmlDataUri);
    }

    #[test]
    fn test_text_with_script_rejected() {
        let err = sanitizer()
            .sanitize_text("hello <script src='x'>")
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::ScriptTag);
        assert!(sanitizer().sanitize_text("ordinary search terms").is_ok());
    }

    #[test]
    fn test_too_long_inputs() {
        let s = InputSanitizer::new(SanitizerConfig {
            max_selector_length: 10,
            ..SanitizerConfig::default()
        });
        let err = s.sanitize_selector("div.really-long-selector").unwrap_err();
        assert_eq!(err.category(), RejectionCategory::TooLong);
    }

    #[test]
    fn test_custom_js_disabled_by_default() {
        let err = sanitizer()
            .sanitize_script("document.readyState === 'complete'")
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::DangerousFunction);
    }

    #[test]
    fn test_custom_js_dangerous_calls() {
        let s = InputSanitizer::new(SanitizerConfig {
            allow_custom_js: true,
            ..SanitizerConfig::default()
        });
        assert!(s.sanitize_script("window.__done === true").is_ok());
        let err = s.sanitize_script("fetch('https://evil')").unwrap_err();
        assert_eq!(err.category(), RejectionCategory::DangerousFunction);
    }

    #[test]
    fn test_css_expression_rejected() {
        let err = sanitizer()
            .sanitize_selector("div[style*='expression(x)']")
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::CssExpression);
    }
}
