use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{AppError, Context};

use super::FetchResult;

#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: HeaderMap,
}

/// Render `url_template` with the given placeholder values and resolve the header set.
pub fn prepare_request(
    url_template: &str,
    replacements: &[(&str, &str)],
    headers: &HashMap<String, String>,
) -> FetchResult<PreparedRequest> {
    let replacements: HashMap<&str, &str> = replacements.iter().copied().collect();

    let url = render_template(url_template, &replacements)?;
    let headers = build_headers(headers)?;

    Ok(PreparedRequest { url, headers })
}

/// Route `url` through a pass-through proxy that expects the target URL-encoded after its prefix.
pub fn apply_proxy(prefix: &str, url: &str) -> String {
    format!("{prefix}{}", urlencoding::encode(url))
}

pub fn expand_env_vars(value: &str) -> FetchResult<String> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            while let Some(&next) = chars.peek() {
                chars.next();
                if next == '}' {
                    closed = true;
                    break;
                }
                name.push(next);
            }

            if name.is_empty() {
                return Err(AppError::message(
                    "Encountered empty environment placeholder in header",
                ));
            }

            if !closed {
                return Err(AppError::message(
                    "Unterminated environment placeholder in header",
                ));
            }

            let value = std::env::var(&name).with_context(|| {
                format!("Environment variable {name} required by request header is not set")
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

fn render_template(template: &str, replacements: &HashMap<&str, &str>) -> FetchResult<String> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '{' {
            result.push(ch);
            continue;
        }

        let mut key = String::new();
        let mut closed = false;
        while let Some(&next) = chars.peek() {
            chars.next();
            if next == '}' {
                closed = true;
                break;
            }
            key.push(next);
        }

        if !closed {
            return Err(AppError::message(format!(
                "Unterminated placeholder in URL template: {{{key}"
            )));
        }

        let value = replacements.get(key.as_str()).ok_or_else(|| {
            AppError::message(format!(
                "No replacement provided for placeholder `{{{key}}}` in URL template"
            ))
        })?;
        result.push_str(value);
    }

    Ok(result)
}

fn build_headers(headers: &HashMap<String, String>) -> FetchResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .with_context(|| format!("Invalid header name: {key}"))?;
        let expanded = expand_env_vars(value)?;
        let header_value = HeaderValue::from_str(&expanded)
            .with_context(|| format!("Invalid header value for {key}"))?;
        map.insert(name, header_value);
    }
    Ok(map)
}
