//! Render request and response bodies.
//!
//! The request body arrives as loosely-typed JSON and is promoted into a
//! [`ValidatedRender`] before the pipeline runs. Validation is deliberately
//! strict about shapes (a URL list of absolute URLs, an object for props) and
//! deliberately lenient about content: non-JavaScript URLs in the list are
//! expected (stylesheets in a mixed bundle) and are dropped silently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use url::Url;

use crate::protocol::error::{RenderError, Result};

/// Optional GraphQL endpoint binding requested by the render body.
///
/// When present, the sandbox is given an outbound-network adapter pointed at
/// `url`, carrying `headers` on every request, bounded by `timeout`
/// milliseconds per request (default 1000).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GraphqlNetwork {
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    pub timeout: Option<u64>,
}

/// The raw `/render` request body.
///
/// `urls`, `props` and `globals` are kept as untyped JSON so that shape
/// violations produce a 400 with the offending value attached instead of a
/// generic deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderBody {
    pub urls: Option<Value>,
    pub props: Option<Value>,
    pub globals: Option<Value>,
    pub secret: Option<String>,
    pub apollo_network: Option<GraphqlNetwork>,
}

/// A render request that passed input validation.
#[derive(Debug, Clone)]
pub struct ValidatedRender {
    /// JavaScript package URLs in execution order; never empty
    pub js_urls: Vec<Url>,
    /// The entry point: the last JavaScript URL
    pub entry: Url,
    /// Base URL of the sandbox; `globals.location` when given, otherwise the
    /// entry URL
    pub location: Url,
    /// Props object handed to the render callback
    pub props: Value,
    /// Globals to copy into the sandbox namespace (the `location` key is
    /// recognized but never copied; the sandbox's own location wins)
    pub globals: Map<String, Value>,
    pub graphql: Option<GraphqlNetwork>,
}

impl RenderBody {
    /// Validates the request body and promotes it into a [`ValidatedRender`].
    ///
    /// Rules:
    /// - `urls` must be a list, every element a valid absolute URL
    /// - `props` must be an object (not an array, not a scalar)
    /// - `globals.location`, when present, must be a valid absolute URL
    /// - after dropping non-JavaScript URLs, the list must not be empty
    pub fn validate(self) -> Result<ValidatedRender> {
        let urls = match self.urls {
            Some(Value::Array(urls)) => urls,
            Some(other) => {
                return Err(RenderError::invalid_value("urls must be a list", other));
            }
            None => return Err(RenderError::invalid("urls must be a list")),
        };

        let mut parsed = Vec::with_capacity(urls.len());
        for entry in urls {
            let raw = match entry {
                Value::String(raw) => raw,
                other => {
                    return Err(RenderError::invalid_value("urls must be strings", other));
                }
            };
            let url = Url::parse(&raw).map_err(|_| {
                RenderError::invalid_value("url is not an absolute URL", Value::String(raw.clone()))
            })?;
            parsed.push((raw, url));
        }

        // Stylesheets and other assets are expected in a mixed list; only
        // JavaScript packages are fetched and executed.
        let js_urls: Vec<Url> = parsed
            .into_iter()
            .filter(|(raw, _)| raw.starts_with("http") && raw.ends_with(".js"))
            .map(|(_, url)| url)
            .collect();

        let entry = match js_urls.last() {
            Some(entry) => entry.clone(),
            None => return Err(RenderError::invalid("no JavaScript URLs in request")),
        };

        let props = match self.props {
            Some(props @ Value::Object(_)) => props,
            Some(other) => {
                return Err(RenderError::invalid_value(
                    "props must be an object",
                    other,
                ));
            }
            None => return Err(RenderError::invalid("props must be an object")),
        };

        let globals = match self.globals {
            Some(Value::Object(globals)) => globals,
            Some(other) => {
                return Err(RenderError::invalid_value(
                    "globals must be an object",
                    other,
                ));
            }
            None => Map::new(),
        };

        let location = match globals.get("location") {
            Some(Value::String(raw)) => Url::parse(raw).map_err(|_| {
                RenderError::invalid_value(
                    "globals.location must be an absolute URL",
                    Value::String(raw.clone()),
                )
            })?,
            Some(other) => {
                return Err(RenderError::invalid_value(
                    "globals.location must be an absolute URL",
                    other.clone(),
                ));
            }
            None => entry.clone(),
        };

        Ok(ValidatedRender {
            js_urls,
            entry,
            location,
            props,
            globals,
            graphql: self.apollo_network,
        })
    }
}

/// The stylesheet half of a render result.
///
/// Component bundles return either a structured stylesheet (content plus the
/// class names that were actually rendered) or a plain CSS string; both wire
/// forms are preserved as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CssValue {
    Styled {
        content: String,
        #[serde(rename = "renderedClassNames")]
        rendered_class_names: Vec<String>,
    },
    Raw(String),
}

/// The `/render` success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    pub html: String,
    #[serde(default)]
    pub css: Option<CssValue>,
}

/// The stable error response schema: `{error, value?, stack?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> RenderBody {
        serde_json::from_value(v).unwrap()
    }

    const ABS: &str = "https://cdn.example.com/bundle/entry.js";

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let validated = body(json!({
            "urls": ["https://cdn.example.com/vendor.js", ABS],
            "props": {"name": "NAME"},
            "secret": "sekret",
        }))
        .validate()
        .unwrap();

        assert_eq!(validated.js_urls.len(), 2);
        assert_eq!(validated.entry.as_str(), ABS);
        // No globals.location: the entry URL is the sandbox base.
        assert_eq!(validated.location.as_str(), ABS);
    }

    #[test]
    fn test_validate_drops_non_js_urls_silently() {
        let validated = body(json!({
            "urls": [
                "https://cdn.example.com/styles.css",
                ABS,
            ],
            "props": {},
        }))
        .validate()
        .unwrap();

        assert_eq!(validated.js_urls.len(), 1);
        assert_eq!(validated.entry.as_str(), ABS);
    }

    #[test]
    fn test_validate_rejects_malformed_bodies() {
        // The input-validation table: every shape violation is a 400.
        let cases = vec![
            json!({}),
            json!({"props": {"bar": 4}, "secret": "sekret"}),
            json!({"urls": [], "props": {"bar": 4}, "secret": "sekret"}),
            json!({"urls": ["foo"], "props": {"bar": 4}, "secret": "sekret"}),
            json!({"urls": [ABS], "props": "foo", "secret": "sekret"}),
            json!({"urls": [ABS], "props": ["foo"], "secret": "sekret"}),
            json!({"urls": [42], "props": {"bar": 4}}),
            json!({"urls": "not-a-list", "props": {"bar": 4}}),
        ];

        for case in cases {
            let err = body(case.clone()).validate().unwrap_err();
            assert!(err.is_input_error(), "expected input error for {}", case);
        }
    }

    #[test]
    fn test_validate_rejects_bad_globals_location() {
        let err = body(json!({
            "urls": [ABS],
            "props": {},
            "globals": {"location": "not-a-url"},
        }))
        .validate()
        .unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_validate_honors_globals_location() {
        let validated = body(json!({
            "urls": [ABS],
            "props": {},
            "globals": {"location": "https://www.example.com/page", "flag": true},
        }))
        .validate()
        .unwrap();

        assert_eq!(validated.location.as_str(), "https://www.example.com/page");
        assert_eq!(validated.globals.get("flag"), Some(&json!(true)));
    }

    #[test]
    fn test_css_value_wire_forms() {
        let styled: CssValue = serde_json::from_value(json!({
            "content": ".a{color:red;}",
            "renderedClassNames": ["a"],
        }))
        .unwrap();
        assert_eq!(
            styled,
            CssValue::Styled {
                content: ".a{color:red;}".into(),
                rendered_class_names: vec!["a".into()],
            }
        );

        let raw: CssValue = serde_json::from_value(json!("CSS: {}")).unwrap();
        assert_eq!(raw, CssValue::Raw("CSS: {}".into()));
    }

    #[test]
    fn test_render_result_serializes_null_css() {
        let result = RenderResult {
            html: "<div></div>".into(),
            css: None,
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire, json!({"html": "<div></div>", "css": null}));
    }

    #[test]
    fn test_error_body_omits_empty_fields() {
        let body = ErrorBody {
            error: "urls must be a list".into(),
            value: None,
            stack: None,
        };
        let wire = serde_json::to_string(&body).unwrap();
        assert_eq!(wire, r#"{"error":"urls must be a list"}"#);
    }

    #[test]
    fn test_apollo_network_deserializes() {
        let body = body(json!({
            "urls": [ABS],
            "props": {},
            "apolloNetwork": {
                "url": "https://graphql.example.com",
                "headers": {"authorization": "Bearer t"},
                "timeout": 250,
            },
        }));
        let graphql = body.validate().unwrap().graphql.unwrap();
        assert_eq!(graphql.url.as_deref(), Some("https://graphql.example.com"));
        assert_eq!(graphql.timeout, Some(250));
    }
}
