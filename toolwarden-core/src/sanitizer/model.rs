//! HTTP client for an external prompt-injection classification model.
//!
//! The model service receives `{"text": "..."}` and answers in the shape of a
//! text-classification pipeline: `{"label", "score"}`, a list of those, or a
//! list of lists (one per input). The top entry decides.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{Classification, Classifier, ClassifierError, VerdictLabel};

/// Injection probability above which a text is suspicious.
pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// Configuration for [`HttpClassifier`].
#[derive(Debug, Clone)]
pub struct HttpClassifierConfig {
    /// Classification endpoint
    pub url: String,
    /// Injection probability above which a text is suspicious (strict `>`)
    pub threshold: f32,
    /// Labels that denote injection; any other label is read as benign
    pub injection_labels: Vec<String>,
    /// Connection timeout; the overall deadline is enforced by the sanitizer
    pub connect_timeout: Duration,
}

impl HttpClassifierConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            threshold: DEFAULT_THRESHOLD,
            injection_labels: vec![
                "untrusted".to_string(),
                "INJECTION".to_string(),
                "injection".to_string(),
            ],
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f32,
}

/// Model-backed [`Classifier`].
pub struct HttpClassifier {
    client: reqwest::Client,
    config: HttpClassifierConfig,
}

impl HttpClassifier {
    /// # Errors
    ///
    /// Returns `ClassifierError::Unavailable` if the URL does not parse or the
    /// HTTP client cannot be built.
    pub fn new(config: HttpClassifierConfig) -> Result<Self, ClassifierError> {
        reqwest::Url::parse(&config.url).map_err(|e| {
            ClassifierError::Unavailable(format!("invalid classifier url '{}': {e}", config.url))
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpClassifierConfig {
        &self.config
    }

    /// Turn a model answer into an injection-probability classification.
    fn interpret(&self, body: &Value) -> Result<Classification, ClassifierError> {
        let top = top_entry(body).ok_or_else(|| {
            ClassifierError::Malformed("no label/score entry in model response".to_string())
        })?;
        let entry: LabelScore = serde_json::from_value(top.clone())
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        if !(0.0..=1.0).contains(&entry.score) {
            return Err(ClassifierError::Malformed(format!(
                "score {} outside [0, 1]",
                entry.score
            )));
        }

        let is_injection_label = self.config.injection_labels.contains(&entry.label);
        let score = if is_injection_label {
            entry.score
        } else {
            1.0 - entry.score
        };
        let label = if score > self.config.threshold {
            VerdictLabel::Suspicious
        } else {
            VerdictLabel::Benign
        };

        debug!(model_label = %entry.label, score, "Model classification");

        Ok(Classification {
            label,
            score,
            matched: is_injection_label.then_some(entry.label),
        })
    }
}

/// First `{label, score}` object, descending into leading array elements.
fn top_entry(body: &Value) -> Option<&Value> {
    match body {
        Value::Array(items) => items.first().and_then(top_entry),
        Value::Object(map) if map.contains_key("label") => Some(body),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let response = self
            .client
            .post(&self.config.url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
        self.interpret(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn classifier(url: &str) -> HttpClassifier {
        HttpClassifier::new(HttpClassifierConfig::new(url)).unwrap()
    }

    #[test]
    fn test_interpret_response_shapes() {
        let c = classifier("http://localhost:9/classify");

        let flat = c
            .interpret(&json!({"label": "untrusted", "score": 0.97}))
            .unwrap();
        assert_eq!(flat.label, VerdictLabel::Suspicious);
        assert!((flat.score - 0.97).abs() < f32::EPSILON);

        let listed = c
            .interpret(&json!([{"label": "trusted", "score": 0.99}]))
            .unwrap();
        assert_eq!(listed.label, VerdictLabel::Benign);
        assert!(listed.score < 0.02);

        let nested = c
            .interpret(&json!([[
                {"label": "INJECTION", "score": 0.85},
                {"label": "SAFE", "score": 0.15}
            ]]))
            .unwrap();
        assert_eq!(nested.label, VerdictLabel::Suspicious);
    }

    #[test]
    fn test_threshold_is_strict() {
        let c = classifier("http://localhost:9/classify");
        let at = c
            .interpret(&json!({"label": "untrusted", "score": 0.8}))
            .unwrap();
        assert_eq!(at.label, VerdictLabel::Benign);
    }

    #[test]
    fn test_interpret_rejects_garbage() {
        let c = classifier("http://localhost:9/classify");
        assert!(matches!(
            c.interpret(&json!({"ok": true})),
            Err(ClassifierError::Malformed(_))
        ));
        assert!(matches!(
            c.interpret(&json!({"label": "untrusted", "score": 7.0})),
            Err(ClassifierError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(HttpClassifier::new(HttpClassifierConfig::new("not a url")).is_err());
    }

    #[tokio::test]
    async fn test_classify_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .and(body_json(json!({"text": "hello"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"label": "trusted", "score": 0.95}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let c = classifier(&format!("{}/classify", server.uri()));
        let result = c.classify("hello").await.unwrap();
        assert_eq!(result.label, VerdictLabel::Benign);
    }

    #[tokio::test]
    async fn test_classify_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let c = classifier(&server.uri());
        assert!(matches!(
            c.classify("hello").await,
            Err(ClassifierError::Status(503))
        ));
    }
}
