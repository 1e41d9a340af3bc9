//! HTTP client for the HR backend.
//!
//! Three endpoints: the password-grant token endpoint, the attendance
//! push endpoint and the personnel listing. Transport failures and
//! unexpected response shapes never escape as errors from the push path;
//! they are folded into a [`PushOutcome`] the scheduler reports upstream.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::reconcile::CanonicalRecord;

/// Timeout applied to every backend call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Token endpoint response (HTTP 200).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// One personnel row from the backend.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PersonnelRecord {
    #[serde(rename = "PersonelID")]
    pub id: i64,
    #[serde(rename = "PersonelAdiSoyadi")]
    pub full_name: String,
    #[serde(rename = "Durum", default)]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
struct PersonnelPage {
    #[serde(rename = "Model", default)]
    model: Vec<PersonnelRecord>,
}

/// Result of one push attempt, already interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub success: bool,
    /// Whether the backend received and answered the batch in an
    /// understood shape. False on transport errors, non-2xx statuses and
    /// unparseable bodies; true for a parsed "not processed" answer.
    pub delivered: bool,
    pub detail: String,
}

/// Thin wrapper around one shared `reqwest` client.
#[derive(Clone, Default)]
pub struct ApiClient {
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a bearer token with the password grant. Returns the parsed
    /// response on HTTP 200, a failure message otherwise.
    pub async fn request_token(
        &self,
        token_url: &str,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, String> {
        let form = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];
        let response = self
            .http
            .post(token_url)
            .timeout(HTTP_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() != 200 {
            return Err(format!("HTTP {}: {}", status.as_u16(), body));
        }
        serde_json::from_str(&body).map_err(|e| format!("token response parse failed: {}", e))
    }

    /// POST a canonical record batch with bearer auth and interpret the
    /// response. Never errors: every failure mode becomes an outcome.
    pub async fn push_attendance(
        &self,
        data_url: &str,
        token: &str,
        records: &[CanonicalRecord],
    ) -> PushOutcome {
        let response = self
            .http
            .post(data_url)
            .timeout(HTTP_TIMEOUT)
            .bearer_auth(token)
            .json(records)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                interpret_push_response(status, &body)
            }
            Err(e) => PushOutcome {
                success: false,
                delivered: false,
                detail: format!("request failed: {}", e),
            },
        }
    }

    /// Fetch one personnel page.
    pub async fn fetch_personnel(
        &self,
        personnel_url: &str,
        token: &str,
        page_size: u32,
    ) -> Result<Vec<PersonnelRecord>, String> {
        let response = self
            .http
            .get(personnel_url)
            .timeout(HTTP_TIMEOUT)
            .query(&[("SayfaSatirSayisi", page_size)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(format!("HTTP {}: {}", status.as_u16(), body));
        }
        let page: PersonnelPage = serde_json::from_str(&body)
            .map_err(|e| format!("personnel response parse failed: {}", e))?;
        Ok(page.model)
    }
}

fn item_result(item: &Value) -> bool {
    item.get("Sonuc").and_then(Value::as_bool).unwrap_or(false)
}

fn item_detail(item: &Value) -> String {
    item.get("Detay")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

/// Interpret the push endpoint's response.
///
/// A list body succeeds iff at least one element reports `Sonuc: true`
/// (partial success counts as success; per-element failures are recorded
/// in the detail). An object body succeeds iff its own `Sonuc` is true.
/// Anything else, unparseable bodies included, is a failure carrying the
/// raw body.
pub fn interpret_push_response(status: u16, body: &str) -> PushOutcome {
    if status != 200 && status != 201 {
        return PushOutcome {
            success: false,
            delivered: false,
            detail: format!("HTTP {}: {}", status, body),
        };
    }

    let parsed: Value = if body.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                return PushOutcome {
                    success: false,
                    delivered: false,
                    detail: format!("response parse failed: {} (body: {})", e, body),
                }
            }
        }
    };

    match parsed {
        Value::Array(items) => {
            let mut any_success = false;
            let mut failed = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if item.is_object() {
                    if item_result(item) {
                        any_success = true;
                    } else {
                        failed.push(format!("item {}: {}", i + 1, item_detail(item)));
                    }
                } else {
                    failed.push(format!("item {}: invalid format", i + 1));
                }
            }
            if any_success {
                let detail = if failed.is_empty() {
                    "all items processed".to_string()
                } else {
                    format!("partial success; failed: {}", failed.join(" | "))
                };
                PushOutcome {
                    success: true,
                    delivered: true,
                    detail,
                }
            } else {
                let detail = if failed.is_empty() {
                    "empty response list".to_string()
                } else {
                    failed.join(" | ")
                };
                PushOutcome {
                    success: false,
                    delivered: true,
                    detail,
                }
            }
        }
        Value::Object(_) => {
            if item_result(&parsed) {
                PushOutcome {
                    success: true,
                    delivered: true,
                    detail: "processed".to_string(),
                }
            } else {
                PushOutcome {
                    success: false,
                    delivered: true,
                    detail: format!("not processed (Sonuc=false): {}", item_detail(&parsed)),
                }
            }
        }
        other => PushOutcome {
            success: false,
            delivered: true,
            detail: format!("unexpected response format: {}", other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_with_one_success_is_overall_success() {
        let outcome = interpret_push_response(200, r#"[{"Sonuc":false},{"Sonuc":true}]"#);
        assert!(outcome.success);
        assert!(outcome.detail.contains("item 1"));
    }

    #[test]
    fn list_with_no_success_is_failure() {
        let outcome = interpret_push_response(
            200,
            r#"[{"Sonuc":false,"Detay":"duplicate"},{"Sonuc":false}]"#,
        );
        assert!(!outcome.success);
        assert!(outcome.detail.contains("duplicate"));
        assert!(outcome.detail.contains("unknown error"));
    }

    #[test]
    fn single_object_follows_its_result_flag() {
        assert!(interpret_push_response(200, r#"{"Sonuc":true}"#).success);
        assert!(!interpret_push_response(200, r#"{"Sonuc":false}"#).success);
        assert!(!interpret_push_response(201, r#"{}"#).success);
    }

    #[test]
    fn unparseable_body_is_failure_with_raw_body() {
        let outcome = interpret_push_response(200, "<html>oops</html>");
        assert!(!outcome.success);
        assert!(!outcome.delivered);
        assert!(outcome.detail.contains("<html>oops</html>"));
    }

    #[test]
    fn parsed_rejection_counts_as_delivered() {
        let outcome = interpret_push_response(200, r#"[{"Sonuc":false}]"#);
        assert!(!outcome.success);
        assert!(outcome.delivered);
        assert!(!interpret_push_response(503, "down").delivered);
    }

    #[test]
    fn unexpected_shape_is_failure() {
        assert!(!interpret_push_response(200, "42").success);
        assert!(!interpret_push_response(200, r#""ok""#).success);
        let empty_list = interpret_push_response(200, "[]");
        assert!(!empty_list.success);
    }

    #[test]
    fn non_2xx_status_is_failure_with_status_and_body() {
        let outcome = interpret_push_response(500, "internal error");
        assert!(!outcome.success);
        assert!(outcome.detail.contains("HTTP 500"));
        assert!(outcome.detail.contains("internal error"));

        // 204 is outside the accepted set even though it is a success code.
        assert!(!interpret_push_response(204, "").success);
    }

    #[test]
    fn list_items_of_invalid_format_are_recorded() {
        let outcome = interpret_push_response(200, r#"[1,{"Sonuc":true}]"#);
        assert!(outcome.success);
        assert!(outcome.detail.contains("item 1: invalid format"));
    }

    #[test]
    fn empty_body_treated_as_unprocessed_object() {
        let outcome = interpret_push_response(200, "");
        assert!(!outcome.success);
    }

    #[test]
    fn personnel_page_parses_model_rows() {
        let body = r#"{"Model":[{"PersonelID":12,"PersonelAdiSoyadi":"Jane Doe","Durum":true}]}"#;
        let page: PersonnelPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.model.len(), 1);
        assert_eq!(page.model[0].id, 12);
        assert_eq!(page.model[0].full_name, "Jane Doe");
        assert!(page.model[0].active);
    }
}
