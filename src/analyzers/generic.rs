//! Fallback handler for analyzers with no dedicated implementation
//! (spec section 4.6), grounded on `generic_handler.py::GenericHandler`.

use serde_json::{json, Value};

use super::AnalyzerHandler;

const SCORE_FIELDS: &[&str] = &["score", "risk_score", "threat_score", "confidence", "abuseConfidenceScore"];
const MALICIOUS_FIELDS: &[&str] = &["malicious", "is_malicious", "isMalicious", "is_bad"];

pub struct GenericHandler;

impl AnalyzerHandler for GenericHandler {
    fn display_name(&self) -> &'static str {
        "Generic Analyzer"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn extract_stats(&self, report: &Value) -> Value {
        match report {
            Value::Null => json!({"found": false}),
            Value::String(s) => json!({"found": !s.trim().is_empty(), "type": "string", "length": s.chars().count()}),
            Value::Array(a) => json!({"found": !a.is_empty(), "type": "list", "count": a.len()}),
            Value::Object(obj) => {
                let mut stats = serde_json::Map::new();
                stats.insert("found".into(), json!(true));
                stats.insert("type".into(), json!("dict"));

                let common_fields: &[(&str, &[&str])] = &[
                    ("malicious", &["malicious", "is_malicious", "isMalicious"]),
                    ("score", SCORE_FIELDS),
                    ("verdict", &["verdict", "result", "status", "classification"]),
                    ("detected", &["detected", "positive", "positives", "detections"]),
                    ("total", &["total", "count", "total_reports", "totalReports"]),
                    ("threat_level", &["threat_level", "threat_level_id", "severity"]),
                    ("category", &["category", "type", "threat_type"]),
                    ("data", &["data", "results", "response", "report"]),
                ];

                for (stat_name, field_options) in common_fields {
                    for field in *field_options {
                        if let Some(value) = obj.get(*field) {
                            let normalized = match value {
                                Value::String(_) | Value::Number(_) | Value::Bool(_) => value.clone(),
                                Value::Array(a) => json!(a.len()),
                                Value::Object(o) => json!(o.len()),
                                Value::Null => continue,
                            };
                            stats.insert((*stat_name).to_string(), normalized);
                            break;
                        }
                    }
                }

                stats.insert("has_data".into(), json!(!obj.is_empty()));
                stats.insert("field_count".into(), json!(obj.len()));
                Value::Object(stats)
            }
            _ => json!({"found": false}),
        }
    }

    fn summarize(&self, analyzer: &Value) -> Option<Value> {
        let name = analyzer.get("name").and_then(Value::as_str).unwrap_or("Unknown Analyzer");
        let status = analyzer.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN");
        let report = analyzer.get("report").cloned().unwrap_or(Value::Null);

        let mut summary = serde_json::Map::new();
        summary.insert("analyzer".into(), json!(name));
        summary.insert("type".into(), json!("generic"));
        summary.insert("status".into(), json!(status));

        if report.is_null() || (report.is_object() && report.as_object().unwrap().is_empty()) {
            summary.insert("found".into(), json!(false));
            summary.insert("verdict".into(), json!("unknown"));
            return Some(Value::Object(summary));
        }

        if let Value::String(s) = &report {
            summary.insert("found".into(), json!(!s.trim().is_empty()));
            summary.insert("verdict".into(), json!("unknown"));
            summary.insert("note".into(), json!(format!("String response ({} chars)", s.chars().count())));
            return Some(Value::Object(summary));
        }

        if let Value::Array(a) = &report {
            summary.insert("found".into(), json!(!a.is_empty()));
            summary.insert("verdict".into(), json!(if a.is_empty() { "unknown" } else { "suspicious" }));
            summary.insert("result_count".into(), json!(a.len()));
            return Some(Value::Object(summary));
        }

        let stats = self.extract_stats(&report);
        summary.insert("found".into(), stats.get("has_data").cloned().unwrap_or(json!(false)));

        let verdict = if stats.get("malicious").and_then(Value::as_bool).unwrap_or(false) {
            "malicious"
        } else if let Some(detected) = stats.get("detected") {
            if detected.as_i64().map(|n| n > 0).unwrap_or(false) || detected.as_bool().unwrap_or(false) {
                "malicious"
            } else {
                "unknown"
            }
        } else if let Some(score) = stats.get("score").and_then(Value::as_f64) {
            if score > 70.0 {
                "malicious"
            } else if score > 40.0 {
                "suspicious"
            } else {
                "clean"
            }
        } else if let Some(raw_verdict) = stats.get("verdict").and_then(Value::as_str) {
            let lower = raw_verdict.to_lowercase();
            if ["malicious", "bad", "danger", "high"].iter().any(|m| lower.contains(m)) {
                "malicious"
            } else if ["suspicious", "medium", "warning"].iter().any(|s| lower.contains(s)) {
                "suspicious"
            } else if ["clean", "safe", "good", "low"].iter().any(|c| lower.contains(c)) {
                "clean"
            } else {
                "unknown"
            }
        } else {
            "unknown"
        };
        summary.insert("verdict".into(), json!(verdict));

        for key in ["score", "detected", "total", "threat_level", "category"] {
            if let Some(v) = stats.get(key) {
                summary.insert(key.to_string(), v.clone());
            }
        }

        Some(Value::Object(summary))
    }

    fn get_risk_score(&self, report: &Value) -> i32 {
        match report {
            Value::Null => 0,
            Value::String(s) => {
                let lower = s.to_lowercase();
                if ["malicious", "threat", "attack", "exploit"].iter().any(|w| lower.contains(w)) {
                    60
                } else if ["suspicious", "warning", "risk"].iter().any(|w| lower.contains(w)) {
                    40
                } else if !s.trim().is_empty() {
                    20
                } else {
                    0
                }
            }
            Value::Array(a) => match a.len() {
                n if n > 10 => 70,
                n if n > 5 => 50,
                n if n > 0 => 30,
                _ => 0,
            },
            Value::Object(obj) => {
                let mut score: i32 = 0;

                for field in SCORE_FIELDS {
                    if let Some(value) = obj.get(*field) {
                        if let Some(f) = value.as_f64() {
                            if (0.0..=100.0).contains(&f) {
                                score = score.max(f as i32);
                            } else if (0.0..=1.0).contains(&f) {
                                score = score.max((f * 100.0) as i32);
                            }
                        }
                        break;
                    }
                }

                if obj.contains_key("positives") || obj.contains_key("detected") {
                    let detected = obj.get("positives").or_else(|| obj.get("detected")).and_then(Value::as_i64).unwrap_or(0);
                    if detected > 0 {
                        let total = obj.get("total").and_then(Value::as_i64).unwrap_or(detected).max(1);
                        let ratio = detected as f64 / total as f64;
                        let detection_score = ((ratio * 100.0) as i32 + 20).min(100);
                        score = score.max(detection_score);
                    }
                }

                for field in MALICIOUS_FIELDS {
                    if obj.get(*field).and_then(Value::as_bool) == Some(true) {
                        score = score.max(80);
                        break;
                    }
                }

                if let Some(tl) = obj.get("threat_level_id") {
                    let tl_int = tl.as_i64().or_else(|| tl.as_str().and_then(|s| s.parse().ok()));
                    match tl_int {
                        Some(1) => score = score.max(90),
                        Some(2) => score = score.max(70),
                        Some(3) => score = score.max(50),
                        _ => {}
                    }
                }

                if score == 0 && !obj.is_empty() {
                    score = 25;
                }

                score.min(100)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boolean_malicious_flag_sets_high_score() {
        let handler = GenericHandler;
        let score = handler.get_risk_score(&json!({"malicious": true}));
        assert_eq!(score, 80);
    }

    #[test]
    fn detection_ratio_scales_with_total() {
        let handler = GenericHandler;
        let score = handler.get_risk_score(&json!({"positives": 5, "total": 10}));
        assert_eq!(score, 70);
    }

    #[test]
    fn empty_report_has_zero_risk() {
        let handler = GenericHandler;
        assert_eq!(handler.get_risk_score(&Value::Null), 0);
    }

    #[test]
    fn present_but_unscored_data_gets_baseline() {
        let handler = GenericHandler;
        let score = handler.get_risk_score(&json!({"unrelated_field": "x"}));
        assert_eq!(score, 25);
    }
}
