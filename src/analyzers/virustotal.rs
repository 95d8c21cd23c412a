//! VirusTotal handler (spec section 4.6), grounded on
//! `virustotal_handler.py`. Supports both v2 (`positives`/`total`) and
//! v3 (`data.attributes.last_analysis_stats`) report shapes.

use serde_json::{json, Value};

use super::AnalyzerHandler;

pub struct VirusTotalHandler;

fn is_v3(report: &Value) -> bool {
    report.get("data").is_some()
}

impl AnalyzerHandler for VirusTotalHandler {
    fn display_name(&self) -> &'static str {
        "VirusTotal"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn extract_stats(&self, report: &Value) -> Value {
        if report.is_null() {
            return json!({"error": "Empty report"});
        }
        if let Value::String(s) = report {
            return json!({"error": format!("Invalid report format: {}", s.chars().take(100).collect::<String>())});
        }

        if is_v3(report) {
            let attrs = &report["data"]["attributes"];
            let stats = &attrs["last_analysis_stats"];
            let tags: Vec<&str> = attrs["tags"].as_array().map(|a| a.iter().filter_map(Value::as_str).take(5).collect()).unwrap_or_default();
            json!({
                "malicious": stats["malicious"].as_i64().unwrap_or(0),
                "suspicious": stats["suspicious"].as_i64().unwrap_or(0),
                "harmless": stats["harmless"].as_i64().unwrap_or(0),
                "undetected": stats["undetected"].as_i64().unwrap_or(0),
                "reputation": attrs["reputation"].as_i64().unwrap_or(0),
                "tags": tags,
                "country": attrs["country"].as_str().unwrap_or(""),
                "api_version": "v3",
            })
        } else {
            json!({
                "malicious": report.get("positives").and_then(Value::as_i64).unwrap_or(0),
                "total": report.get("total").and_then(Value::as_i64).unwrap_or(0),
                "scan_date": report.get("scan_date").and_then(Value::as_str).unwrap_or(""),
                "api_version": "v2",
            })
        }
    }

    fn summarize(&self, analyzer: &Value) -> Option<Value> {
        let name = analyzer.get("name").and_then(Value::as_str).unwrap_or("VirusTotal");
        let report = analyzer.get("report")?;

        if report.is_null() || report.is_string() {
            return None;
        }
        if let Value::Object(obj) = report {
            if obj.is_empty() {
                return None;
            }
        }

        let mut summary = serde_json::Map::new();
        summary.insert("analyzer".into(), json!(name));
        summary.insert("type".into(), json!("virustotal"));

        if is_v3(report) {
            let attrs = &report["data"]["attributes"];
            let stats = attrs["last_analysis_stats"].as_object().cloned().unwrap_or_default();
            let malicious = stats.get("malicious").and_then(Value::as_i64).unwrap_or(0);
            let suspicious = stats.get("suspicious").and_then(Value::as_i64).unwrap_or(0);
            let total: i64 = stats.values().filter_map(Value::as_i64).sum();

            let verdict = if malicious > 0 { "malicious" } else if suspicious > 0 { "suspicious" } else { "clean" };
            summary.insert("verdict".into(), json!(verdict));
            summary.insert("score".into(), json!(format!("{malicious}/{total} engines detected")));
            summary.insert("reputation".into(), attrs["reputation"].clone());

            let detected: Vec<Value> = attrs["last_analysis_results"]
                .as_object()
                .into_iter()
                .flatten()
                .filter(|(_, result)| result["category"].as_str() == Some("malicious"))
                .take(5)
                .map(|(engine, result)| json!({"engine": engine, "result": result["result"].as_str().unwrap_or("")}))
                .collect();
            summary.insert("detections".into(), json!(detected));
        } else {
            let positives = report.get("positives").and_then(Value::as_i64).unwrap_or(0);
            let total = report.get("total").and_then(Value::as_i64).unwrap_or(0);
            summary.insert("verdict".into(), json!(if positives > 0 { "malicious" } else { "clean" }));
            summary.insert("score".into(), json!(format!("{positives}/{total} detections")));
        }

        Some(Value::Object(summary))
    }

    fn get_risk_score(&self, report: &Value) -> i32 {
        if report.is_null() || report.is_string() {
            return 0;
        }

        let (malicious, suspicious) = if is_v3(report) {
            let stats = &report["data"]["attributes"]["last_analysis_stats"];
            (stats["malicious"].as_i64().unwrap_or(0), stats["suspicious"].as_i64().unwrap_or(0))
        } else {
            (report.get("positives").and_then(Value::as_i64).unwrap_or(0), 0)
        };

        let total_bad = malicious + suspicious;
        match total_bad {
            0 => 0,
            n if n <= 5 => (30 + n * 6) as i32,
            n if n <= 10 => (60 + (n - 5) * 4) as i32,
            n => (80 + (n - 10) * 2).min(100) as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn v3_report_maps_zero_detections_to_zero_risk() {
        let handler = VirusTotalHandler;
        let report = json!({"data": {"attributes": {"last_analysis_stats": {"malicious": 0, "suspicious": 0}}}});
        assert_eq!(handler.get_risk_score(&report), 0);
    }

    #[test]
    fn v3_report_scales_risk_with_detection_count() {
        let handler = VirusTotalHandler;
        let report = json!({"data": {"attributes": {"last_analysis_stats": {"malicious": 8, "suspicious": 0}}}});
        assert_eq!(handler.get_risk_score(&report), 72);
    }

    #[test]
    fn v2_report_reads_positives_field() {
        let handler = VirusTotalHandler;
        let report = json!({"positives": 3, "total": 70});
        assert_eq!(handler.get_risk_score(&report), 48);
    }

    #[test]
    fn summarize_returns_none_for_string_report() {
        let handler = VirusTotalHandler;
        let analyzer = json!({"name": "VirusTotal", "report": "error: quota exceeded"});
        assert!(handler.summarize(&analyzer).is_none());
    }
}
