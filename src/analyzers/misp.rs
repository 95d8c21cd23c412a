//! MISP handler (spec section 4.6), grounded on `misp_handler.py`.

use serde_json::{json, Value};

use super::AnalyzerHandler;

struct MispEvent {
    info: String,
    threat_level: Option<i64>,
    date: String,
    tags: Vec<String>,
}

fn extract_items(report: &Value) -> Vec<Value> {
    match report {
        Value::Array(items) => items.clone(),
        Value::Object(_) => {
            let items = report
                .get("response")
                .or_else(|| report.get("Attribute"))
                .or_else(|| report.get("Event"))
                .cloned()
                .unwrap_or(Value::Array(Vec::new()));
            match items {
                Value::Array(a) => a,
                Value::Object(_) => vec![items],
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

fn parse_events(report: &Value, limit: usize, tag_limit: usize) -> Vec<MispEvent> {
    let mut events = Vec::new();
    for item in extract_items(report).into_iter().take(limit) {
        let event_info = item.get("Event").cloned().unwrap_or(item.clone());
        if let Value::Object(_) = &event_info {
            let info: String = event_info.get("info").and_then(Value::as_str).unwrap_or("").chars().take(100).collect();
            let threat_level = event_info.get("threat_level_id").and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())));
            let date = event_info.get("date").and_then(Value::as_str).unwrap_or("").to_string();
            let tags: Vec<String> = event_info
                .get("Tag")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .take(tag_limit)
                .filter_map(|t| t.get("name").and_then(Value::as_str).map(str::to_string))
                .collect();
            events.push(MispEvent { info, threat_level, date, tags });
        }
    }
    events
}

pub struct MispHandler;

impl AnalyzerHandler for MispHandler {
    fn display_name(&self) -> &'static str {
        "MISP"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn extract_stats(&self, report: &Value) -> Value {
        if report.is_null() {
            return json!({"found": false});
        }

        let events = parse_events(report, 10, 5);
        let mut tags: Vec<String> = Vec::new();
        for event in &events {
            for tag in &event.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        json!({
            "found": !events.is_empty(),
            "event_count": events.len(),
            "events": events.iter().take(5).map(|e| json!({
                "id": "",
                "info": e.info,
                "threat_level": e.threat_level,
                "date": e.date,
            })).collect::<Vec<_>>(),
            "tags": tags.into_iter().take(10).collect::<Vec<_>>(),
        })
    }

    fn summarize(&self, analyzer: &Value) -> Option<Value> {
        let name = analyzer.get("name").and_then(Value::as_str).unwrap_or("MISP");
        let report = analyzer.get("report").cloned().unwrap_or(Value::Null);

        if report.is_null() {
            return Some(json!({"analyzer": name, "type": "misp", "found": false, "verdict": "clean"}));
        }

        let events = parse_events(&report, 5, 3);
        let mut tags: Vec<String> = Vec::new();
        for event in &events {
            for tag in &event.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        Some(json!({
            "analyzer": name,
            "type": "misp",
            "found": !events.is_empty(),
            "verdict": if events.is_empty() { "clean" } else { "malicious" },
            "event_count": events.len(),
            "events": events.iter().map(|e| json!({
                "info": e.info.chars().take(80).collect::<String>(),
                "threat_level": e.threat_level,
                "date": e.date,
            })).collect::<Vec<_>>(),
            "tags": tags.into_iter().take(5).collect::<Vec<_>>(),
        }))
    }

    fn get_risk_score(&self, report: &Value) -> i32 {
        let stats = self.extract_stats(report);
        if !stats.get("found").and_then(Value::as_bool).unwrap_or(false) {
            return 0;
        }

        let events = parse_events(report, 10, 5);
        let mut max_threat = 4i64;
        for event in &events {
            if let Some(tl) = event.threat_level {
                max_threat = max_threat.min(tl);
            }
        }

        let mut base_score = match max_threat {
            1 => 100,
            2 => 85,
            3 => 70,
            _ => 70,
        };

        let event_count = stats.get("event_count").and_then(Value::as_i64).unwrap_or(0);
        if event_count > 1 {
            base_score = (base_score + (event_count - 1) as i32 * 5).min(100);
        }

        base_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_events_means_zero_risk() {
        let handler = MispHandler;
        assert_eq!(handler.get_risk_score(&json!([])), 0);
    }

    #[test]
    fn high_threat_level_event_scores_maximum() {
        let handler = MispHandler;
        let report = json!([{"Event": {"info": "APT campaign", "threat_level_id": 1}}]);
        assert_eq!(handler.get_risk_score(&report), 100);
    }

    #[test]
    fn multiple_events_add_bonus_capped_at_100() {
        let handler = MispHandler;
        let report = json!([
            {"Event": {"info": "a", "threat_level_id": 3}},
            {"Event": {"info": "b", "threat_level_id": 3}},
            {"Event": {"info": "c", "threat_level_id": 3}},
        ]);
        assert_eq!(handler.get_risk_score(&report), 80);
    }
}
