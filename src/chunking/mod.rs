//! File-type dispatch for ingestion chunking (spec section 4.2's dispatch
//! table and section 4.7), grounded on `app/core/ingestion.py`'s
//! extension-based routing into `app/core/chunking.py`'s splitters.

pub mod json;
pub mod pdf;
pub mod text;

use std::path::Path;

use crate::config::Config;

/// Dispatches a file's raw bytes to the right chunker by extension,
/// returning natural-language or recursively-split chunks ready to embed.
pub fn chunk_file(path: &Path, bytes: &[u8], config: &Config) -> Vec<String> {
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("unknown");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();

    match ext.as_str() {
        "json" => chunk_json_bytes(bytes, filename, config),
        "md" | "markdown" | "rst" => {
            let text = String::from_utf8_lossy(bytes);
            text::markdown_to_chunks(&text, filename, config.max_chunk_size, config.min_chunk_size)
        }
        "pdf" => pdf::pdf_to_chunks(path, filename, config.max_chunk_size, config.min_chunk_size),
        _ => {
            let text = String::from_utf8_lossy(bytes);
            text::text_to_chunks(&text, filename, config.max_chunk_size, config.min_chunk_size)
        }
    }
}

fn chunk_json_bytes(bytes: &[u8], filename: &str, config: &Config) -> Vec<String> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    chunk_json_value(&value, filename, config)
}

/// Routes a parsed JSON document to its natural-language chunker by
/// shape: MITRE technique (`mitre_id`), dataflow/pipeline (`phases`),
/// device/asset record (`id`+`name`), or a plain array of such records.
/// Anything unrecognized falls back to recursive character splitting of
/// its pretty-printed form.
pub fn chunk_json_value(value: &serde_json::Value, filename: &str, config: &Config) -> Vec<String> {
    use serde_json::Value;

    match value {
        Value::Object(obj) if obj.contains_key("mitre_id") => vec![json::mitre_to_natural_text(value)],
        Value::Object(obj) if obj.contains_key("phases") || obj.contains_key("routing_pipelines") => {
            json::dataflow_to_natural_text(value, filename)
        }
        Value::Object(obj) if obj.contains_key("id") && obj.contains_key("name") => {
            json::json_to_natural_text(value, filename)
        }
        Value::Array(items) => items.iter().flat_map(|item| chunk_json_value(item, filename, config)).collect(),
        _ => {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_default();
            text::text_to_chunks(&pretty, filename, config.max_chunk_size, config.min_chunk_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> Config {
        let mut cfg = Config::from_env();
        cfg.max_chunk_size = 1000;
        cfg.min_chunk_size = 1;
        cfg
    }

    #[test]
    fn dispatches_mitre_object_to_mitre_chunker() {
        let value = json!({"mitre_id": "T1059", "name": "Scripting"});
        let chunks = chunk_json_value(&value, "mitre.json", &test_config());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("T1059"));
    }

    #[test]
    fn dispatches_array_of_devices_to_device_chunker() {
        let value = json!([{"id": "d1", "name": "Host1"}, {"id": "d2", "name": "Host2"}]);
        let chunks = chunk_json_value(&value, "devices.json", &test_config());
        assert!(chunks.iter().any(|c| c.contains("Host1")));
        assert!(chunks.iter().any(|c| c.contains("Host2")));
    }

    #[test]
    fn unrecognized_json_shape_falls_back_to_text_splitting() {
        let value = json!({"arbitrary": "blob", "with_no_known_keys": true});
        let chunks = chunk_json_value(&value, "blob.json", &test_config());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Source: blob.json"));
    }
}
