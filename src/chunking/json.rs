//! Type-aware JSON-to-natural-language chunking (spec section 4.7),
//! grounded on `app/core/chunking.py`'s `json_to_natural_text` /
//! `mitre_to_natural_text` / `dataflow_to_natural_text`.

use serde_json::Value;

fn str_field<'a>(obj: &'a Value, key: &str, default: &'a str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or(default).to_string()
}

fn str_list(obj: &Value, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Device / network-asset records: IP lookup, zone, OS, interfaces,
/// services, vulnerabilities — one chunk per facet so each is
/// independently retrievable.
pub fn json_to_natural_text(data: &Value, filename: &str) -> Vec<String> {
    let mut texts = Vec::new();

    let device_id = str_field(data, "id", "unknown");
    let name = str_field(data, "name", "Unknown Device");
    let category = str_field(data, "category", "Unknown");
    let zone = str_field(data, "zone", "Unknown");
    let ip = str_field(data, "ip", "N/A");
    let role = str_field(data, "role", "Unknown");
    let description = str_field(data, "description", "");

    texts.push(format!(
        "Device {device_id}: {name}\nType: {category}\nRole: {role}\nZone: {zone}\nIP Address: {ip}\nManagement IP: {ip}\nPrimary IP: {ip}\nDescription: {description}\nSource: {filename}\n\nKeywords: {name}, {device_id}, IP {ip}, {category}, {zone}, {role}"
    ));

    if ip != "N/A" && ip != "multiple" {
        texts.push(format!(
            "IP Address Lookup:\nIP {ip} belongs to: {name}\nThe IP address {ip} is assigned to device: {name} (ID: {device_id})\nDevice with IP {ip}: {name}\n{ip} is the IP of: {name}\nWhat device has IP {ip}? Answer: {name} ({device_id})\nIP {ip} -> {name}\n\nDevice Details:\n- Name: {name}\n- ID: {device_id}\n- Category: {category}\n- Role: {role}\n- Zone: {zone}"
        ));
    }

    if zone != "Unknown" {
        texts.push(format!(
            "{name} ({device_id}) is part of {zone}\nCategory: {category}\nLocated in: {zone}\nIP: {ip}\nRole: {role}\nThis device is part of the {zone} infrastructure."
        ));
    }

    if let Some(os_info) = data.get("os").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        texts.push(format!(
            "Operating System Information for {name}:\nThe operating system of {name} is: {os_info}\n{name} runs on: {os_info}\nOS of {name}: {os_info}\nWhat OS does {name} use? Answer: {os_info}\n{name} operating system: {os_info}\n\nDevice Details:\n- Name: {name}\n- ID: {device_id}\n- IP: {ip}\n- Category: {category}\n- Role: {role}\n- Operating System: {os_info}\n\nKeywords: {name}, OS, operating system, {os_info}, version, software\nSource: {filename}"
        ));
    }

    if data.get("subnet").is_some() || data.get("ip_range").is_some() || data.get("vmnet").is_some() {
        let mut network_info = format!("Network config for {name} (ID: {device_id}):\n");
        if let Some(subnet) = data.get("subnet").and_then(Value::as_str) {
            network_info.push_str(&format!("- Subnet: {subnet}\n"));
        }
        if let Some(range) = data.get("ip_range").and_then(Value::as_str) {
            network_info.push_str(&format!("- IP Range: {range}\n"));
        }
        if let Some(vmnet) = data.get("vmnet") {
            let rendered = match vmnet {
                Value::Array(_) => str_list(data, "vmnet").join(", "),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            network_info.push_str(&format!("- VMnet: {rendered}\n"));
        }
        if let Some(gw) = data.get("gateway").and_then(Value::as_str) {
            network_info.push_str(&format!("- Gateway: {gw}\n"));
        }
        if let Some(pip) = data.get("primary_ip").and_then(Value::as_str) {
            network_info.push_str(&format!("- Primary IP: {pip}\n"));
        }
        texts.push(network_info.trim().to_string());
    }

    if let Some(interfaces) = data.get("interfaces").and_then(Value::as_array) {
        let total = interfaces.len();
        for (idx, iface) in interfaces.iter().enumerate() {
            texts.push(format!(
                "{name} ({device_id}) - Interface {}/{total}:\nDevice: {name} (IP: {ip})\nInterface Name: {}\nInterface IP: {}\nSubnet: {}\nVMnet: {}\nType: {}\nDescription: {}\nSource: {filename}",
                idx + 1,
                str_field(iface, "name", "N/A"),
                str_field(iface, "ip", "N/A"),
                str_field(iface, "subnet", "N/A"),
                str_field(iface, "vmnet", "N/A"),
                str_field(iface, "type", "N/A"),
                str_field(iface, "description", "N/A"),
            ));
        }

        if total > 1 {
            let iface_names: Vec<String> = interfaces.iter().map(|i| str_field(i, "name", "N/A")).collect();
            let iface_details: Vec<String> = interfaces
                .iter()
                .map(|i| {
                    let mut detail = format!("- {}", str_field(i, "name", "N/A"));
                    if let Some(ip) = i.get("ip").and_then(Value::as_str) {
                        detail.push_str(&format!(" (IP: {ip})"));
                    }
                    if let Some(t) = i.get("type").and_then(Value::as_str) {
                        detail.push_str(&format!(" [{t}]"));
                    }
                    if let Some(d) = i.get("description").and_then(Value::as_str) {
                        detail.push_str(&format!(": {d}"));
                    }
                    detail
                })
                .collect();

            texts.push(format!(
                "{name} ({device_id}) Network Interfaces Summary:\nDevice: {name}\nPrimary IP: {ip}\nTotal Interfaces: {total}\nInterface Names: {}\n\nAll Network Interfaces:\n{}\n\nKeywords: {name}, interfaces, {}, network cards, NICs\nSource: {filename}",
                iface_names.join(", "),
                iface_details.join("\n"),
                iface_names.join(", "),
            ));
        }
    }

    let services = str_list(data, "services");
    if !services.is_empty() {
        texts.push(format!("Services running on {name}:\n{}", services.join(", ")));
    }

    let components = str_list(data, "components");
    if !components.is_empty() {
        texts.push(format!("Components of {name}:\n{}", components.join(", ")));
    }

    let vulns = str_list(data, "vulnerabilities");
    if !vulns.is_empty() {
        texts.push(format!(
            "Vulnerabilities on {name} (ID: {device_id}):\n{}\nThese are intentionally installed vulnerabilities for testing detection capabilities.",
            vulns.join(", ")
        ));
    }

    let caps = str_list(data, "capabilities");
    if !caps.is_empty() {
        let lines: Vec<String> = caps.iter().map(|c| format!("- {c}")).collect();
        texts.push(format!("Capabilities of {name}:\n{}", lines.join("\n")));
    }

    let monitoring = str_list(data, "monitoring");
    if !monitoring.is_empty() {
        let lines: Vec<String> = monitoring.iter().map(|m| format!("- {m}")).collect();
        texts.push(format!("Monitoring for {name}:\n{}", lines.join("\n")));
    }

    let data_sources = str_list(data, "data_sources");
    if !data_sources.is_empty() {
        let lines: Vec<String> = data_sources.iter().map(|s| format!("- {s}")).collect();
        texts.push(format!("{name} collects logs from:\n{}", lines.join("\n")));
    }

    if let Some(routing) = data.get("routing_function").and_then(Value::as_str) {
        texts.push(format!("Routing function of {name}:\n{routing}"));
    }

    let vectors = str_list(data, "attack_vectors");
    if !vectors.is_empty() {
        let lines: Vec<String> = vectors.iter().map(|v| format!("- {v}")).collect();
        texts.push(format!("Attack vectors from {name}:\n{}", lines.join("\n")));
    }

    texts
}

/// MITRE ATT&CK technique objects: a single chunk, ID-first, so the
/// technique ID is the strongest lexical anchor for retrieval.
pub fn mitre_to_natural_text(technique: &Value) -> String {
    let mitre_id = str_field(technique, "mitre_id", "Unknown");
    let name = str_field(technique, "name", "Unknown");
    let description = str_field(technique, "description", "");
    let tactics = str_list(technique, "tactics");
    let platforms = str_list(technique, "platforms");
    let data_sources = str_list(technique, "data_sources");
    let is_subtechnique = technique.get("is_subtechnique").and_then(Value::as_bool).unwrap_or(false);

    let tech_type = if is_subtechnique { "Sub-technique" } else { "Technique" };
    let mut parts = vec![
        format!("{mitre_id} - MITRE ATT&CK {tech_type}: {name}"),
        format!("MITRE ID: {mitre_id}"),
        format!("Technique Name: {name}"),
        String::new(),
    ];

    if !tactics.is_empty() {
        parts.push(format!("Tactics: {}", tactics.join(", ")));
    }
    if !platforms.is_empty() {
        parts.push(format!("Platforms: {}", platforms.join(", ")));
    }
    if !description.is_empty() {
        parts.push(String::new());
        parts.push(format!("Description: {description}"));
    }
    if !data_sources.is_empty() {
        parts.push(String::new());
        parts.push("Detection Data Sources:".to_string());
        for ds in &data_sources {
            parts.push(format!("  - {ds}"));
        }
    }

    parts.push(String::new());
    let mut keywords = vec![mitre_id.clone(), name.clone(), format!("technique {mitre_id}")];
    keywords.extend(tactics);
    parts.push(format!("Search Keywords: {}", keywords.join(", ")));

    parts.join("\n")
}

/// Dataflow/pipeline JSON: a phases summary chunk (so "how many phases?"
/// is answerable from one chunk), per-phase chunks, a components summary,
/// and a routing-pipelines chunk.
pub fn dataflow_to_natural_text(data: &Value, filename: &str) -> Vec<String> {
    let mut chunks = Vec::new();

    let metadata = data.get("metadata").cloned().unwrap_or(Value::Null);
    let doc_name = metadata
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| data.get("name").and_then(Value::as_str))
        .unwrap_or("Dataflow")
        .to_string();

    let phases = data.get("phases").and_then(Value::as_array).cloned().unwrap_or_default();
    if !phases.is_empty() {
        let phase_list: Vec<String> = phases
            .iter()
            .enumerate()
            .map(|(i, phase)| {
                let phase_name = str_field(phase, "name", &format!("Phase {}", i + 1));
                let desc = str_field(phase, "description", "");
                let truncated: String = desc.chars().take(150).collect();
                format!("  {}. {phase_name}: {truncated}", i + 1)
            })
            .collect();

        chunks.push(format!(
            "{doc_name}\n\nPHASES SUMMARY:\nThis dataflow pipeline consists of {} phases:\n\n{}\n\nTotal number of phases: {}\nHow many phases? Answer: {} phases\n\nSource: {filename}\nKeywords: phases, pipeline, dataflow, {} phases, workflow stages",
            phases.len(),
            phase_list.join("\n"),
            phases.len(),
            phases.len(),
            phases.len(),
        ));

        for phase in &phases {
            let phase_id = str_field(phase, "id", "");
            let phase_name = str_field(phase, "name", "Unknown Phase");
            let phase_desc = str_field(phase, "description", "");
            let edge_ids = str_list(phase, "edge_ids");
            let edges = if edge_ids.is_empty() { "N/A".to_string() } else { edge_ids.join(", ") };

            chunks.push(format!(
                "{doc_name} - {phase_name}\n\nPhase ID: {phase_id}\nPhase Name: {phase_name}\nDescription: {phase_desc}\n\nRelated Data Flows: {edges}\n\nSource: {filename}\nKeywords: {phase_name}, {phase_id}, phase, pipeline stage"
            ));
        }
    }

    if let Some(nodes) = data.get("nodes").and_then(Value::as_array) {
        if !nodes.is_empty() {
            let node_names: Vec<String> = nodes
                .iter()
                .map(|n| {
                    n.get("role")
                        .and_then(Value::as_str)
                        .or_else(|| n.get("id").and_then(Value::as_str))
                        .unwrap_or("")
                        .to_string()
                })
                .collect();
            let shown: Vec<String> = node_names.iter().take(20).cloned().collect();
            let suffix = if node_names.len() > 20 { "..." } else { "" };

            chunks.push(format!(
                "{doc_name} - Components/Nodes\n\nTotal components in this dataflow: {}\nComponents: {}{suffix}\n\nSource: {filename}\nKeywords: nodes, components, devices, dataflow elements",
                nodes.len(),
                shown.join(", "),
            ));
        }
    }

    if let Some(routing) = data.get("routing_pipelines").and_then(Value::as_object) {
        if !routing.is_empty() {
            let routing_parts: Vec<String> = routing
                .iter()
                .filter_map(|(flow_name, flow_nodes)| {
                    flow_nodes.as_array().map(|nodes| {
                        let names: Vec<String> = nodes.iter().filter_map(|n| n.as_str().map(str::to_string)).collect();
                        format!("  - {flow_name}: {}", names.join(" \u{2192} "))
                    })
                })
                .collect();

            chunks.push(format!(
                "{doc_name} - Routing Pipelines\n\nTraffic flow paths in this architecture:\n{}\n\nSource: {filename}\nKeywords: routing, traffic flow, data path, pipeline",
                routing_parts.join("\n"),
            ));
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_record_produces_overview_and_ip_lookup_chunks() {
        let data = json!({"id": "dev-1", "name": "Router01", "ip": "10.0.0.1", "zone": "DMZ"});
        let chunks = json_to_natural_text(&data, "devices.json");
        assert!(chunks[0].contains("Device dev-1: Router01"));
        assert!(chunks.iter().any(|c| c.contains("IP 10.0.0.1 belongs to: Router01")));
        assert!(chunks.iter().any(|c| c.contains("is part of DMZ")));
    }

    #[test]
    fn mitre_technique_puts_id_first() {
        let technique = json!({"mitre_id": "T1059", "name": "Command and Scripting Interpreter", "tactics": ["execution"]});
        let text = mitre_to_natural_text(&technique);
        assert!(text.starts_with("T1059"));
        assert!(text.contains("Tactics: execution"));
    }

    #[test]
    fn dataflow_summary_counts_all_phases() {
        let data = json!({
            "name": "Ingress Pipeline",
            "phases": [{"name": "Capture"}, {"name": "Parse"}, {"name": "Alert"}],
        });
        let chunks = dataflow_to_natural_text(&data, "flow.json");
        assert!(chunks[0].contains("consists of 3 phases"));
        assert_eq!(chunks.len(), 4); // summary + 3 phase chunks
    }
}
