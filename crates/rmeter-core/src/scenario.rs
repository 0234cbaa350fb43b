//! Scenario compiler: turns a [`ScenarioTemplate`] plus a VU id into a
//! concrete [`crate::operation::Operation`] sequence ready for dispatch.
//! Variable substitution reuses [`crate::extractors::substitute_variables`]'s
//! placeholder syntax, generalized from HTTP-only fields to every protocol's
//! addressing/payload fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data_source::DataSourceManager;
use crate::error::RmeterError;
use crate::extractors::{substitute_variables, ExtractorRule};
use crate::operation::Operation;

/// A recipe for copying a value out of an operation's outcome into a named
/// session variable — evaluated after the operation it is attached to
/// completes, so later steps in the same iteration can reference `${variable}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractionBinding {
    pub variable: String,
    pub rule: ExtractorRule,
}

/// One operation plus the variables it should capture from its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioStep {
    pub operation: Operation,
    #[serde(default)]
    pub extract: Vec<ExtractionBinding>,
}

impl From<Operation> for ScenarioStep {
    fn from(operation: Operation) -> Self {
        ScenarioStep { operation, extract: Vec::new() }
    }
}

/// An ordered template of operations plus the data/variable context a VU
/// compiles it against. Operation fields may contain `${var}` or
/// `${source.field}` placeholders. Deserializable so a scenario can be loaded
/// straight from a JSON file by the CLI binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioTemplate {
    pub name: String,
    /// Names of data sources (registered in a [`DataSourceManager`]) this
    /// scenario draws rows from, keyed by the name used in `${name.field}`.
    pub data_sources: Vec<String>,
    pub setup: Vec<ScenarioStep>,
    pub operations: Vec<ScenarioStep>,
    pub teardown: Vec<ScenarioStep>,
    pub variables: HashMap<String, String>,
}

/// The compiled, ready-to-dispatch operation sequence for one VU iteration:
/// setup hooks, the main operation list, then teardown hooks.
pub struct CompiledScenario {
    pub setup: Vec<Operation>,
    pub operations: Vec<Operation>,
    pub teardown: Vec<Operation>,
}

/// Fetch one data row per registered source plus the template's and caller's
/// static variables, combined into the base substitution map for one VU
/// iteration. `source.field` placeholders resolve first; scenario variables
/// resolve second. An unknown data source fails rather than the VU.
///
/// This is the *static* half of compilation — it does not see session
/// variables set by extractors, since those change step by step within an
/// iteration. Callers that need extraction-aware substitution (the
/// scheduler's real run loop) merge session variables on top per step and
/// call [`substitute_operation`] directly instead of [`compile`].
pub fn resolve_base_variables(
    template: &ScenarioTemplate,
    user_id: u64,
    data_manager: &DataSourceManager,
    scenario_variables: &HashMap<String, String>,
) -> Result<HashMap<String, String>, RmeterError> {
    let mut combined: HashMap<String, String> = HashMap::new();

    for source_name in &template.data_sources {
        let row = data_manager.row_for(source_name, user_id)?;
        for (field, value) in &row.values {
            combined.insert(format!("{source_name}.{field}"), display_cell(value));
        }
    }

    for (k, v) in &template.variables {
        combined.insert(k.clone(), v.clone());
    }
    for (k, v) in scenario_variables {
        combined.insert(k.clone(), v.clone());
    }

    Ok(combined)
}

/// Compile `template` for `user_id`: resolve the base variable map, then
/// substitute placeholders into every string field of every operation. A
/// one-shot convenience over [`resolve_base_variables`] + [`substitute_operation`]
/// for callers that have no per-step session state to merge in.
pub fn compile(
    template: &ScenarioTemplate,
    user_id: u64,
    data_manager: &DataSourceManager,
    scenario_variables: &HashMap<String, String>,
) -> Result<CompiledScenario, RmeterError> {
    let combined = resolve_base_variables(template, user_id, data_manager, scenario_variables)?;

    Ok(CompiledScenario {
        setup: template.setup.iter().map(|step| substitute_operation(&step.operation, &combined)).collect(),
        operations: template.operations.iter().map(|step| substitute_operation(&step.operation, &combined)).collect(),
        teardown: template.teardown.iter().map(|step| substitute_operation(&step.operation, &combined)).collect(),
    })
}

fn display_cell(value: &crate::data_source::CellValue) -> String {
    use crate::data_source::CellValue;
    match value {
        CellValue::Null => String::new(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => f.to_string(),
        CellValue::String(s) => s.clone(),
    }
}

fn s(value: &str, vars: &HashMap<String, String>) -> String {
    substitute_variables(value, vars)
}

fn headers_sub(headers: &HashMap<String, String>, vars: &HashMap<String, String>) -> HashMap<String, String> {
    headers.iter().map(|(k, v)| (s(k, vars), s(v, vars))).collect()
}

/// Clone `op` with every string field's placeholders substituted. Numeric,
/// boolean, and enum fields pass through unchanged — only the scenario's own
/// text can carry `${...}` placeholders.
pub fn substitute_operation(op: &Operation, vars: &HashMap<String, String>) -> Operation {
    use crate::plan::model::RequestBody;

    match op {
        Operation::HttpRequest { url, method, headers, body, timeout_ms } => Operation::HttpRequest {
            url: s(url, vars),
            method: method.clone(),
            headers: headers_sub(headers, vars),
            body: body.as_ref().map(|b| match b {
                RequestBody::Json(v) => RequestBody::Json(s(v, vars)),
                RequestBody::Raw(v) => RequestBody::Raw(s(v, vars)),
                RequestBody::Xml(v) => RequestBody::Xml(s(v, vars)),
                RequestBody::FormData(pairs) => {
                    RequestBody::FormData(pairs.iter().map(|(k, v)| (s(k, vars), s(v, vars))).collect())
                }
            }),
            timeout_ms: *timeout_ms,
        },

        Operation::WsConnect { url, headers, timeout_ms } => Operation::WsConnect {
            url: s(url, vars),
            headers: headers_sub(headers, vars),
            timeout_ms: *timeout_ms,
        },
        Operation::WsSend { url, message, timeout_ms } => Operation::WsSend {
            url: s(url, vars),
            message: s(message, vars),
            timeout_ms: *timeout_ms,
        },
        Operation::WsClose { url } => Operation::WsClose { url: s(url, vars) },

        Operation::TcpConnect { host, port, timeout_ms } => {
            Operation::TcpConnect { host: s(host, vars), port: *port, timeout_ms: *timeout_ms }
        }
        Operation::TcpSend { host, port, data, timeout_ms } => Operation::TcpSend {
            host: s(host, vars),
            port: *port,
            data: s(data, vars),
            timeout_ms: *timeout_ms,
        },
        Operation::TcpReceive { host, port, timeout_ms } => {
            Operation::TcpReceive { host: s(host, vars), port: *port, timeout_ms: *timeout_ms }
        }
        Operation::TcpDisconnect { host, port } => Operation::TcpDisconnect { host: s(host, vars), port: *port },

        Operation::UdpCreateEndpoint { host, port, timeout_ms } => {
            Operation::UdpCreateEndpoint { host: s(host, vars), port: *port, timeout_ms: *timeout_ms }
        }
        Operation::UdpSend { host, port, data, timeout_ms } => Operation::UdpSend {
            host: s(host, vars),
            port: *port,
            data: s(data, vars),
            timeout_ms: *timeout_ms,
        },
        Operation::UdpReceive { host, port, timeout_ms } => {
            Operation::UdpReceive { host: s(host, vars), port: *port, timeout_ms: *timeout_ms }
        }
        Operation::UdpCloseEndpoint { host, port } => {
            Operation::UdpCloseEndpoint { host: s(host, vars), port: *port }
        }

        Operation::MqttConnect { broker, port, client_id, username, password, keep_alive_secs, timeout_ms } => {
            Operation::MqttConnect {
                broker: s(broker, vars),
                port: *port,
                client_id: s(client_id, vars),
                username: username.as_ref().map(|v| s(v, vars)),
                password: password.as_ref().map(|v| s(v, vars)),
                keep_alive_secs: *keep_alive_secs,
                timeout_ms: *timeout_ms,
            }
        }
        Operation::MqttPublish { broker, port, client_id, topic, payload, qos, retain, timeout_ms } => {
            Operation::MqttPublish {
                broker: s(broker, vars),
                port: *port,
                client_id: s(client_id, vars),
                topic: s(topic, vars),
                payload: s(payload, vars),
                qos: *qos,
                retain: *retain,
                timeout_ms: *timeout_ms,
            }
        }
        Operation::MqttSubscribe { broker, port, client_id, topic, qos, timeout_ms } => Operation::MqttSubscribe {
            broker: s(broker, vars),
            port: *port,
            client_id: s(client_id, vars),
            topic: s(topic, vars),
            qos: *qos,
            timeout_ms: *timeout_ms,
        },
        Operation::MqttUnsubscribe { broker, port, client_id, topic, timeout_ms } => Operation::MqttUnsubscribe {
            broker: s(broker, vars),
            port: *port,
            client_id: s(client_id, vars),
            topic: s(topic, vars),
            timeout_ms: *timeout_ms,
        },
        Operation::MqttDisconnect { broker, port, client_id } => Operation::MqttDisconnect {
            broker: s(broker, vars),
            port: *port,
            client_id: s(client_id, vars),
        },

        Operation::DbConnect { conn_string, db_kind, timeout_ms } => Operation::DbConnect {
            conn_string: s(conn_string, vars),
            db_kind: *db_kind,
            timeout_ms: *timeout_ms,
        },
        Operation::DbQuery { conn_string, db_kind, query, timeout_ms } => Operation::DbQuery {
            conn_string: s(conn_string, vars),
            db_kind: *db_kind,
            query: s(query, vars),
            timeout_ms: *timeout_ms,
        },
        Operation::DbDisconnect { conn_string } => Operation::DbDisconnect { conn_string: s(conn_string, vars) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{CsvDataSource, DataStrategy};
    use crate::plan::model::HttpMethod;

    fn csv_manager() -> DataSourceManager {
        let mut manager = DataSourceManager::new();
        let csv = "id,name\n1,alice\n2,bob\n";
        manager.register("users", CsvDataSource::from_csv_content(csv, DataStrategy::Sequential).unwrap());
        manager
    }

    #[test]
    fn compiles_source_field_placeholders_before_scenario_variables() {
        let template = ScenarioTemplate {
            name: "t".to_string(),
            data_sources: vec!["users".to_string()],
            setup: vec![],
            operations: vec![Operation::HttpRequest {
                url: "http://${host}/u/${users.id}?n=${users.name}".to_string(),
                method: HttpMethod::Get,
                headers: HashMap::new(),
                body: None,
                timeout_ms: 1000,
            }
            .into()],
            teardown: vec![],
            variables: HashMap::new(),
        };
        let mut scenario_vars = HashMap::new();
        scenario_vars.insert("host".to_string(), "example.com".to_string());

        let compiled = compile(&template, 1, &csv_manager(), &scenario_vars).unwrap();
        match &compiled.operations[0] {
            Operation::HttpRequest { url, .. } => assert_eq!(url, "http://example.com/u/2?n=bob"),
            _ => panic!("expected HttpRequest"),
        }
    }

    #[test]
    fn unknown_data_source_fails_compilation() {
        let template = ScenarioTemplate {
            name: "t".to_string(),
            data_sources: vec!["missing".to_string()],
            setup: vec![],
            operations: vec![],
            teardown: vec![],
            variables: HashMap::new(),
        };
        let err = compile(&template, 0, &csv_manager(), &HashMap::new()).unwrap_err();
        assert_eq!(err.category(), "invalid_input");
    }

    #[test]
    fn operation_order_is_preserved() {
        let template = ScenarioTemplate {
            name: "t".to_string(),
            data_sources: vec![],
            setup: vec![],
            operations: vec![
                Operation::TcpConnect { host: "localhost".to_string(), port: 9000, timeout_ms: 500 }.into(),
                Operation::TcpSend { host: "localhost".to_string(), port: 9000, data: "ping".to_string(), timeout_ms: 500 }.into(),
                Operation::TcpReceive { host: "localhost".to_string(), port: 9000, timeout_ms: 500 }.into(),
                Operation::TcpDisconnect { host: "localhost".to_string(), port: 9000 }.into(),
            ],
            teardown: vec![],
            variables: HashMap::new(),
        };
        let compiled = compile(&template, 0, &DataSourceManager::new(), &HashMap::new()).unwrap();
        let kinds: Vec<&str> = compiled.operations.iter().map(|op| op.kind_name()).collect();
        assert_eq!(kinds, vec!["tcp_connect", "tcp_send", "tcp_receive", "tcp_disconnect"]);
    }

    #[test]
    fn scenario_step_serde_roundtrip_carries_extraction_bindings() {
        let step = ScenarioStep {
            operation: Operation::HttpRequest {
                url: "http://example.com/login".to_string(),
                method: HttpMethod::Post,
                headers: HashMap::new(),
                body: None,
                timeout_ms: 1000,
            },
            extract: vec![ExtractionBinding {
                variable: "tok".to_string(),
                rule: ExtractorRule::JsonPath { expression: "token".to_string() },
            }],
        };
        let json = serde_json::to_string(&step).unwrap();
        let parsed: ScenarioStep = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.extract.len(), 1);
        assert_eq!(parsed.extract[0].variable, "tok");
    }

    #[test]
    fn plain_operation_converts_into_a_step_with_no_extraction() {
        let step: ScenarioStep = Operation::WsClose { url: "ws://h".to_string() }.into();
        assert!(step.extract.is_empty());
    }
}
