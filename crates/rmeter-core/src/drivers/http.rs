//! HTTP/TLS driver. Generalizes `http/client.rs`'s `HttpClient::send` from a
//! bespoke `SendRequestInput` onto the unified [`Operation::HttpRequest`],
//! producing a microsecond-canonical [`Outcome`] instead of a
//! `SendRequestOutput`.

use std::time::Instant;

use crate::operation::{Operation, Outcome};
use crate::plan::model::RequestBody;

pub async fn execute(op: &Operation, client: &reqwest::Client) -> Outcome {
    let Operation::HttpRequest { url, method, headers, body, .. } = op else {
        return Outcome::failure(0, "internal", "http driver received a non-http operation");
    };

    let reqwest_method = match reqwest::Method::from_bytes(method.to_string().as_bytes()) {
        Ok(m) => m,
        Err(e) => return Outcome::failure(0, "invalid_input", format!("invalid HTTP method: {e}")),
    };

    let mut builder = client.request(reqwest_method, url);
    for (key, value) in headers {
        builder = builder.header(key, value);
    }

    if let Some(body) = body {
        builder = match body {
            RequestBody::Json(json_str) => match serde_json::from_str::<serde_json::Value>(json_str) {
                Ok(value) => builder.json(&value),
                Err(e) => return Outcome::failure(0, "invalid_input", format!("invalid JSON body: {e}")),
            },
            RequestBody::FormData(pairs) => {
                let params: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                builder.form(&params)
            }
            RequestBody::Raw(raw) => builder.body(raw.clone()),
            RequestBody::Xml(xml) => builder.header("Content-Type", "application/xml").body(xml.clone()),
        };
    }

    let start = Instant::now();
    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) => return Outcome::failure(0, categorize_reqwest_error(&e), e.to_string()),
    };
    let response_time_us = start.elapsed().as_micros() as u64;

    let status = response.status().as_u16();
    let response_headers: std::collections::HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_owned())))
        .collect();

    let body_bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => return Outcome::failure(status as i32, "protocol_error", e.to_string()),
    };
    let body = String::from_utf8_lossy(&body_bytes).into_owned();

    Outcome {
        success: status < 400,
        status_code: status as i32,
        response_time_us,
        body,
        headers: response_headers,
        error: None,
        protocol_data: None,
    }
}

fn categorize_reqwest_error(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection_refused"
    } else if err.is_request() {
        "invalid_input"
    } else {
        "protocol_error"
    }
}
