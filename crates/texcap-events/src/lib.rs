use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use texcap_core::{BatchEvent, EventSink};

pub fn sink_from_env() -> Option<Box<dyn EventSink>> {
    let mode = std::env::var("TEXCAP_EVENTS_SINK").ok()?;
    match mode.trim().to_ascii_lowercase().as_str() {
        "stdout" => Some(Box::new(StdoutSink)),
        "file" => {
            let path = std::env::var("TEXCAP_EVENTS_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())?;
            Some(Box::new(FileSink::new(PathBuf::from(path))))
        }
        "http" => {
            let endpoint = std::env::var("TEXCAP_EVENTS_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())?;
            Some(Box::new(HttpSink::new(endpoint)))
        }
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventEnvelope {
    kind: String,
    texture: Option<String>,
    method: Option<String>,
    duration_ms: Option<u64>,
    detail: Option<String>,
}

impl From<&BatchEvent> for EventEnvelope {
    fn from(event: &BatchEvent) -> Self {
        Self {
            kind: format!("{:?}", event.kind),
            texture: event.texture.clone(),
            method: event.method.map(|m| m.to_string()),
            duration_ms: event.duration_ms,
            detail: event.detail.clone(),
        }
    }
}

pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: BatchEvent) {
        if let Ok(line) = serde_json::to_string(&EventEnvelope::from(&event)) {
            println!("{}", line);
        }
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("creating event log parent directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("opening event log file")?;
        writeln!(file, "{}", line).context("writing event line")?;
        Ok(())
    }
}

impl EventSink for FileSink {
    fn emit(&self, event: BatchEvent) {
        if let Ok(line) = serde_json::to_string(&EventEnvelope::from(&event)) {
            let _ = self.write_line(&line);
        }
    }
}

pub struct HttpSink {
    endpoint: String,
    client: Client,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: Client::new(),
        }
    }
}

impl EventSink for HttpSink {
    fn emit(&self, event: BatchEvent) {
        let payload = EventEnvelope::from(&event);
        let _ = self.client.post(&self.endpoint).json(&payload).send();
    }
}
